// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv{6,7,8}-M.
//!
//! # Trap paths
//!
//! The trap-entry and trap-exit sequences are assembly, linked in from the
//! board support package. They hold up their end of the contract described in
//! `crate::switch`:
//!
//! - `SVCall` pushes the software half of the `TrapFrame` below the hardware
//!   half the processor stacked, then calls `kern_dispatch_sys_call` with the
//!   frame address and a `SwitchDecision` on the main stack.
//! - Kernel-managed interrupts do the same through `kern_dispatch_event`, with
//!   the interrupt number (`IPSR - 16`) as the event source.
//! - On return, if the flag is set, the frame address and trap kind are stored
//!   through `suspended`, and the process stack pointer is loaded from
//!   `resumed`. The return value is written into the new frame's `r0` if the
//!   resumed context was suspended in a system call. Then the software half is
//!   popped and the exception returns through the saved `EXC_RETURN`.
//!
//! `kern_trap_resume_first` is the tail of that sequence on its own: it starts
//! the first context as if returning to it from an external event.

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::atomic::AtomicExt;
use crate::switch::ContextSaveDesc;

macro_rules! uassert {
    ($cond : expr) => {
        if !$cond {
            panic!("assertion failed: {}", stringify!($cond));
        }
    };
}

extern "C" {
    fn kern_trap_resume_first(first: *const ContextSaveDesc) -> !;
}

/// The system MPU at its fixed address.
pub fn system_mpu() -> &'static smpu::RegisterBlock {
    // Safety: the register block is always mapped, and all accesses to it go
    // through volatile cells.
    unsafe { &*smpu::PTR }
}

/// Puts every kernel entry point at one priority level, below the faults.
///
/// SVCall, PendSV, SysTick and the external interrupts get the lowest
/// priority, so none of them can preempt another and trap handling stays
/// sequential. Fault handlers stay above them so faults in the kernel are
/// caught. Interrupts are never masked; the first context runs with PRIMASK
/// clear.
pub fn set_exception_priorities() {
    // Safety: this only lowers priorities from their reset values, so it
    // cannot cause any preemption that was not already possible.
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        cfg_if::cfg_if! {
            if #[cfg(armv6m)] {
                // Only 4 levels and no configurable faults. SVCall, PendSV and
                // SysTick go to 3.
                scb.shpr[0].modify(|x| x | 0b11 << 30);
                scb.shpr[1].modify(|x| x | 0b11 << 22 | 0b11 << 30);
            } else {
                // MemManage, BusFault and UsageFault to 0, and on.
                scb.shpr[0].write(0x00);
                scb.shpr[1].write(0x00);
                scb.shpr[2].write(0x00);
                scb.shcsr.modify(|x| x | 0b111 << 16);
                // SVCall, PendSV and SysTick to the lowest.
                scb.shpr[7].write(0xFF);
                scb.shpr[10].write(0xFF);
                scb.shpr[11].write(0xFF);
            }
        }

        let nvic = &*cortex_m::peripheral::NVIC::PTR;
        cfg_if::cfg_if! {
            if #[cfg(armv6m)] {
                // Eight 32-bit IPR registers, four priorities each. Only bits
                // 7:6 of each byte are implemented.
                for i in 0..8 {
                    nvic.ipr[i].write(0xFFFF_FFFF);
                }
            } else {
                // The implemented interrupt count, in blocks of 32, minus 1.
                let icb = &*cortex_m::peripheral::ICB::PTR;
                let irq_count = ((icb.ictr.read() as usize & 0xF) + 1) * 32;
                for i in 0..irq_count {
                    nvic.ipr[i].write(0xFFu8);
                }
            }
        }
    }
}

/// Resumes `first`, which must never have run.
///
/// # Safety
///
/// `first` must be a record produced by context creation, and must stay at its
/// address for as long as it can be resumed.
pub unsafe fn start_first_context(first: &ContextSaveDesc) -> ! {
    uassert!(first.trap_kind().is_external_event());
    // Safety: the assembly only reads the record, whose frame we just checked
    // came from context creation.
    unsafe { kern_trap_resume_first(first) }
}

cfg_if::cfg_if! {
    if #[cfg(armv6m)] {
        // The read-modify-write happens with interrupts masked. The kernel's
        // use is at startup, where they are masked anyway, but an application
        // could have raised some priorities for its own ISRs.
        impl<T> AtomicExt for AtomicPtr<T> {
            type Primitive = *mut T;

            #[inline(never)]
            fn swap_polyfill(&self, value: *mut T, ordering: Ordering) -> *mut T {
                let (lo, so) = rmw_ordering(ordering);
                cortex_m::interrupt::free(|_| {
                    let prev = self.load(lo);
                    self.store(value, so);
                    prev
                })
            }
        }

        /// Splits a read-modify-write ordering into the orderings of its load
        /// and store phases.
        #[inline(always)]
        fn rmw_ordering(o: Ordering) -> (Ordering, Ordering) {
            match o {
                Ordering::AcqRel => (Ordering::Acquire, Ordering::Release),
                Ordering::Acquire => (Ordering::Acquire, Ordering::Relaxed),
                Ordering::Release => (Ordering::Relaxed, Ordering::Release),
                _ => (o, o),
            }
        }
    } else {
        impl<T> AtomicExt for AtomicPtr<T> {
            type Primitive = *mut T;

            #[inline(always)]
            fn swap_polyfill(&self, value: *mut T, ordering: Ordering) -> *mut T {
                self.swap(value, ordering)
            }
        }
    }
}
