// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host model of the trap paths.
//!
//! Nothing here runs code in a context. Instead a `SimCore` stands for the
//! register file of a core in thread mode, and the functions below do to it,
//! and to the stacks in memory, exactly what the trap-entry and trap-exit
//! assembly does on hardware. This is enough to check the whole creation,
//! suspension and resumption protocol on the host.

use core::sync::atomic::{AtomicPtr, Ordering};

use abi::{Word, STACK_ALIGNMENT};

use crate::atomic::AtomicExt;
use crate::dispatch::{Dispatcher, Outcome, SysCallArgs};
use crate::switch::{
    ContextSaveDesc, HardwareFrame, SoftwareFrame, TrapFrame, TrapKind,
    CONTROL_NPRIV, TRAP_FRAME_SIZE,
};

macro_rules! uassert {
    ($cond:expr) => {
        assert!($cond)
    };
}

impl<T> AtomicExt for AtomicPtr<T> {
    type Primitive = *mut T;

    fn swap_polyfill(&self, value: *mut T, ordering: Ordering) -> *mut T {
        self.swap(value, ordering)
    }
}

/// Thread-mode register state of a simulated core.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SimCore {
    /// Process stack pointer.
    pub sp: Word,
    pub r0: Word,
    pub r1: Word,
    pub r2: Word,
    pub r3: Word,
    pub r4_r11: [Word; 8],
    pub r12: Word,
    pub lr: Word,
    pub pc: Word,
    pub xpsr: Word,
    pub control: Word,
    pub exc_return: Word,
}

impl SimCore {
    pub fn is_privileged(&self) -> bool {
        self.control & CONTROL_NPRIV == 0
    }

    /// The frame trap entry would push for this state.
    pub fn frame(&self) -> TrapFrame {
        TrapFrame {
            software: SoftwareFrame {
                exc_return: self.exc_return,
                control: self.control,
                r4_r11: self.r4_r11,
            },
            hardware: HardwareFrame {
                r0: self.r0,
                r1: self.r1,
                r2: self.r2,
                r3: self.r3,
                r12: self.r12,
                lr: self.lr,
                pc: self.pc,
                xpsr: self.xpsr,
            },
        }
    }

    fn from_frame(frame: &TrapFrame, sp: Word) -> Self {
        let h = &frame.hardware;
        Self {
            sp,
            r0: h.r0,
            r1: h.r1,
            r2: h.r2,
            r3: h.r3,
            r4_r11: frame.software.r4_r11,
            r12: h.r12,
            lr: h.lr,
            pc: h.pc,
            xpsr: h.xpsr,
            control: frame.software.control,
            exc_return: frame.software.exc_return,
        }
    }

    /// The words a system call made from this state would receive.
    pub fn sys_call_args(&self) -> SysCallArgs {
        SysCallArgs::from_frame(&self.frame())
    }
}

/// A trap about to be taken by a simulated core.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PendingTrap {
    /// An interrupt from this event source.
    Event(usize),
    /// The running code executed a system call with this index. The index is
    /// placed in `r12` as the calling convention requires.
    SysCall(usize),
}

/// Trap exit: pops the frame `desc` points at and returns the resulting core
/// state. `ret_val_sys_call` lands in `r0` if `desc` was suspended in a system
/// call, and is ignored otherwise.
///
/// # Safety
///
/// `desc` must point at a frame in live memory.
pub unsafe fn resume(desc: &ContextSaveDesc, ret_val_sys_call: Word) -> SimCore {
    let sp = desc.stack_pointer();
    uassert!(sp % STACK_ALIGNMENT == 0);
    let frame = sp as *mut TrapFrame;
    // Safety: our caller promises the frame is there.
    unsafe {
        if desc.trap_kind().sys_call_index().is_some() {
            (*frame).hardware.r0 = ret_val_sys_call;
        }
        SimCore::from_frame(&frame.read(), sp + TRAP_FRAME_SIZE)
    }
}

/// Trap entry, first half: pushes `core`'s frame onto its stack and returns
/// the new stack pointer.
///
/// # Safety
///
/// The `TRAP_FRAME_SIZE` bytes below `core.sp` must be writable stack memory.
pub unsafe fn push_trap_frame(core: &SimCore) -> Word {
    uassert!(core.sp % STACK_ALIGNMENT == 0);
    uassert!(core.sp >= TRAP_FRAME_SIZE);
    let sp = core.sp - TRAP_FRAME_SIZE;
    // Safety: our caller promises the memory is there.
    unsafe { (sp as *mut TrapFrame).write(core.frame()) };
    sp
}

/// Takes `trap` on `core`, runs it through `dispatcher`, and returns whatever
/// core state trap exit leaves behind. That is either the trapping context
/// again or, if a switch was requested, the resumed one.
///
/// # Safety
///
/// As for `push_trap_frame` and `resume`; in addition, any records named by a
/// switch decision must be live.
pub unsafe fn take_trap(
    core: &SimCore,
    trap: PendingTrap,
    dispatcher: &Dispatcher,
) -> SimCore {
    let mut core = *core;
    let kind = match trap {
        PendingTrap::Event(_) => TrapKind::EXTERNAL_EVENT,
        PendingTrap::SysCall(index) => {
            core.r12 = index;
            TrapKind::sys_call(index)
        }
    };

    // Safety: passed through from our caller.
    let sp = unsafe { push_trap_frame(&core) };

    let outcome = match trap {
        PendingTrap::Event(source) => dispatcher.dispatch_event(source),
        PendingTrap::SysCall(_) => {
            // Safety: we just wrote this frame.
            let frame = unsafe { &*(sp as *const TrapFrame) };
            dispatcher.dispatch_sys_call(
                frame.hardware.r12,
                &SysCallArgs::from_frame(frame),
            )
        }
    };

    match outcome {
        Outcome::Return { sys_call_result } => {
            // The trapping context's frame is popped where it was pushed.
            let here = ContextSaveDesc::new(sp, kind);
            // Safety: we just wrote this frame.
            unsafe { resume(&here, sys_call_result.unwrap_or_default()) }
        }
        Outcome::Switch(decision) => {
            // Safety: the dispatcher checked both pointers are set, and our
            // caller promises they are live.
            unsafe {
                (*decision.suspended()).record_suspension(sp, kind);
                resume(&*decision.resumed(), decision.sys_call_result())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{create_context, ContextStack};
    use crate::dispatch::{EventHandler, EventTable, SysCall, SysCallTable};
    use crate::switch::{SwitchDecision, POISONED_LR};
    use abi::Privilege;

    extern "C" fn entry(_: Word) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn nothing() {}

    fn echo(d: &mut SwitchDecision, a: Word, b: Word) -> bool {
        d.set_sys_call_result(a ^ b);
        false
    }

    static EVENTS: EventTable<1> =
        EventTable::new().with(0, EventHandler::Simple(nothing));
    static CALLS: [SysCall; 1] = [SysCall::Args2(echo)];
    static HANDLERS: Dispatcher =
        Dispatcher::new(&EVENTS, SysCallTable::new(&CALLS));

    fn started() -> SimCore {
        let stack: &'static mut ContextStack<64> =
            Box::leak(Box::new(ContextStack::new()));
        let top = stack.range().top;
        unsafe {
            let desc = create_context(entry, 5, top, Privilege::Unprivileged);
            resume(&desc, 0)
        }
    }

    #[test]
    fn first_resume_lands_at_entry() {
        let core = started();
        assert_eq!(core.pc, entry as *const () as Word | 1);
        assert_eq!(core.lr, POISONED_LR);
        assert_eq!(core.r0, 5);
        assert!(!core.is_privileged());
    }

    #[test]
    fn event_without_switch_is_invisible() {
        let mut core = started();
        core.r0 = 0x11;
        core.r4_r11 = [1, 2, 3, 4, 5, 6, 7, 8];
        core.pc = 0x0800_2001;

        let after = unsafe { take_trap(&core, PendingTrap::Event(0), &HANDLERS) };
        assert_eq!(after, core);
    }

    #[test]
    fn sys_call_without_switch_returns_value() {
        let mut core = started();
        core.r0 = 0b1100;
        core.r1 = 0b1010;

        let after =
            unsafe { take_trap(&core, PendingTrap::SysCall(0), &HANDLERS) };
        assert_eq!(after.r0, 0b0110);
        assert_eq!(after.r12, 0);
        assert_eq!(after.sp, core.sp);
        assert_eq!(after.r1, core.r1);
    }

    #[test]
    fn resume_ignores_value_after_event() {
        let core = started();
        let sp = unsafe { push_trap_frame(&core) };
        let desc = ContextSaveDesc::new(sp, TrapKind::EXTERNAL_EVENT);
        let again = unsafe { resume(&desc, 0xDEAD) };
        assert_eq!(again, core);
    }
}
