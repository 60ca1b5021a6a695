// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register-level access to the system memory protection unit (SMPU).
//!
//! Unlike the core-local MPU, the SMPU sits on the system bus and checks
//! accesses from every bus master (all cores and the DMA engine) against a
//! single table of region descriptors. Each descriptor is four words:
//!
//! - `WORD0`: start address, 32-byte granular (low five bits read as zero).
//! - `WORD1`: inclusive end address (low five bits read as one).
//! - `WORD2`: access rights, one byte per bus master.
//! - `WORD3`: valid bit and process-identity filter.
//!
//! The encoding of `WORD2` and `WORD3` is owned by the kernel; this crate
//! only moves words in and out of the hardware.
//!
//! An access is granted if *any* valid descriptor that covers the address
//! grants it. An access no descriptor grants is terminated with a bus error
//! and recorded in the per-port error registers.

#![cfg_attr(target_os = "none", no_std)]

use core::mem::offset_of;

use static_assertions::const_assert_eq;
use vcell::VolatileCell;

/// Base address of the SMPU register block.
pub const SMPU_BASE: usize = 0x4000_D000;

/// Number of region descriptors implemented by the hardware.
pub const REGION_COUNT: usize = 16;

/// Region boundaries are multiples of this many bytes.
pub const REGION_GRANULE: u32 = 32;

/// Number of slave ports with their own error capture registers.
pub const PORT_COUNT: usize = 8;

/// SMPU register block.
#[repr(C)]
pub struct RegisterBlock {
    /// Control / Error Status Register.
    pub cesr: VolatileCell<u32>,
    _reserved0: [u32; 3],
    /// Error capture registers, one pair per slave port.
    pub error: [ErrorRegisters; PORT_COUNT],
    _reserved1: [u32; 236],
    /// Region descriptors.
    pub rgd: [RegionRegisters; REGION_COUNT],
}

/// Error Address / Error Detail register pair.
#[repr(C)]
pub struct ErrorRegisters {
    pub ear: VolatileCell<u32>,
    pub edr: VolatileCell<u32>,
}

/// The four words of one region descriptor.
#[repr(C)]
pub struct RegionRegisters {
    pub word0: VolatileCell<u32>,
    pub word1: VolatileCell<u32>,
    pub word2: VolatileCell<u32>,
    pub word3: VolatileCell<u32>,
}

const_assert_eq!(offset_of!(RegisterBlock, error), 0x010);
const_assert_eq!(offset_of!(RegisterBlock, rgd), 0x400);
const_assert_eq!(core::mem::size_of::<RegisterBlock>(), 0x500);

bitflags::bitflags! {
    /// Bits in the Control / Error Status Register.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Cesr: u32 {
        /// Global enable. While clear, no access is checked.
        const VLD = 1 << 0;
        /// Per-port error flags, write one to clear.
        const SPERR = 0xFF << 24;
    }
}

/// Pointer to the SMPU, in the style of the `cortex_m` peripheral `PTR`s.
pub const PTR: *const RegisterBlock = SMPU_BASE as *const RegisterBlock;

impl RegisterBlock {
    /// Produces a register block in ordinary memory, with every register
    /// reading as zero. This is how the host-side tests stand in for the
    /// hardware.
    #[cfg(not(target_os = "none"))]
    pub fn detached() -> Self {
        // Safety: the block is made entirely of `u32`s and `VolatileCell<u32>`s,
        // for which all-zeroes is a valid value.
        unsafe { core::mem::zeroed() }
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        fn barrier_before_config() {
            cortex_m::asm::dmb();
        }

        fn barrier_after_enable() {
            cortex_m::asm::dsb();
            cortex_m::asm::isb();
        }
    } else {
        fn barrier_before_config() {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }

        fn barrier_after_enable() {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}

/// Checks the global enable bit.
pub fn is_enabled(smpu: &RegisterBlock) -> bool {
    Cesr::from_bits_truncate(smpu.cesr.get()).contains(Cesr::VLD)
}

/// Turns enforcement off.
///
/// # Safety
///
/// While disabled nothing is checked, so every bus master gets unrestricted
/// access. Only call this before any context has been started.
pub unsafe fn disable(smpu: &RegisterBlock) {
    // Outstanding transactions must complete before the table changes under
    // them.
    barrier_before_config();
    smpu.cesr.set(0);
}

/// Writes the four words of descriptor `index`.
///
/// # Safety
///
/// Changing a descriptor while enforcement is enabled lets the hardware
/// observe a half-written descriptor. Only call this while disabled.
///
/// # Panics
///
/// If `index` is not below `REGION_COUNT`.
pub unsafe fn load_region(smpu: &RegisterBlock, index: usize, words: [u32; 4]) {
    let rgd = &smpu.rgd[index];
    rgd.word0.set(words[0]);
    rgd.word1.set(words[1]);
    rgd.word2.set(words[2]);
    rgd.word3.set(words[3]);
}

/// Reads back the four words of descriptor `index`.
pub fn read_region(smpu: &RegisterBlock, index: usize) -> [u32; 4] {
    let rgd = &smpu.rgd[index];
    [rgd.word0.get(), rgd.word1.get(), rgd.word2.get(), rgd.word3.get()]
}

/// Clears every per-port error flag, preserving the enable bit.
///
/// # Safety
///
/// This discards fault information the fault handler may not have seen yet.
pub unsafe fn clear_errors(smpu: &RegisterBlock) {
    let keep = smpu.cesr.get() & Cesr::VLD.bits();
    smpu.cesr.set(keep | Cesr::SPERR.bits());
}

/// Turns enforcement on for every bus master.
///
/// # Safety
///
/// From this point on, any access not granted by a loaded descriptor faults,
/// including accesses from the caller.
pub unsafe fn enable(smpu: &RegisterBlock) {
    smpu.cesr.set(Cesr::VLD.bits());
    // The new configuration must be in effect before the next instruction
    // fetch.
    barrier_after_enable();
}

/// Details of an access the SMPU rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ErrorReport {
    pub address: u32,
    pub write: bool,
    pub supervisor: bool,
    pub master: u8,
    pub pid: u8,
    /// Descriptors that covered the address (and so were consulted).
    pub regions_hit: u16,
}

/// Reads the captured error for slave port `port`, if its error flag is set.
pub fn error_report(smpu: &RegisterBlock, port: usize) -> Option<ErrorReport> {
    let regs = smpu.error.get(port)?;
    if smpu.cesr.get() & (1 << (24 + port)) == 0 {
        return None;
    }
    let edr = regs.edr.get();
    Some(ErrorReport {
        address: regs.ear.get(),
        write: edr & 1 != 0,
        supervisor: edr & (1 << 1) != 0,
        master: ((edr >> 4) & 0xF) as u8,
        pid: ((edr >> 8) & 0xFF) as u8,
        regions_hit: (edr >> 16) as u16,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_then_enable() {
        let smpu = RegisterBlock::detached();
        unsafe {
            disable(&smpu);
            load_region(&smpu, 3, [0x2000_0000, 0x2000_FFFF, 0x77, 0x1]);
            clear_errors(&smpu);
            enable(&smpu);
        }
        assert!(is_enabled(&smpu));
        assert_eq!(smpu.cesr.get(), Cesr::VLD.bits());
        assert_eq!(read_region(&smpu, 3), [0x2000_0000, 0x2000_FFFF, 0x77, 0x1]);
        assert_eq!(read_region(&smpu, 2), [0; 4]);
    }

    #[test]
    fn error_report_decodes_detail() {
        let smpu = RegisterBlock::detached();
        smpu.cesr.set(1 << 26);
        smpu.error[2].ear.set(0x2001_0004);
        smpu.error[2].edr.set(0b1 | 0b10 | 1 << 4 | 3 << 8 | 0x0006 << 16);

        assert_eq!(error_report(&smpu, 0), None);
        assert_eq!(
            error_report(&smpu, 2),
            Some(ErrorReport {
                address: 0x2001_0004,
                write: true,
                supervisor: true,
                master: 1,
                pid: 3,
                regions_hit: 0x0006,
            })
        );
    }

    #[test]
    #[should_panic]
    fn load_region_out_of_range() {
        let smpu = RegisterBlock::detached();
        unsafe { load_region(&smpu, REGION_COUNT, [0; 4]) }
    }
}
