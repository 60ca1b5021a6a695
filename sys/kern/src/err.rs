// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration errors.
//!
//! Every one of these is a defect in the image, not a runtime condition, and
//! the startup paths treat them as fatal. They are values rather than panics
//! so that the checks themselves can be tested.

use core::fmt;

use abi::{ProcessId, Word};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// A region boundary is not on the protection unit's 32-byte granule.
    Misaligned { start: u32, end: u64 },
    /// A region covers no memory.
    EmptyRange { start: u32, end: u64 },
    /// A region runs past the end of the address space.
    BeyondAddressSpace { start: u32, end: u64 },
    /// More regions than the protection unit has descriptors.
    TooManyRegions,
    /// A process identity the protection unit can't represent.
    InvalidProcess(ProcessId),
    /// A process or shared partition that isn't part of RAM.
    OutsideRam { start: u32, end: u64 },
    /// A shared partition nobody may use.
    NoProcesses { start: u32, end: u64 },
    /// A stack without room for the initial trap frame.
    StackTooSmall { size: usize, needed: usize },
    /// A stack whose boundaries are not 8-byte aligned.
    MisalignedStack { base: Word, top: Word },
    /// Activation was attempted with enforcement already on.
    ProtectionActive,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Misaligned { start, end } => {
                write!(
                    f,
                    "region {start:#x}..{end:#x} is not {}-byte aligned",
                    smpu::REGION_GRANULE
                )
            }
            Self::EmptyRange { start, end } => {
                write!(f, "region {start:#x}..{end:#x} is empty")
            }
            Self::BeyondAddressSpace { start, end } => {
                write!(f, "region {start:#x}..{end:#x} ends past the address space")
            }
            Self::TooManyRegions => {
                write!(f, "out of protection region descriptors")
            }
            Self::InvalidProcess(pid) => {
                write!(f, "process identity {} out of range", pid.0)
            }
            Self::OutsideRam { start, end } => {
                write!(f, "partition {start:#x}..{end:#x} lies outside RAM")
            }
            Self::NoProcesses { start, end } => {
                write!(f, "shared partition {start:#x}..{end:#x} has no users")
            }
            Self::StackTooSmall { size, needed } => {
                write!(f, "stack of {size} bytes, need at least {needed}")
            }
            Self::MisalignedStack { base, top } => {
                write!(f, "stack {base:#x}..{top:#x} is not 8-byte aligned")
            }
            Self::ProtectionActive => {
                write!(f, "protection unit enabled before activation")
            }
        }
    }
}
