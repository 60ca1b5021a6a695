// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel, its build script, and
//! the board support code that configures it.

#![cfg_attr(not(test), no_std)]

use core::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

/// A machine word. Everything that crosses the trap boundary (stack pointers,
/// system call arguments and results, saved registers) is exactly this wide.
pub type Word = usize;

/// Size of a `Word` in bytes.
pub const WORD_SIZE: usize = core::mem::size_of::<Word>();

/// Required alignment of every stack pointer handed to or saved by the kernel.
pub const STACK_ALIGNMENT: usize = 8;

/// Number of register-sized arguments the system call path propagates. The
/// trap entry code copies exactly this many words out of the caller's frame;
/// there is no way to pass more, or to pass anything wider than a `Word`.
pub const MAX_SYS_CALL_ARGS: usize = 8;

/// Upper bound on the number of entries in a system call table.
pub const MAX_SYS_CALLS: usize = 128;

/// Number of process identities the protection hardware distinguishes.
pub const MAX_PROCESSES: usize = 8;

/// Privilege level a context executes at.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
pub enum Privilege {
    /// Supervisor mode. Kernel code and trusted services.
    Privileged,
    /// User mode. All process code.
    Unprivileged,
}

impl Privilege {
    pub fn is_privileged(self) -> bool {
        self == Privilege::Privileged
    }
}

/// Hardware-checked process identity.
///
/// Identity 0 is, by convention, the kernel's own process; application
/// processes use 1 and up.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ProcessId(pub u8);

impl ProcessId {
    pub const KERNEL: Self = Self(0);

    /// Checks that this identity can be represented by the protection
    /// hardware.
    pub const fn is_valid(self) -> bool {
        (self.0 as usize) < MAX_PROCESSES
    }
}

/// A set of process identities, one bit per identity.
///
/// In configuration files this is written as a list, e.g. `[1, 2]`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct ProcessSet(u8);

impl ProcessSet {
    pub const EMPTY: Self = Self(0);

    /// Returns the set containing only `pid`.
    ///
    /// # Panics
    ///
    /// If `pid` is out of range for the hardware.
    pub const fn single(pid: ProcessId) -> Self {
        if !pid.is_valid() {
            panic!("process identity out of range");
        }
        Self(1 << pid.0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn with(self, pid: ProcessId) -> Self {
        Self(self.0 | Self::single(pid).0)
    }

    pub const fn contains(self, pid: ProcessId) -> bool {
        pid.is_valid() && self.0 & (1 << pid.0) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl<'de> Deserialize<'de> for ProcessSet {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct SetVisitor;

        impl<'de> Visitor<'de> for SetVisitor {
            type Value = ProcessSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a list of process identities below {MAX_PROCESSES}")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<ProcessSet, A::Error> {
                let mut set = ProcessSet::EMPTY;
                while let Some(pid) = seq.next_element::<ProcessId>()? {
                    if !pid.is_valid() {
                        return Err(de::Error::invalid_value(
                            de::Unexpected::Unsigned(u64::from(pid.0)),
                            &self,
                        ));
                    }
                    set = set.with(pid);
                }
                Ok(set)
            }
        }

        d.deserialize_seq(SetVisitor)
    }
}

/// One of the bus masters whose accesses the protection unit checks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum BusMaster {
    Core0 = 0,
    Core1 = 1,
    Core2 = 2,
    Dma = 3,
}

impl BusMaster {
    pub const COUNT: usize = 4;

    pub const ALL: [BusMaster; Self::COUNT] =
        [BusMaster::Core0, BusMaster::Core1, BusMaster::Core2, BusMaster::Dma];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// One past the highest byte address.
pub const ADDRESS_SPACE_END: u64 = 1 << 32;

/// Half-open address range `[start, end)`, as exported by the linker layout.
///
/// `end` is wider than an address so that a range can run to the top of the
/// address space, with `end == ADDRESS_SPACE_END`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct AddressRange {
    pub start: u32,
    pub end: u64,
}

impl AddressRange {
    pub const fn new(start: u32, end: u64) -> Self {
        Self { start, end }
    }

    pub const fn is_empty(&self) -> bool {
        self.end <= self.start as u64
    }

    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start as u64)
    }

    pub const fn contains(&self, addr: u32) -> bool {
        self.start <= addr && (addr as u64) < self.end
    }

    /// Checks that the range ends within the address space.
    pub const fn is_addressable(&self) -> bool {
        self.end <= ADDRESS_SPACE_END
    }

    /// Last byte of a non-empty, addressable range.
    pub const fn last(&self) -> Option<u32> {
        if self.is_empty() || !self.is_addressable() {
            None
        } else {
            Some((self.end - 1) as u32)
        }
    }

    /// Checks whether `other` lies entirely within this range.
    pub const fn encloses(&self, other: &AddressRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Checks that both boundaries are multiples of `granule`, which must be
    /// a power of two.
    pub const fn is_aligned_to(&self, granule: u32) -> bool {
        let mask = granule - 1;
        self.start & mask == 0 && self.end & mask as u64 == 0
    }
}

/// RAM owned by a single process.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct ProcessPartition {
    pub pid: ProcessId,
    pub range: AddressRange,
}

/// RAM that several processes may write, for explicit communication.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct SharedPartition {
    pub processes: ProcessSet,
    pub range: AddressRange,
}

/// Build-time-fixed memory layout of the image.
///
/// The kernel build script generates one of these from the layout
/// description; nothing in the kernel computes these boundaries.
#[derive(Copy, Clone, Debug)]
pub struct MemoryMap {
    /// Code and read-only data.
    pub rom: AddressRange,
    /// All of RAM.
    pub ram: AddressRange,
    /// Private data and stack partitions, one per process.
    pub processes: &'static [ProcessPartition],
    /// Partitions shared for inter-process communication.
    pub shared: &'static [SharedPartition],
    /// Memory-mapped peripheral windows.
    pub peripherals: &'static [AddressRange],
}

impl MemoryMap {
    /// Number of protection regions the standard policy needs for this map:
    /// one each for ROM and RAM, plus one per partition and window.
    pub const fn region_count(&self) -> usize {
        2 + self.processes.len() + self.shared.len() + self.peripherals.len()
    }

    /// Checks the layout against the protection hardware's limits, so that a
    /// bad layout fails the build rather than the boot.
    pub fn validate(
        &self,
        max_regions: usize,
        granule: u32,
    ) -> Result<(), LayoutError> {
        let check = |what, r: &AddressRange| {
            if r.is_empty() {
                Err(LayoutError::Empty(what, *r))
            } else if !r.is_addressable() {
                Err(LayoutError::BeyondAddressSpace(what, *r))
            } else if !r.is_aligned_to(granule) {
                Err(LayoutError::Misaligned(what, *r))
            } else {
                Ok(())
            }
        };

        check("rom", &self.rom)?;
        check("ram", &self.ram)?;

        let mut seen = ProcessSet::EMPTY;
        for p in self.processes {
            if !p.pid.is_valid() {
                return Err(LayoutError::InvalidProcess(p.pid));
            }
            if seen.contains(p.pid) {
                return Err(LayoutError::DuplicateProcess(p.pid));
            }
            seen = seen.with(p.pid);
            check("process", &p.range)?;
            if !self.ram.encloses(&p.range) {
                return Err(LayoutError::OutsideRam("process", p.range));
            }
        }
        for s in self.shared {
            check("shared", &s.range)?;
            if s.processes.is_empty() {
                return Err(LayoutError::NoProcesses(s.range));
            }
            if !self.ram.encloses(&s.range) {
                return Err(LayoutError::OutsideRam("shared", s.range));
            }
        }
        for p in self.peripherals {
            check("peripheral", p)?;
        }

        let needed = self.region_count();
        if needed > max_regions {
            return Err(LayoutError::TooManyRegions {
                needed,
                available: max_regions,
            });
        }
        Ok(())
    }
}

/// Ways a memory layout can be unusable. The `&str` names the kind of range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LayoutError {
    Empty(&'static str, AddressRange),
    BeyondAddressSpace(&'static str, AddressRange),
    Misaligned(&'static str, AddressRange),
    OutsideRam(&'static str, AddressRange),
    InvalidProcess(ProcessId),
    DuplicateProcess(ProcessId),
    NoProcesses(AddressRange),
    TooManyRegions { needed: usize, available: usize },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty(what, r) => {
                write!(f, "{what} range {:#x}..{:#x} is empty", r.start, r.end)
            }
            Self::BeyondAddressSpace(what, r) => write!(
                f,
                "{what} range {:#x}..{:#x} runs past the address space",
                r.start, r.end
            ),
            Self::Misaligned(what, r) => write!(
                f,
                "{what} range {:#x}..{:#x} is not region-aligned",
                r.start, r.end
            ),
            Self::OutsideRam(what, r) => write!(
                f,
                "{what} partition {:#x}..{:#x} lies outside RAM",
                r.start, r.end
            ),
            Self::InvalidProcess(pid) => {
                write!(f, "process identity {} out of range", pid.0)
            }
            Self::DuplicateProcess(pid) => {
                write!(f, "process {} has two partitions", pid.0)
            }
            Self::NoProcesses(r) => write!(
                f,
                "shared partition {:#x}..{:#x} names no processes",
                r.start, r.end
            ),
            Self::TooManyRegions { needed, available } => write!(
                f,
                "memory map needs {needed} protection regions, hardware has {available}"
            ),
        }
    }
}
