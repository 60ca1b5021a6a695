// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static memory protection.
//!
//! The system MPU checks every access from every bus master against one table
//! of up to `smpu::REGION_COUNT` regions. A region grants each bus master
//! separate read / write / execute rights in supervisor and user mode, and
//! may be restricted to a set of process identities. An access is allowed if
//! *any* region covering the address allows it; there is no way for one
//! region to take away what another grants.
//!
//! The table is built once, from the `MemoryMap` fixed at build time, and is
//! then activated in one go:
//!
//! ```text
//! RegionTableBuilder --build--> RegionTable --activate--> ActiveRegionTable
//! ```
//!
//! Nothing can be changed after activation.
//!
//! # Descriptor encoding
//!
//! - `start`: first byte, 32-byte aligned.
//! - `end`: last byte (inclusive), so its low five bits are all ones.
//! - `rights`: bus master `m` owns bits `8m..8m+8`. Within its byte, bits 0-2
//!   are supervisor R/W/X and bits 4-6 are user R/W/X.
//! - `control`: bit 0 valid, bit 1 process filter enable, bits 8-15 the
//!   process set the region applies to when filtered.

use abi::{AddressRange, BusMaster, MemoryMap, Privilege, ProcessId, ProcessSet};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::err::ConfigError;

pub use smpu::{REGION_COUNT, REGION_GRANULE};

bitflags::bitflags! {
    /// Kinds of access a region can grant.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct Access: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl Access {
    pub const RW: Self = Self::READ.union(Self::WRITE);
    pub const RX: Self = Self::READ.union(Self::EXECUTE);
    pub const RWX: Self = Self::RW.union(Self::EXECUTE);
}

bitflags::bitflags! {
    /// Flag bits of a descriptor's control word.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Control: u32 {
        const VALID = 1 << 0;
        const PID_FILTER = 1 << 1;
    }
}

/// Position of the process set in the control word.
const PID_SET_SHIFT: u32 = 8;

/// What one bus master may do in a region.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MasterRights {
    pub supervisor: Access,
    pub user: Access,
}

impl MasterRights {
    pub const NONE: Self = Self::new(Access::empty(), Access::empty());

    pub const fn new(supervisor: Access, user: Access) -> Self {
        Self { supervisor, user }
    }

    pub fn for_mode(&self, mode: Privilege) -> Access {
        match mode {
            Privilege::Privileged => self.supervisor,
            Privilege::Unprivileged => self.user,
        }
    }

    const fn encode(&self) -> u8 {
        self.supervisor.bits() | self.user.bits() << 4
    }

    fn decode(byte: u8) -> Self {
        Self {
            supervisor: Access::from_bits_truncate(byte & 0x7),
            user: Access::from_bits_truncate((byte >> 4) & 0x7),
        }
    }
}

/// A region as the configuration describes it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProtectionRegion {
    range: AddressRange,
    rights: [MasterRights; BusMaster::COUNT],
    pids: Option<ProcessSet>,
}

impl ProtectionRegion {
    /// A region over `range` giving every bus master `rights`, for any
    /// process.
    pub const fn new(range: AddressRange, rights: MasterRights) -> Self {
        Self {
            range,
            rights: [rights; BusMaster::COUNT],
            pids: None,
        }
    }

    /// Overrides the rights of one bus master.
    pub const fn with_master(mut self, master: BusMaster, rights: MasterRights) -> Self {
        self.rights[master.index()] = rights;
        self
    }

    /// Restricts the region to the processes in `pids`.
    pub const fn for_processes(mut self, pids: ProcessSet) -> Self {
        self.pids = Some(pids);
        self
    }

    pub fn range(&self) -> AddressRange {
        self.range
    }

    /// Last byte covered, as the hardware wants it. `None` if the range is
    /// empty or runs past the address space.
    pub fn end_inclusive(&self) -> Option<u32> {
        self.range.last()
    }

    pub fn rights(&self, master: BusMaster) -> MasterRights {
        self.rights[master.index()]
    }

    pub fn processes(&self) -> Option<ProcessSet> {
        self.pids
    }

    /// Checks the range and returns its inclusive end.
    fn check(&self) -> Result<u32, ConfigError> {
        let AddressRange { start, end } = self.range;
        if self.range.is_empty() {
            return Err(ConfigError::EmptyRange { start, end });
        }
        if !self.range.is_addressable() {
            return Err(ConfigError::BeyondAddressSpace { start, end });
        }
        if !self.range.is_aligned_to(REGION_GRANULE) {
            return Err(ConfigError::Misaligned { start, end });
        }
        self.range
            .last()
            .ok_or(ConfigError::EmptyRange { start, end })
    }

    fn encode(&self, end: u32) -> RegionDescriptor {
        let mut rights = 0;
        for (m, r) in self.rights.iter().enumerate() {
            rights |= u32::from(r.encode()) << (8 * m);
        }
        let mut control = Control::VALID.bits();
        if let Some(pids) = self.pids {
            control |= Control::PID_FILTER.bits();
            control |= u32::from(pids.bits()) << PID_SET_SHIFT;
        }
        RegionDescriptor {
            start: self.range.start,
            end,
            rights,
            control,
        }
    }
}

/// One descriptor in the form the hardware takes.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, IntoBytes, FromBytes, Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct RegionDescriptor {
    pub start: u32,
    pub end: u32,
    pub rights: u32,
    pub control: u32,
}

impl RegionDescriptor {
    /// Occupies a slot without covering anything.
    pub const INVALID: Self = Self {
        start: 0,
        end: 0,
        rights: 0,
        control: 0,
    };

    pub fn words(&self) -> [u32; 4] {
        [self.start, self.end, self.rights, self.control]
    }

    pub fn is_valid(&self) -> bool {
        Control::from_bits_truncate(self.control).contains(Control::VALID)
    }

    pub fn covers(&self, addr: u32) -> bool {
        self.is_valid() && self.start <= addr && addr <= self.end
    }

    /// Process set the region is restricted to, if any.
    pub fn processes(&self) -> Option<ProcessSet> {
        let control = Control::from_bits_truncate(self.control);
        control
            .contains(Control::PID_FILTER)
            .then(|| ProcessSet::from_bits((self.control >> PID_SET_SHIFT) as u8))
    }

    pub fn rights(&self, master: BusMaster) -> MasterRights {
        MasterRights::decode((self.rights >> (8 * master.index())) as u8)
    }

    /// Decides one access the way the hardware would, for this descriptor
    /// alone.
    pub fn grants(
        &self,
        addr: u32,
        master: BusMaster,
        mode: Privilege,
        pid: ProcessId,
        access: Access,
    ) -> bool {
        if !self.covers(addr) {
            return false;
        }
        if let Some(set) = self.processes() {
            if !set.contains(pid) {
                return false;
            }
        }
        self.rights(master).for_mode(mode).contains(access)
    }
}

/// Accumulates regions in priority order.
#[derive(Clone, Debug)]
pub struct RegionTableBuilder {
    descriptors: [RegionDescriptor; REGION_COUNT],
    len: usize,
}

impl RegionTableBuilder {
    pub const fn new() -> Self {
        Self {
            descriptors: [RegionDescriptor::INVALID; REGION_COUNT],
            len: 0,
        }
    }

    pub fn try_push(&mut self, region: ProtectionRegion) -> Result<(), ConfigError> {
        let end = region.check()?;
        let slot = self
            .descriptors
            .get_mut(self.len)
            .ok_or(ConfigError::TooManyRegions)?;
        *slot = region.encode(end);
        self.len += 1;
        Ok(())
    }

    /// # Panics
    ///
    /// If `region` is misaligned or empty, or the table is full.
    pub fn push(mut self, region: ProtectionRegion) -> Self {
        if let Err(e) = self.try_push(region) {
            crate::fail::config_defect(e);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn build(self) -> RegionTable {
        RegionTable {
            descriptors: self.descriptors,
            len: self.len,
        }
    }
}

impl Default for RegionTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A complete table, not yet loaded into the hardware.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegionTable {
    descriptors: [RegionDescriptor; REGION_COUNT],
    len: usize,
}

impl RegionTable {
    /// Builds the table for `map` under the standard policy:
    ///
    /// 1. ROM: read and execute, for everyone.
    /// 2. RAM: everything in supervisor mode, read only in user mode.
    /// 3. Each process partition: everything in user mode, for that process.
    /// 4. Each shared partition: read and write in user mode, for the
    ///    processes that share it.
    /// 5. Each peripheral window: read and write in supervisor mode only,
    ///    never executable.
    ///
    /// All bus masters get the same rights.
    pub fn try_configure(map: &MemoryMap) -> Result<Self, ConfigError> {
        let mut b = RegionTableBuilder::new();

        b.try_push(ProtectionRegion::new(
            map.rom,
            MasterRights::new(Access::RX, Access::RX),
        ))?;
        b.try_push(ProtectionRegion::new(
            map.ram,
            MasterRights::new(Access::RWX, Access::READ),
        ))?;

        let inside_ram = |r: &AddressRange| map.ram.encloses(r);

        for p in map.processes {
            if !p.pid.is_valid() {
                return Err(ConfigError::InvalidProcess(p.pid));
            }
            if !inside_ram(&p.range) {
                return Err(ConfigError::OutsideRam {
                    start: p.range.start,
                    end: p.range.end,
                });
            }
            b.try_push(
                ProtectionRegion::new(
                    p.range,
                    MasterRights::new(Access::empty(), Access::RWX),
                )
                .for_processes(ProcessSet::single(p.pid)),
            )?;
        }

        for s in map.shared {
            let AddressRange { start, end } = s.range;
            if s.processes.is_empty() {
                return Err(ConfigError::NoProcesses { start, end });
            }
            if !inside_ram(&s.range) {
                return Err(ConfigError::OutsideRam { start, end });
            }
            b.try_push(
                ProtectionRegion::new(
                    s.range,
                    MasterRights::new(Access::empty(), Access::RW),
                )
                .for_processes(s.processes),
            )?;
        }

        for &window in map.peripherals {
            b.try_push(ProtectionRegion::new(
                window,
                MasterRights::new(Access::RW, Access::empty()),
            ))?;
        }

        Ok(b.build())
    }

    /// `try_configure`, treating any error as fatal.
    pub fn configure(map: &MemoryMap) -> Self {
        match Self::try_configure(map) {
            Ok(t) => t,
            Err(e) => crate::fail::config_defect(e),
        }
    }

    /// The regions in use, in the order they were added.
    pub fn regions(&self) -> &[RegionDescriptor] {
        &self.descriptors[..self.len]
    }

    /// Every slot, unused ones included, exactly as it will be loaded.
    pub fn as_bytes(&self) -> &[u8] {
        self.descriptors.as_bytes()
    }

    /// Decides an access under the any-region-grants rule.
    ///
    /// The hardware checks each bus cycle for one kind of access, so `access`
    /// must be exactly one of `READ`, `WRITE` or `EXECUTE`.
    ///
    /// # Panics
    ///
    /// If `access` is empty or names more than one kind.
    pub fn permits(
        &self,
        addr: u32,
        master: BusMaster,
        mode: Privilege,
        pid: ProcessId,
        access: Access,
    ) -> bool {
        uassert!(access.bits().count_ones() == 1);
        self.regions()
            .iter()
            .any(|d| d.grants(addr, master, mode, pid, access))
    }

    /// Loads the table into `hw` and turns enforcement on.
    ///
    /// Every slot is written, so nothing left over from before reset can stay
    /// valid. Stale fault flags are cleared before enabling.
    pub fn activate(
        self,
        hw: &mut impl MpuHardware,
    ) -> Result<ActiveRegionTable, ConfigError> {
        if hw.is_enabled() {
            return Err(ConfigError::ProtectionActive);
        }
        hw.disable();
        for (i, d) in self.descriptors.iter().enumerate() {
            hw.write_region(i, d.words());
        }
        hw.clear_faults();
        hw.enable();
        Ok(ActiveRegionTable { table: self })
    }
}

/// A table that is in force. It can be inspected but not changed.
#[derive(Debug)]
pub struct ActiveRegionTable {
    table: RegionTable,
}

impl ActiveRegionTable {
    pub fn regions(&self) -> &[RegionDescriptor] {
        self.table.regions()
    }

    pub fn permits(
        &self,
        addr: u32,
        master: BusMaster,
        mode: Privilege,
        pid: ProcessId,
        access: Access,
    ) -> bool {
        self.table.permits(addr, master, mode, pid, access)
    }
}

/// The operations activation needs from the protection hardware.
pub trait MpuHardware {
    fn is_enabled(&self) -> bool;
    /// Puts the unit in a known disabled state, with earlier bus traffic
    /// drained, ready for descriptors to be written.
    fn disable(&mut self);
    fn write_region(&mut self, index: usize, words: [u32; 4]);
    fn clear_faults(&mut self);
    fn enable(&mut self);
}

impl MpuHardware for &smpu::RegisterBlock {
    fn is_enabled(&self) -> bool {
        smpu::is_enabled(self)
    }

    fn disable(&mut self) {
        // Safety: only reached from activation, which has checked that
        // enforcement is not on yet.
        unsafe { smpu::disable(self) }
    }

    fn write_region(&mut self, index: usize, words: [u32; 4]) {
        // Safety: activation only writes descriptors after checking that
        // enforcement is off.
        unsafe { smpu::load_region(self, index, words) }
    }

    fn clear_faults(&mut self) {
        // Safety: nothing has run under this table yet, so there are no
        // faults worth keeping.
        unsafe { smpu::clear_errors(self) }
    }

    fn enable(&mut self) {
        // Safety: the table being enabled was checked by construction.
        unsafe { smpu::enable(self) }
    }
}
