// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Isolation properties of the protection table built from the image's own
//! memory map.

use abi::{BusMaster, Privilege, ProcessId, MAX_PROCESSES};
use kern::mpu::{Access, RegionTable};
use kern::startup::MEMORY_MAP;
use proptest::prelude::*;

fn master() -> impl Strategy<Value = BusMaster> {
    prop::sample::select(BusMaster::ALL.to_vec())
}

proptest! {
    #[test]
    fn partitions_belong_to_their_process(
        which in 0..MEMORY_MAP.processes.len(),
        frac in 0.0f64..1.0,
        other in 0..MAX_PROCESSES as u8,
        master in master(),
    ) {
        let table = RegionTable::configure(&MEMORY_MAP);
        let part = &MEMORY_MAP.processes[which];
        let addr = part.range.start + (((part.range.len() - 1) as f64) * frac) as u32;

        prop_assert!(table.permits(addr, master, Privilege::Unprivileged, part.pid, Access::WRITE));
        prop_assert!(table.permits(addr, master, Privilege::Unprivileged, part.pid, Access::EXECUTE));

        let other = ProcessId(other);
        prop_assume!(other != part.pid);
        let shared = MEMORY_MAP
            .shared
            .iter()
            .any(|s| s.range.contains(addr) && s.processes.contains(other));
        prop_assert_eq!(
            table.permits(addr, master, Privilege::Unprivileged, other, Access::WRITE),
            shared
        );
    }

    #[test]
    fn kernel_executes_only_rom_and_ram(addr in any::<u32>()) {
        let table = RegionTable::configure(&MEMORY_MAP);
        let exec = table.permits(
            addr,
            BusMaster::Core0,
            Privilege::Privileged,
            ProcessId::KERNEL,
            Access::EXECUTE,
        );
        prop_assert_eq!(
            exec,
            MEMORY_MAP.rom.contains(addr) || MEMORY_MAP.ram.contains(addr)
        );
    }

    #[test]
    fn user_mode_never_touches_peripherals(
        window in 0..MEMORY_MAP.peripherals.len(),
        offset in any::<u32>(),
        pid in 0..MAX_PROCESSES as u8,
    ) {
        let table = RegionTable::configure(&MEMORY_MAP);
        let w = MEMORY_MAP.peripherals[window];
        let addr = w.start + (u64::from(offset) % w.len()) as u32;
        for access in [Access::READ, Access::WRITE, Access::EXECUTE] {
            prop_assert!(!table.permits(addr, BusMaster::Dma, Privilege::Unprivileged, ProcessId(pid), access));
        }
        prop_assert!(!table.permits(addr, BusMaster::Core0, Privilege::Privileged, ProcessId::KERNEL, Access::EXECUTE));
    }
}
