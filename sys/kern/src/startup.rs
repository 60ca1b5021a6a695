// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.

use abi::MemoryMap;

use crate::mpu::{ActiveRegionTable, MpuHardware, RegionTable};

include!(concat!(env!("OUT_DIR"), "/memory_map.rs"));

/// Builds the protection table for `map` and puts it in force.
///
/// # Panics
///
/// On any configuration error, or if `mpu` was already enabled.
pub fn protect_memory(
    map: &MemoryMap,
    mpu: &mut impl MpuHardware,
) -> ActiveRegionTable {
    let table = RegionTable::configure(map);
    match table.activate(mpu) {
        Ok(active) => active,
        Err(e) => crate::fail::config_defect(e),
    }
}

/// The main kernel entry point.
///
/// Board code does its own clock and peripheral setup, creates its contexts,
/// and then calls this with the handlers and the context to run first. This
/// protects memory according to `MEMORY_MAP`, installs `dispatcher` for the
/// trap paths, and resumes `first`.
///
/// # Safety
///
/// Must be called once, in privileged thread mode on the main stack, before
/// anything else has enabled the protection unit. `first` must stay at its
/// address for as long as it can be resumed.
#[cfg(target_os = "none")]
pub unsafe fn start_kernel(
    dispatcher: &'static crate::dispatch::Dispatcher,
    first: &crate::context::ExecutionContext,
) -> ! {
    crate::arch::set_exception_priorities();

    let mut mpu = crate::arch::system_mpu();
    let _active = protect_memory(&MEMORY_MAP, &mut mpu);

    crate::dispatch::install(dispatcher);

    // Safety: passed through from our caller.
    unsafe { crate::arch::start_first_context(first.save_desc()) }
}
