// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use abi::{AddressRange, MemoryMap, ProcessPartition, SharedPartition};
use serde::Deserialize;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    expose_m_profile();

    let map = load_memory_map()?;
    check_memory_map(&map)?;
    generate_memory_map(&map)?;

    Ok(())
}

/// Exposes `cfg(armv6m)` on targets whose atomics lack read-modify-write
/// operations.
fn expose_m_profile() {
    println!("cargo:rustc-check-cfg=cfg(armv6m)");
    if let Ok(target) = env::var("TARGET") {
        if target.starts_with("thumbv6m") {
            println!("cargo:rustc-cfg=armv6m");
        }
    }
}

/// Description of the image layout, as written in the RON file.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryMapConfig {
    rom: AddressRange,
    ram: AddressRange,
    #[serde(default)]
    processes: Vec<ProcessPartition>,
    #[serde(default)]
    shared: Vec<SharedPartition>,
    #[serde(default)]
    peripherals: Vec<AddressRange>,
}

fn load_memory_map() -> Result<MemoryMapConfig, Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-env-changed=BULWARK_MEMORY_MAP");
    let text = match env::var("BULWARK_MEMORY_MAP") {
        Ok(text) => text,
        Err(_) => {
            let dir = PathBuf::from(env::var_os("CARGO_MANIFEST_DIR").ok_or(
                "CARGO_MANIFEST_DIR not set",
            )?);
            let path = dir.join("memory-map.ron");
            println!("cargo:rerun-if-changed={}", path.display());
            fs::read_to_string(path)?
        }
    };
    Ok(ron::de::from_str(&text)?)
}

/// Validates the layout with the same limits the kernel enforces at boot.
fn check_memory_map(
    map: &MemoryMapConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let map = MemoryMap {
        rom: map.rom,
        ram: map.ram,
        processes: Vec::leak(map.processes.clone()),
        shared: Vec::leak(map.shared.clone()),
        peripherals: Vec::leak(map.peripherals.clone()),
    };
    map.validate(smpu::REGION_COUNT, smpu::REGION_GRANULE)
        .map_err(|e| e.to_string().into())
}

fn range_expr(r: &AddressRange) -> String {
    format!("abi::AddressRange::new({:#010x}, {:#010x})", r.start, r.end)
}

fn generate_memory_map(
    map: &MemoryMapConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let out = PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR not set")?);
    let mut file = File::create(out.join("memory_map.rs"))?;

    writeln!(file, "// Generated by build.rs from the memory map description.")?;
    writeln!(file, "pub static MEMORY_MAP: abi::MemoryMap = abi::MemoryMap {{")?;
    writeln!(file, "    rom: {},", range_expr(&map.rom))?;
    writeln!(file, "    ram: {},", range_expr(&map.ram))?;

    writeln!(file, "    processes: &[")?;
    for p in &map.processes {
        writeln!(
            file,
            "        abi::ProcessPartition {{ pid: abi::ProcessId({}), range: {} }},",
            p.pid.0,
            range_expr(&p.range),
        )?;
    }
    writeln!(file, "    ],")?;

    writeln!(file, "    shared: &[")?;
    for s in &map.shared {
        writeln!(
            file,
            "        abi::SharedPartition {{ processes: abi::ProcessSet::from_bits({:#010b}), range: {} }},",
            s.processes.bits(),
            range_expr(&s.range),
        )?;
    }
    writeln!(file, "    ],")?;

    writeln!(file, "    peripherals: &[")?;
    for p in &map.peripherals {
        writeln!(file, "        {},", range_expr(p))?;
    }
    writeln!(file, "    ],")?;
    writeln!(file, "}};")?;

    Ok(())
}
