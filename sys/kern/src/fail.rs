// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recording of fatal kernel failures for debuggers.
//!
//! Binary interface:
//!
//! - `KERNEL_HAS_FAILED` is a `bool`, false from reset and set to true when the
//!   kernel reaches `die`, explicitly or through a `panic!`. Any other value
//!   means memory was corrupted on the way down.
//!
//! - `KERNEL_EPITAPH` is a `u8` buffer into which `die` writes as much of the
//!   failure reason (UTF-8) as fits. Trailing NULs are padding.
//!
//! Every failed `uassert!` lands here through the panic handler, with the
//! failed condition as its text. Configuration errors come straight through
//! `config_defect` and read `config: <error>`.

use core::fmt::{self, Display, Write};
use core::sync::atomic::Ordering;

use crate::err::ConfigError;

#[used]
static mut KERNEL_HAS_FAILED: bool = false;

const EPITAPH_LEN: usize = 128;

#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // No `AtomicBool::swap` on ARMv6-M. We're only here with interrupts
    // effectively off and at most once per boot.
    //
    // Safety: single access site, never concurrent.
    let previous_fail = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if previous_fail {
        // Recursive failure. Panicking again would only recurse further.
        loop {
            core::sync::atomic::fence(Ordering::SeqCst);
        }
    }

    // Safety: only the one execution that flipped the flag gets here.
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

/// Records `msg` and stops the kernel.
#[inline(always)]
pub fn die(msg: impl Display) -> ! {
    die_impl(&msg)
}

#[inline(never)]
fn die_impl(msg: &dyn Display) -> ! {
    let buf = begin_epitaph();
    let mut writer = Eulogist { dest: buf };
    write!(writer, "{msg}").ok();

    loop {
        core::sync::atomic::fence(Ordering::SeqCst);
    }
}

/// Stops the kernel over a defect in the image's configuration.
///
/// The epitaph reads `config: ` followed by the error. On target it goes
/// straight to `die`, with none of the panic machinery in between; hosted
/// builds panic with the same text, so tests can match on it.
#[track_caller]
pub fn config_defect(err: ConfigError) -> ! {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "none")] {
            die(ConfigEpitaph(err))
        } else {
            panic!("{}", ConfigEpitaph(err))
        }
    }
}

struct ConfigEpitaph(ConfigError);

impl Display for ConfigEpitaph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config: {}", self.0)
    }
}

/// Writer that truncates silently once its buffer is full.
struct Eulogist<'a> {
    dest: &'a mut [u8],
}

impl Write for Eulogist<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = core::mem::take(&mut self.dest).split_at_mut(n);
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eulogist_truncates() {
        let mut buf = [0u8; 8];
        let mut w = Eulogist { dest: &mut buf };
        write!(w, "stack {} too small", 64).unwrap();
        assert_eq!(&buf, b"stack 64");
    }

    #[test]
    fn eulogist_appends_pieces() {
        let mut buf = [0u8; 16];
        let mut w = Eulogist { dest: &mut buf };
        w.write_str("ab").unwrap();
        w.write_str("cd").unwrap();
        assert_eq!(&buf[..5], b"abcd\0");
    }

    #[test]
    fn config_epitaph_names_the_error() {
        let mut buf = [0u8; EPITAPH_LEN];
        let mut w = Eulogist { dest: &mut buf };
        write!(w, "{}", ConfigEpitaph(ConfigError::TooManyRegions)).unwrap();
        let text = b"config: out of protection region descriptors";
        assert_eq!(&buf[..text.len()], text);
        assert_eq!(buf[text.len()], 0);
    }

    #[test]
    #[should_panic(expected = "config: protection unit enabled before activation")]
    fn config_defect_panics_with_the_error_on_host() {
        config_defect(ConfigError::ProtectionActive);
    }
}
