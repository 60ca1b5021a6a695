// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! A nested module is selected below and its contents are `pub use`d here, so
//! the rest of the kernel names things as `crate::arch::whatever` regardless
//! of target. Each support module must provide:
//!
//! - the `uassert!` macro,
//! - an `AtomicExt` implementation for `AtomicPtr`.
//!
//! The Arm module additionally provides the hooks into the trap-exit assembly
//! used by `startup`; the host module provides the trap path model the tests
//! run against.

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        #[macro_use]
        pub mod arm_m;
        pub use arm_m::*;
    } else if #[cfg(not(target_os = "none"))] {
        #[macro_use]
        pub mod sim;
        pub use sim::*;
    } else {
        compile_error!("support for this architecture not implemented");
    }
}
