// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bulwark kernel core.
//!
//! This is the part of the system that every other part leans on: the
//! representation of an execution context and the protocol for suspending and
//! resuming one, the dispatch of traps (external events and system calls) to
//! their handlers, and the static memory protection configuration that keeps
//! processes out of each other's memory.
//!
//! Scheduling policy is deliberately *not* here. A kernel-aware handler decides
//! whether a trap ends in a context switch, and if it does, which context
//! runs next; this crate only carries that decision to the trap-exit path.
//!
//! # Design principles
//!
//! 1. Static configuration. The set of processes, their memory, and the
//!    protection table are fixed when the image is built.
//! 2. Binary contracts are checked by the compiler. Anything the trap-entry
//!    and trap-exit assembly reads or writes has its layout asserted by
//!    `static_assertions`.
//! 3. Configuration defects are fatal. There is no recovery path for a bad
//!    table or a misaligned stack; we stop, and record why in `fail`.
//!
//! Everything outside `arch` is portable and is tested on the host against
//! `arch::sim`, a model of the trap paths.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

mod atomic;
pub mod context;
pub mod dispatch;
pub mod err;
pub mod fail;
pub mod mpu;
pub mod profiling;
pub mod startup;
pub mod switch;
