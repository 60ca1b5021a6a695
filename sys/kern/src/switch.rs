// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The records shared between kernel Rust code and the trap paths.
//!
//! # Suspension and resumption
//!
//! On every trap, the entry code pushes a `TrapFrame` onto the stack of the
//! context that was running. It then calls into the dispatcher with a fresh
//! `SwitchDecision`. When the handler returns:
//!
//! - If it did not request a switch, the frame is popped right where it was
//!   pushed. After a system call, `ret_val_sys_call` is placed in the frame's
//!   return register first; the record pointers are never read.
//! - If it did request a switch, entry code stores the frame address and the
//!   trap kind into `*suspended`. Exit code then loads the stack pointer from
//!   `*resumed`, writes `ret_val_sys_call` into the frame's return register if
//!   that context was suspended by a system call, and pops the frame.
//!
//! A context that was suspended by an external event is resumed with its frame
//! untouched, so it cannot tell it was interrupted.
//!
//! # Layout
//!
//! The assembly hardcodes the offsets of every field here. They are exported
//! as constants and checked below; changing a struct without changing the
//! assembly fails the build rather than the system.

use core::mem::{offset_of, size_of};

use abi::{Privilege, Word, STACK_ALIGNMENT, WORD_SIZE};
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::context::ExecutionContext;

/// Why a context stopped running.
///
/// This is a single signed word: `EXTERNAL_EVENT` for an asynchronous event,
/// or the (non-negative) index of the system call the context made.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct TrapKind(isize);

impl TrapKind {
    pub const EXTERNAL_EVENT: Self = Self(-1);

    /// Trap kind of a context suspended in system call `index`.
    pub const fn sys_call(index: usize) -> Self {
        if index > isize::MAX as usize {
            panic!("system call index out of range");
        }
        Self(index as isize)
    }

    pub const fn from_raw(raw: isize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> isize {
        self.0
    }

    pub const fn is_external_event(self) -> bool {
        self.0 < 0
    }

    pub const fn sys_call_index(self) -> Option<usize> {
        if self.0 < 0 {
            None
        } else {
            Some(self.0 as usize)
        }
    }
}

/// The saved state of a context that is not running.
///
/// Written only by the trap-entry path when the context is suspended, and read
/// only by the trap-exit path when it is resumed. Kernel code can look, but the
/// fields have no setters.
#[derive(Debug, Eq, PartialEq)]
#[repr(C)]
pub struct ContextSaveDesc {
    stack_pointer: Word,
    trap_kind: TrapKind,
}

impl ContextSaveDesc {
    pub(crate) const fn new(stack_pointer: Word, trap_kind: TrapKind) -> Self {
        Self {
            stack_pointer,
            trap_kind,
        }
    }

    /// Address of the `TrapFrame` at the top of the suspended stack.
    pub fn stack_pointer(&self) -> Word {
        self.stack_pointer
    }

    pub fn trap_kind(&self) -> TrapKind {
        self.trap_kind
    }

    /// Does what the trap-entry assembly does to `*decision.suspended`.
    #[cfg(not(target_os = "none"))]
    pub(crate) fn record_suspension(&mut self, stack_pointer: Word, kind: TrapKind) {
        self.stack_pointer = stack_pointer;
        self.trap_kind = kind;
    }
}

pub const SAVE_DESC_STACK_POINTER_OFFSET: usize =
    offset_of!(ContextSaveDesc, stack_pointer);
pub const SAVE_DESC_TRAP_KIND_OFFSET: usize =
    offset_of!(ContextSaveDesc, trap_kind);

const_assert_eq!(size_of::<ContextSaveDesc>(), 2 * WORD_SIZE);
const_assert_eq!(SAVE_DESC_STACK_POINTER_OFFSET, 0);
const_assert_eq!(SAVE_DESC_TRAP_KIND_OFFSET, WORD_SIZE);

/// Outcome of a handler, as the trap-exit path consumes it.
///
/// A fresh one is made for every trap. A kernel-aware handler that wants a
/// different context to run calls `request_switch` (or `switch_between`) and
/// returns `true`.
#[derive(Debug)]
#[repr(C)]
pub struct SwitchDecision {
    ret_val_sys_call: Word,
    suspended: *mut ContextSaveDesc,
    resumed: *const ContextSaveDesc,
}

pub const DECISION_RET_VAL_OFFSET: usize =
    offset_of!(SwitchDecision, ret_val_sys_call);
pub const DECISION_SUSPENDED_OFFSET: usize =
    offset_of!(SwitchDecision, suspended);
pub const DECISION_RESUMED_OFFSET: usize = offset_of!(SwitchDecision, resumed);

const_assert_eq!(size_of::<SwitchDecision>(), 3 * WORD_SIZE);
const_assert_eq!(DECISION_RET_VAL_OFFSET, 0);
const_assert_eq!(DECISION_SUSPENDED_OFFSET, WORD_SIZE);
const_assert_eq!(DECISION_RESUMED_OFFSET, 2 * WORD_SIZE);

impl SwitchDecision {
    pub const fn new() -> Self {
        Self {
            ret_val_sys_call: 0,
            suspended: core::ptr::null_mut(),
            resumed: core::ptr::null(),
        }
    }

    /// Sets the value returned to the context that made the system call, or
    /// to the resumed context if it was suspended in one.
    pub fn set_sys_call_result(&mut self, value: Word) {
        self.ret_val_sys_call = value;
    }

    pub fn sys_call_result(&self) -> Word {
        self.ret_val_sys_call
    }

    /// Names the record the running context is saved into, and the record of
    /// the context to run instead.
    ///
    /// The records are captured by address. Both must stay put until the trap
    /// exits, which in practice means they live in statics.
    pub fn request_switch(
        &mut self,
        suspended: &mut ContextSaveDesc,
        resumed: &ContextSaveDesc,
    ) {
        self.suspended = suspended;
        self.resumed = resumed;
    }

    /// `request_switch` for the records of two contexts.
    pub fn switch_between(
        &mut self,
        suspended: &mut ExecutionContext,
        resumed: &ExecutionContext,
    ) {
        debug_assert!(resumed.saved_state_is_consistent());
        self.request_switch(suspended.save_desc_mut(), resumed.save_desc());
    }

    pub fn is_switch_requested(&self) -> bool {
        !self.suspended.is_null() && !self.resumed.is_null()
    }

    pub fn suspended(&self) -> *mut ContextSaveDesc {
        self.suspended
    }

    pub fn resumed(&self) -> *const ContextSaveDesc {
        self.resumed
    }
}

impl Default for SwitchDecision {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers the trap-entry code saves by hand.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, IntoBytes, FromBytes, Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct SoftwareFrame {
    /// `EXC_RETURN` value the exception was entered with.
    pub exc_return: Word,
    /// Thread-mode `CONTROL`; bit 0 (nPRIV) set means unprivileged.
    pub control: Word,
    pub r4_r11: [Word; 8],
}

/// Registers the processor stacks on exception entry.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, IntoBytes, FromBytes, Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct HardwareFrame {
    pub r0: Word,
    pub r1: Word,
    pub r2: Word,
    pub r3: Word,
    pub r12: Word,
    pub lr: Word,
    pub pc: Word,
    pub xpsr: Word,
}

/// Everything a suspended context has on top of its stack.
///
/// The saved stack pointer points at `software`.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, IntoBytes, FromBytes, Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct TrapFrame {
    pub software: SoftwareFrame,
    pub hardware: HardwareFrame,
}

pub const TRAP_FRAME_WORDS: usize = 18;
pub const TRAP_FRAME_SIZE: usize = size_of::<TrapFrame>();

const_assert_eq!(TRAP_FRAME_SIZE, TRAP_FRAME_WORDS * WORD_SIZE);
const_assert_eq!(TRAP_FRAME_SIZE % STACK_ALIGNMENT, 0);
const_assert_eq!(offset_of!(TrapFrame, hardware), 10 * WORD_SIZE);

/// Return to thread mode, process stack, no floating point state.
pub const EXC_RETURN_THREAD_PSP: Word = 0xFFFF_FFFD;

/// nPRIV bit of `CONTROL`.
pub const CONTROL_NPRIV: Word = 1 << 0;

/// Thumb state bit of `xPSR`, the only one a new context needs.
pub const INITIAL_XPSR: Word = 1 << 24;

/// Link register of a fresh context. Not a valid code address, so returning
/// from the entry point faults instead of running off into memory.
pub const POISONED_LR: Word = Word::MAX;

impl TrapFrame {
    /// The frame a context would have been suspended with by an external event
    /// just before executing its first instruction at `entry`.
    pub fn initial(entry: Word, arg: Word, privilege: Privilege) -> Self {
        let control = if privilege.is_privileged() {
            0
        } else {
            CONTROL_NPRIV
        };
        Self {
            software: SoftwareFrame {
                exc_return: EXC_RETURN_THREAD_PSP,
                control,
                r4_r11: [0; 8],
            },
            hardware: HardwareFrame {
                r0: arg,
                lr: POISONED_LR,
                pc: entry | 1,
                xpsr: INITIAL_XPSR,
                ..HardwareFrame::default()
            },
        }
    }

    pub fn is_privileged(&self) -> bool {
        self.software.control & CONTROL_NPRIV == 0
    }
}
