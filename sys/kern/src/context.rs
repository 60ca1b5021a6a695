// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execution contexts and their creation.
//!
//! A new context is made to look exactly like one that was suspended by an
//! external event just before its first instruction: a `TrapFrame` sits below
//! the top of its stack, and its `ContextSaveDesc` points at it. The first
//! resume then goes through the ordinary trap-exit path, and nothing special
//! is needed to start a context.
//!
//! # Shared stacks
//!
//! `create_context_share_stack` lays a new frame directly beneath a suspended
//! peer's frame, in the peer's stack. The two contexts then alias one stack,
//! and at most one of them may be running or resumable at any time. This layer
//! does not check that; whoever schedules the pair must. If the peer runs and
//! pushes anything, the sharer's frame is overwritten.

use core::mem::size_of;

use abi::{Privilege, ProcessId, Word, STACK_ALIGNMENT};

use crate::err::ConfigError;
use crate::switch::{ContextSaveDesc, TrapFrame, TrapKind, TRAP_FRAME_SIZE};

/// Code a new context starts running. It takes one argument and never returns.
pub type EntryPoint = extern "C" fn(Word) -> !;

/// Lays out a trap frame below `initial_stack_top` and returns the record that
/// resumes it.
///
/// On first resume, `entry` runs in `privilege` mode with `arg` as its first
/// argument and nothing below it on the stack.
///
/// # Panics
///
/// If `initial_stack_top` is not `STACK_ALIGNMENT`-aligned, or is too low to
/// hold a frame.
///
/// # Safety
///
/// The `TRAP_FRAME_SIZE` bytes below `initial_stack_top` must be writable,
/// and not in use by anything else.
pub unsafe fn create_context(
    entry: EntryPoint,
    arg: Word,
    initial_stack_top: Word,
    privilege: Privilege,
) -> ContextSaveDesc {
    uassert!(initial_stack_top % STACK_ALIGNMENT == 0);
    uassert!(initial_stack_top >= TRAP_FRAME_SIZE);

    let sp = initial_stack_top - TRAP_FRAME_SIZE;
    let frame = TrapFrame::initial(entry as *const () as Word, arg, privilege);
    // Safety: caller vouches for the memory; `sp` is aligned because both the
    // top and the frame size are.
    unsafe {
        core::ptr::write(sp as *mut TrapFrame, frame);
    }
    ContextSaveDesc::new(sp, TrapKind::EXTERNAL_EVENT)
}

/// Like `create_context`, but the new frame goes directly beneath `peer`'s
/// saved frame, in `peer`'s stack.
///
/// # Safety
///
/// As for `create_context`, for the memory below `peer`'s frame. In addition,
/// the caller takes on the mutual exclusion described in the module docs.
pub unsafe fn create_context_share_stack(
    peer: &ContextSaveDesc,
    entry: EntryPoint,
    arg: Word,
    privilege: Privilege,
) -> ContextSaveDesc {
    // Safety: passed through from our caller.
    unsafe { create_context(entry, arg, peer.stack_pointer(), privilege) }
}

/// Address range of a stack, `base` (lowest address) to `top` (one past the
/// highest).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StackRange {
    pub base: Word,
    pub top: Word,
}

impl StackRange {
    pub const fn new(base: Word, top: Word) -> Self {
        Self { base, top }
    }

    pub const fn len(&self) -> usize {
        self.top.saturating_sub(self.base)
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks whether `sp` is a possible stack pointer for this stack. `top`
    /// itself is included, as the pointer of an empty stack.
    pub const fn contains(&self, sp: Word) -> bool {
        self.base <= sp && sp <= self.top
    }

    /// Checks whether a whole `TrapFrame` at `sp` lies inside this stack.
    pub const fn holds_frame_at(&self, sp: Word) -> bool {
        self.contains(sp) && self.top - sp >= TRAP_FRAME_SIZE
    }

    pub const fn overlaps(&self, other: &StackRange) -> bool {
        self.base < other.top && other.base < self.top
    }

    /// Checks that a fresh context can be created on this stack.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base % STACK_ALIGNMENT != 0 || self.top % STACK_ALIGNMENT != 0 {
            return Err(ConfigError::MisalignedStack {
                base: self.base,
                top: self.top,
            });
        }
        if self.len() < TRAP_FRAME_SIZE {
            return Err(ConfigError::StackTooSmall {
                size: self.len(),
                needed: TRAP_FRAME_SIZE,
            });
        }
        Ok(())
    }
}

/// Statically allocated stack memory for one context.
///
/// `N` is the size in 8-byte units, which also gives the alignment.
#[repr(C)]
pub struct ContextStack<const N: usize>([u64; N]);

impl<const N: usize> ContextStack<N> {
    pub const SIZE: usize = N * size_of::<u64>();

    pub const fn new() -> Self {
        Self([0; N])
    }

    pub fn range(&mut self) -> StackRange {
        let base = self.0.as_mut_ptr() as Word;
        StackRange::new(base, base + Self::SIZE)
    }
}

impl<const N: usize> Default for ContextStack<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// One independently schedulable thread of control.
#[derive(Debug)]
pub struct ExecutionContext {
    save: ContextSaveDesc,
    stack: StackRange,
    privilege: Privilege,
    pid: ProcessId,
}

impl ExecutionContext {
    /// Creates a context on a stack that nothing else can ever touch.
    pub fn new<const N: usize>(
        stack: &'static mut ContextStack<N>,
        entry: EntryPoint,
        arg: Word,
        privilege: Privilege,
        pid: ProcessId,
    ) -> Self {
        let range = stack.range();
        // Safety: the stack is exclusively ours for the rest of time, which is
        // all `from_raw_stack` needs.
        unsafe { Self::from_raw_stack(range, entry, arg, privilege, pid) }
    }

    /// Creates a context on an arbitrary stack.
    ///
    /// # Panics
    ///
    /// If the stack fails `StackRange::validate`.
    ///
    /// # Safety
    ///
    /// The memory in `stack` must be writable and must be used by nothing but
    /// this context.
    pub unsafe fn from_raw_stack(
        stack: StackRange,
        entry: EntryPoint,
        arg: Word,
        privilege: Privilege,
        pid: ProcessId,
    ) -> Self {
        if let Err(e) = stack.validate() {
            crate::fail::config_defect(e);
        }
        // Safety: validated above, and the caller vouches for the memory.
        let save = unsafe { create_context(entry, arg, stack.top, privilege) };
        Self {
            save,
            stack,
            privilege,
            pid,
        }
    }

    /// Creates a context on `peer`'s stack, beneath `peer`'s saved frame. The
    /// new context belongs to the same process as `peer`.
    ///
    /// # Panics
    ///
    /// If `peer`'s saved state is inconsistent, or there is no room for
    /// another frame in its stack.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `peer` and the new context are never
    /// both runnable; see the module docs.
    pub unsafe fn sharing_stack_of(
        peer: &ExecutionContext,
        entry: EntryPoint,
        arg: Word,
        privilege: Privilege,
    ) -> Self {
        uassert!(peer.saved_state_is_consistent());
        let room = peer.save.stack_pointer() - peer.stack.base;
        if room < TRAP_FRAME_SIZE {
            crate::fail::config_defect(ConfigError::StackTooSmall {
                size: room,
                needed: TRAP_FRAME_SIZE,
            });
        }
        // Safety: there is room, and exclusion is on our caller.
        let save = unsafe {
            create_context_share_stack(&peer.save, entry, arg, privilege)
        };
        Self {
            save,
            stack: peer.stack,
            privilege,
            pid: peer.pid,
        }
    }

    pub fn save_desc(&self) -> &ContextSaveDesc {
        &self.save
    }

    pub(crate) fn save_desc_mut(&mut self) -> &mut ContextSaveDesc {
        &mut self.save
    }

    /// Address of the saved record, for trap code that stores into it on
    /// suspension. Writing through it from anywhere else breaks the resume
    /// path.
    ///
    /// There is deliberately no safe `&mut` access from outside the kernel;
    /// two records can't be swapped behind the trap paths' back:
    ///
    /// ```compile_fail
    /// # fn f(a: &mut kern::context::ExecutionContext, b: &mut kern::context::ExecutionContext) {
    /// core::mem::swap(a.save_desc_mut(), b.save_desc_mut());
    /// # }
    /// ```
    pub fn save_desc_ptr(&mut self) -> *mut ContextSaveDesc {
        &mut self.save
    }

    pub fn stack(&self) -> StackRange {
        self.stack
    }

    pub fn privilege(&self) -> Privilege {
        self.privilege
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Checks that the saved stack pointer is aligned and points at a full
    /// frame within the stack. Only meaningful while the context is not
    /// running.
    pub fn saved_state_is_consistent(&self) -> bool {
        let sp = self.save.stack_pointer();
        sp % STACK_ALIGNMENT == 0 && self.stack.holds_frame_at(sp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switch::POISONED_LR;

    extern "C" fn idle(_: Word) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn leak_stack<const N: usize>() -> &'static mut ContextStack<N> {
        Box::leak(Box::new(ContextStack::new()))
    }

    fn frame_of(ctx: &ExecutionContext) -> TrapFrame {
        unsafe { core::ptr::read(ctx.save_desc().stack_pointer() as *const TrapFrame) }
    }

    #[test]
    fn new_context_frame_sits_at_top() {
        let stack = leak_stack::<64>();
        let top = stack.range().top;
        let ctx = ExecutionContext::new(
            stack,
            idle,
            0xABCD,
            Privilege::Unprivileged,
            ProcessId(2),
        );

        assert_eq!(ctx.save_desc().stack_pointer(), top - TRAP_FRAME_SIZE);
        assert_eq!(ctx.save_desc().trap_kind(), TrapKind::EXTERNAL_EVENT);
        assert!(ctx.saved_state_is_consistent());
        assert_eq!(ctx.pid(), ProcessId(2));

        let frame = frame_of(&ctx);
        assert_eq!(frame.hardware.r0, 0xABCD);
        assert_eq!(frame.hardware.pc & !1, idle as *const () as Word);
        assert_eq!(frame.hardware.lr, POISONED_LR);
        assert!(!frame.is_privileged());
    }

    #[test]
    #[should_panic]
    fn misaligned_top_is_fatal() {
        let stack = leak_stack::<64>();
        let top = stack.range().top - 4;
        unsafe {
            create_context(idle, 0, top, Privilege::Privileged);
        }
    }

    #[test]
    #[should_panic]
    fn top_below_one_frame_is_fatal() {
        unsafe {
            create_context(idle, 0, TRAP_FRAME_SIZE - STACK_ALIGNMENT, Privilege::Privileged);
        }
    }

    #[test]
    fn stack_validation() {
        assert_eq!(
            StackRange::new(0x1000, 0x1004).validate(),
            Err(ConfigError::MisalignedStack {
                base: 0x1000,
                top: 0x1004
            })
        );
        assert_eq!(
            StackRange::new(0x1000, 0x1008).validate(),
            Err(ConfigError::StackTooSmall {
                size: 8,
                needed: TRAP_FRAME_SIZE
            })
        );
        assert_eq!(
            StackRange::new(0x1000, 0x1000 + TRAP_FRAME_SIZE).validate(),
            Ok(())
        );
    }

    #[test]
    #[should_panic]
    fn tiny_raw_stack_is_fatal() {
        let stack = leak_stack::<1>();
        unsafe {
            ExecutionContext::from_raw_stack(
                stack.range(),
                idle,
                0,
                Privilege::Privileged,
                ProcessId::KERNEL,
            );
        }
    }

    #[test]
    fn stack_range_geometry() {
        let a = StackRange::new(0x100, 0x200);
        assert!(a.contains(0x100));
        assert!(a.contains(0x200));
        assert!(!a.contains(0x201));
        assert!(a.holds_frame_at(0x200 - TRAP_FRAME_SIZE));
        assert!(!a.holds_frame_at(0x200 - TRAP_FRAME_SIZE + STACK_ALIGNMENT));
        assert!(!a.holds_frame_at(0x200));
        assert!(!a.holds_frame_at(0x0F8));
        assert!(a.overlaps(&StackRange::new(0x1F8, 0x300)));
        assert!(!a.overlaps(&StackRange::new(0x200, 0x300)));
        assert_eq!(a.len(), 0x100);
    }

    #[test]
    fn sharer_frame_sits_beneath_peer() {
        let stack = leak_stack::<64>();
        let peer = ExecutionContext::new(
            stack,
            idle,
            1,
            Privilege::Unprivileged,
            ProcessId(3),
        );
        let sharer = unsafe {
            ExecutionContext::sharing_stack_of(&peer, idle, 2, Privilege::Privileged)
        };

        assert_eq!(
            sharer.save_desc().stack_pointer(),
            peer.save_desc().stack_pointer() - TRAP_FRAME_SIZE
        );
        assert_eq!(sharer.stack(), peer.stack());
        assert_eq!(sharer.pid(), ProcessId(3));
        assert!(sharer.saved_state_is_consistent());

        // The peer's frame is untouched.
        assert_eq!(frame_of(&peer).hardware.r0, 1);
        assert_eq!(frame_of(&sharer).hardware.r0, 2);
        assert!(frame_of(&sharer).is_privileged());
    }

    #[test]
    fn saved_pointer_short_of_a_frame_is_inconsistent() {
        let stack = leak_stack::<64>();
        let top = stack.range().top;
        let mut ctx = ExecutionContext::new(
            stack,
            idle,
            0,
            Privilege::Unprivileged,
            ProcessId(1),
        );
        assert!(ctx.saved_state_is_consistent());

        for sp in [top, top - STACK_ALIGNMENT, top - TRAP_FRAME_SIZE + STACK_ALIGNMENT] {
            ctx.save_desc_mut().record_suspension(sp, TrapKind::EXTERNAL_EVENT);
            assert!(!ctx.saved_state_is_consistent(), "sp {sp:#x} accepted");
        }
        ctx.save_desc_mut()
            .record_suspension(top - 2 * TRAP_FRAME_SIZE, TrapKind::EXTERNAL_EVENT);
        assert!(ctx.saved_state_is_consistent());
    }

    #[test]
    #[should_panic]
    fn sharing_without_room_is_fatal() {
        // Exactly one frame's worth of stack.
        let stack = leak_stack::<{ TRAP_FRAME_SIZE / 8 }>();
        let peer = ExecutionContext::new(
            stack,
            idle,
            0,
            Privilege::Privileged,
            ProcessId::KERNEL,
        );
        unsafe {
            ExecutionContext::sharing_stack_of(&peer, idle, 0, Privilege::Privileged);
        }
    }
}
