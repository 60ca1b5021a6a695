// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end suspension and resumption through the host trap model.

use std::cell::Cell;

use abi::{Privilege, ProcessId, Word};
use kern::arch::{resume, take_trap, PendingTrap, SimCore};
use kern::context::{ContextStack, ExecutionContext};
use kern::dispatch::{Dispatcher, EventHandler, EventTable, SysCall, SysCallTable};
use kern::switch::{ContextSaveDesc, SwitchDecision, TrapKind, TRAP_FRAME_SIZE};

extern "C" fn entry_a(_: Word) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

extern "C" fn entry_b(_: Word) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

thread_local! {
    static SUSPEND: Cell<*mut ContextSaveDesc> = const { Cell::new(core::ptr::null_mut()) };
    static RESUME: Cell<*const ContextSaveDesc> = const { Cell::new(core::ptr::null()) };
}

/// Points the handlers below at a pair of records.
fn aim(suspend: &mut ExecutionContext, resume: &ExecutionContext) {
    SUSPEND.with(|c| c.set(suspend.save_desc_ptr()));
    RESUME.with(|c| c.set(resume.save_desc()));
}

fn request(d: &mut SwitchDecision) {
    let s = SUSPEND.with(Cell::get);
    let r = RESUME.with(Cell::get);
    // Safety: `aim` took both from live contexts in the calling test.
    unsafe { d.request_switch(&mut *s, &*r) };
}

fn switch_now(d: &mut SwitchDecision) -> bool {
    request(d);
    true
}

fn aim_but_stay(d: &mut SwitchDecision) -> bool {
    request(d);
    false
}

fn yield_with(d: &mut SwitchDecision, value: Word) -> bool {
    d.set_sys_call_result(value + 1);
    request(d);
    true
}

fn answer_but_stay(d: &mut SwitchDecision) -> bool {
    d.set_sys_call_result(0x600D);
    request(d);
    false
}

static EVENTS: EventTable<2> = EventTable::new()
    .with(0, EventHandler::KernelAware(switch_now))
    .with(1, EventHandler::KernelAware(aim_but_stay));

static CALLS: [SysCall; 2] = [SysCall::Args1(yield_with), SysCall::Args0(answer_but_stay)];

static HANDLERS: Dispatcher = Dispatcher::new(&EVENTS, SysCallTable::new(&CALLS));

const SWITCH: PendingTrap = PendingTrap::Event(0);
const STAY: PendingTrap = PendingTrap::Event(1);

fn context(entry: extern "C" fn(Word) -> !, arg: Word) -> ExecutionContext {
    let stack: &'static mut ContextStack<128> = Box::leak(Box::new(ContextStack::new()));
    ExecutionContext::new(stack, entry, arg, Privilege::Unprivileged, ProcessId(1))
}

fn busy(mut core: SimCore, seed: Word) -> SimCore {
    core.r0 = seed;
    core.r1 = seed + 1;
    core.r2 = seed + 2;
    core.r3 = seed + 3;
    core.r4_r11 = [seed + 4, seed + 5, seed + 6, seed + 7, seed + 8, seed + 9, seed + 10, seed + 11];
    core.r12 = seed + 12;
    core.lr = 0x0800_4001;
    core.pc = 0x0800_5000 + seed;
    core
}

#[test]
fn suspend_resume_round_trip() {
    let mut a = context(entry_a, 1);
    let mut b = context(entry_b, 2);

    let running_a = busy(unsafe { resume(a.save_desc(), 0) }, 0x100);
    let sp_a = running_a.sp;

    aim(&mut a, &b);
    let running_b = unsafe { take_trap(&running_a, SWITCH, &HANDLERS) };
    assert_eq!(running_b.pc, entry_b as *const () as Word | 1);
    assert_eq!(running_b.r0, 2);
    assert_eq!(a.save_desc().stack_pointer(), sp_a - TRAP_FRAME_SIZE);
    assert_eq!(a.save_desc().trap_kind(), TrapKind::EXTERNAL_EVENT);
    assert!(a.saved_state_is_consistent());

    let running_b = busy(running_b, 0x200);
    aim(&mut b, &a);
    let back_in_a = unsafe { take_trap(&running_b, SWITCH, &HANDLERS) };
    assert_eq!(back_in_a, running_a);
    assert!(b.saved_state_is_consistent());
}

#[test]
fn sys_call_value_reaches_resumed_context() {
    let mut a = context(entry_a, 1);
    let mut b = context(entry_b, 7);

    let mut running_a = unsafe { resume(a.save_desc(), 0) };
    running_a.r0 = 41;

    aim(&mut a, &b);
    let running_b = unsafe { take_trap(&running_a, PendingTrap::SysCall(0), &HANDLERS) };
    assert_eq!(a.save_desc().trap_kind(), TrapKind::sys_call(0));
    // `b` was suspended by an event (its creation), so it doesn't get the
    // value meant for a system call.
    assert_eq!(running_b.r0, 7);

    let mut running_b = running_b;
    running_b.r0 = 99;
    aim(&mut b, &a);
    let back_in_a = unsafe { take_trap(&running_b, PendingTrap::SysCall(0), &HANDLERS) };
    assert_eq!(back_in_a.r0, 100);
    assert_eq!(back_in_a.sp, running_a.sp);
    assert_eq!(back_in_a.pc, running_a.pc);
    assert_eq!(back_in_a.r12, 0);
}

#[test]
fn no_switch_leaves_records_alone() {
    let a = context(entry_a, 1);
    let mut b = context(entry_b, 2);
    let c = context(entry_b, 3);

    let b_sp = b.save_desc().stack_pointer();
    let b_kind = b.save_desc().trap_kind();

    let running_a = busy(unsafe { resume(a.save_desc(), 0) }, 0x300);
    aim(&mut b, &c);

    let after_event = unsafe { take_trap(&running_a, STAY, &HANDLERS) };
    assert_eq!(after_event, running_a);

    let after_call = unsafe { take_trap(&running_a, PendingTrap::SysCall(1), &HANDLERS) };
    assert_eq!(after_call.r0, 0x600D);
    assert_eq!(after_call.sp, running_a.sp);
    assert_eq!(after_call.pc, running_a.pc);

    assert_eq!(b.save_desc().stack_pointer(), b_sp);
    assert_eq!(b.save_desc().trap_kind(), b_kind);
}

#[test]
fn disciplined_sharing_preserves_peer() {
    let mut peer = context(entry_a, 1);
    let mut sharer =
        unsafe { ExecutionContext::sharing_stack_of(&peer, entry_b, 2, Privilege::Privileged) };

    // Run the sharer while the peer stays suspended.
    let running = unsafe { resume(sharer.save_desc(), 0) };
    assert_eq!(running.pc, entry_b as *const () as Word | 1);
    assert!(running.is_privileged());
    assert_eq!(running.sp, peer.save_desc().stack_pointer());

    let running = busy(running, 0x400);
    aim(&mut sharer, &peer);
    let running_peer = unsafe { take_trap(&running, SWITCH, &HANDLERS) };
    assert_eq!(running_peer.pc, entry_a as *const () as Word | 1);
    assert_eq!(running_peer.r0, 1);
    assert!(!running_peer.is_privileged());
}

#[test]
fn running_both_sharers_clobbers_a_frame() {
    let mut peer = context(entry_a, 1);
    let sharer =
        unsafe { ExecutionContext::sharing_stack_of(&peer, entry_b, 2, Privilege::Privileged) };

    // Break the rule: resume the peer while the sharer is still resumable.
    let mut running = unsafe { resume(peer.save_desc(), 0) };
    // Some stack in use, then a trap.
    running.sp -= TRAP_FRAME_SIZE;
    running.pc = 0x0800_6000;

    aim(&mut peer, &sharer);
    let resumed = unsafe { take_trap(&running, SWITCH, &HANDLERS) };

    // The peer's trap frame landed on top of the sharer's, so the "sharer"
    // comes back as the peer.
    assert_eq!(peer.save_desc().stack_pointer(), sharer.save_desc().stack_pointer());
    assert_ne!(resumed.pc, entry_b as *const () as Word | 1);
    assert_eq!(resumed.pc, 0x0800_6000);
}
