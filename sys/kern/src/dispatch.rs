// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Routing of traps to their handlers.
//!
//! There are two kinds of trap. An *external event* comes from an interrupt
//! source and is looked up by source number in an `EventTable`. A *system
//! call* is a deliberate trap by the running context, looked up by index in a
//! `SysCallTable`, with up to `abi::MAX_SYS_CALL_ARGS` word arguments taken
//! from the caller's registers.
//!
//! Either way the handler gets a fresh `SwitchDecision`. A *simple* event
//! handler never sees it, and cannot cause a switch. A *kernel-aware* handler
//! (and every system call) may fill it in and return `true` to have a
//! different context resumed.
//!
//! A trap nobody is registered for is a configuration defect and is fatal, as
//! is a handler that asks for a switch without saying between which contexts.

use core::sync::atomic::{AtomicPtr, Ordering};

use abi::{Word, MAX_SYS_CALLS, MAX_SYS_CALL_ARGS};

use crate::atomic::AtomicExt;
use crate::profiling;
use crate::switch::{SwitchDecision, TrapFrame};

/// Handler for one external event source.
#[derive(Copy, Clone)]
pub enum EventHandler {
    /// Does its work and returns; the interrupted context resumes.
    Simple(fn()),
    /// May request a context switch by filling in the decision and returning
    /// `true`.
    KernelAware(fn(&mut SwitchDecision) -> bool),
}

/// Handler for one system call. The variant fixes how many argument words it
/// takes; there is no way to take more, or anything wider than a word.
///
/// Every handler may request a switch, as `EventHandler::KernelAware` does.
/// The value set with `SwitchDecision::set_sys_call_result` is returned to the
/// caller if no switch happens.
#[derive(Copy, Clone)]
#[rustfmt::skip]
pub enum SysCall {
    Args0(fn(&mut SwitchDecision) -> bool),
    Args1(fn(&mut SwitchDecision, Word) -> bool),
    Args2(fn(&mut SwitchDecision, Word, Word) -> bool),
    Args3(fn(&mut SwitchDecision, Word, Word, Word) -> bool),
    Args4(fn(&mut SwitchDecision, Word, Word, Word, Word) -> bool),
    Args5(fn(&mut SwitchDecision, Word, Word, Word, Word, Word) -> bool),
    Args6(fn(&mut SwitchDecision, Word, Word, Word, Word, Word, Word) -> bool),
    Args7(fn(&mut SwitchDecision, Word, Word, Word, Word, Word, Word, Word) -> bool),
    Args8(fn(&mut SwitchDecision, Word, Word, Word, Word, Word, Word, Word, Word) -> bool),
}

impl SysCall {
    /// Number of argument words the handler takes.
    pub const fn arity(&self) -> usize {
        match self {
            Self::Args0(_) => 0,
            Self::Args1(_) => 1,
            Self::Args2(_) => 2,
            Self::Args3(_) => 3,
            Self::Args4(_) => 4,
            Self::Args5(_) => 5,
            Self::Args6(_) => 6,
            Self::Args7(_) => 7,
            Self::Args8(_) => 8,
        }
    }

    fn invoke(&self, d: &mut SwitchDecision, args: &SysCallArgs) -> bool {
        let a = &args.0;
        match *self {
            Self::Args0(f) => f(d),
            Self::Args1(f) => f(d, a[0]),
            Self::Args2(f) => f(d, a[0], a[1]),
            Self::Args3(f) => f(d, a[0], a[1], a[2]),
            Self::Args4(f) => f(d, a[0], a[1], a[2], a[3]),
            Self::Args5(f) => f(d, a[0], a[1], a[2], a[3], a[4]),
            Self::Args6(f) => f(d, a[0], a[1], a[2], a[3], a[4], a[5]),
            Self::Args7(f) => f(d, a[0], a[1], a[2], a[3], a[4], a[5], a[6]),
            Self::Args8(f) => {
                f(d, a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7])
            }
        }
    }
}

/// The argument words of a system call, in register order: `r0` through `r3`,
/// then `r4` through `r7`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SysCallArgs([Word; MAX_SYS_CALL_ARGS]);

impl SysCallArgs {
    pub const fn new(words: [Word; MAX_SYS_CALL_ARGS]) -> Self {
        Self(words)
    }

    /// Takes the arguments out of a frame pushed by trap entry.
    pub fn from_frame(frame: &TrapFrame) -> Self {
        let h = &frame.hardware;
        let s = &frame.software.r4_r11;
        Self([h.r0, h.r1, h.r2, h.r3, s[0], s[1], s[2], s[3]])
    }

    pub fn words(&self) -> &[Word; MAX_SYS_CALL_ARGS] {
        &self.0
    }
}

/// Handlers indexed by event source, `N` sources in all.
pub struct EventTable<const N: usize> {
    slots: [Option<EventHandler>; N],
}

impl<const N: usize> EventTable<N> {
    pub const fn new() -> Self {
        Self { slots: [None; N] }
    }

    /// Registers `handler` for `source`. Intended for building the table in a
    /// `static`, where a mistake becomes a build failure.
    ///
    /// # Panics
    ///
    /// If `source` is out of range or already has a handler.
    pub const fn with(mut self, source: usize, handler: EventHandler) -> Self {
        if source >= N {
            panic!("event source out of range");
        }
        if self.slots[source].is_some() {
            panic!("event source registered twice");
        }
        self.slots[source] = Some(handler);
        self
    }

    pub const fn slots(&self) -> &[Option<EventHandler>] {
        &self.slots
    }
}

impl<const N: usize> Default for EventTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Dense table of system calls; call `i` is at index `i`.
#[derive(Copy, Clone)]
pub struct SysCallTable {
    calls: &'static [SysCall],
}

impl SysCallTable {
    /// # Panics
    ///
    /// If there are more than `abi::MAX_SYS_CALLS` calls.
    pub const fn new(calls: &'static [SysCall]) -> Self {
        if calls.len() > MAX_SYS_CALLS {
            panic!("too many system calls");
        }
        Self { calls }
    }

    pub const fn len(&self) -> usize {
        self.calls.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// What the trap-exit path should do.
#[derive(Debug)]
pub enum Outcome {
    /// Resume the context that trapped. After a system call, `sys_call_result`
    /// carries its return value; after an external event it is `None`.
    Return { sys_call_result: Option<Word> },
    /// Suspend the running context and resume another, as the decision says.
    Switch(SwitchDecision),
}

impl Outcome {
    /// Flattens back into the form the trap assembly consumes.
    pub fn into_decision(self) -> (bool, SwitchDecision) {
        match self {
            Self::Return { sys_call_result } => {
                let mut d = SwitchDecision::new();
                if let Some(v) = sys_call_result {
                    d.set_sys_call_result(v);
                }
                (false, d)
            }
            Self::Switch(d) => (true, d),
        }
    }
}

/// The complete set of trap handlers.
pub struct Dispatcher {
    events: &'static [Option<EventHandler>],
    sys_calls: SysCallTable,
}

impl Dispatcher {
    pub const fn new<const N: usize>(
        events: &'static EventTable<N>,
        sys_calls: SysCallTable,
    ) -> Self {
        Self {
            events: events.slots(),
            sys_calls,
        }
    }

    /// Runs the handler for external event `source`.
    ///
    /// # Panics
    ///
    /// If `source` is out of range or has no handler, or the handler asks for
    /// a switch without naming both contexts.
    pub fn dispatch_event(&self, source: usize) -> Outcome {
        profiling::event_trap_enter(source);

        let handler = match self.events.get(source) {
            Some(Some(h)) => *h,
            Some(None) => panic!("no handler for event source {source}"),
            None => panic!("event source {source} out of range"),
        };

        let mut decision = SwitchDecision::new();
        let switch = match handler {
            EventHandler::Simple(f) => {
                f();
                false
            }
            EventHandler::KernelAware(f) => f(&mut decision),
        };
        let outcome = conclude(switch, decision, false);

        profiling::event_trap_exit();
        outcome
    }

    /// Runs system call `index` with `args`.
    ///
    /// # Panics
    ///
    /// If `index` is not below the table length, or the handler asks for a
    /// switch without naming both contexts.
    pub fn dispatch_sys_call(&self, index: usize, args: &SysCallArgs) -> Outcome {
        profiling::event_sys_call_enter(index);

        let Some(call) = self.sys_calls.calls.get(index) else {
            panic!("system call {index} out of range");
        };

        let mut decision = SwitchDecision::new();
        let switch = call.invoke(&mut decision, args);
        let outcome = conclude(switch, decision, true);

        profiling::event_sys_call_exit();
        outcome
    }
}

fn conclude(switch: bool, decision: SwitchDecision, sys_call: bool) -> Outcome {
    if switch {
        if !decision.is_switch_requested() {
            panic!("handler requested a switch without naming both contexts");
        }
        profiling::event_context_switch(decision.resumed() as usize);
        Outcome::Switch(decision)
    } else {
        Outcome::Return {
            sys_call_result: sys_call.then(|| decision.sys_call_result()),
        }
    }
}

/// Dispatcher used by the trap entry points. Null until `install`.
static DISPATCHER: AtomicPtr<Dispatcher> = AtomicPtr::new(core::ptr::null_mut());

/// Makes `dispatcher` the one the trap entry points use. Startup does this
/// once, before any trap can be taken.
///
/// # Panics
///
/// If a dispatcher was already installed.
pub fn install(dispatcher: &'static Dispatcher) {
    let prev = DISPATCHER.swap_polyfill(
        dispatcher as *const _ as *mut _,
        Ordering::AcqRel,
    );
    if !prev.is_null() {
        panic!("dispatcher installed twice");
    }
}

fn installed() -> &'static Dispatcher {
    let p = DISPATCHER.load(Ordering::Acquire);
    // Safety: only ever stored from a `&'static Dispatcher`.
    match unsafe { p.as_ref() } {
        Some(d) => d,
        None => panic!("trap taken before a dispatcher was installed"),
    }
}

/// Entry point for the external event trap path.
///
/// Fills in `*decision` and returns whether a switch was requested.
///
/// # Safety
///
/// `decision` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn kern_dispatch_event(
    source: Word,
    decision: *mut SwitchDecision,
) -> bool {
    let (switch, d) = installed().dispatch_event(source).into_decision();
    // Safety: passed through from our caller.
    unsafe { decision.write(d) };
    switch
}

/// Entry point for the system call trap path. The call index is in `r12` of
/// the frame trap entry just pushed.
///
/// Fills in `*decision` and returns whether a switch was requested.
///
/// # Safety
///
/// `frame` must point to a complete `TrapFrame`, and `decision` must be valid
/// for writes.
#[no_mangle]
pub unsafe extern "C" fn kern_dispatch_sys_call(
    frame: *const TrapFrame,
    decision: *mut SwitchDecision,
) -> bool {
    // Safety: passed through from our caller.
    let frame = unsafe { &*frame };
    let args = SysCallArgs::from_frame(frame);
    let (switch, d) = installed()
        .dispatch_sys_call(frame.hardware.r12, &args)
        .into_decision();
    // Safety: passed through from our caller.
    unsafe { decision.write(d) };
    switch
}
