// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel online profiling support.
//!
//! The kernel core doesn't know how a board gets timing information out, so a
//! board that wants profiling fills in an `EventsTable` and hands it to
//! `configure_events_table` during startup. Typical hooks toggle GPIOs for a
//! logic analyzer to watch; whatever they do, they run inside every trap and
//! must be fast.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Hooks supplied by board code.
///
/// All hooks must be provided; stub out the ones you don't want with `|| ()`
/// or `|_| ()`.
pub struct EventsTable {
    /// Entry to the dispatcher for an external event, with the event source.
    pub trap_enter: fn(usize),
    /// Exit from the dispatcher after an external event.
    pub trap_exit: fn(),
    /// Entry to the dispatcher for a system call, with its index.
    pub sys_call_enter: fn(usize),
    /// Exit from the dispatcher after a system call.
    pub sys_call_exit: fn(),
    /// A handler requested a switch. The argument is the address of the
    /// resumed context's save record, which identifies it uniquely.
    pub context_switch: fn(usize),
}

/// Supplies the kernel with an events table. Later calls replace earlier ones.
pub fn configure_events_table(table: &'static EventsTable) {
    EVENTS_TABLE.store(table as *const _ as *mut _, Ordering::Relaxed);
}

/// Written by `configure_events_table`, null until then. Any non-null value
/// came from a `&'static`.
///
/// `Relaxed` throughout: written once at startup, read on every trap.
static EVENTS_TABLE: AtomicPtr<EventsTable> =
    AtomicPtr::new(core::ptr::null_mut());

fn table() -> Option<&'static EventsTable> {
    let p = EVENTS_TABLE.load(Ordering::Relaxed);
    // Safety: only ever stored from a `&'static EventsTable`.
    unsafe { p.as_ref() }
}

pub(crate) fn event_trap_enter(source: usize) {
    if let Some(t) = table() {
        (t.trap_enter)(source)
    }
}

pub(crate) fn event_trap_exit() {
    if let Some(t) = table() {
        (t.trap_exit)()
    }
}

pub(crate) fn event_sys_call_enter(index: usize) {
    if let Some(t) = table() {
        (t.sys_call_enter)(index)
    }
}

pub(crate) fn event_sys_call_exit() {
    if let Some(t) = table() {
        (t.sys_call_exit)()
    }
}

pub(crate) fn event_context_switch(resumed: usize) {
    if let Some(t) = table() {
        (t.context_switch)(resumed)
    }
}
