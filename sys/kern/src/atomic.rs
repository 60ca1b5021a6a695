// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Atomic operations missing on some targets.

use core::sync::atomic::Ordering;

/// Read-modify-write operations the kernel needs on its startup globals.
///
/// ARMv6-M has no exclusive-access instructions, and `core` drops `swap` and
/// friends there. Implementations live in the `arch` module: the native
/// operation where it exists, a critical section where it doesn't.
pub(crate) trait AtomicExt {
    type Primitive;

    fn swap_polyfill(
        &self,
        value: Self::Primitive,
        ordering: Ordering,
    ) -> Self::Primitive;
}
