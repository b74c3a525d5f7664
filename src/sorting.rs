//! Total orders over entries: by clock, clock-id tiebreak, hash tiebreak,
//! and the `NoZeroes` fatal-collision guard.

use crate::entry::Entry;
use crate::lamport_clock;
use std::cmp::Ordering;

/// A pure comparator over two entries, returning the three-way
/// `std::cmp::Ordering` the rest of the crate sorts by.
pub type SortFn = fn(&Entry, &Entry) -> Ordering;

/// Compares by clock; on equal time, delegates to `tiebreaker`.
pub fn sort_by_clocks(a: &Entry, b: &Entry, tiebreaker: SortFn) -> Ordering {
    match lamport_clock::compare(a.clock(), b.clock()) {
        Ordering::Equal => tiebreaker(a, b),
        other => other,
    }
}

/// Compares by `clock.id` lexicographically; on equal id delegates to
/// `tiebreaker`.
pub fn sort_by_clock_id(a: &Entry, b: &Entry, tiebreaker: SortFn) -> Ordering {
    match a.clock().id().cmp(b.clock().id()) {
        Ordering::Equal => tiebreaker(a, b),
        other => other,
    }
}

/// Lexicographic ordering on `hash`. Terminal: never returns `Equal` for
/// entries with distinct hashes (two entries sharing a hash are the same
/// entry, so `Equal` here is correct only in that case).
pub fn sort_by_entry_hash(a: &Entry, b: &Entry) -> Ordering {
    a.hash().cmp(b.hash())
}

/// The default sort: clock time, then clock id, then hash.
pub fn last_write_wins(a: &Entry, b: &Entry) -> Ordering {
    sort_by_clocks(a, b, sort_by_entry_hash)
}

/// Wraps `inner` in a guard that aborts the process if it is ever asked to
/// compare two entries that both have `clock.time == 0` and the same
/// `clock.id` — an unauthored collision that indicates a bug in entry
/// creation or foreign data injection (spec: fatal internal error, must
/// abort, never silently order such entries).
pub fn no_zeroes(inner: SortFn) -> impl Fn(&Entry, &Entry) -> Ordering {
    move |a: &Entry, b: &Entry| -> Ordering {
        if a.clock().time() == 0 && b.clock().time() == 0 && a.clock().id() == b.clock().id() && a.hash() != b.hash() {
            panic!(
                "Your log's tiebreaker function has returned zero and \
                 two different entries are written by the same identity. \
                 Your application's tiebreaker function must resolve tiebreaks for logs to work properly."
            );
        }
        inner(a, b)
    }
}
