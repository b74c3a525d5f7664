//! Pure helper functions over slices of entries: head/tail discovery used
//! both by `Log` itself and by the hydration helpers reconstructing a log
//! from a flat entry set (spec §4.7).

use crate::entry::{self, Entry};
use std::collections::{HashMap, HashSet};

/// An entry is a head iff no entry in `entries` has it in its `next`.
/// Sorted by `clock.id` lexicographically for deterministic presentation
/// (spec §4.7, and the Open Question on `findHeads`'s sort: resolved as
/// deterministic lexicographic `clock.id` ordering).
pub fn find_heads(entries: &[Entry]) -> Vec<Entry> {
    let mut referenced: HashSet<&str> = HashSet::new();
    for e in entries {
        for n in e.next() {
            referenced.insert(n.as_str());
        }
    }
    let mut heads: Vec<Entry> = entries
        .iter()
        .filter(|e| !referenced.contains(e.hash()))
        .cloned()
        .collect();
    heads.sort_by(|a, b| a.clock().id().cmp(b.clock().id()));
    heads
}

/// Entries that either have an empty `next`, or reference at least one
/// parent hash absent from `entries`. Deduplicated by hash, sorted by
/// `Entry::compare`.
pub fn find_tails(entries: &[Entry]) -> Vec<Entry> {
    let present: HashSet<&str> = entries.iter().map(|e| e.hash()).collect();
    let mut seen = HashSet::new();
    let mut tails: Vec<Entry> = entries
        .iter()
        .filter(|e| e.next().is_empty() || e.next().iter().any(|h| !present.contains(h.as_str())))
        .filter(|e| seen.insert(e.hash().to_owned()))
        .cloned()
        .collect();
    tails.sort_by(|a, b| entry::compare(a, b));
    tails
}

/// Parent hashes referenced by some entry in `entries` but not present in
/// `entries`, in stable reverse-first-observed order (the order the
/// original references were encountered, most-recently-seen-missing-hash
/// last).
pub fn find_tail_hashes(entries: &[Entry]) -> Vec<String> {
    let present: HashSet<&str> = entries.iter().map(|e| e.hash()).collect();
    let mut order: Vec<String> = Vec::new();
    let mut seen: HashMap<String, ()> = HashMap::new();
    for e in entries {
        for n in e.next() {
            if !present.contains(n.as_str()) && seen.insert(n.clone(), ()).is_none() {
                order.push(n.clone());
            }
        }
    }
    order.reverse();
    order
}

/// Entries in `all` that have `e.hash` in `next`, sorted by clock. Used
/// only for rendering (e.g. `Display for Log`).
pub fn find_children<'a>(e: &Entry, all: &'a [Entry]) -> Vec<&'a Entry> {
    entry::find_children(e, all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::test_support::fixture_entry;
    use crate::entry::Entry as E;

    fn with_next(e: Entry, next: Vec<String>) -> Entry {
        match e {
            E::V1(mut inner) => {
                inner.set_next_for_test(next);
                E::V1(inner)
            }
            other => other,
        }
    }

    #[test]
    fn find_heads_excludes_referenced_entries() {
        let parent = fixture_entry("A", 1, b"parent");
        let child = with_next(fixture_entry("B", 2, b"child"), vec![parent.hash().to_owned()]);
        let heads = find_heads(&[parent.clone(), child.clone()]);
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].hash(), child.hash());
    }

    #[test]
    fn find_tails_includes_entries_with_missing_parents() {
        let orphan = with_next(fixture_entry("A", 2, b"orphan"), vec!["missing-hash".to_owned()]);
        let tails = find_tails(&[orphan.clone()]);
        assert_eq!(tails.len(), 1);
        assert_eq!(tails[0].hash(), orphan.hash());
    }

    #[test]
    fn find_tail_hashes_lists_missing_parents() {
        let orphan = with_next(fixture_entry("A", 2, b"orphan"), vec!["missing-hash".to_owned()]);
        let hashes = find_tail_hashes(&[orphan]);
        assert_eq!(hashes, vec!["missing-hash".to_owned()]);
    }
}
