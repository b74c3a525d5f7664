//! Construction-time and call-time options for [`crate::log::Log`]:
//! `LogOptions` (constructor), `IteratorOptions` (`Log::iterator`), and
//! `HydrateOptions` (the hydration helpers in `log_io`).

use crate::entry::Entry;
use crate::lamport_clock::LamportClock;
use crate::sorting::SortFn;
use std::time::Duration;

/// Options for constructing a [`crate::log::Log`].
///
/// Constructing log options using `LogOptions::new()` creates default log
/// options: no identifier, no seed entries (and no heads among those
/// non-existent entries), no Lamport clock, default (`LastWriteWins`)
/// sorting, default join concurrency.
///
/// Use method chaining to set additional parameters:
///
/// ```ignore
/// let opts = LogOptions::new().set_id("some_id").set_clock(clock);
/// let log = Log::new(identity, access, opts)?;
/// ```
#[derive(Clone)]
pub struct LogOptions {
    id: Option<String>,
    entries: Vec<Entry>,
    heads: Vec<String>,
    clock: Option<LamportClock>,
    sort_fn: Option<SortFn>,
    join_concurrency: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            id: None,
            entries: Vec::new(),
            heads: Vec::new(),
            clock: None,
            sort_fn: None,
            join_concurrency: 16,
        }
    }
}

impl LogOptions {
    pub fn new() -> LogOptions {
        LogOptions::default()
    }

    pub fn set_id(mut self, id: &str) -> LogOptions {
        self.id = Some(id.to_owned());
        self
    }

    pub fn set_entries(mut self, entries: Vec<Entry>) -> LogOptions {
        self.entries = entries;
        self
    }

    pub fn set_heads(mut self, heads: Vec<String>) -> LogOptions {
        self.heads = heads;
        self
    }

    pub fn set_clock(mut self, clock: LamportClock) -> LogOptions {
        self.clock = Some(clock);
        self
    }

    pub fn set_sort_fn(mut self, sort_fn: SortFn) -> LogOptions {
        self.sort_fn = Some(sort_fn);
        self
    }

    pub fn set_join_concurrency(mut self, n: usize) -> LogOptions {
        self.join_concurrency = n;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn heads(&self) -> &[String] {
        &self.heads
    }

    pub fn clock(&self) -> Option<&LamportClock> {
        self.clock.as_ref()
    }

    pub fn sort_fn(&self) -> Option<SortFn> {
        self.sort_fn
    }

    pub fn join_concurrency(&self) -> usize {
        self.join_concurrency
    }
}

/// Options for [`crate::log::Log::iterator`]: a bounded window over the
/// DAG (spec §4.6).
#[derive(Clone, Default)]
pub struct IteratorOptions {
    pub gt: Option<String>,
    pub gte: Option<String>,
    pub lt: Option<String>,
    pub lte: Option<String>,
    pub amount: Option<usize>,
}

impl IteratorOptions {
    pub fn new() -> IteratorOptions {
        IteratorOptions::default()
    }

    pub fn gt(mut self, hash: &str) -> IteratorOptions {
        self.gt = Some(hash.to_owned());
        self
    }

    pub fn gte(mut self, hash: &str) -> IteratorOptions {
        self.gte = Some(hash.to_owned());
        self
    }

    pub fn lt(mut self, hash: &str) -> IteratorOptions {
        self.lt = Some(hash.to_owned());
        self
    }

    pub fn lte(mut self, hash: &str) -> IteratorOptions {
        self.lte = Some(hash.to_owned());
        self
    }

    pub fn amount(mut self, n: usize) -> IteratorOptions {
        self.amount = Some(n);
        self
    }
}

/// Options for the hydration helpers in `log_io`: bounded BFS from a set
/// of root hashes, honoring length, exclusion, timeout, and concurrency
/// (spec §4.7).
#[derive(Clone)]
pub struct HydrateOptions {
    pub length: Option<usize>,
    pub exclude: Vec<String>,
    pub timeout: Option<Duration>,
    pub concurrency: usize,
}

impl Default for HydrateOptions {
    fn default() -> Self {
        HydrateOptions {
            length: None,
            exclude: Vec::new(),
            timeout: None,
            concurrency: 16,
        }
    }
}

impl HydrateOptions {
    pub fn new() -> HydrateOptions {
        HydrateOptions::default()
    }

    pub fn length(mut self, n: usize) -> HydrateOptions {
        self.length = Some(n);
        self
    }

    pub fn exclude(mut self, hashes: Vec<String>) -> HydrateOptions {
        self.exclude = hashes;
        self
    }

    pub fn timeout(mut self, d: Duration) -> HydrateOptions {
        self.timeout = Some(d);
        self
    }

    pub fn concurrency(mut self, n: usize) -> HydrateOptions {
        self.concurrency = n;
        self
    }
}
