//! Bulk fetch / BFS hydration: reconstructing a log's entry set from
//! hashes, an entry root, or a snapshot, fetching missing entries from the
//! store with bounded length, exclusion, a progress callback, and a
//! wall-clock timeout (spec §4.7, §5).

use crate::entry::Entry;
use crate::error::LogError;
use crate::log_options::HydrateOptions;
use crate::store::BlockStore;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// The result of a hydration pass: the log id (if discoverable from the
/// fetched entries), every entry reached within the bounds given, and the
/// subset of those that are heads.
pub struct Hydrated {
    pub log_id: Option<String>,
    pub entries: Vec<Entry>,
    pub heads: Vec<String>,
}

/// Called once per fetched entry: `(hash, entry, parent_hash, depth)`.
pub type ProgressCallback<'a> = dyn Fn(&str, &Entry, Option<&str>, usize) + Send + Sync + 'a;

/// Entries fetched so far, shared with the caller so a timeout can still
/// observe whatever had been loaded before the budget expired (spec §5:
/// "on expiry the returned partial set is still consistent").
#[derive(Default)]
struct Accum {
    fetched: Vec<Entry>,
    log_id: Option<String>,
}

/// Performs a bounded breadth-first fetch starting from `roots` (content
/// hashes), honoring `opts.length` (max entries to fetch), `opts.exclude`
/// (hashes never re-fetched, e.g. because the caller already has them),
/// `opts.timeout` (wall-clock budget; on expiry the partial result so far
/// is returned, still internally consistent), and `opts.concurrency`
/// (bounded parallel fetches).
#[tracing::instrument(skip(store, opts, progress), fields(roots = roots.len()))]
pub async fn fetch_entries(
    store: &dyn BlockStore,
    roots: &[String],
    opts: &HydrateOptions,
    progress: Option<&ProgressCallback<'_>>,
) -> Result<Hydrated, LogError> {
    let accum = Arc::new(Mutex::new(Accum::default()));
    let fetch = fetch_entries_inner(store, roots, opts, progress, accum.clone());

    let outcome = match opts.timeout {
        Some(duration) => match tokio::time::timeout(duration, fetch).await {
            Ok(result) => Some(result),
            // Timed out: the in-flight fetch future is dropped here,
            // releasing its clone of `accum`, so whatever was recorded up
            // to this point survives below.
            Err(_) => {
                warn!(timeout = ?duration, "hydration timed out, returning partial result");
                None
            }
        },
        None => Some(fetch.await),
    };

    if let Some(Err(e)) = outcome {
        return Err(e);
    }

    let Accum { fetched, log_id } = Arc::try_unwrap(accum)
        .map(|m| m.into_inner().unwrap_or_default())
        .unwrap_or_default();

    debug!(fetched = fetched.len(), log_id = ?log_id, "hydration finished");

    let heads = crate::util::find_heads(&fetched)
        .into_iter()
        .map(|e| e.hash().to_owned())
        .collect();

    Ok(Hydrated {
        log_id,
        entries: fetched,
        heads,
    })
}

async fn fetch_entries_inner(
    store: &dyn BlockStore,
    roots: &[String],
    opts: &HydrateOptions,
    progress: Option<&ProgressCallback<'_>>,
    accum: Arc<Mutex<Accum>>,
) -> Result<(), LogError> {
    let excluded: HashSet<&str> = opts.exclude.iter().map(|s| s.as_str()).collect();
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));

    let mut visited: HashSet<String> = HashSet::new();
    // (hash, parent_hash, depth)
    let mut frontier: VecDeque<(String, Option<String>, usize)> = roots
        .iter()
        .filter(|h| !excluded.contains(h.as_str()))
        .map(|h| (h.clone(), None, 0usize))
        .collect();

    while !frontier.is_empty() {
        if let Some(limit) = opts.length {
            if accum.lock().unwrap().fetched.len() >= limit {
                break;
            }
        }

        let mut in_flight = FuturesUnordered::new();
        let mut batch_meta = Vec::new();
        while let Some((hash, parent, depth)) = frontier.pop_front() {
            if !visited.insert(hash.clone()) {
                continue;
            }
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let hash_for_task = hash.clone();
            in_flight.push(async move {
                let result = Entry::from_multihash(store, &hash_for_task).await;
                drop(permit);
                (hash_for_task, result)
            });
            batch_meta.push((hash, parent, depth));

            // Only drain a bounded batch at a time so `length`/`timeout`
            // checks stay responsive rather than scheduling the whole
            // remaining frontier up front.
            if in_flight.len() >= opts.concurrency.max(1) {
                break;
            }
        }

        if in_flight.is_empty() {
            break;
        }

        let mut results = Vec::new();
        while let Some((hash, result)) = in_flight.next().await {
            results.push((hash, result));
        }

        for (hash, result) in results {
            let (_, parent, depth) = batch_meta
                .iter()
                .find(|(h, _, _)| h == &hash)
                .cloned()
                .unwrap_or((hash.clone(), None, 0));

            match result {
                Ok(entry) => {
                    debug!(%hash, depth, parent = ?parent, "hydration fetched entry");
                    if let Some(cb) = progress {
                        cb(&hash, &entry, parent.as_deref(), depth);
                    }
                    for parent_hash in entry.next() {
                        if !excluded.contains(parent_hash.as_str()) && !visited.contains(parent_hash) {
                            frontier.push_back((parent_hash.clone(), Some(hash.clone()), depth + 1));
                        }
                    }

                    let mut guard = accum.lock().unwrap();
                    if guard.log_id.is_none() {
                        guard.log_id = Some(entry.id().to_owned());
                    }
                    guard.fetched.push(entry);
                    let reached_limit = opts.length.map(|limit| guard.fetched.len() >= limit).unwrap_or(false);
                    drop(guard);

                    if reached_limit {
                        frontier.clear();
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(())
}
