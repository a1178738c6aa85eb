//! Parallel tally engine. Splits an enumerated revision list into
//! contiguous chunks, pairs each chunk with its own `git log` subprocess
//! and a private fold, and merges partial results on the coordinator.
//! Because chunks are disjoint and merging is commutative and
//! associative, the outcome is identical to a sequential fold.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;
use std::thread;

use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::error::{GwhoError, Result};
use crate::git::{self, filters, CancelToken, Commit, LogFilters};
use crate::tally::Tallier;

pub fn available_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

struct WorkerOutput<P> {
    partial: P,
    commits: Vec<Commit>,
}

/// Tallies the given revision range, consulting the commit cache before
/// fanning out over whatever is missing. The cache is written once,
/// after a fully successful fan-in; errors and cancellation persist
/// nothing.
pub fn tally_revisions<T: Tallier>(
    token: &CancelToken,
    revs: &[String],
    paths: &[String],
    log_filters: &LogFilters,
    tallier: &T,
    repo_root: &Path,
) -> Result<T::Partial> {
    let nauthors = filters::compile_nauthors(&log_filters.nauthors)?;

    // Without a cache and without a second thread there is nothing to
    // coordinate; stream straight from one subprocess.
    let use_cache = paths.is_empty();
    if !use_cache && available_workers() == 1 {
        return tally_sequential(token, revs, paths, log_filters, tallier, &nauthors);
    }

    let rev_list = git::rev_list(token, revs, paths, log_filters)?;
    if rev_list.is_empty() {
        return Err(GwhoError::EmptyResult);
    }
    debug!(revisions = rev_list.len(), "enumerated revision range");

    let mut cache = if use_cache {
        match Cache::open_default(repo_root) {
            Ok(cache) => Some(cache),
            Err(err) => {
                warn!("cache disabled: {err}");
                None
            }
        }
    } else {
        None
    };

    let mut acc = tallier.start();
    let missing = match &cache {
        Some(cache) => {
            let (cached, missing) = load_cached(cache, &rev_list);
            debug!(cached = cached.len(), missing = missing.len(), "cache split");
            for mut commit in cached {
                if !filters::author_allowed(&commit, &nauthors) {
                    continue;
                }
                filters::retain_diffs_by_path(&mut commit, paths);
                tallier.add(&mut acc, &commit);
            }
            missing
        }
        None => rev_list,
    };

    if !missing.is_empty() {
        let progress = spinner();
        let fanned = fan_out(
            token,
            &missing,
            paths,
            tallier,
            cache.is_some(),
            &nauthors,
            &progress,
        );
        progress.finish_and_clear();
        let fanned = fanned?;

        acc = tallier.merge(acc, fanned.partial);
        if let Some(cache) = cache.take() {
            cache.add_and_close(fanned.commits)?;
        }
    } else if let Some(cache) = cache.take() {
        cache.close()?;
    }

    token.check()?;
    Ok(acc)
}

/// One subprocess, one fold, no revision enumeration. Used on
/// single-threaded hosts when the cache is out of play.
fn tally_sequential<T: Tallier>(
    token: &CancelToken,
    revs: &[String],
    paths: &[String],
    log_filters: &LogFilters,
    tallier: &T,
    nauthors: &[Regex],
) -> Result<T::Partial> {
    let mut stream = git::commits_with_opts(token, revs, paths, log_filters, true)?;
    let mut acc = tallier.start();

    let folded = (|| -> Result<()> {
        for item in stream.by_ref() {
            let mut commit = item?;
            if !filters::author_allowed(&commit, nauthors) {
                continue;
            }
            filters::retain_diffs_by_path(&mut commit, paths);
            tallier.add(&mut acc, &commit);
        }
        Ok(())
    })();
    let finished = stream.finish();
    folded?;
    finished?;
    Ok(acc)
}

fn fan_out<T: Tallier>(
    token: &CancelToken,
    rev_list: &[String],
    paths: &[String],
    tallier: &T,
    collect_commits: bool,
    nauthors: &[Regex],
    progress: &ProgressBar,
) -> Result<WorkerOutput<T::Partial>> {
    let workers = available_workers().min(rev_list.len()).max(1);
    let chunk_size = rev_list.len().div_ceil(workers);
    debug!(workers, chunk_size, "fanning out tally");

    let (tx, rx) = unbounded();
    thread::scope(|scope| {
        for chunk in rev_list.chunks(chunk_size) {
            let tx = tx.clone();
            scope.spawn(move || {
                let out = run_worker(token, chunk, paths, tallier, collect_commits, nauthors, progress);
                let _ = tx.send(out);
            });
        }
        drop(tx);

        let mut partial: Option<T::Partial> = None;
        let mut commits = Vec::new();
        let mut first_err: Option<GwhoError> = None;

        for out in rx.iter() {
            match out {
                Ok(worker) => {
                    partial = Some(match partial.take() {
                        Some(acc) => tallier.merge(acc, worker.partial),
                        None => worker.partial,
                    });
                    commits.extend(worker.commits);
                }
                Err(err) => {
                    // First failure cancels the siblings; keep the real
                    // cause rather than the cancellations it triggers.
                    token.cancel();
                    let replace = match &first_err {
                        None => true,
                        Some(GwhoError::Cancelled) => !matches!(err, GwhoError::Cancelled),
                        Some(_) => false,
                    };
                    if replace {
                        first_err = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_err {
            return Err(err);
        }
        Ok(WorkerOutput {
            partial: partial.unwrap_or_else(|| tallier.start()),
            commits,
        })
    })
}

fn run_worker<T: Tallier>(
    token: &CancelToken,
    chunk: &[String],
    paths: &[String],
    tallier: &T,
    collect_commits: bool,
    nauthors: &[Regex],
    progress: &ProgressBar,
) -> Result<WorkerOutput<T::Partial>> {
    let args = git::no_walk_log_args(chunk, paths);
    let mut stream = git::commit_stream(&args, token)?;

    let mut partial = tallier.start();
    let mut commits = Vec::new();

    let folded = (|| -> Result<()> {
        for item in stream.by_ref() {
            token.check()?;
            let mut commit = item?;
            if !filters::author_allowed(&commit, nauthors) {
                continue;
            }
            filters::retain_diffs_by_path(&mut commit, paths);
            progress.inc(1);
            tallier.add(&mut partial, &commit);
            if collect_commits {
                commits.push(commit);
            }
        }
        Ok(())
    })();
    let finished = stream.finish();
    folded?;
    finished?;

    Ok(WorkerOutput { partial, commits })
}

fn load_cached(cache: &Cache, rev_list: &[String]) -> (Vec<Commit>, Vec<String>) {
    let revset: HashSet<&str> = rev_list.iter().map(String::as_str).collect();
    match cache.get(&revset) {
        Ok(cached) => {
            let hit: HashSet<&str> = cached.iter().map(|c| c.hash.as_str()).collect();
            let missing = rev_list
                .iter()
                .filter(|rev| !hit.contains(rev.as_str()))
                .cloned()
                .collect();
            (cached, missing)
        }
        Err(err) => {
            // Read failures degrade to a full cache miss.
            warn!("cache read failed, refetching: {err}");
            (Vec::new(), rev_list.to_vec())
        }
    }
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} {pos}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message("Tallying commits...");
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::testutil::commit;
    use crate::tally::{finalize_authors, AuthorTallier, TallyOpts};

    // The fan-out plumbing needs a live git binary and is exercised by
    // the integration tests; what must hold unconditionally is that
    // chunked folds merge into the sequential answer for every chunking.
    #[test]
    fn chunked_merge_matches_sequential_for_all_chunk_sizes() {
        let opts = TallyOpts::default();
        let tallier = AuthorTallier { opts };
        let all: Vec<_> = (0..13)
            .map(|i| {
                let author = if i % 3 == 0 {
                    ("Amy", "amy@x")
                } else {
                    ("Bob", "bob@x")
                };
                commit(
                    &format!("hash{i}"),
                    author,
                    (i + 1) as u32,
                    &[(["a.txt", "b.txt", "c.txt"][i % 3], i as u32, 1)],
                )
            })
            .collect();

        let mut whole = tallier.start();
        for c in &all {
            tallier.add(&mut whole, c);
        }
        let expected = finalize_authors(whole, opts);

        for chunk_size in 1..=all.len() {
            let merged = all
                .chunks(chunk_size)
                .map(|chunk| {
                    let mut acc = tallier.start();
                    for c in chunk {
                        tallier.add(&mut acc, c);
                    }
                    acc
                })
                .reduce(|a, b| tallier.merge(a, b))
                .unwrap();
            assert_eq!(
                finalize_authors(merged, opts),
                expected,
                "chunk size {chunk_size}"
            );
        }
    }

    #[test]
    fn cancel_token_round_trip() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(GwhoError::Cancelled)));
        assert!(token.clone().is_cancelled());
    }
}
