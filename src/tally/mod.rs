//! Tally engines: fold commit sequences into per-author, per-path, and
//! per-date aggregates. All accumulation happens through
//! [`TallyBuilder`]s so that partial results from parallel workers merge
//! into exactly what a sequential fold would have produced.

pub mod hist;
pub mod tree;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::git::{Commit, FileDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TallyMode {
    #[default]
    Commits,
    Files,
    Lines,
    LastModified,
}

/// Identity axis for grouping authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisKey {
    #[default]
    Name,
    Email,
}

impl AxisKey {
    pub fn of<'c>(&self, commit: &'c Commit) -> &'c str {
        match self {
            AxisKey::Name => &commit.author_name,
            AxisKey::Email => &commit.author_email,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TallyOpts {
    pub mode: TallyMode,
    pub count_merges: bool,
    pub key: AxisKey,
}

impl TallyOpts {
    pub fn is_counted(&self, commit: &Commit) -> bool {
        self.count_merges || !commit.is_merge
    }
}

/// Per-author accumulator. Carries the distinct set of paths touched so
/// that `file_count` survives merging without double counting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TallyBuilder {
    pub author_name: String,
    pub author_email: String,
    pub commits: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub(crate) paths: HashSet<String>,
    pub last_commit_time: Option<DateTime<Utc>>,
    // Commits are streamed, so one marker deduplicates the commit bump
    // across a commit's several diffs.
    last_commit_hash: String,
}

impl TallyBuilder {
    pub fn observe_commit(&mut self, commit: &Commit) {
        if self.author_name.is_empty() && self.author_email.is_empty() {
            self.author_name = commit.author_name.clone();
            self.author_email = commit.author_email.clone();
        }
        if self.last_commit_hash != commit.hash {
            self.commits += 1;
            self.last_commit_hash = commit.hash.clone();
        }
        self.last_commit_time = Some(match self.last_commit_time {
            Some(t) => t.max(commit.date),
            None => commit.date,
        });
    }

    /// Line counts land on the rename destination when the diff is a
    /// rename; historical commits stay under their historical path.
    pub fn observe_diff(&mut self, diff: &FileDiff) {
        self.lines_added += diff.added();
        self.lines_removed += diff.removed();
        self.paths.insert(diff.dest_path().to_string());
    }

    pub fn file_count(&self) -> usize {
        self.paths.len()
    }

    pub fn merge(&mut self, other: TallyBuilder) {
        if self.author_name.is_empty() && self.author_email.is_empty() {
            self.author_name = other.author_name;
            self.author_email = other.author_email;
        }
        self.commits += other.commits;
        self.lines_added += other.lines_added;
        self.lines_removed += other.lines_removed;
        self.paths.extend(other.paths);
        self.last_commit_time = match (self.last_commit_time, other.last_commit_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn finalize(&self) -> FinalTally {
        FinalTally {
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
            commits: self.commits,
            lines_added: self.lines_added,
            lines_removed: self.lines_removed,
            file_count: self.file_count(),
            last_commit_time: self.last_commit_time.unwrap_or(DateTime::UNIX_EPOCH),
        }
    }

    fn metric(&self, mode: TallyMode) -> u64 {
        match mode {
            TallyMode::Commits => self.commits,
            TallyMode::Files => self.file_count() as u64,
            TallyMode::Lines => self.lines_added + self.lines_removed,
            TallyMode::LastModified => self
                .last_commit_time
                .map(|t| t.timestamp().max(0) as u64)
                .unwrap_or(0),
        }
    }
}

/// Snapshot of a builder after ranking has attributed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalTally {
    pub author_name: String,
    pub author_email: String,
    pub commits: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub file_count: usize,
    pub last_commit_time: DateTime<Utc>,
}

impl Default for FinalTally {
    fn default() -> Self {
        Self {
            author_name: String::new(),
            author_email: String::new(),
            commits: 0,
            lines_added: 0,
            lines_removed: 0,
            file_count: 0,
            last_commit_time: DateTime::UNIX_EPOCH,
        }
    }
}

impl FinalTally {
    pub fn metric(&self, mode: TallyMode) -> u64 {
        match mode {
            TallyMode::Commits => self.commits,
            TallyMode::Files => self.file_count as u64,
            TallyMode::Lines => self.lines_added + self.lines_removed,
            TallyMode::LastModified => self.last_commit_time.timestamp().max(0) as u64,
        }
    }
}

/// Descending by the mode metric, ties broken by ascending author key.
pub(crate) fn compare_entries(
    (key_a, a): (&str, &TallyBuilder),
    (key_b, b): (&str, &TallyBuilder),
    mode: TallyMode,
) -> Ordering {
    b.metric(mode)
        .cmp(&a.metric(mode))
        .then_with(|| key_a.cmp(key_b))
}

/// One tally axis: how commits fold into a partial result and how two
/// partials combine. Merging is commutative and associative, so a
/// parallel fan-out is indistinguishable from a sequential fold.
pub trait Tallier: Sync {
    type Partial: Send;

    fn start(&self) -> Self::Partial;
    fn add(&self, acc: &mut Self::Partial, commit: &Commit);
    fn merge(&self, a: Self::Partial, b: Self::Partial) -> Self::Partial;
}

/// Per-author totals across the whole commit set (the `table` axis).
pub struct AuthorTallier {
    pub opts: TallyOpts,
}

impl Tallier for AuthorTallier {
    type Partial = HashMap<String, TallyBuilder>;

    fn start(&self) -> Self::Partial {
        HashMap::new()
    }

    fn add(&self, acc: &mut Self::Partial, commit: &Commit) {
        if !self.opts.is_counted(commit) {
            return;
        }
        let builder = acc.entry(self.opts.key.of(commit).to_string()).or_default();
        builder.observe_commit(commit);
        for diff in &commit.file_diffs {
            builder.observe_diff(diff);
        }
    }

    fn merge(&self, mut a: Self::Partial, b: Self::Partial) -> Self::Partial {
        for (key, builder) in b {
            a.entry(key).or_default().merge(builder);
        }
        a
    }
}

/// Sorted author totals, ready for rendering.
pub fn finalize_authors(
    partial: HashMap<String, TallyBuilder>,
    opts: TallyOpts,
) -> Vec<FinalTally> {
    let mut entries: Vec<(String, TallyBuilder)> = partial.into_iter().collect();
    entries.sort_by(|(ka, a), (kb, b)| compare_entries((ka, a), (kb, b), opts.mode));
    entries.into_iter().map(|(_, b)| b.finalize()).collect()
}

/// Sequential convenience over a commit stream.
pub fn tally_commits<I>(commits: I, opts: TallyOpts) -> Result<Vec<FinalTally>>
where
    I: Iterator<Item = Result<Commit>>,
{
    let tallier = AuthorTallier { opts };
    let mut acc = tallier.start();
    for item in commits {
        tallier.add(&mut acc, &item?);
    }
    Ok(finalize_authors(acc, opts))
}


#[cfg(test)]
mod tests {
    use super::testutil::{commit, ok_commits};
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn single_commit_single_file() {
        let commits = vec![commit(
            "aaa1",
            ("Bob", "bob@x"),
            31,
            &[("foo/bar.txt", 3, 5)],
        )];
        let rows = tally_commits(ok_commits(commits), TallyOpts::default()).unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.author_name, "Bob");
        assert_eq!(row.commits, 1);
        assert_eq!(row.file_count, 1);
        assert_eq!(row.lines_added, 3);
        assert_eq!(row.lines_removed, 5);
        assert_eq!(
            row.last_commit_time,
            Utc.with_ymd_and_hms(2025, 1, 31, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn merges_skipped_unless_counted() {
        let mut merge = commit("bbb1", ("Bob", "bob@x"), 10, &[]);
        merge.is_merge = true;

        let rows = tally_commits(
            ok_commits(vec![merge.clone()]),
            TallyOpts::default(),
        )
        .unwrap();
        assert!(rows.is_empty());

        let opts = TallyOpts {
            count_merges: true,
            ..TallyOpts::default()
        };
        let rows = tally_commits(ok_commits(vec![merge]), opts).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].commits, 1);
        assert_eq!(rows[0].file_count, 0);
    }

    #[test]
    fn file_count_is_distinct_paths() {
        let commits = vec![
            commit("c1", ("Bob", "bob@x"), 1, &[("a.txt", 1, 0)]),
            commit("c2", ("Bob", "bob@x"), 2, &[("a.txt", 2, 1), ("b.txt", 1, 0)]),
        ];
        let rows = tally_commits(ok_commits(commits), TallyOpts::default()).unwrap();
        assert_eq!(rows[0].commits, 2);
        assert_eq!(rows[0].file_count, 2);
        assert_eq!(rows[0].lines_added, 4);
    }

    #[test]
    fn email_axis_groups_by_email() {
        let commits = vec![
            commit("d1", ("Bob", "bob@x"), 1, &[("a.txt", 1, 0)]),
            commit("d2", ("Robert", "bob@x"), 2, &[("b.txt", 1, 0)]),
        ];
        let opts = TallyOpts {
            key: AxisKey::Email,
            ..TallyOpts::default()
        };
        let rows = tally_commits(ok_commits(commits), opts).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].commits, 2);
    }

    #[test]
    fn sort_is_metric_desc_then_key_asc() {
        let commits = vec![
            commit("e1", ("Zed", "zed@x"), 1, &[("a.txt", 1, 0)]),
            commit("e2", ("Amy", "amy@x"), 2, &[("b.txt", 1, 0)]),
            commit("e3", ("Amy", "amy@x"), 3, &[("c.txt", 1, 0)]),
            commit("e4", ("Mia", "mia@x"), 4, &[("d.txt", 1, 0)]),
        ];
        let rows = tally_commits(ok_commits(commits), TallyOpts::default()).unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.author_name.as_str()).collect();
        assert_eq!(names, vec!["Amy", "Mia", "Zed"]);
    }

    #[test]
    fn merge_of_partials_equals_single_fold() {
        let all = vec![
            commit("f1", ("Bob", "bob@x"), 1, &[("a.txt", 1, 0)]),
            commit("f2", ("Amy", "amy@x"), 2, &[("a.txt", 2, 2)]),
            commit("f3", ("Bob", "bob@x"), 3, &[("b.txt", 0, 1)]),
            commit("f4", ("Amy", "amy@x"), 4, &[("c.txt", 5, 0)]),
        ];
        let opts = TallyOpts::default();
        let tallier = AuthorTallier { opts };

        let mut whole = tallier.start();
        for c in &all {
            tallier.add(&mut whole, c);
        }

        // Any partition of the commit set must merge to the same result.
        for split in 0..=all.len() {
            let (left, right) = all.split_at(split);
            let mut a = tallier.start();
            for c in left {
                tallier.add(&mut a, c);
            }
            let mut b = tallier.start();
            for c in right {
                tallier.add(&mut b, c);
            }
            let merged = tallier.merge(a, b);
            assert_eq!(
                finalize_authors(merged, opts),
                finalize_authors(whole.clone(), opts),
                "partition at {split}"
            );
        }
    }

    #[test]
    fn binary_diffs_count_as_zero_lines() {
        let mut c = commit("g1", ("Bob", "bob@x"), 1, &[]);
        c.file_diffs.push(FileDiff {
            path: "logo.png".to_string(),
            lines_added: None,
            lines_removed: None,
            move_dest: None,
        });
        let rows = tally_commits(ok_commits(vec![c]), TallyOpts::default()).unwrap();
        assert_eq!(rows[0].lines_added, 0);
        assert_eq!(rows[0].lines_removed, 0);
        assert_eq!(rows[0].file_count, 1);
    }
}
