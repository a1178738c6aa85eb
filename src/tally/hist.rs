//! Date-bucketed tally for the `hist` axis. Accumulation is per day so
//! partials merge losslessly; the display resolution (day, month, year)
//! is chosen from the data span at finalize time.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::{GwhoError, Result};
use crate::git::Commit;
use crate::tally::{compare_entries, FinalTally, Tallier, TallyBuilder, TallyOpts};

pub type HistPartial = BTreeMap<NaiveDate, HashMap<String, TallyBuilder>>;

pub struct HistTallier {
    pub opts: TallyOpts,
}

impl Tallier for HistTallier {
    type Partial = HistPartial;

    fn start(&self) -> HistPartial {
        BTreeMap::new()
    }

    fn add(&self, acc: &mut HistPartial, commit: &Commit) {
        if !self.opts.is_counted(commit) {
            return;
        }
        let day = commit.date.date_naive();
        let builder = acc
            .entry(day)
            .or_default()
            .entry(self.opts.key.of(commit).to_string())
            .or_default();
        builder.observe_commit(commit);
        for diff in &commit.file_diffs {
            builder.observe_diff(diff);
        }
    }

    fn merge(&self, mut a: HistPartial, b: HistPartial) -> HistPartial {
        for (day, authors) in b {
            let entry = a.entry(day).or_default();
            for (key, builder) in authors {
                entry.entry(key).or_default().merge(builder);
            }
        }
        a
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Daily,
    Monthly,
    Yearly,
}

impl Resolution {
    /// Picked so the histogram stays a screenful: days up to two
    /// months, months up to two years, years beyond.
    fn for_span(first: NaiveDate, last: NaiveDate) -> Resolution {
        let days = (last - first).num_days();
        if days > 730 {
            Resolution::Yearly
        } else if days > 62 {
            Resolution::Monthly
        } else {
            Resolution::Daily
        }
    }

    fn label(&self, day: NaiveDate) -> String {
        match self {
            Resolution::Daily => day.format("%Y-%m-%d").to_string(),
            Resolution::Monthly => day.format("%Y-%m").to_string(),
            Resolution::Yearly => day.format("%Y").to_string(),
        }
    }

    fn next(&self, day: NaiveDate) -> Option<NaiveDate> {
        match self {
            Resolution::Daily => day.succ_opt(),
            Resolution::Monthly => {
                let (year, month) = if day.month() == 12 {
                    (day.year() + 1, 1)
                } else {
                    (day.year(), day.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
            }
            Resolution::Yearly => NaiveDate::from_ymd_opt(day.year() + 1, 1, 1),
        }
    }

    fn floor(&self, day: NaiveDate) -> NaiveDate {
        match self {
            Resolution::Daily => day,
            Resolution::Monthly => NaiveDate::from_ymd_opt(day.year(), day.month(), 1)
                .unwrap_or(day),
            Resolution::Yearly => NaiveDate::from_ymd_opt(day.year(), 1, 1).unwrap_or(day),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeBucket {
    pub label: String,
    pub commits: u64,
    pub files: usize,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub winner: Option<FinalTally>,
}

impl TimeBucket {
    pub fn metric(&self, mode: crate::tally::TallyMode) -> u64 {
        use crate::tally::TallyMode;
        match mode {
            TallyMode::Files => self.files as u64,
            TallyMode::Lines => self.lines_added + self.lines_removed,
            _ => self.commits,
        }
    }
}

/// Contiguous buckets from the first to the last commit date; quiet
/// periods appear as empty buckets rather than gaps.
pub fn finalize_hist(partial: HistPartial, opts: TallyOpts) -> Result<Vec<TimeBucket>> {
    let (first, last) = match (partial.keys().next(), partial.keys().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Err(GwhoError::EmptyResult),
    };
    let resolution = Resolution::for_span(first, last);

    // Re-bucket the per-day builders at the chosen resolution.
    let mut merged: BTreeMap<NaiveDate, HashMap<String, TallyBuilder>> = BTreeMap::new();
    for (day, authors) in partial {
        let bucket = merged.entry(resolution.floor(day)).or_default();
        for (key, builder) in authors {
            bucket.entry(key).or_default().merge(builder);
        }
    }

    let mut buckets = Vec::new();
    let mut cursor = resolution.floor(first);
    let end = resolution.floor(last);
    loop {
        let authors = merged.remove(&cursor).unwrap_or_default();
        let commits = authors.values().map(|b| b.commits).sum();
        let lines_added = authors.values().map(|b| b.lines_added).sum();
        let lines_removed = authors.values().map(|b| b.lines_removed).sum();
        let files = authors
            .values()
            .flat_map(|b| b.paths.iter())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let winner = authors
            .iter()
            .min_by(|(ka, a), (kb, b)| compare_entries((ka, a), (kb, b), opts.mode))
            .map(|(_, builder)| builder.finalize());

        buckets.push(TimeBucket {
            label: resolution.label(cursor),
            commits,
            files,
            lines_added,
            lines_removed,
            winner,
        });

        if cursor >= end {
            break;
        }
        cursor = match resolution.next(cursor) {
            Some(next) => next,
            None => break,
        };
    }

    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::testutil::{commit, ok_commits};
    use crate::tally::TallyMode;

    fn fold(commits: Vec<crate::git::Commit>, opts: TallyOpts) -> HistPartial {
        let tallier = HistTallier { opts };
        let mut acc = tallier.start();
        for item in ok_commits(commits) {
            tallier.add(&mut acc, &item.unwrap());
        }
        acc
    }

    #[test]
    fn daily_buckets_fill_gaps() {
        let opts = TallyOpts::default();
        let acc = fold(
            vec![
                commit("a1", ("Bob", "bob@x"), 1, &[("a.txt", 1, 0)]),
                commit("a2", ("Bob", "bob@x"), 3, &[("a.txt", 2, 0)]),
            ],
            opts,
        );
        let buckets = finalize_hist(acc, opts).unwrap();

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].label, "2025-01-01");
        assert_eq!(buckets[0].commits, 1);
        assert_eq!(buckets[1].commits, 0);
        assert!(buckets[1].winner.is_none());
        assert_eq!(buckets[2].commits, 1);
    }

    #[test]
    fn bucket_winner_follows_mode() {
        let opts = TallyOpts {
            mode: TallyMode::Lines,
            ..TallyOpts::default()
        };
        let acc = fold(
            vec![
                commit("b1", ("Amy", "amy@x"), 5, &[("a.txt", 10, 0)]),
                commit("b2", ("Zed", "zed@x"), 5, &[("b.txt", 1, 0)]),
                commit("b3", ("Zed", "zed@x"), 5, &[("c.txt", 1, 0)]),
            ],
            opts,
        );
        let buckets = finalize_hist(acc, opts).unwrap();

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].commits, 3);
        assert_eq!(buckets[0].winner.as_ref().unwrap().author_name, "Amy");
    }

    #[test]
    fn uncounted_merge_leaves_bucket_untouched() {
        let opts = TallyOpts::default();
        let mut merge = commit("c1", ("Bob", "bob@x"), 2, &[]);
        merge.is_merge = true;
        let acc = fold(
            vec![commit("c2", ("Bob", "bob@x"), 2, &[("a.txt", 1, 0)]), merge],
            opts,
        );
        let buckets = finalize_hist(acc, opts).unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].commits, 1);
    }

    #[test]
    fn empty_input_is_a_clean_signal() {
        let opts = TallyOpts::default();
        assert!(matches!(
            finalize_hist(BTreeMap::new(), opts),
            Err(GwhoError::EmptyResult)
        ));
    }

    #[test]
    fn partials_merge_like_a_single_fold() {
        let opts = TallyOpts::default();
        let all = vec![
            commit("d1", ("Bob", "bob@x"), 1, &[("a.txt", 1, 0)]),
            commit("d2", ("Amy", "amy@x"), 1, &[("b.txt", 2, 0)]),
            commit("d3", ("Bob", "bob@x"), 9, &[("c.txt", 3, 0)]),
        ];
        let tallier = HistTallier { opts };

        let whole = fold(all.clone(), opts);
        let a = fold(all[..1].to_vec(), opts);
        let b = fold(all[1..].to_vec(), opts);
        let merged = tallier.merge(a, b);

        let whole = finalize_hist(whole, opts).unwrap();
        let merged = finalize_hist(merged, opts).unwrap();
        assert_eq!(whole.len(), merged.len());
        for (w, m) in whole.iter().zip(&merged) {
            assert_eq!(w.label, m.label);
            assert_eq!(w.commits, m.commits);
            assert_eq!(w.winner, m.winner);
        }
    }
}
