use std::path::Path;

use console::style;
use tracing::debug;

use crate::concurrent;
use crate::error::GwhoError;
use crate::format::{abbrev, number};
use crate::git::{self, CancelToken, LogFilters};
use crate::tally::hist::{finalize_hist, HistTallier, TimeBucket};
use crate::tally::TallyOpts;

const BAR_WIDTH: usize = 36;

pub fn exec(
    token: &CancelToken,
    revs: &[String],
    paths: &[String],
    filters: &LogFilters,
    opts: TallyOpts,
    json: bool,
) -> anyhow::Result<()> {
    debug!(?revs, ?paths, ?opts, "called hist");

    let repo_root = git::get_root(token)?;
    let tallier = HistTallier { opts };
    let partial = match concurrent::tally_revisions(
        token,
        revs,
        paths,
        filters,
        &tallier,
        Path::new(&repo_root),
    ) {
        Ok(partial) => partial,
        Err(GwhoError::EmptyResult) => {
            debug!("no commits matched");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let buckets = match finalize_hist(partial, opts) {
        Ok(buckets) => buckets,
        Err(GwhoError::EmptyResult) => {
            debug!("no commits matched");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&buckets)?);
    } else {
        render(&buckets, opts);
    }
    Ok(())
}

fn render(buckets: &[TimeBucket], opts: TallyOpts) {
    let max = buckets
        .iter()
        .map(|b| b.metric(opts.mode))
        .max()
        .unwrap_or(0)
        .max(1);
    let label_width = buckets.iter().map(|b| b.label.len()).max().unwrap_or(0);

    for bucket in buckets {
        let value = bucket.metric(opts.mode);
        let width = ((value as f64 / max as f64) * BAR_WIDTH as f64).round() as usize;
        let width = width.min(BAR_WIDTH);
        let bar = "█".repeat(width);
        let pad = " ".repeat(BAR_WIDTH - width);

        let author = bucket
            .winner
            .as_ref()
            .filter(|_| value > 0)
            .map(|w| abbrev(&w.author_name, 25))
            .unwrap_or_default();

        println!(
            "{:<label_width$} ┊ {}{} {:>7} {}",
            bucket.label,
            style(bar).green(),
            pad,
            number(value),
            style(author).dim(),
        );
    }
}
