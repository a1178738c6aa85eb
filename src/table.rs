use std::path::Path;

use chrono::Utc;
use console::style;
use tracing::debug;

use crate::concurrent;
use crate::error::GwhoError;
use crate::format::{abbrev, number, relative_time};
use crate::git::{self, CancelToken, LogFilters};
use crate::tally::{finalize_authors, AuthorTallier, FinalTally, TallyOpts};

const MAX_ROWS: usize = 50;
const AUTHOR_WIDTH: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Term,
    Csv,
    Json,
}

impl Output {
    pub fn select(csv: bool, json: bool) -> Output {
        if json {
            Output::Json
        } else if csv {
            Output::Csv
        } else {
            Output::Term
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn exec(
    token: &CancelToken,
    revs: &[String],
    paths: &[String],
    filters: &LogFilters,
    opts: TallyOpts,
    email: bool,
    output: Output,
) -> anyhow::Result<()> {
    debug!(?revs, ?paths, ?opts, "called table");

    let repo_root = git::get_root(token)?;
    let tallier = AuthorTallier { opts };
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

    let rows = finalize_authors(partial, opts);
    if rows.is_empty() {
        return Ok(());
    }

    match output {
        Output::Json => output_json(&rows)?,
        Output::Csv => output_csv(&rows),
        Output::Term => output_table(&rows, email),
    }
    Ok(())
}

fn output_json(rows: &[FinalTally]) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(rows)?);
    Ok(())
}

fn output_csv(rows: &[FinalTally]) {
    println!("name,email,commits,files,lines_added,lines_removed,last_edit");
    for row in rows {
        println!(
            "{},{},{},{},{},{},{}",
            csv_field(&row.author_name),
            csv_field(&row.author_email),
            row.commits,
            row.file_count,
            row.lines_added,
            row.lines_removed,
            row.last_commit_time.to_rfc3339(),
        );
    }
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn output_table(rows: &[FinalTally], email: bool) {
    let now = Utc::now();

    println!(
        "{:<width$} {:>7} {:>7} {:>21} {:>14}",
        style("Author").bold(),
        style("Commits").bold(),
        style("Files").bold(),
        style("Lines (+/-)").bold(),
        style("Last Edit").bold(),
        width = AUTHOR_WIDTH,
    );

    for row in rows.iter().take(MAX_ROWS) {
        let author = if email {
            abbrev(&row.author_email, AUTHOR_WIDTH)
        } else {
            abbrev(&row.author_name, AUTHOR_WIDTH)
        };

        let added = format!("+{}", number(row.lines_added));
        let removed = format!("-{}", number(row.lines_removed));
        let plain_width = added.len() + removed.len() + 3;
        let pad = " ".repeat(21usize.saturating_sub(plain_width));
        let lines = format!(
            "{pad}{} / {}",
            style(added).green(),
            style(removed).red()
        );

        println!(
            "{:<width$} {:>7} {:>7} {} {:>14}",
            author,
            number(row.commits),
            number(row.file_count as u64),
            lines,
            relative_time(now, row.last_commit_time),
            width = AUTHOR_WIDTH,
        );
    }

    if rows.len() > MAX_ROWS {
        println!("...and {} more", number((rows.len() - MAX_ROWS) as u64));
    }
}
