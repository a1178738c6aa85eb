use std::time::Instant;

use tracing::debug;

use crate::format::number;
use crate::git::{self, CancelToken, LogFilters};

/// Hidden subcommand: run the ingestion pipeline end to end, print each
/// commit, and report throughput. Useful for eyeballing parser output
/// and benchmarking against large histories.
pub fn exec(
    token: &CancelToken,
    revs: &[String],
    paths: &[String],
    filters: &LogFilters,
) -> anyhow::Result<()> {
    debug!(?revs, ?paths, "called parse");

    let started = Instant::now();
    let mut stream = git::commits_with_opts(token, revs, paths, filters, true)?;

    let mut count: u64 = 0;
    let mut result = Ok(());
    for item in stream.by_ref() {
        match item {
            Ok(commit) => {
                count += 1;
                println!("{commit}");
            }
            Err(err) => {
                result = Err(err);
                break;
            }
        }
    }
    let finished = stream.finish();
    result?;
    finished?;

    println!(
        "parsed {} commits in {} ms",
        number(count),
        started.elapsed().as_millis(),
    );
    Ok(())
}
