//! Access to repository history via the `git` binary. Everything here
//! drives git as a subprocess and parses its streaming output; nothing
//! reads the object store directly.

pub mod filters;
pub mod parse;
pub mod subprocess;

pub use parse::{parse_diff_path, CommitParser};
pub use subprocess::{CancelToken, Lines, Subprocess};

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Header layout consumed by [`CommitParser`]: full hash, short hash,
/// author name, author email, epoch seconds, parent hashes, subject.
pub const LOG_FORMAT: &str = "%H%n%h%n%an%n%ae%n%at%n%P%n%s";

/// One modified path within a commit. `None` line counts mean the
/// count is unknown (binary file); tallies sum them as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub lines_added: Option<u32>,
    pub lines_removed: Option<u32>,
    pub move_dest: Option<String>,
}

impl FileDiff {
    /// Path the change lands on: the rename destination when present,
    /// otherwise the path itself.
    pub fn dest_path(&self) -> &str {
        self.move_dest.as_deref().unwrap_or(&self.path)
    }

    pub fn added(&self) -> u64 {
        u64::from(self.lines_added.unwrap_or(0))
    }

    pub fn removed(&self) -> u64 {
        u64::from(self.lines_removed.unwrap_or(0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub short_hash: String,
    pub author_name: String,
    pub author_email: String,
    pub date: DateTime<Utc>,
    pub subject: String,
    pub is_merge: bool,
    pub file_diffs: Vec<FileDiff>,
}

impl Default for Commit {
    fn default() -> Self {
        Self {
            hash: String::new(),
            short_hash: String::new(),
            author_name: String::new(),
            author_email: String::new(),
            date: DateTime::UNIX_EPOCH,
            subject: String::new(),
            is_merge: false,
            file_diffs: Vec::new(),
        }
    }
}

impl Commit {
    /// Best available identifier for diagnostics.
    pub fn name(&self) -> &str {
        if !self.short_hash.is_empty() {
            &self.short_hash
        } else if !self.hash.is_empty() {
            &self.hash
        } else {
            "unknown"
        }
    }
}

impl std::fmt::Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ hash:{} author:{} <{}> date:{} merge:{} diffs:{} }}",
            self.name(),
            self.author_name,
            self.author_email,
            self.date.format("%Y-%m-%d"),
            self.is_merge,
            self.file_diffs.len(),
        )
    }
}

/// Constraints forwarded to git where it supports them. `nauthors` is
/// the exception: applied client-side (see [`filters`]).
#[derive(Debug, Clone, Default)]
pub struct LogFilters {
    pub since: Option<String>,
    pub until: Option<String>,
    pub authors: Vec<String>,
    pub nauthors: Vec<String>,
    pub merges: bool,
}

impl LogFilters {
    fn push_args(&self, args: &mut Vec<String>) {
        if let Some(since) = &self.since {
            args.push(format!("--since={since}"));
        }
        if let Some(until) = &self.until {
            args.push(format!("--until={until}"));
        }
        for author in &self.authors {
            args.push(format!("--author={author}"));
        }
        if !self.merges {
            args.push("--no-merges".to_string());
        }
    }
}

pub fn log_args(
    revs: &[String],
    paths: &[String],
    filters: &LogFilters,
    populate_diffs: bool,
) -> Vec<String> {
    let mut args = vec![
        "log".to_string(),
        format!("--pretty=format:{LOG_FORMAT}"),
    ];
    if populate_diffs {
        args.push("--numstat".to_string());
    }
    filters.push_args(&mut args);
    if revs.is_empty() {
        args.push("HEAD".to_string());
    } else {
        args.extend(revs.iter().cloned());
    }
    push_pathspec(&mut args, paths);
    args
}

/// Fetches exactly the given commits, diffs included. Used by tally
/// workers over their chunk of an already-enumerated revision list.
pub fn no_walk_log_args(revs: &[String], paths: &[String]) -> Vec<String> {
    let mut args = vec![
        "log".to_string(),
        "--no-walk=unsorted".to_string(),
        format!("--pretty=format:{LOG_FORMAT}"),
        "--numstat".to_string(),
    ];
    args.extend(revs.iter().cloned());
    push_pathspec(&mut args, paths);
    args
}

fn push_pathspec(args: &mut Vec<String>, paths: &[String]) {
    if !paths.is_empty() {
        args.push("--".to_string());
        args.extend(paths.iter().cloned());
    }
}

/// A lazy commit sequence bound to the subprocess producing it. The
/// terminator runs on drop even if the stream is abandoned early.
pub struct CommitStream {
    parser: CommitParser<Lines>,
    proc: Subprocess,
    exhausted: bool,
}

impl Iterator for CommitStream {
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.parser.next() {
            None => {
                self.exhausted = true;
                None
            }
            item => item,
        }
    }
}

impl CommitStream {
    /// Reap the child. A nonzero exit surfaces only when the stream was
    /// read to the end; stopping early is normal termination.
    pub fn finish(mut self) -> Result<()> {
        if self.exhausted {
            self.proc.wait()
        } else {
            self.proc.kill_quietly();
            Ok(())
        }
    }
}

pub fn commit_stream(args: &[String], token: &CancelToken) -> Result<CommitStream> {
    let mut proc = Subprocess::spawn(args, token)?;
    let lines = proc.stdout_lines();
    Ok(CommitStream {
        parser: CommitParser::new(lines),
        proc,
        exhausted: false,
    })
}

/// Returns an iterator over commits identified by the given revisions
/// and paths, with cleanup bound to the returned stream.
pub fn commits_with_opts(
    token: &CancelToken,
    revs: &[String],
    paths: &[String],
    filters: &LogFilters,
    populate_diffs: bool,
) -> Result<CommitStream> {
    commit_stream(&log_args(revs, paths, filters, populate_diffs), token)
}

/// Enumerates the full set of revision hashes for a range. Cheap: no
/// diffs are computed.
pub fn rev_list(
    token: &CancelToken,
    revs: &[String],
    paths: &[String],
    filters: &LogFilters,
) -> Result<Vec<String>> {
    let mut args = vec!["rev-list".to_string()];
    filters.push_args(&mut args);
    if revs.is_empty() {
        args.push("HEAD".to_string());
    } else {
        args.extend(revs.iter().cloned());
    }
    push_pathspec(&mut args, paths);

    let mut proc = Subprocess::spawn(&args, token)?;
    let mut hashes = Vec::new();
    for line in proc.stdout_lines() {
        let line = line?;
        if !line.is_empty() {
            hashes.push(line);
        }
    }
    proc.wait()?;
    Ok(hashes)
}

/// Absolute path of the repository root.
pub fn get_root(token: &CancelToken) -> Result<String> {
    let args = vec!["rev-parse".to_string(), "--show-toplevel".to_string()];
    let mut proc = Subprocess::spawn(&args, token)?;
    let mut root = String::new();
    for line in proc.stdout_lines() {
        let line = line?;
        if root.is_empty() && !line.is_empty() {
            root = line;
        }
    }
    proc.wait()?;
    Ok(root)
}

/// All paths in the working tree under the given paths, relative to the
/// repository root.
pub fn working_tree_files(token: &CancelToken, paths: &[String]) -> Result<HashSet<String>> {
    let mut args = vec!["ls-files".to_string(), "--full-name".to_string()];
    push_pathspec(&mut args, paths);

    let mut proc = Subprocess::spawn(&args, token)?;
    let mut files = HashSet::new();
    for line in proc.stdout_lines() {
        let line = line?;
        if !line.is_empty() {
            files.insert(line);
        }
    }
    proc.wait()?;
    Ok(files)
}

/// Splits trailing CLI arguments into revisions and paths. `--` is the
/// explicit separator; without it, an argument naming an existing
/// filesystem path is a path and anything else is a revision.
pub fn parse_args(args: &[String]) -> (Vec<String>, Vec<String>) {
    if let Some(sep) = args.iter().position(|a| a == "--") {
        let revs = args[..sep].to_vec();
        let paths = args[sep + 1..].to_vec();
        return (revs, paths);
    }

    let mut revs = Vec::new();
    let mut paths = Vec::new();
    for arg in args {
        if Path::new(arg).exists() {
            paths.push(arg.clone());
        } else {
            revs.push(arg.clone());
        }
    }
    (revs, paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_args_forward_filters_verbatim() {
        let filters = LogFilters {
            since: Some("2 weeks ago".to_string()),
            until: None,
            authors: vec!["bob".to_string(), "alice".to_string()],
            nauthors: vec!["bot".to_string()],
            merges: false,
        };
        let args = log_args(
            &["HEAD~10..HEAD".to_string()],
            &["src".to_string()],
            &filters,
            true,
        );

        assert!(args.contains(&"--numstat".to_string()));
        assert!(args.contains(&"--since=2 weeks ago".to_string()));
        assert!(args.contains(&"--author=bob".to_string()));
        assert!(args.contains(&"--author=alice".to_string()));
        assert!(args.contains(&"--no-merges".to_string()));
        // nauthors never reach git
        assert!(!args.iter().any(|a| a.contains("bot")));
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(args[sep + 1], "src");
    }

    #[test]
    fn log_args_default_to_head() {
        let args = log_args(&[], &[], &LogFilters::default(), false);
        assert!(args.contains(&"HEAD".to_string()));
        assert!(!args.contains(&"--numstat".to_string()));
    }

    #[test]
    fn parse_args_splits_on_double_dash() {
        let args: Vec<String> = ["HEAD~5..HEAD", "--", "src", "docs"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (revs, paths) = parse_args(&args);
        assert_eq!(revs, vec!["HEAD~5..HEAD"]);
        assert_eq!(paths, vec!["src", "docs"]);
    }
}
