//! Lazy transformers over commit sequences. These compose in any order
//! ahead of the tally engines; constraints that were already forwarded
//! to git (`--since`, `--author`, `--no-merges`) are never re-applied
//! here.

use regex::Regex;

use crate::error::{GwhoError, Result};
use crate::git::Commit;

/// Drops file diffs whose path does not start with one of the given
/// prefixes. Commits whose diff list becomes empty are still yielded;
/// they still count in commit mode.
pub fn limit_diffs_by_path<I>(
    commits: I,
    paths: Vec<String>,
) -> impl Iterator<Item = Result<Commit>>
where
    I: Iterator<Item = Result<Commit>>,
{
    commits.map(move |item| {
        let mut commit = item?;
        retain_diffs_by_path(&mut commit, &paths);
        Ok(commit)
    })
}

pub(crate) fn retain_diffs_by_path(commit: &mut Commit, paths: &[String]) {
    if paths.is_empty() {
        return;
    }
    commit
        .file_diffs
        .retain(|diff| paths.iter().any(|p| diff.path.starts_with(p.as_str())));
}

pub fn exclude_merges<I>(commits: I) -> impl Iterator<Item = Result<Commit>>
where
    I: Iterator<Item = Result<Commit>>,
{
    commits.filter(|item| match item {
        Ok(commit) => !commit.is_merge,
        Err(_) => true,
    })
}

pub fn include_merges<I>(commits: I) -> impl Iterator<Item = Result<Commit>>
where
    I: Iterator<Item = Result<Commit>>,
{
    commits.filter(|item| match item {
        Ok(commit) => commit.is_merge,
        Err(_) => true,
    })
}

/// Compiles `--nauthor` patterns. git has no portable author-exclusion
/// flag, so exclusion runs client-side, identically over every commit
/// source.
pub fn compile_nauthors(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|err| GwhoError::Args(format!("bad --nauthor: {err}"))))
        .collect()
}

pub(crate) fn author_allowed(commit: &Commit, nauthors: &[Regex]) -> bool {
    !nauthors
        .iter()
        .any(|re| re.is_match(&commit.author_name) || re.is_match(&commit.author_email))
}

/// Drops commits whose author matches any of the exclusion patterns.
pub fn exclude_authors<I>(
    commits: I,
    nauthors: Vec<Regex>,
) -> impl Iterator<Item = Result<Commit>>
where
    I: Iterator<Item = Result<Commit>>,
{
    commits.filter(move |item| match item {
        Ok(commit) => author_allowed(commit, &nauthors),
        Err(_) => true,
    })
}
