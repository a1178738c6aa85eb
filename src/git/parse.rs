//! Streaming parser for `git log` output in the fixed header format
//! used throughout this crate (see [`crate::git::LOG_FORMAT`]):
//!
//! ```text
//! <full hash>
//! <short hash>
//! <author name>
//! <author email>
//! <author date, seconds since epoch>
//! <parent hashes, space separated>
//! <subject>
//! <numstat lines when diffs were requested>
//! ```
//!
//! Records are separated by blank lines. git also inserts a blank line
//! between the header and a non-empty numstat block; the parser accepts
//! it either way, so commits with empty diffs and a trailing commit
//! without a separator are both handled.

use std::iter::Peekable;

use chrono::DateTime;

use crate::error::{GwhoError, Result};
use crate::git::{Commit, FileDiff};

/// Turns a line sequence into a lazy commit sequence. Single-pass; the
/// first malformed line yields a [`GwhoError::Parse`] and ends the
/// sequence.
pub struct CommitParser<I>
where
    I: Iterator<Item = Result<String>>,
{
    lines: Peekable<I>,
    fused: bool,
}

impl<I> CommitParser<I>
where
    I: Iterator<Item = Result<String>>,
{
    pub fn new(lines: I) -> Self {
        Self {
            lines: lines.peekable(),
            fused: false,
        }
    }

    fn parse_error(&mut self, commit: &Commit, line: &str) -> GwhoError {
        self.fused = true;
        GwhoError::Parse {
            commit: commit.name().to_string(),
            line: line.to_string(),
        }
    }

    /// Reads one header line; a blank line or EOF mid-header is malformed.
    fn header_line(&mut self, commit: &Commit) -> Result<String> {
        match self.lines.next() {
            Some(Ok(line)) if !line.is_empty() => Ok(line),
            Some(Ok(line)) => Err(self.parse_error(commit, &line)),
            Some(Err(err)) => {
                self.fused = true;
                Err(err)
            }
            None => Err(self.parse_error(commit, "<eof>")),
        }
    }

    fn next_commit(&mut self) -> Option<Result<Commit>> {
        // Skip separators between records.
        let hash = loop {
            match self.lines.next()? {
                Ok(line) if line.is_empty() => continue,
                Ok(line) => break line,
                Err(err) => {
                    self.fused = true;
                    return Some(Err(err));
                }
            }
        };

        let mut commit = Commit {
            hash,
            ..Commit::default()
        };

        macro_rules! header {
            () => {
                match self.header_line(&commit) {
                    Ok(line) => line,
                    Err(err) => return Some(Err(err)),
                }
            };
        }

        commit.short_hash = header!();
        commit.author_name = header!();
        commit.author_email = header!();

        let date_line = header!();
        let Ok(secs) = date_line.parse::<i64>() else {
            return Some(Err(self.parse_error(&commit, &date_line)));
        };
        let Some(date) = DateTime::from_timestamp(secs, 0) else {
            return Some(Err(self.parse_error(&commit, &date_line)));
        };
        commit.date = date;

        // The parent list (root commit) and the subject may legitimately
        // be empty, so neither goes through header_line(), which rejects
        // blanks.
        macro_rules! blankable_header {
            () => {
                match self.lines.next() {
                    Some(Ok(line)) => line,
                    Some(Err(err)) => {
                        self.fused = true;
                        return Some(Err(err));
                    }
                    None => return Some(Err(self.parse_error(&commit, "<eof>"))),
                }
            };
        }

        let parents = blankable_header!();
        commit.is_merge = parents.split_whitespace().count() >= 2;
        commit.subject = blankable_header!();

        // Numstat block. git separates the header from a diff block with
        // one blank line; a record with no diffs runs straight into the
        // next header.
        match self.lines.peek() {
            None | Some(Err(_)) => return Some(Ok(commit)),
            Some(Ok(line)) if !line.is_empty() => return Some(Ok(commit)),
            Some(Ok(_)) => {
                self.lines.next();
            }
        }

        loop {
            match self.lines.peek() {
                None | Some(Err(_)) => break,
                Some(Ok(line)) if line.is_empty() => {
                    self.lines.next();
                    break;
                }
                Some(Ok(line)) if looks_like_numstat(line) => {
                    let line = match self.lines.next() {
                        Some(Ok(line)) => line,
                        _ => unreachable!("peeked"),
                    };
                    match parse_numstat_line(&line) {
                        Some(diff) => commit.file_diffs.push(diff),
                        None => return Some(Err(self.parse_error(&commit, &line))),
                    }
                }
                // Next record's header after the optional blank.
                Some(Ok(_)) => break,
            }
        }

        Some(Ok(commit))
    }
}

impl<I> Iterator for CommitParser<I>
where
    I: Iterator<Item = Result<String>>,
{
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        self.next_commit()
    }
}

fn looks_like_numstat(line: &str) -> bool {
    match line.split_once('\t') {
        Some((count, rest)) => {
            (count == "-" || count.parse::<u32>().is_ok()) && rest.contains('\t')
        }
        None => false,
    }
}

fn parse_numstat_line(line: &str) -> Option<FileDiff> {
    let mut fields = line.splitn(3, '\t');
    let added = parse_count(fields.next()?)?;
    let removed = parse_count(fields.next()?)?;
    let (path, move_dest) = parse_diff_path(fields.next()?);

    Some(FileDiff {
        path,
        lines_added: added,
        lines_removed: removed,
        move_dest,
    })
}

/// `-` means the count is unknown (binary file).
fn parse_count(field: &str) -> Option<Option<u32>> {
    if field == "-" {
        Some(None)
    } else {
        field.parse::<u32>().ok().map(Some)
    }
}

/// Decodes a possibly rename-encoded numstat path into the source path
/// and, when the rename changed it, the destination path.
///
/// git reports renames either as `prefix{old => new}suffix`, with the
/// braced fragment in any component, or as the whole-path form
/// `old => new`. An empty side of the arrow leaves a doubled separator
/// behind after substitution, which is collapsed.
pub fn parse_diff_path(field: &str) -> (String, Option<String>) {
    if let Some(open) = field.find('{') {
        if let Some(close) = field[open..].find('}').map(|i| open + i) {
            if let Some((old, new)) = field[open + 1..close].split_once(" => ") {
                let prefix = &field[..open];
                let suffix = &field[close + 1..];
                let src = collapse_separators(&format!("{prefix}{old}{suffix}"));
                let dst = collapse_separators(&format!("{prefix}{new}{suffix}"));
                if src == dst {
                    return (src, None);
                }
                return (src, Some(dst));
            }
        }
    }

    if let Some((old, new)) = field.split_once(" => ") {
        if old != new {
            return (old.to_string(), Some(new.to_string()));
        }
        return (old.to_string(), None);
    }

    (field.to_string(), None)
}

fn collapse_separators(path: &str) -> String {
    let mut collapsed = path.replace("//", "/");
    while collapsed.contains("//") {
        collapsed = collapsed.replace("//", "/");
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn lines(raw: &[&str]) -> impl Iterator<Item = Result<String>> {
        raw.iter()
            .map(|s| Ok(s.to_string()))
            .collect::<Vec<_>>()
            .into_iter()
    }

    const HEADER: [&str; 7] = [
        "9e9ea7662b1001d860471a4cece5e2f1de8062fb",
        "9e9ea7662b1",
        "Bob",
        "bob@work.com",
        "1738341326",
        "1e9ea7662b1001d860471a4cece5e2f1de8062fb",
        "add foo",
    ];

    #[test]
    fn parses_single_commit_with_diffs() {
        let mut raw: Vec<&str> = HEADER.to_vec();
        raw.extend(["", "3\t5\tfoo/bar.txt", ""]);

        let commits: Vec<_> = CommitParser::new(lines(&raw))
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert_eq!(commits.len(), 1);
        let commit = &commits[0];
        assert_eq!(commit.short_hash, "9e9ea7662b1");
        assert_eq!(commit.author_name, "Bob");
        assert_eq!(commit.author_email, "bob@work.com");
        assert_eq!(
            commit.date,
            Utc.with_ymd_and_hms(2025, 1, 31, 16, 35, 26).unwrap()
        );
        assert_eq!(commit.subject, "add foo");
        assert!(!commit.is_merge);
        assert_eq!(commit.file_diffs.len(), 1);
        assert_eq!(commit.file_diffs[0].path, "foo/bar.txt");
        assert_eq!(commit.file_diffs[0].lines_added, Some(3));
        assert_eq!(commit.file_diffs[0].lines_removed, Some(5));
    }

    #[test]
    fn trailing_commit_without_separator_is_emitted() {
        let mut raw: Vec<&str> = HEADER.to_vec();
        raw.extend(["", "3\t5\tfoo/bar.txt"]);

        let commits: Vec<_> = CommitParser::new(lines(&raw))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].file_diffs.len(), 1);
    }

    #[test]
    fn commit_without_diff_block_runs_into_next_header() {
        let mut raw: Vec<&str> = HEADER.to_vec();
        let second = [
            "2e9ea7662b1001d860471a4cece5e2f1de8062fb",
            "2e9ea7662b1",
            "Alice",
            "alice@work.com",
            "1738341400",
            "",
            "add nothing",
        ];
        raw.extend(second);

        let commits: Vec<_> = CommitParser::new(lines(&raw))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(commits.len(), 2);
        assert!(commits[0].file_diffs.is_empty());
        assert!(commits[1].file_diffs.is_empty());
        assert_eq!(commits[1].author_name, "Alice");
        // Root commit: empty parent list.
        assert!(!commits[1].is_merge);
    }

    #[test]
    fn merge_detected_from_parent_list() {
        let raw = [
            "9e9ea7662b1001d860471a4cece5e2f1de8062fb",
            "9e9ea7662b1",
            "Bob",
            "bob@work.com",
            "1738341326",
            "1111111111111111111111111111111111111111 2222222222222222222222222222222222222222",
            "merge branch",
        ];

        let commits: Vec<_> = CommitParser::new(lines(&raw))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert!(commits[0].is_merge);
    }

    #[test]
    fn binary_counts_parse_as_unknown() {
        let mut raw: Vec<&str> = HEADER.to_vec();
        raw.extend(["", "-\t-\tlogo.png", ""]);

        let commits: Vec<_> = CommitParser::new(lines(&raw))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let diff = &commits[0].file_diffs[0];
        assert_eq!(diff.lines_added, None);
        assert_eq!(diff.lines_removed, None);
        assert_eq!(diff.added(), 0);
        assert_eq!(diff.removed(), 0);
    }

    #[test]
    fn malformed_date_yields_parse_error_and_fuses() {
        let raw = [
            "9e9ea7662b1001d860471a4cece5e2f1de8062fb",
            "9e9ea7662b1",
            "Bob",
            "bob@work.com",
            "not-a-date",
            "",
            "subject",
        ];

        let mut parser = CommitParser::new(lines(&raw));
        match parser.next() {
            Some(Err(GwhoError::Parse { commit, line })) => {
                assert_eq!(commit, "9e9ea7662b1");
                assert_eq!(line, "not-a-date");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
        assert!(parser.next().is_none());
    }

    #[test]
    fn rename_in_middle_component() {
        let (src, dst) = parse_diff_path("foo/{old => new}/bar.txt");
        assert_eq!(src, "foo/old/bar.txt");
        assert_eq!(dst.as_deref(), Some("foo/new/bar.txt"));
    }

    #[test]
    fn rename_with_empty_old_side() {
        let (src, dst) = parse_diff_path("foo/{ => sub}/bar.txt");
        assert_eq!(src, "foo/bar.txt");
        assert_eq!(dst.as_deref(), Some("foo/sub/bar.txt"));
    }

    #[test]
    fn rename_with_empty_new_side() {
        let (src, dst) = parse_diff_path("foo/{sub => }/bar.txt");
        assert_eq!(src, "foo/sub/bar.txt");
        assert_eq!(dst.as_deref(), Some("foo/bar.txt"));
    }

    #[test]
    fn whole_path_rename_without_braces() {
        let (src, dst) = parse_diff_path("a.txt => b.txt");
        assert_eq!(src, "a.txt");
        assert_eq!(dst.as_deref(), Some("b.txt"));
    }

    #[test]
    fn plain_path_is_not_a_rename() {
        let (src, dst) = parse_diff_path("src/main.rs");
        assert_eq!(src, "src/main.rs");
        assert_eq!(dst, None);

        // Braces without an arrow are literal path characters.
        let (src, dst) = parse_diff_path("weird/{brace}/file");
        assert_eq!(src, "weird/{brace}/file");
        assert_eq!(dst, None);
    }

    #[test]
    fn rename_numstat_line_end_to_end() {
        let mut raw: Vec<&str> = HEADER.to_vec();
        raw.extend(["", "1\t1\tfoo/{old => new}/bar.txt", ""]);

        let commits: Vec<_> = CommitParser::new(lines(&raw))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        let diff = &commits[0].file_diffs[0];
        assert_eq!(diff.path, "foo/old/bar.txt");
        assert_eq!(diff.move_dest.as_deref(), Some("foo/new/bar.txt"));
        assert_eq!(diff.dest_path(), "foo/new/bar.txt");
    }

    #[test]
    fn multiple_commits_with_blank_separators() {
        let mut raw: Vec<&str> = HEADER.to_vec();
        raw.extend(["", "3\t5\tfoo/bar.txt", ""]);
        raw.extend([
            "2e9ea7662b1001d860471a4cece5e2f1de8062fb",
            "2e9ea7662b1",
            "Alice",
            "alice@work.com",
            "1738341400",
            "9e9ea7662b1001d860471a4cece5e2f1de8062fb",
            "tweak foo",
            "",
            "1\t0\tfoo/bim.txt",
            "2\t2\tfoo/bar.txt",
        ]);

        let commits: Vec<_> = CommitParser::new(lines(&raw))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[1].file_diffs.len(), 2);
    }
}
