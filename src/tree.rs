use std::path::Path;

use chrono::Utc;
use console::style;
use tracing::debug;

use crate::concurrent;
use crate::error::GwhoError;
use crate::format::{abbrev, number, relative_time};
use crate::git::{self, CancelToken, LogFilters};
use crate::tally::tree::{elide, TreeNode, TreeTallier};
use crate::tally::{FinalTally, TallyMode, TallyOpts};

const DEFAULT_MAX_DEPTH: usize = 100;

struct PrintOpts {
    mode: TallyMode,
    max_depth: usize,
    show_all: bool,
}

struct OutputLine {
    indent: String,
    path: String,
    author_name: String,
    author_email: String,
    metric: String,
    show_line: bool,
    show_tally: bool,
    dim_tally: bool,
    dim_path: bool,
}

#[allow(clippy::too_many_arguments)]
pub fn exec(
    token: &CancelToken,
    revs: &[String],
    paths: &[String],
    filters: &LogFilters,
    opts: TallyOpts,
    depth: Option<usize>,
    show_all: bool,
    email: bool,
) -> anyhow::Result<()> {
    debug!(?revs, ?paths, ?opts, depth, show_all, "called tree");

    let wtree = git::working_tree_files(token, paths)?;
    let repo_root = git::get_root(token)?;

    let tallier = TreeTallier {
        opts,
        wtree: &wtree,
    };
    let root = match concurrent::tally_revisions(
        token,
        revs,
        paths,
        filters,
        &tallier,
        Path::new(&repo_root),
    ) {
        Ok(root) => root,
        Err(GwhoError::EmptyResult) => {
            debug!("tree was empty");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    if root.is_empty() {
        debug!("tree was empty");
        return Ok(());
    }

    let root = elide(root.rank(opts.mode));

    let print_opts = PrintOpts {
        mode: opts.mode,
        max_depth: depth.unwrap_or(DEFAULT_MAX_DEPTH),
        show_all,
    };

    let mut lines = Vec::new();
    // A root with a single equally-attributed child reads better
    // starting at that child, the same collapse elide() applies below.
    let start_at_child = root.children.len() == 1
        && root.children.values().next().map(|c| &c.tally) == Some(&root.tally);
    if start_at_child {
        let (key, child) = root.children.iter().next().expect("checked length");
        to_lines(child, key, 0, "", &[], &print_opts, &mut lines);
    } else {
        to_lines(&root, ".", 0, "", &[], &print_opts, &mut lines);
    }

    print_tree(&lines, email);
    Ok(())
}

/// Recursively turns tree nodes into output lines, threading the glyph
/// stack and the parent's attributed author down the walk.
fn to_lines(
    node: &TreeNode,
    path: &str,
    depth: usize,
    last_author: &str,
    is_final_child: &[bool],
    opts: &PrintOpts,
    lines: &mut Vec<OutputLine>,
) {
    if depth > opts.max_depth {
        return;
    }

    let mut indent = String::new();
    for (i, is_final) in is_final_child.iter().enumerate() {
        if i < is_final_child.len() - 1 {
            indent.push_str(if *is_final { "    " } else { "│   " });
        } else {
            indent.push_str(if *is_final { "└── " } else { "├── " });
        }
    }

    let is_dir = !node.children.is_empty();
    let display_path = if is_dir {
        format!("{path}{}", std::path::MAIN_SEPARATOR)
    } else {
        path.to_string()
    };

    let new_author = node.tally.author_email != last_author;
    lines.push(OutputLine {
        indent,
        path: display_path,
        author_name: node.tally.author_name.clone(),
        author_email: node.tally.author_email.clone(),
        metric: metric_string(&node.tally, opts.mode),
        show_line: node.in_work_tree || opts.show_all,
        show_tally: opts.show_all || new_author || is_dir,
        dim_tally: is_dir,
        dim_path: !node.in_work_tree,
    });

    let mut child_keys: Vec<&String> = node.children.keys().collect();
    child_keys.sort_by(|a, b| {
        // Directories first, then alphabetically.
        let a_dir = !node.children[*a].children.is_empty();
        let b_dir = !node.children[*b].children.is_empty();
        b_dir.cmp(&a_dir).then_with(|| a.cmp(b))
    });

    let final_index = child_keys
        .iter()
        .rposition(|key| {
            let child = &node.children[*key];
            child.in_work_tree || opts.show_all
        })
        .unwrap_or(0);

    for (i, key) in child_keys.iter().enumerate() {
        let child = &node.children[*key];
        let mut stack = is_final_child.to_vec();
        stack.push(i == final_index);
        to_lines(
            child,
            key,
            depth + 1,
            &node.tally.author_email,
            &stack,
            opts,
            lines,
        );
    }
}

fn metric_string(tally: &FinalTally, mode: TallyMode) -> String {
    match mode {
        TallyMode::Commits => format!("({})", number(tally.commits)),
        TallyMode::Files => format!("({})", number(tally.file_count as u64)),
        TallyMode::Lines => format!(
            "({} / {})",
            style(format!("+{}", number(tally.lines_added))).green(),
            style(format!("-{}", number(tally.lines_removed))).red(),
        ),
        TallyMode::LastModified => {
            format!("({})", relative_time(Utc::now(), tally.last_commit_time))
        }
    }
}

fn print_tree(lines: &[OutputLine], email: bool) {
    let longest = lines
        .iter()
        .filter(|l| l.show_line)
        .map(|l| l.indent.chars().count() + l.path.chars().count())
        .max()
        .unwrap_or(0);
    // At least four dots between path and tally.
    let tally_start = longest + 4;

    for line in lines {
        if !line.show_line {
            continue;
        }

        let path = if line.dim_path {
            style(line.path.clone()).dim().to_string()
        } else {
            line.path.clone()
        };

        if !line.show_tally {
            println!("{}{}", line.indent, path);
            continue;
        }

        let author = if email {
            abbrev(&line.author_email, 25)
        } else {
            abbrev(&line.author_name, 25)
        };

        let used = line.indent.chars().count() + line.path.chars().count();
        let dots = ".".repeat(tally_start.saturating_sub(used));

        if line.dim_tally {
            println!(
                "{}{}{}{} {}",
                line.indent,
                path,
                style(dots).dim(),
                style(author).dim(),
                line.metric,
            );
        } else {
            println!(
                "{}{}{}{} {}",
                line.indent,
                path,
                style(dots).dim(),
                author,
                line.metric,
            );
        }
    }
}
