use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::git::{self, CancelToken, LogFilters};
use crate::tally::{AxisKey, TallyMode, TallyOpts};

#[derive(Parser)]
#[command(name = "gwho")]
#[command(about = "Tallies the authorship of a git repository")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[clap(flatten)]
    pub common: CommonArgs,

    // `gwho [revision...] [-- path...]` without a subcommand behaves as
    // `gwho tree ...`.
    #[clap(flatten)]
    pub tree: TreeArgs,

    #[clap(flatten)]
    pub target: Target,
}

#[derive(Args, Clone, Default)]
pub struct CommonArgs {
    #[arg(short = 'e', long = "email", global = true, help = "Group authors by email instead of name")]
    pub email: bool,

    #[arg(long = "merges", global = true, help = "Count merge commits")]
    pub merges: bool,

    #[arg(long = "author", value_name = "PATTERN", global = true, help = "Only commits by matching authors (repeatable)")]
    pub author: Vec<String>,

    #[arg(long = "nauthor", value_name = "PATTERN", global = true, help = "Drop commits by matching authors (repeatable)")]
    pub nauthor: Vec<String>,

    #[arg(long = "since", value_name = "DATE", global = true, help = "Only commits after this date")]
    pub since: Option<String>,

    #[arg(long = "until", value_name = "DATE", global = true, help = "Only commits before this date")]
    pub until: Option<String>,

    #[arg(short = 'v', long = "verbose", global = true, help = "Enable debug logging on standard error")]
    pub verbose: bool,
}

impl CommonArgs {
    pub fn filters(&self) -> LogFilters {
        LogFilters {
            since: self.since.clone(),
            until: self.until.clone(),
            authors: self.author.clone(),
            nauthors: self.nauthor.clone(),
            merges: self.merges,
        }
    }

    fn axis(&self) -> AxisKey {
        if self.email {
            AxisKey::Email
        } else {
            AxisKey::Name
        }
    }
}

#[derive(Args, Clone, Copy, Default)]
pub struct ModeArgs {
    #[arg(short = 'l', help = "Tally lines added + removed")]
    pub lines: bool,

    #[arg(short = 'f', help = "Tally files touched")]
    pub files: bool,
}

impl ModeArgs {
    fn mode(&self) -> Result<TallyMode> {
        if self.lines && self.files {
            bail!("-l and -f flags are mutually exclusive");
        }
        Ok(if self.lines {
            TallyMode::Lines
        } else if self.files {
            TallyMode::Files
        } else {
            TallyMode::Commits
        })
    }
}

#[derive(Args, Clone, Default)]
pub struct TreeArgs {
    #[clap(flatten)]
    pub mode: ModeArgs,

    #[arg(short = 'd', long = "depth", value_name = "DEPTH", help = "Limit on tree depth")]
    pub depth: Option<usize>,

    #[arg(short = 'a', long = "all", help = "Also show paths no longer in the working tree")]
    pub all: bool,
}

/// Trailing `[revision...] [-- path...]` arguments. Paths before the
/// `--` are recognized by existing on disk.
#[derive(Args, Clone, Default)]
pub struct Target {
    #[arg(value_name = "REVISION")]
    pub revisions: Vec<String>,

    #[arg(last = true, value_name = "PATH")]
    pub paths: Vec<String>,
}

impl Target {
    pub fn split(&self) -> (Vec<String>, Vec<String>) {
        let (revs, mut paths) = git::parse_args(&self.revisions);
        paths.extend(self.paths.iter().cloned());
        (revs, paths)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a table summarizing authorship
    Table {
        #[clap(flatten)]
        mode: ModeArgs,

        #[arg(long, help = "Output as CSV")]
        csv: bool,

        #[arg(long, conflicts_with = "csv", help = "Output as JSON")]
        json: bool,

        #[clap(flatten)]
        target: Target,
    },
    /// Print the repository tree annotated with authorship
    Tree {
        #[clap(flatten)]
        tree: TreeArgs,

        #[clap(flatten)]
        target: Target,
    },
    /// Print a timeline of commit activity
    Hist {
        #[clap(flatten)]
        mode: ModeArgs,

        #[arg(long, help = "Output as JSON")]
        json: bool,

        #[clap(flatten)]
        target: Target,
    },
    /// Parse commits and report how many and how fast
    #[command(hide = true)]
    Parse {
        #[clap(flatten)]
        target: Target,
    },
}

impl Cli {
    pub fn execute(self, token: &CancelToken) -> Result<()> {
        let filters = self.common.filters();
        let axis = self.common.axis();
        let email = self.common.email;
        let merges = self.common.merges;

        let opts = |mode: TallyMode| TallyOpts {
            mode,
            count_merges: merges,
            key: axis,
        };

        match self.command {
            Some(Commands::Table {
                mode,
                csv,
                json,
                target,
            }) => {
                let (revs, paths) = target.split();
                let output = crate::table::Output::select(csv, json);
                crate::table::exec(token, &revs, &paths, &filters, opts(mode.mode()?), email, output)
                    .context("error running \"table\"")
            }
            Some(Commands::Tree { tree, target }) => {
                let (revs, paths) = target.split();
                crate::tree::exec(
                    token,
                    &revs,
                    &paths,
                    &filters,
                    opts(tree.mode.mode()?),
                    tree.depth,
                    tree.all,
                    email,
                )
                .context("error running \"tree\"")
            }
            Some(Commands::Hist { mode, json, target }) => {
                let (revs, paths) = target.split();
                crate::hist::exec(token, &revs, &paths, &filters, opts(mode.mode()?), json)
                    .context("error running \"hist\"")
            }
            Some(Commands::Parse { target }) => {
                let (revs, paths) = target.split();
                crate::parse::exec(token, &revs, &paths, &filters)
                    .context("error running \"parse\"")
            }
            None => {
                let (revs, paths) = self.target.split();
                crate::tree::exec(
                    token,
                    &revs,
                    &paths,
                    &filters,
                    opts(self.tree.mode.mode()?),
                    self.tree.depth,
                    self.tree.all,
                    email,
                )
                .context("error running \"tree\"")
            }
        }
    }
}
