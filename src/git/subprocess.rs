use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::debug;

use crate::error::{GwhoError, Result};

const STDERR_TAIL_LINES: usize = 16;

/// Cooperative cancellation shared between the signal handler, line
/// readers, and tally workers. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(GwhoError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A running `git` child process with line-at-a-time access to its
/// standard output. Standard error is drained on a side thread into a
/// bounded tail so a failing child can explain itself at `wait` time.
pub struct Subprocess {
    child: Child,
    token: CancelToken,
    stderr_tail: Option<JoinHandle<Vec<String>>>,
    reaped: bool,
}

impl Subprocess {
    pub fn spawn(args: &[String], token: &CancelToken) -> Result<Self> {
        debug!(?args, "running git");

        let mut child = Command::new("git")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(GwhoError::SubprocessStart)?;

        let stderr_tail = child.stderr.take().map(|stderr| {
            std::thread::spawn(move || {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                for line in BufReader::new(stderr).lines() {
                    let Ok(line) = line else { break };
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect()
            })
        });

        Ok(Self {
            child,
            token: token.clone(),
            stderr_tail,
            reaped: false,
        })
    }

    /// Take the child's standard output as a lazy line sequence.
    /// Panics if called twice.
    pub fn stdout_lines(&mut self) -> Lines {
        let stdout = self
            .child
            .stdout
            .take()
            .expect("stdout already taken from subprocess");
        Lines {
            reader: BufReader::new(stdout),
            token: self.token.clone(),
            buf: Vec::new(),
        }
    }

    /// Block until the child exits. A nonzero exit becomes an error
    /// carrying the captured stderr tail; cancellation wins over both.
    pub fn wait(mut self) -> Result<()> {
        if self.token.is_cancelled() {
            self.kill_quietly();
            return Err(GwhoError::Cancelled);
        }

        let status = self.child.wait()?;
        self.reaped = true;
        let stderr = self.join_stderr();

        if status.success() {
            Ok(())
        } else if self.token.is_cancelled() {
            Err(GwhoError::Cancelled)
        } else {
            Err(GwhoError::SubprocessExit {
                code: status.code().unwrap_or(-1),
                stderr,
            })
        }
    }

    /// Signal and reap the child without surfacing an error. This is
    /// normal termination for consumers that stop reading early.
    pub fn kill_quietly(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.reaped = true;
        }
        self.join_stderr();
    }

    fn join_stderr(&mut self) -> String {
        self.stderr_tail
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
            .join("\n")
    }
}

impl Drop for Subprocess {
    fn drop(&mut self) {
        if !self.reaped {
            self.kill_quietly();
        }
    }
}

/// Lazy sequence over a child's stdout, without line terminators.
/// Non-UTF-8 bytes are transcoded lossily; the driver does not
/// interpret line contents. Cancellation is polled per line.
pub struct Lines {
    reader: BufReader<ChildStdout>,
    token: CancelToken,
    buf: Vec<u8>,
}

impl Iterator for Lines {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.token.is_cancelled() {
            return Some(Err(GwhoError::Cancelled));
        }

        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                }
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}
