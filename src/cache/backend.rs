//! On-disk commit store: a stream of length-prefixed bincode frames,
//! one commit per frame.
//!
//! ```text
//! [u32 le frame length][bincode(Commit)] ...
//! ```
//!
//! A writer replaces the whole file atomically (temp file, fsync,
//! rename), so readers observe either the old or the new complete
//! store. A partial frame at the tail (the previous writer crashed mid
//! write) is truncated away on the next open; complete prior frames
//! are preserved. The format tag in the filename versions the encoding.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{GwhoError, Result};
use crate::git::Commit;

pub const FORMAT_TAG: &str = "bin1";

pub fn store_filename() -> String {
    format!("commits.{FORMAT_TAG}")
}

pub struct Backend {
    dir: PathBuf,
    path: PathBuf,
    lock: File,
    index: HashSet<String>,
    valid_len: u64,
    buffer: Vec<Commit>,
}

impl Backend {
    /// Creates the directory if missing, takes the exclusive writer
    /// lock, and loads the hash index, truncating a damaged tail.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .map_err(|err| GwhoError::cache(format!("create {}: {err}", dir.display()), false))?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(".lock"))
            .map_err(|err| GwhoError::cache(format!("open lock: {err}"), false))?;
        match lock.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(GwhoError::cache(
                    "another process holds the cache lock",
                    false,
                ));
            }
            Err(TryLockError::Error(err)) => {
                return Err(GwhoError::cache(format!("lock: {err}"), false));
            }
        }

        let path = dir.join(store_filename());
        let mut backend = Self {
            dir: dir.to_path_buf(),
            path,
            lock,
            index: HashSet::new(),
            valid_len: 0,
            buffer: Vec::new(),
        };
        backend.load_index()?;
        Ok(backend)
    }

    fn load_index(&mut self) -> Result<()> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(GwhoError::cache(format!("open store: {err}"), true)),
        };
        let total = file
            .metadata()
            .map_err(|err| GwhoError::cache(format!("stat store: {err}"), true))?
            .len();

        let mut reader = BufReader::new(file);
        let mut offset = 0u64;
        while offset < total {
            match read_frame(&mut reader, total - offset) {
                Some(Ok((commit, frame_len))) => {
                    self.index.insert(commit.hash);
                    offset += frame_len;
                }
                Some(Err(_)) | None => break,
            }
        }
        self.valid_len = offset;

        if offset < total {
            warn!(
                kept = offset,
                dropped = total - offset,
                "truncating damaged tail of commit cache"
            );
            OpenOptions::new()
                .write(true)
                .open(&self.path)
                .and_then(|f| f.set_len(offset))
                .map_err(|err| GwhoError::cache(format!("truncate store: {err}"), true))?;
        }

        debug!(commits = self.index.len(), "loaded commit cache index");
        Ok(())
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.index.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Buffers commits for the next flush. Hashes already present in
    /// the store or the buffer are skipped.
    pub fn add<I>(&mut self, commits: I)
    where
        I: IntoIterator<Item = Commit>,
    {
        for commit in commits {
            if self.index.insert(commit.hash.clone()) {
                self.buffer.push(commit);
            }
        }
    }

    /// Lazily yields commits whose hash is in `revs`, in store order,
    /// then buffered adds. Uncached revisions are simply absent. The
    /// sequence fuses after the first error.
    pub fn get<'a>(&'a self, revs: &'a HashSet<&'a str>) -> CachedCommits<'a> {
        let reader = File::open(&self.path).ok().map(BufReader::new);
        CachedCommits {
            reader,
            remaining: self.valid_len,
            buffer: self.buffer.iter(),
            revs,
            fused: false,
        }
    }

    /// Truncates the backing store and empties the in-memory state.
    pub fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(GwhoError::cache(format!("clear store: {err}"), false)),
        }
        self.index.clear();
        self.buffer.clear();
        self.valid_len = 0;
        Ok(())
    }

    /// Flushes buffered adds by atomically replacing the store, then
    /// releases the lock.
    pub fn close(self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let tmp_path = self.dir.join(format!("{}.tmp", store_filename()));
        let write = (|| -> io::Result<()> {
            let tmp = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(&tmp);
            if self.valid_len > 0 {
                let existing = File::open(&self.path)?;
                io::copy(&mut existing.take(self.valid_len), &mut writer)?;
            }
            for commit in &self.buffer {
                write_frame(&mut writer, commit)?;
            }
            writer.flush()?;
            drop(writer);
            tmp.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        write.map_err(|err| GwhoError::cache(format!("write store: {err}"), false))?;
        debug!(added = self.buffer.len(), "flushed commit cache");
        let _ = self.lock.unlock();
        Ok(())
    }
}

fn write_frame<W: Write>(writer: &mut W, commit: &Commit) -> io::Result<()> {
    let bytes = bincode::serialize(commit)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(&bytes)
}

/// Reads one frame. `None` means the remaining bytes cannot hold a
/// complete frame (damaged tail); `Some(Err(..))` is a read failure.
fn read_frame<R: Read>(
    reader: &mut R,
    remaining: u64,
) -> Option<std::result::Result<(Commit, u64), io::Error>> {
    if remaining < 4 {
        return None;
    }
    let mut len_bytes = [0u8; 4];
    if let Err(err) = reader.read_exact(&mut len_bytes) {
        return Some(Err(err));
    }
    let len = u32::from_le_bytes(len_bytes) as u64;
    if remaining - 4 < len {
        return None;
    }

    let mut frame = vec![0u8; len as usize];
    if let Err(err) = reader.read_exact(&mut frame) {
        return Some(Err(err));
    }
    match bincode::deserialize::<Commit>(&frame) {
        Ok(commit) => Some(Ok((commit, 4 + len))),
        // Undecodable bytes under a sound length prefix: treat like a
        // damaged tail and stop here.
        Err(_) => None,
    }
}

pub struct CachedCommits<'a> {
    reader: Option<BufReader<File>>,
    remaining: u64,
    buffer: std::slice::Iter<'a, Commit>,
    revs: &'a HashSet<&'a str>,
    fused: bool,
}

impl Iterator for CachedCommits<'_> {
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }

        while self.reader.is_some() {
            let step = {
                let reader = self.reader.as_mut().expect("checked above");
                read_frame(reader, self.remaining)
            };
            match step {
                Some(Ok((commit, frame_len))) => {
                    self.remaining -= frame_len;
                    if self.revs.contains(commit.hash.as_str()) {
                        return Some(Ok(commit));
                    }
                }
                Some(Err(err)) => {
                    self.fused = true;
                    return Some(Err(GwhoError::cache(format!("read store: {err}"), true)));
                }
                None => {
                    self.reader = None;
                }
            }
        }

        for commit in self.buffer.by_ref() {
            if self.revs.contains(commit.hash.as_str()) {
                return Some(Ok(commit.clone()));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::FileDiff;
    use chrono::{TimeZone, Utc};
    use std::io::Seek;

    fn sample_commit(hash: &str, day: u32, path: &str) -> Commit {
        Commit {
            hash: hash.to_string(),
            short_hash: hash.chars().take(11).collect(),
            author_name: "Bob".to_string(),
            author_email: "bob@work.com".to_string(),
            date: Utc.with_ymd_and_hms(2025, 1, day, 16, 35, 26).unwrap(),
            subject: format!("add {path}"),
            is_merge: false,
            file_diffs: vec![FileDiff {
                path: path.to_string(),
                lines_added: Some(3),
                lines_removed: Some(5),
                move_dest: None,
            }],
        }
    }

    fn collect(backend: &Backend, revs: &[&Commit]) -> Vec<Commit> {
        let revset: HashSet<&str> = revs.iter().map(|c| c.hash.as_str()).collect();
        backend
            .get(&revset)
            .collect::<Result<Vec<_>>>()
            .expect("cache read")
    }

    #[test]
    fn add_get_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = Backend::open(dir.path()).unwrap();

        let commit = sample_commit("9e9ea7662b1001d860471a4cece5e2f1de8062fb", 31, "foo/bar.txt");
        backend.add([commit.clone()]);

        let cached = collect(&backend, &[&commit]);
        assert_eq!(cached, vec![commit.clone()]);

        backend.clear().unwrap();
        assert!(collect(&backend, &[&commit]).is_empty());
        backend.close().unwrap();
    }

    #[test]
    fn add_get_add_get() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = Backend::open(dir.path()).unwrap();

        let one = sample_commit("1e9ea7662b1001d860471a4cece5e2f1de8062fb", 30, "foo/bar.txt");
        let two = sample_commit("2e9ea7662b1001d860471a4cece5e2f1de8062fb", 31, "foo/bim.txt");

        backend.add([one.clone()]);
        assert_eq!(collect(&backend, &[&one, &two]).len(), 1);

        backend.add([two.clone()]);
        assert_eq!(collect(&backend, &[&one, &two]).len(), 2);
        backend.close().unwrap();
    }

    #[test]
    fn survives_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let one = sample_commit("1e9ea7662b1001d860471a4cece5e2f1de8062fb", 30, "a.txt");
        let two = sample_commit("2e9ea7662b1001d860471a4cece5e2f1de8062fb", 31, "b.txt");

        let mut backend = Backend::open(dir.path()).unwrap();
        backend.add([one.clone()]);
        backend.close().unwrap();

        let mut backend = Backend::open(dir.path()).unwrap();
        assert!(backend.contains(&one.hash));
        backend.add([two.clone()]);
        backend.close().unwrap();

        let backend = Backend::open(dir.path()).unwrap();
        assert_eq!(backend.len(), 2);
        let cached = collect(&backend, &[&one, &two]);
        assert_eq!(cached.len(), 2);
        assert!(cached.contains(&one));
        assert!(cached.contains(&two));
    }

    #[test]
    fn duplicate_adds_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let one = sample_commit("1e9ea7662b1001d860471a4cece5e2f1de8062fb", 30, "a.txt");

        let mut backend = Backend::open(dir.path()).unwrap();
        backend.add([one.clone()]);
        backend.add([one.clone()]);
        backend.close().unwrap();

        let backend = Backend::open(dir.path()).unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(collect(&backend, &[&one]).len(), 1);
    }

    #[test]
    fn truncates_partial_tail_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let one = sample_commit("1e9ea7662b1001d860471a4cece5e2f1de8062fb", 30, "a.txt");

        let mut backend = Backend::open(dir.path()).unwrap();
        backend.add([one.clone()]);
        backend.close().unwrap();

        // Simulate a crashed writer: a length prefix promising more
        // bytes than the file holds.
        let store = dir.path().join(store_filename());
        let mut file = OpenOptions::new().append(true).open(&store).unwrap();
        file.write_all(&999u32.to_le_bytes()).unwrap();
        file.write_all(b"partial").unwrap();
        let damaged_len = file.stream_position().unwrap();
        drop(file);

        let backend = Backend::open(dir.path()).unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(collect(&backend, &[&one]), vec![one]);
        assert!(fs::metadata(&store).unwrap().len() < damaged_len);
    }

    #[test]
    fn second_open_fails_while_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Backend::open(dir.path()).unwrap();

        match Backend::open(dir.path()) {
            Err(GwhoError::Cache { recoverable, .. }) => assert!(!recoverable),
            other => panic!("expected lock error, got {:?}", other.map(|_| ())),
        }
        drop(backend);
    }
}
