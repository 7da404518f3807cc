//! Task log tailing
//!
//! A tail reads a task's log exactly once, byte for byte, and stops
//! at the done sentinel. Multiple tails of the same log observe the
//! identical sequence because the stop rule depends only on file
//! content: everything up to and including the newline that ends the
//! sentinel line.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::writer::SENTINEL_PREFIX;
use crate::error::LogError;

/// Incremental reader over one task log
pub struct LogTail {
    path: PathBuf,
    offset: u64,
    finished: bool,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            finished: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the sentinel has been read
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read whatever new bytes are available, never past the sentinel.
    ///
    /// Returns `None` when there is nothing new; an empty read on a
    /// finished tail also returns `None`. Bytes that might begin a
    /// sentinel whose line has not been fully written yet are held
    /// back until the line completes.
    pub fn read_next(&mut self) -> Result<Option<Vec<u8>>, LogError> {
        if self.finished {
            return Ok(None);
        }
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        if buf.is_empty() {
            return Ok(None);
        }

        if let Some(pos) = find_subsequence(&buf, SENTINEL_PREFIX.as_bytes()) {
            // Emit through the newline terminating the sentinel line,
            // or hold the partial line back until it is complete.
            match buf[pos..].iter().position(|&b| b == b'\n') {
                Some(nl) => {
                    let end = pos + nl + 1;
                    buf.truncate(end);
                    self.offset += end as u64;
                    self.finished = true;
                }
                None => {
                    buf.truncate(pos);
                    self.offset += pos as u64;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
            }
        } else {
            self.offset += buf.len() as u64;
        }
        Ok(Some(buf))
    }

    /// Drain the whole log into one buffer (for finished tasks)
    pub fn read_all(&mut self) -> Result<Vec<u8>, LogError> {
        let mut all = Vec::new();
        while let Some(chunk) = self.read_next()? {
            all.extend_from_slice(&chunk);
        }
        Ok(all)
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
