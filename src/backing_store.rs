//! Ordered set of append-only backing files.
//!
//! A run is backed by an ordered list of file paths: the list order
//! defines deinterleaving when multiple capture ports feed the same
//! board. Files are assumed append-only, grown by an external (or
//! in-process, see [`crate::capture`]) writer. Reads are positional so the
//! reader never needs its own seek cursor separate from the index
//! builder's resumable one.

use std::fs::File;
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::Result;

/// One file contributing packets to a run.
pub struct BackingFile {
    /// Path this file was opened from (kept for persistence and error
    /// messages; the open `File` handle itself is not serializable).
    pub path: PathBuf,
    file: File,
    /// Byte offset up to which the index builder has already scanned this
    /// file. Advances monotonically; never rewound except by construction.
    pub indexed_up_to: u64,
}

impl BackingFile {
    fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            file,
            indexed_up_to: 0,
        })
    }

    /// Positional read of up to `n` bytes starting at `offset`.
    ///
    /// A short read (fewer than `n` bytes, including zero) is legal and
    /// signals "payload not yet arrived" rather than an error; callers
    /// must check the returned length themselves.
    pub fn read_at(&self, offset: u64, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut got = 0;
        loop {
            match self.file.read_at(&mut buf[got..], offset + got as u64) {
                Ok(0) => break,
                Ok(k) => {
                    got += k;
                    if got == n {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(got);
        Ok(buf)
    }

    /// Force the OS to flush pending writes that are visible to this
    /// reader and return the file's current byte length.
    ///
    /// The writer side (capture thread, or an external process) is
    /// assumed to be append-only; `sync_all` plus a fresh `metadata` call
    /// is enough for the reader to observe growth, since POSIX readers
    /// always see writes that have completed, in order, for a single
    /// appending writer on the same machine.
    pub fn sync_and_seek_end(&self) -> Result<u64> {
        self.file.sync_all().ok(); // best-effort: read-only fd may reject sync
        Ok(self.file.metadata()?.len())
    }
}

/// Ordered collection of [`BackingFile`]s making up one run.
pub struct BackingStore {
    files: Vec<BackingFile>,
}

impl BackingStore {
    /// Open every path in `paths`, in order. Order defines deinterleaving
    /// precedence (spec.md §4.3 tie-breaking policy).
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        let mut files = Vec::with_capacity(paths.len());
        for p in paths {
            debug!("opening backing file {}", p.display());
            files.push(BackingFile::open(p)?);
        }
        Ok(Self { files })
    }

    /// Number of files backing this run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// `true` iff there are no backing files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Borrow the file at `index` (a "file handle" in spec.md's terms).
    #[must_use]
    pub fn get(&self, index: usize) -> &BackingFile {
        &self.files[index]
    }

    /// Mutably borrow the file at `index`, to update `indexed_up_to`.
    pub fn get_mut(&mut self, index: usize) -> &mut BackingFile {
        &mut self.files[index]
    }

    /// Iterate over `(index, &BackingFile)` in run order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &BackingFile)> {
        self.files.iter().enumerate()
    }

    /// Paths of all backing files, in run order — used by persistence to
    /// reopen on restore.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// Append raw bytes to a file opened for writing. Used by the live-capture
/// thread; kept here (rather than in `capture.rs`) since it is the write
/// half of the same append-only contract `BackingFile` reads under.
pub fn append_raw(file: &mut File, data: &[u8]) -> Result<()> {
    use std::io::Write;
    file.write_all(data)?;
    file.flush()?;
    Ok(())
}

/// Read an entire small file into memory. Used by tests and by the
/// pedestal artifact reader, not by the hot reassembly path.
pub fn read_whole_file(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}
