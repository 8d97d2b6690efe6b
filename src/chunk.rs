//! Temporary runs: sorted blocks persisted to disk.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log;

use crate::record::Record;
use crate::sort::SortError;

/// A sorted block persisted to a backing file.
///
/// The run owns its backing file exclusively: the file is deleted either explicitly by [`TempRun::dispose`]
/// or implicitly when the run is dropped, whichever happens first.
pub struct TempRun<R> {
    index: usize,
    path: PathBuf,
    reader: Option<io::Take<io::BufReader<fs::File>>>,
    scratch: Vec<u8>,
    head: Option<R>,
    disposed: bool,
}

impl<R: Record> TempRun<R> {
    /// Creates a run backing file `run-<index>` in `dir`, writes the sorted `records` in one pass
    /// and rewinds the file for reading. On any failure the partially created file is removed.
    ///
    /// # Arguments
    /// * `dir` - Directory the backing file is created in
    /// * `index` - Run sequential number, makes the file name unique
    /// * `records` - Records sorted in ascending order
    /// * `buf_size` - Run file read/write buffer size
    pub fn create(dir: &Path, index: usize, records: &[R], buf_size: Option<usize>) -> Result<Self, SortError> {
        Self::build(dir, index, records, buf_size, |file| file)
    }

    /// Same as [`TempRun::create`] but records are written through the writer `wrap` builds over the backing file.
    fn build<F, W>(dir: &Path, index: usize, records: &[R], buf_size: Option<usize>, wrap: F) -> Result<Self, SortError>
    where
        F: FnOnce(fs::File) -> W,
        W: Write,
    {
        let path = dir.join(format!("run-{:06}", index));
        let tmp_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|err| SortError::TempFile {
                path: path.clone(),
                source: err,
            })?;

        // from here on the backing file is released by the run's destructor on every early return
        let mut run = TempRun {
            index,
            path,
            reader: None,
            scratch: vec![0; R::WIDTH],
            head: None,
            disposed: false,
        };

        let write_err = |path: &Path, err: io::Error| SortError::Write {
            path: path.to_path_buf(),
            source: err,
        };
        let file_writer = wrap(tmp_file.try_clone().map_err(|err| write_err(&run.path, err))?);
        let mut chunk_writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file_writer),
            None => io::BufWriter::new(file_writer),
        };
        for item in records {
            item.write_to(&mut run.scratch);
            chunk_writer.write_all(&run.scratch).map_err(|err| write_err(&run.path, err))?;
        }
        chunk_writer.flush().map_err(|err| write_err(&run.path, err))?;
        drop(chunk_writer);

        let mut chunk_reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, tmp_file),
            None => io::BufReader::new(tmp_file),
        };
        chunk_reader.rewind().map_err(|err| SortError::Read {
            path: run.path.clone(),
            source: err,
        })?;

        let size = (records.len() * R::WIDTH) as u64;
        run.reader = Some(chunk_reader.take(size));
        run.advance()?;

        log::debug!("run {} created ({} bytes)", run.index, size);

        return Ok(run);
    }

    /// Returns the run sequential number.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the smallest not yet consumed record or [`None`] if the run is exhausted.
    pub fn head(&self) -> Option<R> {
        self.head
    }

    pub fn is_exhausted(&self) -> bool {
        self.head.is_none()
    }

    /// Consumes the current head and reads the next one. Returns the new head.
    pub fn advance(&mut self) -> Result<Option<R>, SortError> {
        self.head = None;

        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };
        if reader.limit() < R::WIDTH as u64 {
            return Ok(None);
        }

        reader.read_exact(&mut self.scratch).map_err(|err| SortError::Read {
            path: self.path.clone(),
            source: err,
        })?;
        self.head = Some(R::read_from(&self.scratch));

        return Ok(self.head);
    }

    /// Closes the backing file and deletes it. Subsequent calls are no-ops.
    pub fn dispose(&mut self) -> io::Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.head = None;
        self.reader = None;

        fs::remove_file(&self.path)
    }
}

impl<R> Drop for TempRun<R> {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.reader = None;

        if let Err(err) = fs::remove_file(&self.path) {
            log::warn!("temporary run {} not deleted: {}", self.path.display(), err);
        }
    }
}

/// Owning collection of live temporary runs.
///
/// Runs are addressed by a stable slot number. Retired slots stay empty, so slot numbers of the
/// remaining runs never change. Dropping the set drops the remaining runs, deleting their backing files.
pub struct RunSet<R> {
    slots: Vec<Option<TempRun<R>>>,
    live: usize,
    cleanup_failures: usize,
}

impl<R: Record> RunSet<R> {
    pub fn new() -> Self {
        RunSet {
            slots: Vec::new(),
            live: 0,
            cleanup_failures: 0,
        }
    }

    /// Adds a run to the set. Returns its slot number.
    pub fn push(&mut self, run: TempRun<R>) -> usize {
        self.slots.push(Some(run));
        self.live += 1;

        return self.slots.len() - 1;
    }

    /// Returns the number of live runs.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Returns the number of slots ever allocated, including retired ones.
    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    /// Iterates over live runs with their slot numbers.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &TempRun<R>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, run)| run.as_ref().map(|run| (slot, run)))
    }

    /// Returns the number of retired runs whose backing file could not be deleted.
    pub fn cleanup_failures(&self) -> usize {
        self.cleanup_failures
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut TempRun<R>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Removes a run from the set deleting its backing file.
    /// A deletion failure is logged and does not affect the set. Returns `false` in that case.
    pub fn retire(&mut self, slot: usize) -> bool {
        let mut run = match self.slots.get_mut(slot).and_then(Option::take) {
            Some(run) => run,
            None => return true,
        };
        self.live -= 1;

        match run.dispose() {
            Ok(()) => {
                log::debug!("run {} retired", run.index());
                true
            }
            Err(err) => {
                log::warn!("temporary run {} not deleted: {}", run.path().display(), err);
                self.cleanup_failures += 1;
                false
            }
        }
    }

    /// Retires every live run. Continues on deletion failures and returns their number.
    pub fn dispose_all(&mut self) -> usize {
        let mut failures = 0;
        for slot in 0..self.slots.len() {
            if !self.retire(slot) {
                failures += 1;
            }
        }

        return failures;
    }
}

impl<R: Record> Default for RunSet<R> {
    fn default() -> Self {
        RunSet::new()
    }
}
