//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*};
use std::marker::PhantomData;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::buffer::BlockBuffer;
use crate::chunk::{RunSet, TempRun};
use crate::env::{Environment, SystemEnvironment};
use crate::feasibility::{FeasibilityChecker, Plan, Reserve, Shortage};
use crate::merger::{BinaryHeapMerger, LinearScanMerger, MergeStrategy};
use crate::observer::{LogObserver, Phase, SortObserver};
use crate::record::Record;

/// Default memory budget in bytes.
pub const MEM_LIMIT_DEFAULT: usize = 64_000_000;
/// Smallest memory budget accepted by default.
pub const MEM_LIMIT_MIN: usize = 1_000;
/// Largest memory budget accepted by default.
pub const MEM_LIMIT_MAX: usize = 120_000_000;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Invalid sorter configuration.
    Configuration(String),
    /// Input holds no whole record.
    InputTooSmall { size: u64 },
    /// Not enough file handles or disk space.
    ResourceExhausted(Shortage),
    /// Input or temporary run read error.
    Read { path: PathBuf, source: io::Error },
    /// Output or temporary run write error.
    Write { path: PathBuf, source: io::Error },
    /// Temporary run or directory creation error.
    TempFile { path: PathBuf, source: io::Error },
}

impl SortError {
    /// Returns the process exit code corresponding to the error cause.
    pub fn exit_code(&self) -> i32 {
        match self {
            SortError::Configuration(_) => 2,
            SortError::InputTooSmall { .. } => 3,
            SortError::ResourceExhausted(_) => 4,
            SortError::Read { .. } => 5,
            SortError::Write { .. } => 6,
            SortError::TempFile { .. } => 7,
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::Read { source, .. } => Some(source),
            SortError::Write { source, .. } => Some(source),
            SortError::TempFile { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Configuration(msg) => write!(f, "bad configuration: {}", msg),
            SortError::InputTooSmall { size } => write!(f, "input too small: {} bytes", size),
            SortError::ResourceExhausted(shortage) => write!(f, "resource exhausted: {}", shortage),
            SortError::Read { path, source } => write!(f, "reading {} failed: {}", path.display(), source),
            SortError::Write { path, source } => write!(f, "writing {} failed: {}", path.display(), source),
            SortError::TempFile { path, source } => {
                write!(f, "temporary file {} not created: {}", path.display(), source)
            }
        }
    }
}

/// Split phase statistics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitStats {
    /// Number of runs created.
    pub runs: usize,
    /// Number of records written to runs.
    pub records: u64,
    /// Size of a dropped trailing partial record.
    pub dropped_bytes: u64,
}

/// Sorting result summary.
#[derive(Clone, Debug)]
pub struct SortSummary {
    pub plan: Plan,
    pub split: SplitStats,
    /// Number of records written to the output.
    pub records_written: u64,
    /// Number of temporary run files and directories that could not be deleted.
    pub cleanup_failures: usize,
    pub split_time: Duration,
    pub merge_time: Duration,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<R, V = SystemEnvironment>
where
    R: Record,
    V: Environment,
{
    /// Memory budget in bytes.
    mem_limit: usize,
    /// Accepted memory budget range.
    mem_limit_bounds: RangeInclusive<usize>,
    /// Directory the temporary runs are created in.
    work_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    merge_strategy: MergeStrategy,
    reserve: Reserve,
    env: V,

    /// Record type.
    record_type: PhantomData<R>,
}

impl<R: Record> ExternalSorterBuilder<R, SystemEnvironment> {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }
}

impl<R, V> ExternalSorterBuilder<R, V>
where
    R: Record,
    V: Environment,
{
    /// Builds an [`ExternalSorter`] instance using provided configuration.
    /// Fails if the memory budget is out of the accepted range or is not a multiple of the record width.
    pub fn build(self) -> Result<ExternalSorter<R, V>, SortError> {
        if !self.mem_limit_bounds.contains(&self.mem_limit) {
            return Err(SortError::Configuration(format!(
                "memory limit {} is out of allowed range {}..={}",
                self.mem_limit,
                self.mem_limit_bounds.start(),
                self.mem_limit_bounds.end()
            )));
        }
        if self.mem_limit == 0 || self.mem_limit % R::WIDTH != 0 {
            return Err(SortError::Configuration(format!(
                "memory limit {} must be a positive multiple of record size {}",
                self.mem_limit,
                R::WIDTH
            )));
        }

        let work_dir = match self.work_dir {
            Some(work_dir) => work_dir.into(),
            None => PathBuf::from("."),
        };

        return Ok(ExternalSorter {
            mem_limit: self.mem_limit,
            work_dir,
            rw_buf_size: self.rw_buf_size,
            merge_strategy: self.merge_strategy,
            reserve: self.reserve,
            env: self.env,
            record_type: PhantomData,
        });
    }

    /// Sets memory budget in bytes: the size of an in-memory block and of the output buffer.
    pub fn with_mem_limit(mut self, mem_limit: usize) -> ExternalSorterBuilder<R, V> {
        self.mem_limit = mem_limit;
        return self;
    }

    /// Sets accepted memory budget range.
    pub fn with_mem_limit_bounds(mut self, bounds: RangeInclusive<usize>) -> ExternalSorterBuilder<R, V> {
        self.mem_limit_bounds = bounds;
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_work_dir(mut self, path: &Path) -> ExternalSorterBuilder<R, V> {
        self.work_dir = Some(path.into());
        return self;
    }

    /// Sets the read/write buffer size of run files, the input and the output.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<R, V> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets run merge strategy.
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> ExternalSorterBuilder<R, V> {
        self.merge_strategy = strategy;
        return self;
    }

    /// Sets resources reserved besides the runs.
    pub fn with_reserve(mut self, reserve: Reserve) -> ExternalSorterBuilder<R, V> {
        self.reserve = reserve;
        return self;
    }

    /// Sets environment the resource checks are run against.
    pub fn with_environment<E: Environment>(self, env: E) -> ExternalSorterBuilder<R, E> {
        ExternalSorterBuilder {
            mem_limit: self.mem_limit,
            mem_limit_bounds: self.mem_limit_bounds,
            work_dir: self.work_dir,
            rw_buf_size: self.rw_buf_size,
            merge_strategy: self.merge_strategy,
            reserve: self.reserve,
            env,
            record_type: PhantomData,
        }
    }
}

impl<R, V> Default for ExternalSorterBuilder<R, V>
where
    R: Record,
    V: Environment + Default,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            mem_limit: MEM_LIMIT_DEFAULT,
            mem_limit_bounds: MEM_LIMIT_MIN..=MEM_LIMIT_MAX,
            work_dir: None,
            rw_buf_size: None,
            merge_strategy: MergeStrategy::default(),
            reserve: Reserve::default(),
            env: V::default(),
            record_type: PhantomData,
        }
    }
}

/// External sorter of fixed-width records.
///
/// Sorting runs in two phases. The input is read in memory-budget sized blocks, every block is sorted and saved
/// to a temporary run file. Then the runs are merged into the output. All temporary files are created in a scratch
/// directory inside the work directory and are deleted on success and on failure alike. If the process is killed
/// in the middle of a sort the scratch directory is left behind.
pub struct ExternalSorter<R, V = SystemEnvironment>
where
    R: Record,
    V: Environment,
{
    mem_limit: usize,
    work_dir: PathBuf,
    rw_buf_size: Option<usize>,
    merge_strategy: MergeStrategy,
    reserve: Reserve,
    env: V,

    record_type: PhantomData<R>,
}

impl<R, V> ExternalSorter<R, V>
where
    R: Record,
    V: Environment,
{
    /// Returns memory budget in bytes.
    pub fn mem_limit(&self) -> usize {
        self.mem_limit
    }

    /// Returns directory the temporary runs are created in.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Sorts `input` file into `output` file reporting progress through the `log` facade.
    pub fn sort_file(&self, input: &Path, output: &Path) -> Result<SortSummary, SortError> {
        self.sort_file_with(input, output, &mut LogObserver::new())
    }

    /// Sorts `input` file into `output` file reporting progress to `observer`.
    /// The output file is created (truncated) only after the input and the resources are checked.
    pub fn sort_file_with(
        &self,
        input: &Path,
        output: &Path,
        observer: &mut dyn SortObserver,
    ) -> Result<SortSummary, SortError> {
        let open = || -> Result<(fs::File, u64), SortError> {
            let file = fs::File::open(input).map_err(|err| SortError::Read {
                path: input.into(),
                source: err,
            })?;
            let size = file
                .metadata()
                .map_err(|err| SortError::Read {
                    path: input.into(),
                    source: err,
                })?
                .len();
            Ok((file, size))
        };

        self.execute(
            open,
            input,
            || {
                fs::File::create(output).map_err(|err| SortError::Write {
                    path: output.into(),
                    source: err,
                })
            },
            output,
            observer,
        )
    }

    /// Sorts `input_size` bytes of `input` stream into `output` stream reporting progress through the `log` facade.
    pub fn sort<I, W>(&self, input: I, input_size: u64, output: W) -> Result<SortSummary, SortError>
    where
        I: Read,
        W: Write,
    {
        self.sort_with(input, input_size, output, &mut LogObserver::new())
    }

    /// Sorts `input_size` bytes of `input` stream into `output` stream reporting progress to `observer`.
    /// Reading stops after `input_size` bytes even if the stream holds more data.
    pub fn sort_with<I, W>(
        &self,
        input: I,
        input_size: u64,
        output: W,
        observer: &mut dyn SortObserver,
    ) -> Result<SortSummary, SortError>
    where
        I: Read,
        W: Write,
    {
        self.execute(
            || Ok((input, input_size)),
            Path::new("<input>"),
            || Ok(output),
            Path::new("<output>"),
            observer,
        )
    }

    fn execute<I, W, FI, FO>(
        &self,
        open_input: FI,
        input_name: &Path,
        open_output: FO,
        output_name: &Path,
        observer: &mut dyn SortObserver,
    ) -> Result<SortSummary, SortError>
    where
        I: Read,
        W: Write,
        FI: FnOnce() -> Result<(I, u64), SortError>,
        FO: FnOnce() -> Result<W, SortError>,
    {
        let mut phase = Phase::Init;
        observer.on_phase(phase);

        let result = self.run_phases(
            open_input,
            input_name,
            open_output,
            output_name,
            &mut phase,
            observer,
        );

        match &result {
            Ok(_) => observer.on_phase(Phase::Done),
            Err(err) => {
                observer.on_failure(phase, err);
                observer.on_phase(Phase::Failed);
            }
        }

        return result;
    }

    #[allow(clippy::too_many_arguments)]
    fn run_phases<I, W, FI, FO>(
        &self,
        open_input: FI,
        input_name: &Path,
        open_output: FO,
        output_name: &Path,
        phase: &mut Phase,
        observer: &mut dyn SortObserver,
    ) -> Result<SortSummary, SortError>
    where
        I: Read,
        W: Write,
        FI: FnOnce() -> Result<(I, u64), SortError>,
        FO: FnOnce() -> Result<W, SortError>,
    {
        let (input, input_size) = open_input()?;
        if input_size < R::WIDTH as u64 {
            return Err(SortError::InputTooSmall { size: input_size });
        }

        let plan = FeasibilityChecker::new(&self.env, self.reserve).check(input_size, self.mem_limit, &self.work_dir)?;
        observer.on_plan(&plan);
        enter(phase, Phase::Validated, observer);

        let mut input = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, input.take(input_size)),
            None => io::BufReader::new(input.take(input_size)),
        };
        let mut output = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, open_output()?),
            None => io::BufWriter::new(open_output()?),
        };
        let scratch_dir = tempfile::Builder::new()
            .prefix("bigsort-")
            .tempdir_in(&self.work_dir)
            .map_err(|err| SortError::TempFile {
                path: self.work_dir.clone(),
                source: err,
            })?;
        log::debug!("using {} as a temporary directory", scratch_dir.path().display());

        enter(phase, Phase::Splitting, observer);
        let split_started = Instant::now();
        let mut block = BlockBuffer::new(self.mem_limit);
        let (runs, split) = self.split(&mut input, input_name, &mut block, scratch_dir.path(), observer)?;
        drop(input);
        let split_time = split_started.elapsed();

        enter(phase, Phase::Merging, observer);
        let merge_started = Instant::now();
        let (records_written, mut cleanup_failures) = match self.merge_strategy {
            MergeStrategy::LinearScan => {
                let mut merger = LinearScanMerger::new(runs);
                let written = self.merge(&mut merger, &mut output, output_name, &mut block, observer)?;
                (written, merger.cleanup_failures())
            }
            MergeStrategy::BinaryHeap => {
                let mut merger = BinaryHeapMerger::new(runs);
                let written = self.merge(&mut merger, &mut output, output_name, &mut block, observer)?;
                (written, merger.cleanup_failures())
            }
        };
        drop(output);
        let merge_time = merge_started.elapsed();

        let scratch_path = scratch_dir.path().to_path_buf();
        if let Err(err) = scratch_dir.close() {
            log::warn!("temporary directory {} not deleted: {}", scratch_path.display(), err);
            cleanup_failures += 1;
        }

        return Ok(SortSummary {
            plan,
            split,
            records_written,
            cleanup_failures,
            split_time,
            merge_time,
        });
    }

    /// Splits the input into sorted runs, one per block.
    fn split<I: BufRead>(
        &self,
        input: &mut I,
        input_name: &Path,
        block: &mut BlockBuffer<R>,
        dir: &Path,
        observer: &mut dyn SortObserver,
    ) -> Result<(RunSet<R>, SplitStats), SortError> {
        let mut runs = RunSet::new();
        let mut stats = SplitStats::default();

        loop {
            let read = block.fill_from(input).map_err(|err| SortError::Read {
                path: input_name.into(),
                source: err,
            })?;
            // only the last block may be short, so a fragment can only be the input tail
            stats.dropped_bytes += (read % R::WIDTH) as u64;

            let records = block.len();
            if records == 0 {
                break;
            }

            log::debug!("sorting block {} ({} records) ...", runs.slots(), records);
            let index = runs.slots();
            let run = TempRun::create(dir, index, block.sort(), self.rw_buf_size)?;
            runs.push(run);

            stats.runs += 1;
            stats.records += records as u64;
            observer.on_run_created(index, records);

            if read < block.capacity() * R::WIDTH {
                break;
            }
        }

        if stats.dropped_bytes > 0 {
            log::warn!("trailing {} bytes do not form a whole record and are dropped", stats.dropped_bytes);
        }
        log::debug!("external sort preparation done");

        return Ok((runs, stats));
    }

    /// Drains `merger` into `output` staging records in `block`. Returns the number of records written.
    fn merge<M, W>(
        &self,
        merger: &mut M,
        output: &mut W,
        output_name: &Path,
        block: &mut BlockBuffer<R>,
        observer: &mut dyn SortObserver,
    ) -> Result<u64, SortError>
    where
        M: Iterator<Item = Result<R, SortError>>,
        W: Write,
    {
        block.clear();
        let mut written = 0u64;

        for item in merger {
            if block.push(item?) {
                flush_block(block, output, output_name, observer)?;
            }
            written += 1;
        }

        if !block.is_empty() {
            flush_block(block, output, output_name, observer)?;
        }
        output.flush().map_err(|err| SortError::Write {
            path: output_name.into(),
            source: err,
        })?;

        return Ok(written);
    }
}

fn enter(phase: &mut Phase, next: Phase, observer: &mut dyn SortObserver) {
    *phase = next;
    observer.on_phase(next);
}

fn flush_block<R: Record, W: Write>(
    block: &mut BlockBuffer<R>,
    output: &mut W,
    output_name: &Path,
    observer: &mut dyn SortObserver,
) -> Result<(), SortError> {
    let flushed = block.write_to(output).map_err(|err| SortError::Write {
        path: output_name.into(),
        source: err,
    })?;
    observer.on_output_flushed(flushed);
    block.clear();

    return Ok(());
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{self, Read, Write};
    use std::path::Path;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{ExternalSorter, ExternalSorterBuilder, SortError};
    use crate::env::StaticEnvironment;
    use crate::feasibility::{Reserve, Shortage};
    use crate::fixture::{self, Sequence};
    use crate::verify;
    use crate::merger::MergeStrategy;
    use crate::observer::{NoopObserver, Phase, SortObserver};
    use crate::record;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn encoded(values: &[u32]) -> Vec<u8> {
        let mut bytes = Vec::new();
        record::encode_into(values, &mut bytes);
        bytes
    }

    fn decoded(bytes: &[u8]) -> Vec<u32> {
        let mut values = Vec::new();
        record::decode_into(bytes, &mut values);
        values
    }

    fn sorter(
        dir: &Path,
        mem_limit: usize,
        strategy: MergeStrategy,
    ) -> ExternalSorter<u32, StaticEnvironment> {
        ExternalSorterBuilder::new()
            .with_mem_limit_bounds(4..=1_000_000)
            .with_mem_limit(mem_limit)
            .with_work_dir(dir)
            .with_merge_strategy(strategy)
            .with_environment(StaticEnvironment::unlimited())
            .build()
            .unwrap()
    }

    fn sort_bytes(sorter: &ExternalSorter<u32, StaticEnvironment>, input: &[u8]) -> Result<Vec<u8>, SortError> {
        let mut output = Vec::new();
        sorter.sort_with(input, input.len() as u64, &mut output, &mut NoopObserver)?;
        Ok(output)
    }

    fn dir_entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[derive(Default)]
    struct RecordingObserver {
        phases: Vec<Phase>,
        runs: Vec<(usize, usize)>,
        failed_in: Option<Phase>,
    }

    impl SortObserver for RecordingObserver {
        fn on_phase(&mut self, phase: Phase) {
            self.phases.push(phase);
        }

        fn on_run_created(&mut self, index: usize, records: usize) {
            self.runs.push((index, records));
        }

        fn on_failure(&mut self, phase: Phase, _error: &SortError) {
            self.failed_in = Some(phase);
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk is gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingReader {
        data: Vec<u8>,
        pos: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.data.len() {
                return Err(io::Error::new(io::ErrorKind::Other, "device error"));
            }
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[rstest]
    fn test_concrete_scenario(
        tmp_dir: tempfile::TempDir,
        #[values(MergeStrategy::LinearScan, MergeStrategy::BinaryHeap)] strategy: MergeStrategy,
    ) {
        let sorter = sorter(tmp_dir.path(), 8, strategy);
        let input = encoded(&[5, 3, 1, 4, 2]);

        let mut observer = RecordingObserver::default();
        let mut output = Vec::new();
        let summary = sorter
            .sort_with(input.as_slice(), input.len() as u64, &mut output, &mut observer)
            .unwrap();

        assert_eq!(decoded(&output), vec![1, 2, 3, 4, 5]);
        assert_eq!(observer.runs, vec![(0, 2), (1, 2), (2, 1)]);
        assert_eq!(
            observer.phases,
            vec![Phase::Init, Phase::Validated, Phase::Splitting, Phase::Merging, Phase::Done]
        );
        assert_eq!(summary.plan.block_count, 3);
        assert_eq!(summary.split.runs, 3);
        assert_eq!(summary.split.records, 5);
        assert_eq!(summary.records_written, 5);
        assert_eq!(dir_entries(tmp_dir.path()), 0);
    }

    #[rstest]
    #[case(4)]
    #[case(8)]
    #[case(36)]
    #[case(400)]
    #[case(4000)]
    fn test_permutation_and_budget_invariance(
        tmp_dir: tempfile::TempDir,
        #[case] mem_limit: usize,
        #[values(MergeStrategy::LinearScan, MergeStrategy::BinaryHeap)] strategy: MergeStrategy,
    ) {
        let mut values: Vec<u32> = Vec::from_iter((0..300).map(|v| v % 137));
        values.shuffle(&mut rand::thread_rng());

        let output = sort_bytes(&sorter(tmp_dir.path(), mem_limit, strategy), &encoded(&values)).unwrap();

        values.sort();
        assert_eq!(decoded(&output), values);
        assert_eq!(dir_entries(tmp_dir.path()), 0);
    }

    #[rstest]
    fn test_idempotence(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 12, MergeStrategy::LinearScan);
        let input = encoded(&Vec::from_iter(0..100u32));

        let output = sort_bytes(&sorter, &input).unwrap();
        assert_eq!(output, input);
    }

    #[rstest]
    fn test_reverse_single_block(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 400, MergeStrategy::LinearScan);
        let input = encoded(&Vec::from_iter((1..=100u32).rev()));

        let mut output = Vec::new();
        let summary = sorter
            .sort_with(input.as_slice(), input.len() as u64, &mut output, &mut NoopObserver)
            .unwrap();

        assert_eq!(decoded(&output), Vec::from_iter(1..=100u32));
        assert_eq!(summary.split.runs, 1);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    fn test_truncation(tmp_dir: tempfile::TempDir, #[case] fragment: usize) {
        let sorter = sorter(tmp_dir.path(), 8, MergeStrategy::LinearScan);
        let mut input = encoded(&[9, 7, 8]);
        input.extend(std::iter::repeat(0xff).take(fragment));

        let mut output = Vec::new();
        let summary = sorter
            .sort_with(input.as_slice(), input.len() as u64, &mut output, &mut NoopObserver)
            .unwrap();

        assert_eq!(decoded(&output), vec![7, 8, 9]);
        assert_eq!(output.len(), 12);
        assert_eq!(summary.split.dropped_bytes, fragment as u64);
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    fn test_input_too_small(tmp_dir: tempfile::TempDir, #[case] size: usize) {
        let sorter = sorter(tmp_dir.path(), 8, MergeStrategy::LinearScan);

        let result = sort_bytes(&sorter, &vec![1u8; size]);
        assert!(matches!(result, Err(SortError::InputTooSmall { .. })));
    }

    #[rstest]
    #[case(0)]
    #[case(999)]
    #[case(1_002)]
    #[case(120_000_004)]
    fn test_bad_mem_limit(#[case] mem_limit: usize) {
        let result: Result<ExternalSorter<u32>, _> = ExternalSorterBuilder::new().with_mem_limit(mem_limit).build();
        assert!(matches!(result, Err(SortError::Configuration(_))));
    }

    #[test]
    fn test_default_mem_limit() {
        let sorter: ExternalSorter<u32> = ExternalSorterBuilder::new().build().unwrap();
        assert_eq!(sorter.mem_limit(), 64_000_000);
        assert_eq!(sorter.work_dir(), Path::new("."));
    }

    #[rstest]
    fn test_file_handles_exhausted(tmp_dir: tempfile::TempDir) {
        let sorter: ExternalSorter<u32, _> = ExternalSorterBuilder::new()
            .with_mem_limit_bounds(4..=1_000)
            .with_mem_limit(8)
            .with_work_dir(tmp_dir.path())
            .with_environment(StaticEnvironment::new(10, u64::MAX))
            .build()
            .unwrap();
        let input = encoded(&Vec::from_iter(0..20u32));

        let mut observer = RecordingObserver::default();
        let result = sorter.sort_with(input.as_slice(), input.len() as u64, Vec::<u8>::new(), &mut observer);

        assert!(matches!(
            result,
            Err(SortError::ResourceExhausted(Shortage::FileHandles {
                required: 18,
                available: 10
            }))
        ));
        assert_eq!(observer.failed_in, Some(Phase::Init));
        assert_eq!(observer.phases.last(), Some(&Phase::Failed));
        assert_eq!(dir_entries(tmp_dir.path()), 0);
    }

    #[rstest]
    fn test_disk_space_exhausted(tmp_dir: tempfile::TempDir) {
        let sorter: ExternalSorter<u32, _> = ExternalSorterBuilder::new()
            .with_mem_limit(1_000)
            .with_work_dir(tmp_dir.path())
            .with_reserve(Reserve {
                file_handles: 8,
                disk_bytes: 0,
            })
            .with_environment(StaticEnvironment::new(u64::MAX, 15))
            .build()
            .unwrap();

        let result = sort_bytes(&sorter, &encoded(&[1, 2]));
        assert!(matches!(result, Err(SortError::ResourceExhausted(Shortage::DiskSpace { .. }))));
        assert_eq!(dir_entries(tmp_dir.path()), 0);
    }

    #[rstest]
    fn test_output_write_failure_cleanup(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 8, MergeStrategy::LinearScan);
        let input = encoded(&Vec::from_iter((0..50u32).rev()));

        let mut observer = RecordingObserver::default();
        let result = sorter.sort_with(input.as_slice(), input.len() as u64, FailingWriter, &mut observer);

        assert!(matches!(result, Err(SortError::Write { .. })));
        assert_eq!(observer.failed_in, Some(Phase::Merging));
        assert_eq!(dir_entries(tmp_dir.path()), 0);
    }

    #[rstest]
    fn test_input_read_failure_cleanup(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(tmp_dir.path(), 8, MergeStrategy::BinaryHeap);
        let data = encoded(&Vec::from_iter(0..10u32));
        let input = FailingReader { data, pos: 0 };

        let mut observer = RecordingObserver::default();
        let mut output = Vec::new();
        let result = sorter.sort_with(input, 80, &mut output, &mut observer);

        assert!(matches!(result, Err(SortError::Read { .. })));
        assert_eq!(observer.failed_in, Some(Phase::Splitting));
        assert_eq!(observer.runs.len(), 5);
        assert_eq!(dir_entries(tmp_dir.path()), 0);
    }

    #[rstest]
    fn test_missing_work_dir(tmp_dir: tempfile::TempDir) {
        let sorter = sorter(&tmp_dir.path().join("missing"), 8, MergeStrategy::LinearScan);

        let result = sort_bytes(&sorter, &encoded(&[2, 1]));
        assert!(matches!(result, Err(SortError::TempFile { .. })));
    }

    #[rstest]
    fn test_sort_file(tmp_dir: tempfile::TempDir) {
        let work_dir = tmp_dir.path().join("work");
        fs::create_dir(&work_dir).unwrap();
        let input_path = tmp_dir.path().join("input");
        let output_path = tmp_dir.path().join("output");

        let mut values = Vec::from_iter(0..1_000u32);
        values.shuffle(&mut rand::thread_rng());
        fs::write(&input_path, encoded(&values)).unwrap();

        let sorter = sorter(&work_dir, 400, MergeStrategy::LinearScan);
        let summary = sorter.sort_file(&input_path, &output_path).unwrap();

        assert_eq!(decoded(&fs::read(&output_path).unwrap()), Vec::from_iter(0..1_000u32));
        assert_eq!(summary.split.runs, 10);
        assert_eq!(summary.cleanup_failures, 0);
        assert_eq!(dir_entries(&work_dir), 0);
    }

    #[rstest]
    fn test_sort_generated_descending_file(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("input");
        let output_path = tmp_dir.path().join("output");
        fixture::write_sequence::<u32, _>(fs::File::create(&input_path).unwrap(), 5_000, Sequence::Descending).unwrap();
        assert!(!verify::verify_sorted::<u32, _>(fs::File::open(&input_path).unwrap()).unwrap().is_sorted());

        let sorter = sorter(tmp_dir.path(), 1_000, MergeStrategy::BinaryHeap);
        sorter.sort_file(&input_path, &output_path).unwrap();

        let verification = verify::verify_sorted::<u32, _>(fs::File::open(&output_path).unwrap()).unwrap();
        assert!(verification.is_sorted());
        assert_eq!(verification.records, 5_000);
        assert_eq!(dir_entries(tmp_dir.path()), 2);
    }

    #[rstest]
    fn test_sort_file_missing_input(tmp_dir: tempfile::TempDir) {
        let output_path = tmp_dir.path().join("output");
        let sorter = sorter(tmp_dir.path(), 8, MergeStrategy::LinearScan);

        let mut observer = RecordingObserver::default();
        let result = sorter.sort_file_with(&tmp_dir.path().join("missing"), &output_path, &mut observer);
        assert!(matches!(result, Err(SortError::Read { .. })));
        assert_eq!(observer.phases, vec![Phase::Init, Phase::Failed]);
        assert_eq!(observer.failed_in, Some(Phase::Init));
        assert!(!output_path.exists());
    }

    #[rstest]
    fn test_unknown_input_size(
        tmp_dir: tempfile::TempDir,
        #[values(MergeStrategy::LinearScan, MergeStrategy::BinaryHeap)] strategy: MergeStrategy,
    ) {
        let sorter = sorter(tmp_dir.path(), 8, strategy);
        let input = encoded(&[3, 1, 2]);

        let mut output = Vec::new();
        let summary = sorter
            .sort_with(input.as_slice(), u64::MAX, &mut output, &mut NoopObserver)
            .unwrap();
        assert_eq!(decoded(&output), vec![1, 2, 3]);
        assert_eq!(summary.plan.block_count, u64::MAX / 8 + 1);
        assert_eq!(summary.split.runs, 2);
        assert_eq!(dir_entries(tmp_dir.path()), 0);
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = vec![
            SortError::Configuration("bad".into()),
            SortError::InputTooSmall { size: 1 },
            SortError::ResourceExhausted(Shortage::DiskSpace {
                required: 2,
                available: 1,
            }),
            SortError::Read {
                path: "a".into(),
                source: io::Error::new(io::ErrorKind::Other, "a"),
            },
            SortError::Write {
                path: "b".into(),
                source: io::Error::new(io::ErrorKind::Other, "b"),
            },
            SortError::TempFile {
                path: "c".into(),
                source: io::Error::new(io::ErrorKind::Other, "c"),
            },
        ];

        let mut codes = Vec::from_iter(errors.iter().map(SortError::exit_code));
        assert!(codes.iter().all(|&code| code != 0));
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
