//! Resource feasibility checks run before a sort touches any data.

use std::fmt;
use std::fmt::Display;
use std::path::Path;

use log;

use crate::env::Environment;
use crate::sort::SortError;

/// Resources kept aside besides what the runs themselves need.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Reserve {
    /// File handles needed besides the runs: standard streams, input and output files.
    pub file_handles: u64,
    /// Disk space margin in bytes on top of twice the input size.
    pub disk_bytes: u64,
}

impl Default for Reserve {
    fn default() -> Self {
        Reserve {
            file_handles: 8,
            disk_bytes: 10_000_000,
        }
    }
}

/// Resource shortage detected by the checker.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Shortage {
    /// Open file handle ceiling is lower than the number of runs requires.
    FileHandles { required: u64, available: u64 },
    /// Free disk space can not hold the runs and the output.
    DiskSpace { required: u64, available: u64 },
}

impl Display for Shortage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shortage::FileHandles { required, available } => write!(
                f,
                "not enough file handles (available {}, required {}), try to increase the memory limit",
                available, required
            ),
            Shortage::DiskSpace { required, available } => write!(
                f,
                "not enough disk space (available {} bytes, required {} bytes)",
                available, required
            ),
        }
    }
}

/// Sort plan produced by a successful check.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub input_size: u64,
    /// Number of blocks, i.e. the maximum number of runs alive at the same time.
    pub block_count: u64,
    pub required_handles: u64,
    pub available_handles: u64,
    pub required_space: u64,
    pub available_space: u64,
}

/// Resource feasibility checker.
pub struct FeasibilityChecker<'a, V: Environment> {
    env: &'a V,
    reserve: Reserve,
}

impl<'a, V: Environment> FeasibilityChecker<'a, V> {
    pub fn new(env: &'a V, reserve: Reserve) -> Self {
        FeasibilityChecker { env, reserve }
    }

    /// Returns the number of blocks an input of `input_size` bytes is split into.
    pub fn block_count(input_size: u64, mem_limit: usize) -> u64 {
        let mem_limit = mem_limit as u64;
        input_size / mem_limit + u64::from(input_size % mem_limit != 0)
    }

    /// Checks the file handle ceiling and free disk space against the planned sort.
    /// The file handle ceiling is raised if possible, nothing else is changed.
    ///
    /// # Arguments
    /// * `input_size` - Input size in bytes
    /// * `mem_limit` - Memory budget in bytes, must not be zero
    /// * `work_dir` - Directory temporary runs are going to be created in
    pub fn check(&self, input_size: u64, mem_limit: usize, work_dir: &Path) -> Result<Plan, SortError> {
        let block_count = Self::block_count(input_size, mem_limit);
        let required_handles = block_count.saturating_add(self.reserve.file_handles);

        let mut available_handles = self.query_open_file_limit();
        if required_handles > available_handles {
            log::info!(
                "open file limit {} is lower than required {}, trying to increase",
                available_handles,
                required_handles
            );
            if let Err(err) = self.env.raise_open_file_limit(required_handles) {
                log::warn!("open file limit not increased: {}", err);
            }
            available_handles = self.query_open_file_limit();
        }
        if required_handles > available_handles {
            return Err(SortError::ResourceExhausted(Shortage::FileHandles {
                required: required_handles,
                available: available_handles,
            }));
        }

        let required_space = input_size.saturating_mul(2).saturating_add(self.reserve.disk_bytes);
        let available_space = match self.env.available_space(work_dir) {
            Ok(space) => space,
            Err(err) => {
                log::warn!("free disk space not retrieved for {}: {}", work_dir.display(), err);
                0
            }
        };
        if available_space < required_space {
            return Err(SortError::ResourceExhausted(Shortage::DiskSpace {
                required: required_space,
                available: available_space,
            }));
        }

        return Ok(Plan {
            input_size,
            block_count,
            required_handles,
            available_handles,
            required_space,
            available_space,
        });
    }

    fn query_open_file_limit(&self) -> u64 {
        match self.env.open_file_limit() {
            Ok(limit) => limit,
            Err(err) => {
                log::warn!("open file limit not retrieved: {}", err);
                0
            }
        }
    }
}
