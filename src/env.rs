//! Environment capabilities: open file handle ceiling and free disk space.

use std::cell::Cell;
use std::io;
use std::path::Path;

use fs2;

/// Environment capability interface queried before any data is moved.
pub trait Environment {
    /// Returns the current ceiling of simultaneously open file handles.
    fn open_file_limit(&self) -> io::Result<u64>;

    /// Tries to raise the open file handle ceiling to at least `required`.
    /// Returns the resulting ceiling, which may still be lower than `required`.
    fn raise_open_file_limit(&self, required: u64) -> io::Result<u64>;

    /// Returns the space available to the current user on the file system containing `path`.
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Environment of the running process.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemEnvironment;

impl Environment for SystemEnvironment {
    fn open_file_limit(&self) -> io::Result<u64> {
        platform::open_file_limit()
    }

    fn raise_open_file_limit(&self, required: u64) -> io::Result<u64> {
        platform::raise_open_file_limit(required)
    }

    fn available_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

#[cfg(unix)]
mod platform {
    use std::io;

    use libc;

    fn get_nofile() -> io::Result<libc::rlimit> {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `limit` is a valid, writable rlimit structure.
        if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
            return Err(io::Error::last_os_error());
        }

        return Ok(limit);
    }

    pub fn open_file_limit() -> io::Result<u64> {
        Ok(get_nofile()?.rlim_cur as u64)
    }

    /// Raises the soft limit, never above the hard one.
    pub fn raise_open_file_limit(required: u64) -> io::Result<u64> {
        let limit = get_nofile()?;
        if limit.rlim_cur as u64 >= required {
            return Ok(limit.rlim_cur as u64);
        }

        let target = if limit.rlim_max == libc::RLIM_INFINITY {
            required
        } else {
            required.min(limit.rlim_max as u64)
        };
        let raised = libc::rlimit {
            rlim_cur: target as libc::rlim_t,
            rlim_max: limit.rlim_max,
        };
        // SAFETY: `raised` is a valid rlimit structure.
        if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &raised) } != 0 {
            return Err(io::Error::last_os_error());
        }

        return Ok(target);
    }
}

#[cfg(not(unix))]
mod platform {
    use std::io;

    /// Default C runtime stream ceiling.
    const STREAM_LIMIT: u64 = 512;

    pub fn open_file_limit() -> io::Result<u64> {
        Ok(STREAM_LIMIT)
    }

    pub fn raise_open_file_limit(_required: u64) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "open file limit can not be raised on this platform",
        ))
    }
}

/// Environment with fixed capacities.
/// Useful for testing or when probing the real environment is undesirable.
#[derive(Clone, Debug)]
pub struct StaticEnvironment {
    open_files: Cell<u64>,
    open_files_max: Option<u64>,
    free_space: u64,
}

impl StaticEnvironment {
    /// Creates an environment whose open file ceiling can not be raised.
    pub fn new(open_files: u64, free_space: u64) -> Self {
        StaticEnvironment {
            open_files: Cell::new(open_files),
            open_files_max: None,
            free_space,
        }
    }

    /// Allows raising the open file ceiling up to `max`.
    pub fn with_raise_limit(mut self, max: u64) -> Self {
        self.open_files_max = Some(max);
        return self;
    }

    /// Environment that never limits a sort.
    pub fn unlimited() -> Self {
        StaticEnvironment::new(u64::MAX, u64::MAX)
    }
}

impl Environment for StaticEnvironment {
    fn open_file_limit(&self) -> io::Result<u64> {
        Ok(self.open_files.get())
    }

    fn raise_open_file_limit(&self, required: u64) -> io::Result<u64> {
        let max = self.open_files_max.ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "open file limit can not be raised")
        })?;

        let raised = self.open_files.get().max(required.min(max));
        self.open_files.set(raised);

        return Ok(raised);
    }

    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.free_space)
    }
}
