//! `bigsort` is an external sort of files made of fixed-width binary unsigned integers.
//!
//! External sorting is required when the data being sorted do not fit into the main memory (RAM) of a computer
//! and instead must reside in slower external memory, usually a hard disk drive. Sorting is achieved in two passes.
//! During the first pass the input is split into blocks that fit into the memory budget, every block is sorted and
//! saved to a temporary run file. During the second pass all runs are merged into the output file.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Raw binary records:**
//!   records are `u8`, `u16`, `u32` or `u64` values stored back to back in little-endian byte order,
//!   without any header or delimiter. A trailing partial record is dropped with a warning.
//! * **Bounded memory:**
//!   a single buffer of the configured memory budget is allocated per sort and reused by both passes.
//! * **Resource checks:**
//!   the open file handle ceiling (raised if possible) and the free disk space are checked before any data is
//!   moved.
//! * **Guaranteed cleanup:**
//!   temporary runs are deleted as soon as they are merged and on every failure path.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use env_logger;
//! use log;
//!
//! use bigsort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();
//!
//!     let sorter: ExternalSorter<u32> = ExternalSorterBuilder::new()
//!         .with_work_dir(Path::new("./"))
//!         .with_mem_limit(50_000_000)
//!         .build()
//!         .unwrap();
//!
//!     let summary = sorter.sort_file(Path::new("input"), Path::new("output")).unwrap();
//!     println!("{} records sorted", summary.records_written);
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod env;
pub mod feasibility;
pub mod fixture;
pub mod merger;
pub mod observer;
pub mod record;
pub mod sort;
pub mod verify;

pub use buffer::BlockBuffer;
pub use chunk::{RunSet, TempRun};
pub use env::{Environment, StaticEnvironment, SystemEnvironment};
pub use feasibility::{FeasibilityChecker, Plan, Reserve, Shortage};
pub use merger::{BinaryHeapMerger, LinearScanMerger, MergeStrategy};
pub use observer::{LogObserver, NoopObserver, Phase, SortObserver};
pub use record::Record;
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortSummary, SplitStats};
