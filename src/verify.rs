//! Sorted output verification.

use std::io::{self, prelude::*};
use std::marker::PhantomData;

use crate::record::Record;

/// Verification result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Verification {
    /// Number of whole records checked.
    pub records: u64,
    /// Position of the first record smaller than its predecessor.
    pub first_unsorted: Option<u64>,
}

impl Verification {
    pub fn is_sorted(&self) -> bool {
        self.first_unsorted.is_none()
    }
}

/// Checks that the records of `reader` are in ascending order.
/// Stops at the first out-of-order record; a trailing partial record is ignored.
pub fn verify_sorted<R: Record, Rd: Read>(reader: Rd) -> io::Result<Verification> {
    let mut reader = io::BufReader::new(reader);
    let mut records = RecordReader::<R, _>::new(&mut reader);

    let mut previous: Option<R> = None;
    let mut position = 0u64;
    while let Some(item) = records.next_record()? {
        if matches!(previous, Some(previous) if item < previous) {
            return Ok(Verification {
                records: position,
                first_unsorted: Some(position),
            });
        }
        previous = Some(item);
        position += 1;
    }

    return Ok(Verification {
        records: position,
        first_unsorted: None,
    });
}

struct RecordReader<R, Rd> {
    inner: Rd,
    scratch: Vec<u8>,
    record_type: PhantomData<R>,
}

impl<R: Record, Rd: BufRead> RecordReader<R, Rd> {
    fn new(inner: Rd) -> Self {
        RecordReader {
            inner,
            scratch: vec![0; R::WIDTH],
            record_type: PhantomData,
        }
    }

    fn next_record(&mut self) -> io::Result<Option<R>> {
        match self.inner.read_exact(&mut self.scratch) {
            Ok(()) => Ok(Some(R::read_from(&self.scratch))),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(err),
        }
    }
}
