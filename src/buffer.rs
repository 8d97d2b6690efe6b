//! Memory-budget limited block buffer.

use std::io::{self, prelude::*};

use crate::record::Record;

/// Block buffer limited by the memory budget.
///
/// The same allocation is used in both sorting phases: during the split phase it holds a block of input records,
/// during the merge phase it stages output records before they are flushed. Records are decoded while the block
/// is filled and encoded while it is written, so the buffer never holds more than `limit` bytes of records.
pub struct BlockBuffer<R> {
    limit: usize,
    records: Vec<R>,
    // a record split between two reads of the input or staged for a write
    scratch: Vec<u8>,
}

impl<R: Record> BlockBuffer<R> {
    /// Allocates a buffer of `limit` bytes. `limit` is expected to be a multiple of the record width.
    pub fn new(limit: usize) -> Self {
        BlockBuffer {
            limit,
            records: Vec::with_capacity(limit / R::WIDTH),
            scratch: vec![0; R::WIDTH],
        }
    }

    /// Returns the buffer limit in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the maximum number of records the buffer holds.
    pub fn capacity(&self) -> usize {
        self.limit / R::WIDTH
    }

    /// Returns the number of records the buffer currently holds.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Checks if the buffer reached the limit.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity()
    }

    /// Replaces the buffer content with up to `limit` bytes of records read from `reader`.
    /// Reads until the buffer is full or the reader is exhausted.
    /// Returns the number of bytes read, which may include a trailing partial record at the end of input.
    /// The partial record is consumed and dropped.
    pub fn fill_from<Rd: BufRead>(&mut self, reader: &mut Rd) -> io::Result<usize> {
        self.records.clear();

        let capacity = self.capacity();
        let mut partial = 0;
        let mut filled = 0;

        while self.records.len() < capacity {
            let available = match reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.records.clear();
                    return Err(err);
                }
            };
            if available.is_empty() {
                break;
            }

            let mut consumed = 0;
            if partial > 0 {
                consumed = (R::WIDTH - partial).min(available.len());
                self.scratch[partial..partial + consumed].copy_from_slice(&available[..consumed]);
                partial += consumed;
                if partial == R::WIDTH {
                    self.records.push(R::read_from(&self.scratch));
                    partial = 0;
                }
            }

            let wanted = (capacity - self.records.len()) * R::WIDTH;
            let whole = (available.len() - consumed).min(wanted) / R::WIDTH * R::WIDTH;
            self.records.extend(
                available[consumed..consumed + whole]
                    .chunks_exact(R::WIDTH)
                    .map(R::read_from),
            );
            consumed += whole;

            // the rest of the available bytes is shorter than a record
            if partial == 0 && self.records.len() < capacity && consumed < available.len() {
                let rest = available.len() - consumed;
                self.scratch[..rest].copy_from_slice(&available[consumed..]);
                partial = rest;
                consumed += rest;
            }

            reader.consume(consumed);
            filled += consumed;
        }

        return Ok(filled);
    }

    /// Sorts the records held by the buffer in ascending order.
    pub fn sort(&mut self) -> &[R] {
        self.records.sort_unstable();

        return &self.records;
    }

    /// Appends a record to the buffer. Returns `true` if the buffer is full afterwards.
    pub fn push(&mut self, item: R) -> bool {
        self.records.push(item);

        return self.is_full();
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    /// Encodes the held records to `writer`. Returns the number of bytes written.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        for item in &self.records {
            item.write_to(&mut self.scratch);
            writer.write_all(&self.scratch)?;
        }

        return Ok(self.records.len() * R::WIDTH);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
