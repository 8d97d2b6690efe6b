//! Ordered test input generation.

use std::io::{self, prelude::*};

use crate::record::Record;

/// Generated sequence order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sequence {
    /// `0, 1, ..., count - 1`
    Ascending,
    /// `count, count - 1, ..., 1`
    Descending,
}

/// Writes `count` records in the given order to `writer`.
/// Values wider than the record type wrap around.
pub fn write_sequence<R: Record, W: Write>(writer: W, count: u64, sequence: Sequence) -> io::Result<()> {
    let mut writer = io::BufWriter::new(writer);
    let mut bytes = vec![0; R::WIDTH];

    for idx in 0..count {
        let value = match sequence {
            Sequence::Ascending => idx,
            Sequence::Descending => count - idx,
        };
        R::from_u64_wrapping(value).write_to(&mut bytes);
        writer.write_all(&bytes)?;
    }

    return writer.flush();
}
