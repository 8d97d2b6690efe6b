//! Fixed-width record codec.
//!
//! Records are stored without any framing: a file is a plain concatenation of `WIDTH`-byte values.
//! Every file read or written by this crate (input, temporary runs, output) uses **little-endian** byte order.

use std::fmt::Debug;

/// Fixed-width unsigned integer record.
pub trait Record: Copy + Ord + Debug + Send + 'static {
    /// Record width in bytes.
    const WIDTH: usize;

    /// Decodes a record from the first `WIDTH` bytes of `bytes`.
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than `WIDTH`.
    fn read_from(bytes: &[u8]) -> Self;

    /// Encodes the record into the first `WIDTH` bytes of `bytes`.
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than `WIDTH`.
    fn write_to(self, bytes: &mut [u8]);

    /// Converts a `u64` truncating the high bits that do not fit into the record.
    fn from_u64_wrapping(value: u64) -> Self;
}

macro_rules! impl_record {
    ($($t:ty),*) => {
        $(
            impl Record for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                fn read_from(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$t>::from_le_bytes(raw)
                }

                fn write_to(self, bytes: &mut [u8]) {
                    bytes[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
                }

                fn from_u64_wrapping(value: u64) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_record!(u8, u16, u32, u64);

/// Decodes every whole record of `bytes` into `records`, replacing its content.
/// Trailing bytes that do not form a whole record are ignored.
pub fn decode_into<R: Record>(bytes: &[u8], records: &mut Vec<R>) {
    records.clear();
    records.extend(bytes.chunks_exact(R::WIDTH).map(R::read_from));
}

/// Encodes `records` into `bytes`, replacing its content.
pub fn encode_into<R: Record>(records: &[R], bytes: &mut Vec<u8>) {
    bytes.clear();
    bytes.resize(records.len() * R::WIDTH, 0);
    for (record, slot) in records.iter().zip(bytes.chunks_exact_mut(R::WIDTH)) {
        record.write_to(slot);
    }
}
