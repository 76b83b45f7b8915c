//! Row access contract between the cursor and the locator columns.

use crate::error::{Error, Result};
use bytes::Bytes;

/// Cursor-facing view of the current row, as the locator subsystem needs it.
///
/// The scrollable cursor lives outside this crate; locator columns only need
/// position validity, raw column bytes, and the NULL indicator that the last
/// retrieval leaves behind.
pub trait RowAccess {
    /// Whether the cursor is positioned on a valid row.
    fn current_row_valid(&self) -> bool;

    /// Raw bytes of the column value, or `None` for SQL NULL.
    fn column_value(&self, index: usize) -> Option<&Bytes>;

    /// Record whether the value just retrieved was SQL NULL.
    fn set_was_null(&mut self, was_null: bool);

    /// Whether the value last retrieved was SQL NULL.
    fn was_null(&self) -> bool;
}

/// A buffered row holding raw column bytes.
#[derive(Debug, Clone, Default)]
pub struct BufferedRow {
    values: Vec<Option<Bytes>>,
    valid: bool,
    was_null: bool,
}

impl BufferedRow {
    /// Row positioned on fetched data.
    pub fn new(values: Vec<Option<Bytes>>) -> Self {
        Self {
            values,
            valid: true,
            was_null: false,
        }
    }

    /// Row for a cursor that is before-first or after-last.
    pub fn unpositioned() -> Self {
        Self::default()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl RowAccess for BufferedRow {
    fn current_row_valid(&self) -> bool {
        self.valid
    }

    fn column_value(&self, index: usize) -> Option<&Bytes> {
        self.values.get(index).and_then(|v| v.as_ref())
    }

    fn set_was_null(&mut self, was_null: bool) {
        self.was_null = was_null;
    }

    fn was_null(&self) -> bool {
        self.was_null
    }
}

/// Encode a locator handle as raw column bytes (8-byte big-endian).
pub fn encode_locator_handle(handle: u64) -> Bytes {
    Bytes::copy_from_slice(&handle.to_be_bytes())
}

/// Decode a locator handle from raw column bytes.
pub fn decode_locator_handle(raw: &[u8]) -> Result<u64> {
    if raw.len() < 8 {
        return Err(Error::protocol(format!(
            "locator column holds {} bytes, expected 8",
            raw.len()
        )));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[..8]);
    Ok(u64::from_be_bytes(buf))
}
