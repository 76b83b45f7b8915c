//! Locator column bookkeeping for statement execution and row refresh.

use crate::error::{Error, Result};
use crate::lob::LobField;
use crate::row::RowAccess;
use crate::service::LocatorService;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

/// The locator-backed columns of one statement.
///
/// Owns a [`LobField`] per locator column and drives the operations that span
/// columns: flushing pending values at execute time, rendering the row's
/// locator image, and rebinding every column when the cursor moves. Scalar
/// columns live elsewhere; this set only ever sees locator types.
#[derive(Debug, Default)]
pub struct LobColumns {
    fields: Vec<LobField>,
}

impl LobColumns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: LobField) {
        self.fields.push(field);
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Result<&LobField> {
        self.fields
            .iter()
            .find(|f| f.column_index() == index)
            .ok_or(Error::ColumnIndexOutOfBounds {
                index,
                count: self.fields.len(),
            })
    }

    pub fn field_mut(&mut self, index: usize) -> Result<&mut LobField> {
        let count = self.fields.len();
        self.fields
            .iter_mut()
            .find(|f| f.column_index() == index)
            .ok_or(Error::ColumnIndexOutOfBounds { index, count })
    }

    /// Flush every dirty column to the remote store, in ascending column
    /// order regardless of insertion order.
    pub async fn flush_all<S: LocatorService>(&mut self, remote: &mut S) -> Result<()> {
        let mut order: Vec<usize> = (0..self.fields.len()).collect();
        order.sort_by_key(|&i| self.fields[i].column_index());
        for i in order {
            self.fields[i].flush(remote).await?;
        }
        Ok(())
    }

    /// Flush all columns, then render the row's locator image for the
    /// execute request: per column one indicator byte (0 bound, 1 SQL NULL)
    /// followed by the 8-byte big-endian handle when bound.
    ///
    /// A column that was never set and never bound has no handle after the
    /// flush pass and serializes as NULL.
    pub async fn serialize_row<S: LocatorService>(&mut self, remote: &mut S) -> Result<Bytes> {
        self.flush_all(remote).await?;
        let mut buf = BytesMut::with_capacity(self.fields.len() * 9);
        for field in &self.fields {
            match field.handle() {
                Some(handle) => {
                    buf.put_u8(0);
                    buf.put_u64(handle);
                }
                None => buf.put_u8(1),
            }
        }
        debug!(
            "serialized locator row: {} columns, {} bytes",
            self.fields.len(),
            buf.len()
        );
        Ok(buf.freeze())
    }

    /// Rebind every column from a freshly fetched row.
    ///
    /// Pending values and cached materializations are discarded; the old
    /// row's locators must not leak into the new one. SQL NULL columns come
    /// back unbound.
    pub fn refresh_row<R: RowAccess>(&mut self, row: &R) -> Result<()> {
        if !row.current_row_valid() {
            return Err(Error::CursorNotPositioned);
        }
        for field in &mut self.fields {
            match row.column_value(field.column_index()) {
                Some(raw) => field.rehydrate(raw)?,
                None => field.clear_binding(),
            }
        }
        Ok(())
    }

    /// The column's value as a string, or `None` for SQL NULL. The row's
    /// NULL indicator is recorded either way.
    pub async fn get_string<S, R>(
        &mut self,
        row: &mut R,
        index: usize,
        remote: &mut S,
    ) -> Result<Option<String>>
    where
        S: LocatorService,
        R: RowAccess,
    {
        if !row.current_row_valid() {
            return Err(Error::CursorNotPositioned);
        }
        let field = self.field_mut(index)?;
        if field.handle().is_none() && !field.is_dirty() {
            row.set_was_null(true);
            return Ok(None);
        }
        let value = field.get_string(remote).await?;
        row.set_was_null(false);
        Ok(Some(value))
    }

    /// The column's value as bytes, or `None` for SQL NULL.
    pub async fn get_bytes<S, R>(
        &mut self,
        row: &mut R,
        index: usize,
        remote: &mut S,
    ) -> Result<Option<Bytes>>
    where
        S: LocatorService,
        R: RowAccess,
    {
        if !row.current_row_valid() {
            return Err(Error::CursorNotPositioned);
        }
        let field = self.field_mut(index)?;
        if field.handle().is_none() && !field.is_dirty() {
            row.set_was_null(true);
            return Ok(None);
        }
        let value = field.get_bytes(remote).await?;
        row.set_was_null(false);
        Ok(Some(value))
    }
}
