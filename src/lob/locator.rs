//! Remote locator handle for one large-object column.

use crate::error::{Error, Result};
use crate::service::LocatorService;
use bytes::Bytes;
use tracing::trace;

/// A remotely-addressed reference to server-side LOB state.
///
/// The handle is an opaque id; it carries no bytes and is meaningful only on
/// the connection that produced it. The locator does not hold that connection:
/// every remote operation borrows the connection's [`LocatorService`], which
/// both serializes access and makes use-after-close impossible to express.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobLocator {
    /// Remote handle; `None` until the column is bound to a server object.
    handle: Option<u64>,
    /// Column maximum (characters for character LOBs, bytes for binary).
    max_length: u64,
    /// Zero-based result column this locator belongs to.
    column_index: usize,
    /// Remote length memoized from the last length query or flush.
    known_length: Option<u64>,
}

impl LobLocator {
    /// Locator for a described column. Purely local; no remote call.
    pub fn new(column_index: usize, max_length: u64) -> Self {
        Self {
            handle: None,
            max_length,
            column_index,
            known_length: None,
        }
    }

    /// The current remote handle, if bound.
    pub fn handle(&self) -> Option<u64> {
        self.handle
    }

    /// Column maximum length.
    pub fn max_length(&self) -> u64 {
        self.max_length
    }

    /// Result column this locator belongs to.
    pub fn column_index(&self) -> usize {
        self.column_index
    }

    /// Rebind to a different remote object.
    ///
    /// The memoized length belongs to the old object and is dropped. Pending
    /// local state is the enclosing field's concern; see
    /// [`LobField::set_handle`](crate::lob::LobField::set_handle).
    pub fn set_handle(&mut self, handle: u64) {
        self.handle = Some(handle);
        self.known_length = None;
    }

    /// Drop the remote binding (fresh column or SQL NULL).
    pub(crate) fn clear_handle(&mut self) {
        self.handle = None;
        self.known_length = None;
    }

    fn bound_handle(&self) -> Result<u64> {
        self.handle.ok_or_else(|| {
            Error::remote_io(format!(
                "locator for column {} has no remote handle",
                self.column_index
            ))
        })
    }

    /// Read up to `length` bytes at `offset` from the remote object.
    pub async fn read<S: LocatorService>(
        &self,
        remote: &mut S,
        offset: u64,
        length: u64,
    ) -> Result<Bytes> {
        let handle = self.bound_handle()?;
        trace!("locator read: handle={handle} offset={offset} length={length}");
        remote.read(handle, offset, length).await
    }

    /// Write `data` at `offset`; `terminal` marks the write that completes
    /// the value.
    pub async fn write<S: LocatorService>(
        &mut self,
        remote: &mut S,
        offset: u64,
        data: &[u8],
        terminal: bool,
    ) -> Result<()> {
        let handle = self.bound_handle()?;
        trace!(
            "locator write: handle={handle} offset={offset} len={} terminal={terminal}",
            data.len()
        );
        // The old memoized length no longer describes the object.
        self.known_length = None;
        remote.write(handle, offset, data, terminal).await
    }

    /// Remote object length in bytes, memoized between mutations.
    pub async fn length<S: LocatorService>(&mut self, remote: &mut S) -> Result<u64> {
        if let Some(length) = self.known_length {
            return Ok(length);
        }
        let handle = self.bound_handle()?;
        let length = remote.length(handle).await?;
        self.known_length = Some(length);
        Ok(length)
    }
}
