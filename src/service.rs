//! Remote locator service contract and an in-process implementation.
//!
//! Every remote byte of a LOB moves through [`LocatorService`]. The locator
//! layer treats the transport as opaque: it never batches, reorders, or
//! retries calls, and it surfaces service errors verbatim.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;

/// Remote large-object access provided by the connection's transport layer.
///
/// A handle names server-side LOB state and is meaningful only on the
/// connection that produced it. All offsets and lengths are in bytes of the
/// host representation; unit accounting (characters for character LOBs) is
/// the caller's concern.
pub trait LocatorService {
    /// Allocate a fresh locator slot on the host, sized for `max_length`
    /// bytes, and return its handle.
    fn allocate_handle(&mut self, max_length: u64) -> impl Future<Output = Result<u64>> + Send;

    /// Read up to `length` bytes at `offset` from the remote object.
    fn read(
        &mut self,
        handle: u64,
        offset: u64,
        length: u64,
    ) -> impl Future<Output = Result<Bytes>> + Send;

    /// Write `data` at `offset` into the remote object.
    ///
    /// `terminal` marks the write that completes a value, letting the host
    /// finalize its length bookkeeping for the object.
    fn write(
        &mut self,
        handle: u64,
        offset: u64,
        data: &[u8],
        terminal: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Current length of the remote object in bytes.
    fn length(&mut self, handle: u64) -> impl Future<Output = Result<u64>> + Send;
}

/// In-process [`LocatorService`] backed by a slot table.
///
/// Mirrors the host's locator semantics closely enough for tests and runnable
/// examples: handles are allocated sequentially starting at 1, writes may
/// extend an object, and a terminal write truncates the object at the end of
/// the written range exactly as the host finalizes a completed value.
#[derive(Debug, Default)]
pub struct MemoryLocatorService {
    slots: HashMap<u64, Slot>,
    next_handle: u64,
    closed: bool,
}

#[derive(Debug)]
struct Slot {
    data: Vec<u8>,
    /// Advisory slot size from allocation; the host enforces it, this
    /// implementation only records it.
    #[allow(dead_code)]
    max_length: u64,
}

impl MemoryLocatorService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an object at a caller-chosen handle, the way a fetch delivers
    /// server-created locators.
    pub fn seed(&mut self, handle: u64, data: impl Into<Vec<u8>>) {
        self.slots.insert(
            handle,
            Slot {
                data: data.into(),
                max_length: u64::MAX,
            },
        );
        self.next_handle = self.next_handle.max(handle);
    }

    /// Raw bytes currently held by an object, if the handle exists.
    pub fn object(&self, handle: u64) -> Option<&[u8]> {
        self.slots.get(&handle).map(|s| s.data.as_slice())
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.slots.len()
    }

    /// Mark the connection closed; every later call fails.
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn slot_mut(&mut self, handle: u64) -> Result<&mut Slot> {
        self.slots
            .get_mut(&handle)
            .ok_or_else(|| Error::remote_io(format!("unknown locator handle {handle}")))
    }
}

impl LocatorService for MemoryLocatorService {
    async fn allocate_handle(&mut self, max_length: u64) -> Result<u64> {
        self.ensure_open()?;
        self.next_handle += 1;
        let handle = self.next_handle;
        self.slots.insert(
            handle,
            Slot {
                data: Vec::new(),
                max_length,
            },
        );
        Ok(handle)
    }

    async fn read(&mut self, handle: u64, offset: u64, length: u64) -> Result<Bytes> {
        self.ensure_open()?;
        let slot = self.slot_mut(handle)?;
        let start = offset as usize;
        if start > slot.data.len() {
            return Err(Error::remote_io(format!(
                "read at offset {offset} past end of locator object"
            )));
        }
        let end = (start + length as usize).min(slot.data.len());
        Ok(Bytes::copy_from_slice(&slot.data[start..end]))
    }

    async fn write(&mut self, handle: u64, offset: u64, data: &[u8], terminal: bool) -> Result<()> {
        self.ensure_open()?;
        let slot = self.slot_mut(handle)?;
        let start = offset as usize;
        if start > slot.data.len() {
            return Err(Error::remote_io(format!(
                "write at offset {offset} past end of locator object"
            )));
        }
        let end = start + data.len();
        if end > slot.data.len() {
            slot.data.resize(end, 0);
        }
        slot.data[start..end].copy_from_slice(data);
        if terminal {
            slot.data.truncate(end);
        }
        Ok(())
    }

    async fn length(&mut self, handle: u64) -> Result<u64> {
        self.ensure_open()?;
        let slot = self.slot_mut(handle)?;
        Ok(slot.data.len() as u64)
    }
}
