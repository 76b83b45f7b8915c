//! Per-column value facade for locator-backed LOB columns.

use crate::convert::{bytes_to_hex_upper, hex_to_bytes, BidiOptions, Converter};
use crate::error::{Error, Result};
use crate::lob::locator::LobLocator;
use crate::lob::object::{SqlXml, UpdatableLob};
use crate::lob::pending::{ByteSource, LengthSpec, Payload, PendingValue, TextSource};
use crate::lob::transfer::{self, LocalValue};
use crate::lob::{LobKind, LOB_BLOCK_SIZE};
use crate::row::decode_locator_handle;
use crate::service::LocatorService;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::future::Either;
use futures::Stream;
use tracing::trace;

/// Locally materialized value kept between dirty-state reads.
#[derive(Debug, Clone)]
struct CachedValue {
    value: LocalValue,
    truncated: u64,
}

/// The value model for one locator-backed result column.
///
/// A field is either *clean* (the authoritative value is the remote object
/// named by the locator; reads fetch it in bounded blocks) or *dirty* (a
/// locally-set [`PendingValue`] shadows the remote object; reads are served
/// locally and the value reaches the host only via [`flush`]). Setters of any
/// payload kind make the field dirty; [`flush`] and [`set_handle`] make it
/// clean again.
///
/// Dirty-state reads materialize at most once: the result is cached until the
/// next setter, rebind, or flush invalidates it. Clean-state reads never
/// cache bytes; only the remote length is memoized.
///
/// [`flush`]: Self::flush
/// [`set_handle`]: Self::set_handle
#[derive(Debug)]
pub struct LobField {
    kind: LobKind,
    locator: LobLocator,
    converter: Converter,
    bidi: BidiOptions,
    block_size: usize,
    pending: Option<PendingValue>,
    cached: Option<CachedValue>,
    truncated: u64,
    out_of_bounds: bool,
}

impl LobField {
    /// Facade for a character LOB column.
    pub fn character(column_index: usize, max_length: u64, converter: Converter) -> Self {
        Self::new(LobKind::Character, column_index, max_length, converter)
    }

    /// Facade for a binary LOB column.
    pub fn binary(column_index: usize, max_length: u64) -> Self {
        // The converter is never consulted for binary content; hex bridging
        // is pure ASCII.
        Self::new(LobKind::Binary, column_index, max_length, Converter::Utf8)
    }

    fn new(kind: LobKind, column_index: usize, max_length: u64, converter: Converter) -> Self {
        Self {
            kind,
            locator: LobLocator::new(column_index, max_length),
            converter,
            bidi: BidiOptions::default(),
            block_size: LOB_BLOCK_SIZE,
            pending: None,
            cached: None,
            truncated: 0,
            out_of_bounds: false,
        }
    }

    /// Override the transfer block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Attach bidi attributes passed through to the code-page layer.
    pub fn with_bidi(mut self, bidi: BidiOptions) -> Self {
        self.bidi = bidi;
        self
    }

    pub fn kind(&self) -> LobKind {
        self.kind
    }

    pub fn column_index(&self) -> usize {
        self.locator.column_index()
    }

    pub fn max_length(&self) -> u64 {
        self.locator.max_length()
    }

    /// Remote handle currently bound, if any.
    pub fn handle(&self) -> Option<u64> {
        self.locator.handle()
    }

    /// Whether an unflushed local value is held.
    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    /// Units silently cut by the column maximum during the last operation
    /// (characters for character LOBs, bytes for binary).
    pub fn truncated(&self) -> u64 {
        self.truncated
    }

    /// Whether the last conversion left the target type's range. LOB
    /// conversions never do; the flag participates in the common conversion
    /// contract.
    pub fn is_out_of_bounds(&self) -> bool {
        self.out_of_bounds
    }

    /// Conversion bookkeeping is recomputed by every operation, never
    /// accumulated across them.
    fn begin_op(&mut self) {
        self.truncated = 0;
        self.out_of_bounds = false;
    }

    /// Set the value from a string, making the field dirty.
    ///
    /// On a binary column the string is hex and is decoded immediately;
    /// malformed hex fails and leaves the previous state in place.
    pub fn set_string(&mut self, value: &str) -> Result<()> {
        self.begin_op();
        let (pending, truncated) =
            PendingValue::from_text(self.kind, self.locator.max_length(), value)?;
        self.truncated = truncated;
        self.cached = None;
        self.pending = Some(pending);
        Ok(())
    }

    /// Set the value from bytes; binary columns only.
    pub fn set_bytes(&mut self, value: Bytes) -> Result<()> {
        self.begin_op();
        let (pending, truncated) =
            PendingValue::from_bytes(self.kind, self.locator.max_length(), value)?;
        self.truncated = truncated;
        self.cached = None;
        self.pending = Some(pending);
        Ok(())
    }

    /// Set the value from a character stream; character columns only.
    ///
    /// Truncation for stream payloads is determined when the stream is
    /// drained, at flush or first read.
    pub fn set_character_stream(&mut self, source: TextSource, declared: LengthSpec) -> Result<()> {
        self.begin_op();
        match self.kind {
            LobKind::Character => {
                self.cached = None;
                self.pending = Some(PendingValue::new(Payload::CharStream(source), declared));
                Ok(())
            }
            LobKind::Binary => Err(Error::mismatch(
                "a character stream is not defined for a binary LOB",
            )),
        }
    }

    /// Set the value from a byte stream.
    ///
    /// Valid for both kinds: on a character column the stream carries
    /// host-encoded text and is written verbatim, bounded in bytes.
    pub fn set_binary_stream(&mut self, source: ByteSource, declared: LengthSpec) -> Result<()> {
        self.begin_op();
        self.cached = None;
        self.pending = Some(PendingValue::new(Payload::ByteStream(source), declared));
        Ok(())
    }

    /// Set the value from another LOB of the same kind.
    ///
    /// A dirty source contributes its local value; a clean one is copied
    /// remote-to-remote at flush without materializing locally.
    pub fn set_lob(&mut self, value: UpdatableLob) -> Result<()> {
        self.begin_op();
        if value.kind() != self.kind {
            return Err(Error::mismatch(format!(
                "cannot assign a {} LOB to a {} LOB column",
                value.kind().name(),
                self.kind.name()
            )));
        }
        self.cached = None;
        self.pending = Some(PendingValue::new(
            Payload::Lob(Box::new(value)),
            LengthSpec::ReadToEnd,
        ));
        Ok(())
    }

    /// Set the value from an XML document; character columns only.
    pub fn set_xml(&mut self, value: SqlXml) -> Result<()> {
        self.begin_op();
        match self.kind {
            LobKind::Character => {
                let total = value.string().chars().count() as u64;
                self.truncated = total.saturating_sub(self.locator.max_length());
                self.cached = None;
                self.pending = Some(PendingValue::new(Payload::Xml(value), LengthSpec::Known(total)));
                Ok(())
            }
            LobKind::Binary => Err(Error::mismatch(
                "an XML document is not defined for a binary LOB",
            )),
        }
    }

    /// Rebind the column to a different remote object.
    ///
    /// Any unflushed local value is discarded unconditionally: after a rebind
    /// the locator names different remote bytes and the old edit is stale.
    pub fn set_handle(&mut self, handle: u64) {
        if self.pending.is_some() {
            trace!(
                "column {}: discarding pending value on handle rebind",
                self.locator.column_index()
            );
        }
        self.pending = None;
        self.cached = None;
        self.truncated = 0;
        self.out_of_bounds = false;
        self.locator.set_handle(handle);
    }

    /// Unbind for SQL NULL or a fresh parameter row.
    pub(crate) fn clear_binding(&mut self) {
        self.pending = None;
        self.cached = None;
        self.truncated = 0;
        self.out_of_bounds = false;
        self.locator.clear_handle();
    }

    /// Bind from the raw locator bytes of a freshly fetched row.
    pub fn rehydrate(&mut self, raw: &[u8]) -> Result<()> {
        let handle = decode_locator_handle(raw)?;
        self.set_handle(handle);
        Ok(())
    }

    /// The value as a string. Binary content comes back as uppercase hex.
    pub async fn get_string<S: LocatorService>(&mut self, remote: &mut S) -> Result<String> {
        match self.materialize(remote).await? {
            LocalValue::Text(s) => Ok(s),
            LocalValue::Binary(b) => Ok(bytes_to_hex_upper(&b)),
        }
    }

    /// The value as bytes. Character content is hex, decoded here.
    pub async fn get_bytes<S: LocatorService>(&mut self, remote: &mut S) -> Result<Bytes> {
        match self.materialize(remote).await? {
            LocalValue::Binary(b) => Ok(b),
            LocalValue::Text(s) => hex_to_bytes(&s)
                .map(Bytes::from)
                .ok_or_else(|| Error::mismatch("character LOB content is not valid hex")),
        }
    }

    /// Stream the value as bounded binary chunks.
    ///
    /// A clean binary LOB streams straight from the remote store, holding the
    /// service borrow until the stream is dropped. Dirty values and character
    /// content (which crosses the hex bridge) materialize first and arrive as
    /// a single chunk.
    pub async fn get_binary_stream<'a, S: LocatorService>(
        &'a mut self,
        remote: &'a mut S,
    ) -> Result<impl Stream<Item = Result<Bytes>> + 'a> {
        if self.pending.is_none() && self.kind == LobKind::Binary {
            self.begin_op();
            let total = self.locator.length(remote).await?;
            let chunks =
                transfer::read_binary_chunks(self.locator.clone(), total, self.block_size, remote);
            return Ok(Either::Left(chunks));
        }
        let data = self.get_bytes(remote).await?;
        Ok(Either::Right(futures::stream::iter([Ok(data)])))
    }

    /// Stream the value as decoded text chunks.
    pub async fn get_character_stream<'a, S: LocatorService>(
        &'a mut self,
        remote: &'a mut S,
    ) -> Result<impl Stream<Item = Result<String>> + 'a> {
        if self.pending.is_none() && self.kind == LobKind::Character {
            self.begin_op();
            let total = self.locator.length(remote).await?;
            let chunks = transfer::read_character_chunks(
                self.locator.clone(),
                total,
                self.converter,
                self.block_size,
                remote,
            );
            return Ok(Either::Left(chunks));
        }
        let text = self.get_string(remote).await?;
        Ok(Either::Right(futures::stream::iter([Ok(text)])))
    }

    /// The value as an XML document; character columns only.
    pub async fn get_xml<S: LocatorService>(&mut self, remote: &mut S) -> Result<SqlXml> {
        if self.kind == LobKind::Binary {
            self.begin_op();
            return Err(Error::mismatch(
                "XML retrieval is not defined for a binary LOB",
            ));
        }
        let text = self.get_string(remote).await?;
        Ok(SqlXml::new(text))
    }

    // A LOB never converts to a number or datetime; these fail uniformly
    // without touching the remote store.

    pub fn get_i16(&mut self) -> Result<i16> {
        Err(self.scalar_mismatch("SMALLINT"))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Err(self.scalar_mismatch("INTEGER"))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Err(self.scalar_mismatch("BIGINT"))
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        Err(self.scalar_mismatch("REAL"))
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        Err(self.scalar_mismatch("DOUBLE"))
    }

    pub fn get_date(&mut self) -> Result<NaiveDate> {
        Err(self.scalar_mismatch("DATE"))
    }

    pub fn get_time(&mut self) -> Result<NaiveTime> {
        Err(self.scalar_mismatch("TIME"))
    }

    pub fn get_timestamp(&mut self) -> Result<NaiveDateTime> {
        Err(self.scalar_mismatch("TIMESTAMP"))
    }

    fn scalar_mismatch(&mut self, target: &str) -> Error {
        self.begin_op();
        Error::mismatch(format!(
            "{target} conversion is not defined for a {} LOB column",
            self.kind.name()
        ))
    }

    /// Flush the pending value to the remote store; no-op when clean.
    ///
    /// Statement execution calls this for every locator column in column
    /// order before serializing the row. The first flush of an unbound column
    /// allocates the remote object. After a failed flush the pending value is
    /// consumed and the remote object is undefined; discard the row and
    /// reacquire it.
    pub async fn flush<S: LocatorService>(&mut self, remote: &mut S) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        self.cached = None;
        self.truncated = transfer::flush_to_remote(
            self.kind,
            &mut self.locator,
            pending,
            self.converter,
            &self.bidi,
            self.block_size,
            remote,
        )
        .await?;
        self.out_of_bounds = false;
        Ok(())
    }

    /// Detach the column's value as an application-facing LOB object.
    ///
    /// A pending local value moves into the object and the field comes back
    /// clean; the exclusive borrow guarantees nothing observes the value
    /// mid-move. The object snapshots the current locator binding.
    pub fn take_updatable(&mut self) -> UpdatableLob {
        let pending = self.pending.take();
        if pending.is_some() {
            self.cached = None;
            trace!(
                "column {}: pending value moved to detached LOB",
                self.locator.column_index()
            );
        }
        UpdatableLob::adopt(
            self.kind,
            self.locator.clone(),
            self.converter,
            self.block_size,
            pending,
        )
    }

    /// Materialize for a read: local pending value (cached after the first
    /// materialization) when dirty, remote object when clean.
    async fn materialize<S: LocatorService>(&mut self, remote: &mut S) -> Result<LocalValue> {
        self.begin_op();
        match self.pending.as_mut() {
            Some(pending) => {
                if let Some(cached) = &self.cached {
                    self.truncated = cached.truncated;
                    return Ok(cached.value.clone());
                }
                let materialized = transfer::materialize_local(
                    self.kind,
                    &mut self.locator,
                    pending,
                    self.converter,
                    self.block_size,
                    remote,
                )
                .await?;
                self.truncated = materialized.truncated;
                self.cached = Some(CachedValue {
                    value: materialized.value.clone(),
                    truncated: materialized.truncated,
                });
                Ok(materialized.value)
            }
            None => {
                transfer::materialize_from_remote(
                    self.kind,
                    &mut self.locator,
                    self.converter,
                    self.block_size,
                    remote,
                )
                .await
            }
        }
    }
}
