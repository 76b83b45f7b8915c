//! Application-facing large object values.

use crate::convert::{bytes_to_hex_upper, hex_to_bytes, Converter};
use crate::error::{Error, Result};
use crate::lob::locator::LobLocator;
use crate::lob::pending::PendingValue;
use crate::lob::transfer::{self, LocalValue};
use crate::lob::{LobKind, LOB_BLOCK_SIZE};
use crate::service::LocatorService;
use bytes::Bytes;
use tokio::io::AsyncRead;

/// An updatable LOB value detached from a result column.
///
/// Created by [`LobField::take_updatable`], which moves the column's pending
/// value into the object, or by [`UpdatableLob::new`] for a fresh value bound
/// later as a statement parameter. The object serves reads from its local
/// value when dirty and from the remote store otherwise, and can be handed
/// back to a column with [`LobField::set_lob`].
///
/// [`LobField::take_updatable`]: crate::lob::LobField::take_updatable
/// [`LobField::set_lob`]: crate::lob::LobField::set_lob
#[derive(Debug)]
pub struct UpdatableLob {
    kind: LobKind,
    locator: LobLocator,
    converter: Converter,
    block_size: usize,
    pending: Option<PendingValue>,
}

impl UpdatableLob {
    /// Fresh, empty, unbound LOB value.
    pub fn new(kind: LobKind, converter: Converter) -> Self {
        Self {
            kind,
            locator: LobLocator::new(0, u64::MAX),
            converter,
            block_size: LOB_BLOCK_SIZE,
            pending: None,
        }
    }

    pub(crate) fn adopt(
        kind: LobKind,
        locator: LobLocator,
        converter: Converter,
        block_size: usize,
        pending: Option<PendingValue>,
    ) -> Self {
        Self {
            kind,
            locator,
            converter,
            block_size,
            pending,
        }
    }

    /// Content kind of this value.
    pub fn kind(&self) -> LobKind {
        self.kind
    }

    /// Whether an unflushed local value is held.
    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    /// Remote handle backing the clean state, if any.
    pub fn handle(&self) -> Option<u64> {
        self.locator.handle()
    }

    pub(crate) fn locator_mut(&mut self) -> &mut LobLocator {
        &mut self.locator
    }

    pub(crate) fn converter(&self) -> Converter {
        self.converter
    }

    /// Move the pending value out, leaving the object clean.
    pub(crate) fn take_pending(&mut self) -> Option<PendingValue> {
        self.pending.take()
    }

    /// Replace the local value with new text.
    ///
    /// On a binary value the text is hex and is decoded here.
    pub fn update_string(&mut self, value: &str) -> Result<()> {
        let (pending, _) = PendingValue::from_text(self.kind, self.locator.max_length(), value)?;
        self.pending = Some(pending);
        Ok(())
    }

    /// Replace the local value with new bytes; binary values only.
    pub fn update_bytes(&mut self, value: Bytes) -> Result<()> {
        let (pending, _) = PendingValue::from_bytes(self.kind, self.locator.max_length(), value)?;
        self.pending = Some(pending);
        Ok(())
    }

    /// Current value as a string: the local pending value when dirty,
    /// otherwise the remote object. Binary content comes back as hex.
    pub async fn string<S: LocatorService>(&mut self, remote: &mut S) -> Result<String> {
        match self.materialize(remote).await? {
            LocalValue::Text(s) => Ok(s),
            LocalValue::Binary(b) => Ok(bytes_to_hex_upper(&b)),
        }
    }

    /// Current value as bytes. Character content is hex, decoded here.
    pub async fn bytes<S: LocatorService>(&mut self, remote: &mut S) -> Result<Bytes> {
        match self.materialize(remote).await? {
            LocalValue::Binary(b) => Ok(b),
            LocalValue::Text(s) => hex_to_bytes(&s)
                .map(Bytes::from)
                .ok_or_else(|| Error::mismatch("character LOB content is not valid hex")),
        }
    }

    /// Current length in the value's units: characters when character,
    /// bytes when binary.
    pub async fn len<S: LocatorService>(&mut self, remote: &mut S) -> Result<u64> {
        if self.pending.is_none() && self.kind == LobKind::Binary {
            // Byte length straight from the remote object, no data movement.
            return self.locator.length(remote).await;
        }
        Ok(self.materialize(remote).await?.units())
    }

    async fn materialize<S: LocatorService>(&mut self, remote: &mut S) -> Result<LocalValue> {
        if let Some(pending) = self.pending.as_mut() {
            let materialized = transfer::materialize_local(
                self.kind,
                &mut self.locator,
                pending,
                self.converter,
                self.block_size,
                remote,
            )
            .await?;
            Ok(materialized.value)
        } else {
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

/// An XML document value for XML-typed columns.
///
/// Held as text; the locator layer stores and fetches it through the
/// column's character converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlXml {
    text: String,
}

impl SqlXml {
    /// Wrap an XML document held as text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Document text.
    pub fn string(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// In-memory reader over the document's UTF-8 bytes.
    pub fn reader(self) -> impl AsyncRead + Send + Unpin {
        std::io::Cursor::new(self.text.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MemoryLocatorService;

    #[tokio::test]
    async fn test_dirty_read_stays_local() {
        let mut svc = MemoryLocatorService::new();
        let mut lob = UpdatableLob::new(LobKind::Character, Converter::Utf8);
        lob.update_string("local only").unwrap();

        assert!(lob.is_dirty());
        assert_eq!(lob.string(&mut svc).await.unwrap(), "local only");
        assert_eq!(lob.len(&mut svc).await.unwrap(), 10);
        // No remote object was ever created.
        assert_eq!(svc.object_count(), 0);
    }

    #[tokio::test]
    async fn test_binary_round_trip_and_hex_view() {
        let mut svc = MemoryLocatorService::new();
        let mut lob = UpdatableLob::new(LobKind::Binary, Converter::Utf8);
        lob.update_bytes(Bytes::from_static(&[0xDE, 0xAD])).unwrap();

        assert_eq!(&lob.bytes(&mut svc).await.unwrap()[..], &[0xDE, 0xAD]);
        assert_eq!(lob.string(&mut svc).await.unwrap(), "DEAD");
        assert_eq!(lob.len(&mut svc).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_character_bytes_view_decodes_hex() {
        let mut svc = MemoryLocatorService::new();
        let mut lob = UpdatableLob::new(LobKind::Character, Converter::Utf8);
        lob.update_string("01FF").unwrap();
        assert_eq!(&lob.bytes(&mut svc).await.unwrap()[..], &[0x01, 0xFF]);

        lob.update_string("not hex").unwrap();
        assert!(lob.bytes(&mut svc).await.is_err());
    }

    #[test]
    fn test_update_bytes_on_character_rejected() {
        let mut lob = UpdatableLob::new(LobKind::Character, Converter::Utf8);
        assert!(lob.update_bytes(Bytes::from_static(b"x")).is_err());
    }

    #[tokio::test]
    async fn test_sql_xml_reader() {
        use tokio::io::AsyncReadExt;

        let xml = SqlXml::new("<a/>");
        assert_eq!(xml.string(), "<a/>");

        let mut out = String::new();
        xml.reader().read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "<a/>");
    }
}
