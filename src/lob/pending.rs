//! Locally-set LOB values awaiting flush to the remote store.

use crate::convert::hex_to_bytes;
use crate::error::{Error, Result};
use crate::lob::object::{SqlXml, UpdatableLob};
use crate::lob::LobKind;
use bytes::Bytes;
use std::fmt;
use tokio::io::AsyncRead;

/// Byte stream source for a locally-set value.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Character stream source for a locally-set value, yielding UTF-8 text.
pub type TextSource = Box<dyn AsyncRead + Send + Unpin>;

/// Declared length of a locally-set value.
///
/// Units follow the column kind: characters for character LOBs, bytes for
/// binary LOBs and raw byte streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthSpec {
    /// The source yields exactly this many units; fewer is an under-run
    /// error, and units past the column maximum are truncated.
    Known(u64),
    /// Resolve the unit count from the current remote object length.
    DeriveFromRemote,
    /// Drain the source until it reports end of data.
    ReadToEnd,
}

/// One locally-set value, tagged by how it was supplied.
pub enum Payload {
    /// Materialized text.
    Text(String),
    /// Materialized bytes.
    Bytes(Bytes),
    /// Incrementally-read character data.
    CharStream(TextSource),
    /// Incrementally-read binary data.
    ByteStream(ByteSource),
    /// Another LOB value, local or remote-backed.
    Lob(Box<UpdatableLob>),
    /// An XML document value.
    Xml(SqlXml),
}

impl Payload {
    /// Short tag for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::CharStream(_) => "character stream",
            Self::ByteStream(_) => "byte stream",
            Self::Lob(_) => "lob",
            Self::Xml(_) => "xml",
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "Text({} chars)", s.chars().count()),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::CharStream(_) => write!(f, "CharStream"),
            Self::ByteStream(_) => write!(f, "ByteStream"),
            Self::Lob(lob) => f.debug_tuple("Lob").field(lob).finish(),
            Self::Xml(xml) => f.debug_tuple("Xml").field(xml).finish(),
        }
    }
}

/// An unflushed local value together with its declared length.
///
/// A pending value exists only while its column is dirty: flushing, handle
/// rebinding, and detachment via [`take_updatable`] all consume it. Moving it
/// out of the field is the hand-off that keeps exactly one owner of a local
/// value at any time.
///
/// [`take_updatable`]: crate::lob::LobField::take_updatable
#[derive(Debug)]
pub struct PendingValue {
    pub payload: Payload,
    pub declared: LengthSpec,
}

impl PendingValue {
    pub fn new(payload: Payload, declared: LengthSpec) -> Self {
        Self { payload, declared }
    }

    /// Build the pending value for a string assignment.
    ///
    /// A string on a binary column is hex, decoded here; the returned count is
    /// how many units (characters or decoded bytes) exceed `max_length`.
    pub(crate) fn from_text(kind: LobKind, max_length: u64, value: &str) -> Result<(Self, u64)> {
        match kind {
            LobKind::Character => {
                let total = value.chars().count() as u64;
                let truncated = total.saturating_sub(max_length);
                Ok((
                    Self::new(Payload::Text(value.to_string()), LengthSpec::Known(total)),
                    truncated,
                ))
            }
            LobKind::Binary => {
                let data = hex_to_bytes(value).ok_or_else(|| {
                    Error::mismatch("string value for a binary LOB is not valid hex")
                })?;
                let total = data.len() as u64;
                let truncated = total.saturating_sub(max_length);
                Ok((
                    Self::new(Payload::Bytes(data.into()), LengthSpec::Known(total)),
                    truncated,
                ))
            }
        }
    }

    /// Build the pending value for a byte assignment; binary columns only.
    pub(crate) fn from_bytes(kind: LobKind, max_length: u64, value: Bytes) -> Result<(Self, u64)> {
        match kind {
            LobKind::Binary => {
                let total = value.len() as u64;
                let truncated = total.saturating_sub(max_length);
                Ok((
                    Self::new(Payload::Bytes(value), LengthSpec::Known(total)),
                    truncated,
                ))
            }
            LobKind::Character => Err(Error::mismatch(
                "byte value is not defined for a character LOB",
            )),
        }
    }
}
