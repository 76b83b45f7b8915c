//! Locator-backed large object (LOB) support.
//!
//! Host LOB columns are fetched as locators: small remote handles that name
//! server-side object state instead of carrying the bytes inline. A column
//! tracks two states. Clean means the authoritative value is remote and reads
//! go through the locator in bounded blocks. Dirty means an unflushed local
//! value is pending, reads are served locally, and the value reaches the host
//! only when statement execution flushes it.
//!
//! - [`locator`]: the remote handle and its read/write/length primitives
//! - [`pending`]: locally-set values awaiting flush
//! - [`transfer`]: block-bounded movement between local values and the remote store
//! - [`field`]: the per-column facade combining all of the above
//! - [`object`]: application-facing LOB and XML values

pub mod field;
pub mod locator;
pub mod object;
pub mod pending;
pub mod transfer;

pub use field::LobField;
pub use locator::LobLocator;
pub use object::{SqlXml, UpdatableLob};
pub use pending::{ByteSource, LengthSpec, Payload, PendingValue, TextSource};
pub use transfer::LocalValue;

/// Default block size for LOB transfers. Individual fields may override it
/// via [`LobField::with_block_size`].
pub const LOB_BLOCK_SIZE: usize = 256 * 1024;

/// Content kind of a locator column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobKind {
    /// Character large object: lengths count characters and content moves
    /// through the column's code-page converter.
    Character,
    /// Binary large object: lengths count bytes and content is verbatim.
    Binary,
}

impl LobKind {
    /// Lowercase name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Binary => "binary",
        }
    }
}
