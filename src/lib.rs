//! Locator-Backed LOB Value Model
//!
//! Client-side handling of large object columns for a host database thin
//! client. Values are staged locally, flushed to the remote store in bounded
//! blocks at statement execution, and read back whole or as chunk streams,
//! without the full object ever being required to cross the wire at once.
//!
//! # Example
//!
//! ```
//! use hostdb_lob_rs::convert::Converter;
//! use hostdb_lob_rs::lob::LobField;
//! use hostdb_lob_rs::service::MemoryLocatorService;
//! use hostdb_lob_rs::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut service = MemoryLocatorService::new();
//!
//!     // Stage a local value; nothing reaches the host yet.
//!     let mut comment = LobField::character(0, 4096, Converter::for_ccsid(1208)?);
//!     comment.set_string("forty-two")?;
//!     assert!(comment.is_dirty());
//!
//!     // Execute-time flush allocates the remote object and writes it out.
//!     comment.flush(&mut service).await?;
//!     assert_eq!(comment.get_string(&mut service).await?, "forty-two");
//!
//!     Ok(())
//! }
//! ```

pub mod convert;
pub mod error;
pub mod lob;
pub mod row;
pub mod service;
pub mod statement;

// Re-export main types
pub use convert::{BidiOptions, Converter};
pub use error::{Error, Result};
pub use lob::{
    LengthSpec, LobField, LobKind, LobLocator, Payload, PendingValue, SqlXml, UpdatableLob,
    LOB_BLOCK_SIZE,
};
pub use row::{BufferedRow, RowAccess};
pub use service::{LocatorService, MemoryLocatorService};
pub use statement::LobColumns;
