//! Block transfer between local LOB values and the remote store.
//!
//! Every byte that crosses the wire moves through this module in blocks of at
//! most the configured block size, in both directions. Writes carry a
//! terminal flag on the block that completes a value so the host can finalize
//! its length bookkeeping; a value with no bytes still gets one zero-length
//! terminal write. Sources with unknown length are drained with a one-chunk
//! lookahead so the last data chunk is the terminal one.

use crate::convert::{BidiOptions, Converter, Utf8Assembler};
use crate::error::{Error, Result};
use crate::lob::locator::LobLocator;
use crate::lob::object::UpdatableLob;
use crate::lob::pending::{ByteSource, LengthSpec, Payload, PendingValue, TextSource};
use crate::lob::LobKind;
use crate::service::LocatorService;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

/// A fully materialized local LOB value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalValue {
    Text(String),
    Binary(Bytes),
}

impl LocalValue {
    /// Length in the value's units: characters for text, bytes for binary.
    pub fn units(&self) -> u64 {
        match self {
            Self::Text(s) => s.chars().count() as u64,
            Self::Binary(b) => b.len() as u64,
        }
    }
}

/// Outcome of materializing a pending value: the value clamped to the column
/// maximum, plus how many units the clamp cut.
#[derive(Debug, Clone)]
pub(crate) struct Materialized {
    pub value: LocalValue,
    pub truncated: u64,
}

/// Materialize a pending value locally for dirty-state reads.
///
/// A stream source can be drained only once, so after draining, the pending
/// value is normalized in place to the equivalent materialized payload; later
/// reads and the eventual flush see exactly what this read saw. Nested LOB
/// and XML payloads normalize the same way. The returned value is clamped to
/// the column maximum while the pending payload keeps the full content.
pub(crate) async fn materialize_local<S: LocatorService>(
    kind: LobKind,
    locator: &mut LobLocator,
    pending: &mut PendingValue,
    converter: Converter,
    block_size: usize,
    remote: &mut S,
) -> Result<Materialized> {
    loop {
        match &mut pending.payload {
            Payload::Text(text) => {
                let max = locator.max_length();
                let total = text.chars().count() as u64;
                let value = if total > max {
                    text.chars().take(max as usize).collect()
                } else {
                    text.clone()
                };
                return Ok(Materialized {
                    value: LocalValue::Text(value),
                    truncated: total.saturating_sub(max),
                });
            }
            Payload::Bytes(data) => {
                let max = locator.max_length();
                let total = data.len() as u64;
                let value = if total > max {
                    data.slice(..max as usize)
                } else {
                    data.clone()
                };
                return Ok(Materialized {
                    value: LocalValue::Binary(value),
                    truncated: total.saturating_sub(max),
                });
            }
            Payload::CharStream(source) => {
                let limit = resolve_limit(pending.declared, locator, remote).await?;
                let text = drain_text(source, limit, block_size).await?;
                pending.declared = LengthSpec::Known(text.chars().count() as u64);
                pending.payload = Payload::Text(text);
            }
            Payload::ByteStream(source) => {
                let limit = resolve_limit(pending.declared, locator, remote).await?;
                let data = drain_bytes(source, limit, block_size).await?;
                match kind {
                    // Raw bytes on a character column carry host-encoded text.
                    LobKind::Character => {
                        let text = converter.decode(&data)?;
                        pending.declared = LengthSpec::Known(text.chars().count() as u64);
                        pending.payload = Payload::Text(text);
                    }
                    LobKind::Binary => {
                        pending.declared = LengthSpec::Known(data.len() as u64);
                        pending.payload = Payload::Bytes(data);
                    }
                }
            }
            Payload::Lob(nested) => {
                if let Some(inner) = nested.take_pending() {
                    *pending = inner;
                } else if nested.handle().is_none() {
                    // A never-written LOB value is empty.
                    *pending = empty_pending(nested.kind());
                } else {
                    let converter = nested.converter();
                    let value = materialize_from_remote(
                        nested.kind(),
                        nested.locator_mut(),
                        converter,
                        block_size,
                        remote,
                    )
                    .await?;
                    *pending = pending_from_value(value);
                }
            }
            Payload::Xml(xml) => {
                let text = xml.string().to_string();
                pending.declared = LengthSpec::Known(text.chars().count() as u64);
                pending.payload = Payload::Text(text);
            }
        }
    }
}

/// Read the whole remote object in bounded blocks and decode it for the
/// column kind. Never assumes a single read returns everything.
pub(crate) async fn materialize_from_remote<S: LocatorService>(
    kind: LobKind,
    locator: &mut LobLocator,
    converter: Converter,
    block_size: usize,
    remote: &mut S,
) -> Result<LocalValue> {
    let total = locator.length(remote).await?;
    let mut data = BytesMut::with_capacity(total.min(block_size as u64) as usize);
    let mut offset = 0u64;
    while offset < total {
        let take = (block_size as u64).min(total - offset);
        let chunk = locator.read(remote, offset, take).await?;
        if chunk.is_empty() {
            return Err(Error::remote_io(format!(
                "remote read returned no data at offset {offset}"
            )));
        }
        offset += chunk.len() as u64;
        data.extend_from_slice(&chunk);
    }
    match kind {
        LobKind::Character => Ok(LocalValue::Text(converter.decode(&data)?)),
        LobKind::Binary => Ok(LocalValue::Binary(data.freeze())),
    }
}

/// Flush a pending value to the remote store, allocating a handle first when
/// the column has none. This is the single path from local edits to remote
/// bytes; nothing is written outside a flush. Returns the truncated-unit
/// count; the refreshed remote length lands in the locator's memo.
///
/// On error the remote object may hold a partial value. Callers must discard
/// the locator and reacquire the row rather than retry.
pub(crate) async fn flush_to_remote<S: LocatorService>(
    kind: LobKind,
    locator: &mut LobLocator,
    mut pending: PendingValue,
    converter: Converter,
    bidi: &BidiOptions,
    block_size: usize,
    remote: &mut S,
) -> Result<u64> {
    if locator.handle().is_none() {
        let handle = remote.allocate_handle(locator.max_length()).await?;
        trace!(
            "column {}: allocated locator handle {handle}",
            locator.column_index()
        );
        locator.set_handle(handle);
    }

    let truncated = loop {
        match pending.payload {
            Payload::Text(text) => {
                break flush_text(locator, &text, converter, bidi, block_size, remote).await?;
            }
            Payload::Bytes(data) => {
                break flush_bytes(locator, &data, block_size, remote).await?;
            }
            Payload::CharStream(mut source) => {
                let limit = resolve_limit(pending.declared, locator, remote).await?;
                break match limit {
                    Some(declared) => {
                        flush_char_stream_known(
                            locator, &mut source, declared, converter, bidi, block_size, remote,
                        )
                        .await?
                    }
                    None => {
                        flush_char_stream_to_end(
                            locator, &mut source, converter, bidi, block_size, remote,
                        )
                        .await?
                    }
                };
            }
            Payload::ByteStream(mut source) => {
                let limit = resolve_limit(pending.declared, locator, remote).await?;
                break match limit {
                    Some(declared) => {
                        flush_byte_stream_known(locator, &mut source, declared, block_size, remote)
                            .await?
                    }
                    None => {
                        flush_byte_stream_to_end(locator, &mut source, block_size, remote).await?
                    }
                };
            }
            Payload::Lob(mut nested) => {
                if let Some(inner) = nested.take_pending() {
                    pending = inner;
                } else if nested.handle().is_none() {
                    pending = empty_pending(nested.kind());
                } else if kind == LobKind::Binary {
                    break flush_remote_copy(locator, nested.as_mut(), block_size, remote).await?;
                } else {
                    // A character copy is clamped in characters and may cross
                    // code pages; decode the source object and continue as a
                    // text flush through the column's converter.
                    let source_converter = nested.converter();
                    let value = materialize_from_remote(
                        nested.kind(),
                        nested.locator_mut(),
                        source_converter,
                        block_size,
                        remote,
                    )
                    .await?;
                    pending = pending_from_value(value);
                }
            }
            Payload::Xml(xml) => {
                pending = PendingValue::new(Payload::Text(xml.into_string()), pending.declared);
            }
        }
    };

    let length = locator.length(remote).await?;
    debug!(
        "column {}: flushed {} value, remote length {length}, truncated {truncated}",
        locator.column_index(),
        kind.name()
    );
    Ok(truncated)
}

fn empty_pending(kind: LobKind) -> PendingValue {
    match kind {
        LobKind::Character => PendingValue::new(Payload::Text(String::new()), LengthSpec::Known(0)),
        LobKind::Binary => PendingValue::new(Payload::Bytes(Bytes::new()), LengthSpec::Known(0)),
    }
}

fn pending_from_value(value: LocalValue) -> PendingValue {
    let declared = LengthSpec::Known(value.units());
    match value {
        LocalValue::Text(s) => PendingValue::new(Payload::Text(s), declared),
        LocalValue::Binary(b) => PendingValue::new(Payload::Bytes(b), declared),
    }
}

async fn resolve_limit<S: LocatorService>(
    declared: LengthSpec,
    locator: &mut LobLocator,
    remote: &mut S,
) -> Result<Option<u64>> {
    match declared {
        LengthSpec::Known(n) => Ok(Some(n)),
        LengthSpec::ReadToEnd => Ok(None),
        LengthSpec::DeriveFromRemote => Ok(Some(locator.length(remote).await?)),
    }
}

/// Drain a UTF-8 character source to end of data or to `limit` characters.
///
/// Reads are capped at the characters still owed, and a character is at least
/// one byte, so the cap can never overshoot; a source that ends early is an
/// under-run.
async fn drain_text(
    source: &mut TextSource,
    limit: Option<u64>,
    block_size: usize,
) -> Result<String> {
    let mut assembler = Utf8Assembler::new();
    let mut out = String::new();
    let mut buf = vec![0u8; block_size];
    match limit {
        Some(total) => {
            let mut remaining = total;
            while remaining > 0 {
                let take = (block_size as u64).min(remaining) as usize;
                let n = source.read(&mut buf[..take]).await?;
                if n == 0 {
                    return Err(Error::mismatch(format!(
                        "character stream ended after {} of {} declared characters",
                        total - remaining,
                        total
                    )));
                }
                let text = assembler.push(&buf[..n])?;
                remaining -= text.chars().count() as u64;
                out.push_str(&text);
            }
        }
        None => loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.push_str(&assembler.push(&buf[..n])?);
        },
    }
    assembler.finish()?;
    Ok(out)
}

/// Drain a byte source to end of data or to exactly `limit` bytes.
async fn drain_bytes(
    source: &mut ByteSource,
    limit: Option<u64>,
    block_size: usize,
) -> Result<Bytes> {
    let mut buf = vec![0u8; block_size];
    match limit {
        Some(total) => {
            let mut out = BytesMut::with_capacity(total.min(block_size as u64) as usize);
            let mut remaining = total;
            while remaining > 0 {
                let take = (block_size as u64).min(remaining) as usize;
                source
                    .read_exact(&mut buf[..take])
                    .await
                    .map_err(|e| byte_underrun_or_io(e, total))?;
                out.extend_from_slice(&buf[..take]);
                remaining -= take as u64;
            }
            Ok(out.freeze())
        }
        None => {
            let mut out = BytesMut::new();
            loop {
                let n = source.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            Ok(out.freeze())
        }
    }
}

fn byte_underrun_or_io(e: std::io::Error, declared: u64) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::mismatch(format!(
            "byte stream ended before {declared} declared bytes"
        ))
    } else {
        Error::Io(e)
    }
}

/// Write a materialized value in bounded blocks, last block terminal. An
/// empty value is a single zero-length terminal write so the host still
/// finalizes the object.
async fn write_blocks<S: LocatorService>(
    locator: &mut LobLocator,
    data: &[u8],
    block_size: usize,
    remote: &mut S,
) -> Result<()> {
    if data.is_empty() {
        return locator.write(remote, 0, &[], true).await;
    }
    let mut offset = 0usize;
    while offset < data.len() {
        let end = (offset + block_size).min(data.len());
        locator
            .write(remote, offset as u64, &data[offset..end], end == data.len())
            .await?;
        offset = end;
    }
    Ok(())
}

async fn flush_text<S: LocatorService>(
    locator: &mut LobLocator,
    text: &str,
    converter: Converter,
    bidi: &BidiOptions,
    block_size: usize,
    remote: &mut S,
) -> Result<u64> {
    let max = locator.max_length();
    let total = text.chars().count() as u64;
    let host = if total > max {
        let kept: String = text.chars().take(max as usize).collect();
        converter.encode(&kept, bidi)?
    } else {
        converter.encode(text, bidi)?
    };
    write_blocks(locator, &host, block_size, remote).await?;
    Ok(total.saturating_sub(max))
}

async fn flush_bytes<S: LocatorService>(
    locator: &mut LobLocator,
    data: &Bytes,
    block_size: usize,
    remote: &mut S,
) -> Result<u64> {
    let max = locator.max_length();
    let total = data.len() as u64;
    let kept = if total > max {
        &data[..max as usize]
    } else {
        &data[..]
    };
    write_blocks(locator, kept, block_size, remote).await?;
    Ok(total.saturating_sub(max))
}

async fn flush_char_stream_known<S: LocatorService>(
    locator: &mut LobLocator,
    source: &mut TextSource,
    declared: u64,
    converter: Converter,
    bidi: &BidiOptions,
    block_size: usize,
    remote: &mut S,
) -> Result<u64> {
    let max = locator.max_length();
    let kept = declared.min(max);
    if declared == 0 {
        write_blocks(locator, &[], block_size, remote).await?;
        return Ok(0);
    }
    if kept == 0 {
        // The whole value is beyond the maximum; the object becomes empty,
        // but the declared count must still be drained below.
        locator.write(remote, 0, &[], true).await?;
    }
    let mut assembler = Utf8Assembler::new();
    let mut buf = vec![0u8; block_size];
    let mut consumed = 0u64;
    let mut written = 0u64;
    let mut offset = 0u64;
    while consumed < declared {
        let take = (block_size as u64).min(declared - consumed) as usize;
        let n = source.read(&mut buf[..take]).await?;
        if n == 0 {
            return Err(Error::mismatch(format!(
                "character stream ended after {consumed} of {declared} declared characters"
            )));
        }
        let text = assembler.push(&buf[..n])?;
        let chars = text.chars().count() as u64;
        if chars == 0 {
            continue;
        }
        consumed += chars;
        if written < kept {
            let allow = (kept - written).min(chars);
            let piece: String = if allow == chars {
                text
            } else {
                text.chars().take(allow as usize).collect()
            };
            let host = converter.encode(&piece, bidi)?;
            locator
                .write(remote, offset, &host, written + allow == kept)
                .await?;
            offset += host.len() as u64;
            written += allow;
        }
    }
    Ok(declared - kept)
}

async fn flush_byte_stream_known<S: LocatorService>(
    locator: &mut LobLocator,
    source: &mut ByteSource,
    declared: u64,
    block_size: usize,
    remote: &mut S,
) -> Result<u64> {
    let max = locator.max_length();
    let kept = declared.min(max);
    if declared == 0 {
        write_blocks(locator, &[], block_size, remote).await?;
        return Ok(0);
    }
    if kept == 0 {
        locator.write(remote, 0, &[], true).await?;
    }
    let mut buf = vec![0u8; block_size];
    let mut remaining = declared;
    let mut written = 0u64;
    while remaining > 0 {
        let take = (block_size as u64).min(remaining) as usize;
        source
            .read_exact(&mut buf[..take])
            .await
            .map_err(|e| byte_underrun_or_io(e, declared))?;
        remaining -= take as u64;
        if written < kept {
            let allow = (kept - written).min(take as u64) as usize;
            locator
                .write(remote, written, &buf[..allow], written + allow as u64 == kept)
                .await?;
            written += allow as u64;
        }
    }
    Ok(declared - kept)
}

/// Unknown-length character flush: one decoded chunk of lookahead keeps the
/// terminal flag on the last chunk that actually carries data.
async fn flush_char_stream_to_end<S: LocatorService>(
    locator: &mut LobLocator,
    source: &mut TextSource,
    converter: Converter,
    bidi: &BidiOptions,
    block_size: usize,
    remote: &mut S,
) -> Result<u64> {
    let max = locator.max_length();
    let mut assembler = Utf8Assembler::new();
    let mut buf = vec![0u8; block_size];
    let mut queued: Option<Bytes> = None;
    let mut offset = 0u64;
    let mut kept = 0u64;
    let mut truncated = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let text = assembler.push(&buf[..n])?;
        let chars = text.chars().count() as u64;
        if chars == 0 {
            continue;
        }
        let allow = max.saturating_sub(kept).min(chars);
        truncated += chars - allow;
        if allow == 0 {
            continue;
        }
        if let Some(chunk) = queued.take() {
            locator.write(remote, offset, &chunk, false).await?;
            offset += chunk.len() as u64;
        }
        let piece: String = if allow == chars {
            text
        } else {
            text.chars().take(allow as usize).collect()
        };
        queued = Some(converter.encode(&piece, bidi)?);
        kept += allow;
    }
    assembler.finish()?;
    match queued {
        Some(chunk) => locator.write(remote, offset, &chunk, true).await?,
        None => locator.write(remote, 0, &[], true).await?,
    }
    Ok(truncated)
}

/// Unknown-length byte flush with the same one-chunk lookahead.
async fn flush_byte_stream_to_end<S: LocatorService>(
    locator: &mut LobLocator,
    source: &mut ByteSource,
    block_size: usize,
    remote: &mut S,
) -> Result<u64> {
    let max = locator.max_length();
    let mut buf = vec![0u8; block_size];
    let mut queued: Option<Vec<u8>> = None;
    let mut offset = 0u64;
    let mut kept = 0u64;
    let mut truncated = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let allow = max.saturating_sub(kept).min(n as u64) as usize;
        truncated += n as u64 - allow as u64;
        if allow == 0 {
            continue;
        }
        if let Some(chunk) = queued.take() {
            locator.write(remote, offset, &chunk, false).await?;
            offset += chunk.len() as u64;
        }
        queued = Some(buf[..allow].to_vec());
        kept += allow as u64;
    }
    match queued {
        Some(chunk) => locator.write(remote, offset, &chunk, true).await?,
        None => locator.write(remote, 0, &[], true).await?,
    }
    Ok(truncated)
}

/// Copy a clean nested LOB's remote bytes into this locator block by block,
/// without materializing the whole value locally. Binary columns only: the
/// length clamp and the truncation count are in bytes. Character copies go
/// through [`materialize_from_remote`] so both stay in characters.
async fn flush_remote_copy<S: LocatorService>(
    locator: &mut LobLocator,
    nested: &mut UpdatableLob,
    block_size: usize,
    remote: &mut S,
) -> Result<u64> {
    let total = nested.locator_mut().length(remote).await?;
    let max = locator.max_length();
    let kept = total.min(max);
    if kept == 0 {
        locator.write(remote, 0, &[], true).await?;
        return Ok(total);
    }
    let mut offset = 0u64;
    while offset < kept {
        let take = (block_size as u64).min(kept - offset);
        let chunk = nested.locator_mut().read(remote, offset, take).await?;
        if chunk.is_empty() {
            return Err(Error::remote_io(format!(
                "remote read returned no data at offset {offset}"
            )));
        }
        let end = offset + chunk.len() as u64;
        locator.write(remote, offset, &chunk, end >= kept).await?;
        offset = end;
    }
    Ok(total - kept)
}

/// Stream a clean binary LOB's remote bytes as bounded chunks.
///
/// The locator is snapshotted for the stream's lifetime; borrowing the
/// service keeps other remote traffic out until the stream is dropped.
pub(crate) fn read_binary_chunks<S: LocatorService>(
    locator: LobLocator,
    total: u64,
    block_size: usize,
    remote: &mut S,
) -> impl Stream<Item = Result<Bytes>> + '_ {
    stream::unfold((remote, 0u64), move |(remote, offset)| {
        let locator = locator.clone();
        async move {
            if offset >= total {
                return None;
            }
            let take = (block_size as u64).min(total - offset);
            match locator.read(remote, offset, take).await {
                Ok(chunk) if chunk.is_empty() => Some((
                    Err(Error::remote_io(format!(
                        "remote read returned no data at offset {offset}"
                    ))),
                    (remote, total),
                )),
                Ok(chunk) => {
                    let next = offset + chunk.len() as u64;
                    Some((Ok(chunk), (remote, next)))
                }
                Err(e) => Some((Err(e), (remote, total))),
            }
        }
    })
}

struct CharChunkState {
    offset: u64,
    assembler: Utf8Assembler,
    done: bool,
}

/// Stream a clean character LOB as decoded text chunks.
///
/// UTF-8 host data may split a character at a block boundary; the dangling
/// bytes carry into the next chunk, and a tail left at end of object is an
/// error. A chunk that completes no character yields an empty string.
pub(crate) fn read_character_chunks<S: LocatorService>(
    locator: LobLocator,
    total: u64,
    converter: Converter,
    block_size: usize,
    remote: &mut S,
) -> impl Stream<Item = Result<String>> + '_ {
    let state = CharChunkState {
        offset: 0,
        assembler: Utf8Assembler::new(),
        done: false,
    };
    stream::unfold((remote, state), move |(remote, mut state)| {
        let locator = locator.clone();
        async move {
            if state.done {
                return None;
            }
            if state.offset >= total {
                state.done = true;
                return match state.assembler.finish() {
                    Ok(()) => None,
                    Err(e) => Some((Err(e), (remote, state))),
                };
            }
            let take = (block_size as u64).min(total - state.offset);
            let chunk = match locator.read(remote, state.offset, take).await {
                Ok(chunk) if chunk.is_empty() => {
                    let offset = state.offset;
                    state.done = true;
                    return Some((
                        Err(Error::remote_io(format!(
                            "remote read returned no data at offset {offset}"
                        ))),
                        (remote, state),
                    ));
                }
                Ok(chunk) => chunk,
                Err(e) => {
                    state.done = true;
                    return Some((Err(e), (remote, state)));
                }
            };
            state.offset += chunk.len() as u64;
            let decoded = match converter {
                Converter::Utf8 => state.assembler.push(&chunk),
                Converter::Ebcdic037 => converter.decode(&chunk),
            };
            match decoded {
                Ok(text) => Some((Ok(text), (remote, state))),
                Err(e) => {
                    state.done = true;
                    Some((Err(e), (remote, state)))
                }
            }
        }
    })
}
