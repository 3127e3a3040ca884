//! Frame encoder and decoder
//!
//! Binary layout, all integers big-endian:
//!
//! ```text
//! frame      := u32 length | u8 marker | body
//! marker     0x01 - Subscribe (interest)
//!            0x02 - Notification (change notification)
//!            0x03 - Heartbeat (empty body)
//!            0x04 - Register (instance record)
//!            0x05 - Unregister (instance record)
//! interest   := u8 kind [string]          kinds: 0 all, 1 none, 2 app,
//!                                                3 vip, 4 same-app
//! change     := u8 kind ...               kinds: 0 add(record),
//!                                                1 modify(old, new),
//!                                                2 delete(record),
//!                                                3 sentinel
//! record     := string id | string app | u8 has_vip [string vip]
//!             | u8 status | u64 version
//!             | u16 n_addrs {string addr} | u16 n_meta {string k, string v}
//! string     := u16 length | UTF-8 bytes
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::registry::{
    ChangeNotification, HealthStatus, InstanceRecord, Interest,
};

// Frame type markers
const MARKER_SUBSCRIBE: u8 = 0x01;
const MARKER_NOTIFICATION: u8 = 0x02;
const MARKER_HEARTBEAT: u8 = 0x03;
const MARKER_REGISTER: u8 = 0x04;
const MARKER_UNREGISTER: u8 = 0x05;

// Interest kinds
const INTEREST_ALL: u8 = 0x00;
const INTEREST_NONE: u8 = 0x01;
const INTEREST_APPLICATION: u8 = 0x02;
const INTEREST_VIP: u8 = 0x03;
const INTEREST_SAME_APPLICATION: u8 = 0x04;

// Notification kinds
const CHANGE_ADD: u8 = 0x00;
const CHANGE_MODIFY: u8 = 0x01;
const CHANGE_DELETE: u8 = 0x02;
const CHANGE_SENTINEL: u8 = 0x03;

/// Maximum accepted frame payload size
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A single wire frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Open a subscription with the given interest
    Subscribe(Interest),
    /// One registry change (or snapshot sentinel)
    Notification(ChangeNotification),
    /// Keep-alive
    Heartbeat,
    /// Register an instance (write path)
    Register(InstanceRecord),
    /// Unregister an instance (write path)
    Unregister(InstanceRecord),
}

/// Error type for frame decoding
#[derive(Debug, Clone)]
pub enum FrameError {
    /// Ran out of bytes mid-value
    UnexpectedEof,
    /// Unknown frame or variant marker
    UnknownMarker(u8),
    /// String field was not valid UTF-8
    InvalidUtf8,
    /// Address field did not parse as a socket address
    BadAddress(String),
    /// Declared frame length exceeds [`MAX_FRAME_SIZE`]
    FrameTooLarge(usize),
    /// String field exceeds the u16 length prefix
    StringTooLong(usize),
    /// Bytes left over after a complete frame
    TrailingBytes(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::UnexpectedEof => write!(f, "unexpected end of frame"),
            FrameError::UnknownMarker(m) => write!(f, "unknown marker: 0x{:02x}", m),
            FrameError::InvalidUtf8 => write!(f, "invalid UTF-8 in string field"),
            FrameError::BadAddress(s) => write!(f, "unparseable address: {}", s),
            FrameError::FrameTooLarge(n) => write!(f, "frame too large: {} bytes", n),
            FrameError::StringTooLong(n) => write!(f, "string too long: {} bytes", n),
            FrameError::TrailingBytes(n) => write!(f, "{} trailing bytes after frame", n),
        }
    }
}

impl std::error::Error for FrameError {}

/// Encode a frame (marker + body, without the length prefix)
pub fn encode_frame(frame: &Frame, buf: &mut BytesMut) -> Result<(), FrameError> {
    match frame {
        Frame::Subscribe(interest) => {
            buf.put_u8(MARKER_SUBSCRIBE);
            encode_interest(interest, buf)?;
        }
        Frame::Notification(notification) => {
            buf.put_u8(MARKER_NOTIFICATION);
            encode_notification(notification, buf)?;
        }
        Frame::Heartbeat => buf.put_u8(MARKER_HEARTBEAT),
        Frame::Register(record) => {
            buf.put_u8(MARKER_REGISTER);
            encode_record(record, buf)?;
        }
        Frame::Unregister(record) => {
            buf.put_u8(MARKER_UNREGISTER);
            encode_record(record, buf)?;
        }
    }
    Ok(())
}

/// Decode a complete frame payload
pub fn decode_frame(buf: &mut Bytes) -> Result<Frame, FrameError> {
    if buf.is_empty() {
        return Err(FrameError::UnexpectedEof);
    }
    let marker = buf.get_u8();
    let frame = match marker {
        MARKER_SUBSCRIBE => Frame::Subscribe(decode_interest(buf)?),
        MARKER_NOTIFICATION => Frame::Notification(decode_notification(buf)?),
        MARKER_HEARTBEAT => Frame::Heartbeat,
        MARKER_REGISTER => Frame::Register(decode_record(buf)?),
        MARKER_UNREGISTER => Frame::Unregister(decode_record(buf)?),
        other => return Err(FrameError::UnknownMarker(other)),
    };
    if buf.has_remaining() {
        return Err(FrameError::TrailingBytes(buf.remaining()));
    }
    Ok(frame)
}

fn encode_interest(interest: &Interest, buf: &mut BytesMut) -> Result<(), FrameError> {
    match interest {
        Interest::All => buf.put_u8(INTEREST_ALL),
        Interest::None => buf.put_u8(INTEREST_NONE),
        Interest::Application(app) => {
            buf.put_u8(INTEREST_APPLICATION);
            put_string(buf, app)?;
        }
        Interest::VirtualIp(vip) => {
            buf.put_u8(INTEREST_VIP);
            put_string(buf, vip)?;
        }
        Interest::SameApplication(app) => {
            buf.put_u8(INTEREST_SAME_APPLICATION);
            put_string(buf, app)?;
        }
    }
    Ok(())
}

fn decode_interest(buf: &mut Bytes) -> Result<Interest, FrameError> {
    if buf.is_empty() {
        return Err(FrameError::UnexpectedEof);
    }
    match buf.get_u8() {
        INTEREST_ALL => Ok(Interest::All),
        INTEREST_NONE => Ok(Interest::None),
        INTEREST_APPLICATION => Ok(Interest::Application(get_string(buf)?)),
        INTEREST_VIP => Ok(Interest::VirtualIp(get_string(buf)?)),
        INTEREST_SAME_APPLICATION => Ok(Interest::SameApplication(get_string(buf)?)),
        other => Err(FrameError::UnknownMarker(other)),
    }
}

fn encode_notification(
    notification: &ChangeNotification,
    buf: &mut BytesMut,
) -> Result<(), FrameError> {
    match notification {
        ChangeNotification::Add(record) => {
            buf.put_u8(CHANGE_ADD);
            encode_record(record, buf)?;
        }
        ChangeNotification::Modify { old, new } => {
            buf.put_u8(CHANGE_MODIFY);
            encode_record(old, buf)?;
            encode_record(new, buf)?;
        }
        ChangeNotification::Delete(record) => {
            buf.put_u8(CHANGE_DELETE);
            encode_record(record, buf)?;
        }
        ChangeNotification::BufferSentinel => buf.put_u8(CHANGE_SENTINEL),
    }
    Ok(())
}

fn decode_notification(buf: &mut Bytes) -> Result<ChangeNotification, FrameError> {
    if buf.is_empty() {
        return Err(FrameError::UnexpectedEof);
    }
    match buf.get_u8() {
        CHANGE_ADD => Ok(ChangeNotification::Add(decode_record(buf)?)),
        CHANGE_MODIFY => Ok(ChangeNotification::Modify {
            old: decode_record(buf)?,
            new: decode_record(buf)?,
        }),
        CHANGE_DELETE => Ok(ChangeNotification::Delete(decode_record(buf)?)),
        CHANGE_SENTINEL => Ok(ChangeNotification::BufferSentinel),
        other => Err(FrameError::UnknownMarker(other)),
    }
}

fn encode_record(record: &InstanceRecord, buf: &mut BytesMut) -> Result<(), FrameError> {
    put_string(buf, record.id.as_str())?;
    put_string(buf, &record.app)?;
    match record.vip {
        Some(ref vip) => {
            buf.put_u8(1);
            put_string(buf, vip)?;
        }
        None => buf.put_u8(0),
    }
    buf.put_u8(encode_status(record.status));
    buf.put_u64(record.version);

    if record.addresses.len() > u16::MAX as usize {
        return Err(FrameError::StringTooLong(record.addresses.len()));
    }
    buf.put_u16(record.addresses.len() as u16);
    for addr in &record.addresses {
        put_string(buf, &addr.to_string())?;
    }

    if record.metadata.len() > u16::MAX as usize {
        return Err(FrameError::StringTooLong(record.metadata.len()));
    }
    buf.put_u16(record.metadata.len() as u16);
    // Deterministic encoding order
    let mut keys: Vec<&String> = record.metadata.keys().collect();
    keys.sort();
    for key in keys {
        put_string(buf, key)?;
        put_string(buf, &record.metadata[key])?;
    }
    Ok(())
}

fn decode_record(buf: &mut Bytes) -> Result<InstanceRecord, FrameError> {
    let id = get_string(buf)?;
    let app = get_string(buf)?;
    let mut record = InstanceRecord::new(id, app);

    if buf.remaining() < 1 {
        return Err(FrameError::UnexpectedEof);
    }
    if buf.get_u8() == 1 {
        record = record.vip(get_string(buf)?);
    }

    if buf.remaining() < 9 {
        return Err(FrameError::UnexpectedEof);
    }
    record = record.status(decode_status(buf.get_u8())?);
    record = record.version(buf.get_u64());

    if buf.remaining() < 2 {
        return Err(FrameError::UnexpectedEof);
    }
    let n_addrs = buf.get_u16();
    for _ in 0..n_addrs {
        let raw = get_string(buf)?;
        let addr = raw.parse().map_err(|_| FrameError::BadAddress(raw))?;
        record = record.address(addr);
    }

    if buf.remaining() < 2 {
        return Err(FrameError::UnexpectedEof);
    }
    let n_meta = buf.get_u16();
    for _ in 0..n_meta {
        let key = get_string(buf)?;
        let value = get_string(buf)?;
        record = record.metadata(key, value);
    }
    Ok(record)
}

fn encode_status(status: HealthStatus) -> u8 {
    match status {
        HealthStatus::Up => 0,
        HealthStatus::Down => 1,
        HealthStatus::Starting => 2,
        HealthStatus::OutOfService => 3,
        HealthStatus::Unknown => 4,
    }
}

fn decode_status(raw: u8) -> Result<HealthStatus, FrameError> {
    match raw {
        0 => Ok(HealthStatus::Up),
        1 => Ok(HealthStatus::Down),
        2 => Ok(HealthStatus::Starting),
        3 => Ok(HealthStatus::OutOfService),
        4 => Ok(HealthStatus::Unknown),
        other => Err(FrameError::UnknownMarker(other)),
    }
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), FrameError> {
    if s.len() > u16::MAX as usize {
        return Err(FrameError::StringTooLong(s.len()));
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_string(buf: &mut Bytes) -> Result<String, FrameError> {
    if buf.remaining() < 2 {
        return Err(FrameError::UnexpectedEof);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(FrameError::UnexpectedEof);
    }
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::InvalidUtf8)
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> crate::error::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut payload = BytesMut::new();
    encode_frame(frame, &mut payload)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(payload.len()).into());
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame
///
/// A cleanly closed connection (EOF at a frame boundary) surfaces as
/// [`Error::ConnectionClosed`]; a payload that fails to decode surfaces as
/// [`Error::Frame`] with the stream still positioned at the next frame.
///
/// [`Error::ConnectionClosed`]: crate::error::Error::ConnectionClosed
/// [`Error::Frame`]: crate::error::Error::Frame
pub async fn read_frame<R>(reader: &mut R) -> crate::error::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(crate::error::Error::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    };
    if len == 0 {
        return Err(FrameError::FrameTooLarge(len).into());
    }
    if len > MAX_FRAME_SIZE {
        // Drain the declared payload so the stream stays at a frame
        // boundary and only this frame is lost.
        let mut sink = tokio::io::sink();
        tokio::io::copy(&mut reader.take(len as u64), &mut sink).await?;
        return Err(FrameError::FrameTooLarge(len).into());
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let mut bytes = Bytes::from(payload);
    Ok(decode_frame(&mut bytes)?)
}
