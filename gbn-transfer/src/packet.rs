//! Wire-format definitions for transfer datagrams.
//!
//! Every datagram exchanged between the two peers is a [`Packet`].  This
//! module is responsible for:
//! - Defining the on-wire binary layout of each packet kind.
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed, truncated or corrupted input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  Every datagram starts with a
//! one-byte kind tag and ends with a 16-bit internet checksum (RFC 1071)
//! computed over everything before it.
//!
//! ```text
//!  +------+---------------------------------------------+----------+
//!  | kind |                    body                     | checksum |
//!  |  u8  |                                             |   u16    |
//!  +------+---------------------------------------------+----------+
//!
//!  REQUEST  block_size u32 | name_len u16 | name (UTF-8)
//!  REPLY    status i32     | file_size u64
//!  DATA     seq u32        | payload_len u16 | payload
//!  ACK      ack u32
//!  FIN      last_seq u32
//!  FIN_ACK  last_seq u32
//! ```

use std::fmt;

/// Kind tags placed in the first byte of every datagram.
pub mod kind {
    /// Receiver asks for a file.
    pub const REQUEST: u8 = 1;
    /// Sender answers a request with status and file size.
    pub const REPLY: u8 = 2;
    /// One block of file content.
    pub const DATA: u8 = 3;
    /// Cumulative acknowledgement.
    pub const ACK: u8 = 4;
    /// Sender has no more data; every block was acknowledged.
    pub const FIN: u8 = 5;
    /// Receiver confirms the end of the session.
    pub const FIN_ACK: u8 = 6;
}

/// Length of the kind tag.
pub const KIND_LEN: usize = 1;

/// Length of the trailing checksum.
pub const CHECKSUM_LEN: usize = 2;

/// Fixed overhead of a DATA datagram (kind + seq + payload_len + checksum).
pub const DATA_OVERHEAD: usize = KIND_LEN + 4 + 2 + CHECKSUM_LEN;

/// Largest payload a single DATA datagram can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Longest file name a REQUEST can carry.
pub const MAX_NAME_LEN: usize = 1024;

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// One numbered chunk of the transferred file.
///
/// Sequence numbers start at 1 and increase by one per block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn new(seq: u32, payload: Vec<u8>) -> Self {
        Self { seq, payload }
    }
}

// ---------------------------------------------------------------------------
// ReplyStatus
// ---------------------------------------------------------------------------

/// Outcome of a file request, carried in a REPLY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// File exists; `file_size` is valid.
    Ok,
    /// No such file on the sender.
    NotFound,
    /// The request itself was unacceptable (e.g. a zero block size).
    Rejected,
}

impl ReplyStatus {
    pub fn to_i32(self) -> i32 {
        match self {
            ReplyStatus::Ok => 0,
            ReplyStatus::NotFound => -1,
            ReplyStatus::Rejected => -2,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ReplyStatus::Ok),
            -1 => Some(ReplyStatus::NotFound),
            -2 => Some(ReplyStatus::Rejected),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// Discriminant of a [`Packet`], used for statistics and loss decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Request,
    Reply,
    Data,
    Ack,
    Fin,
    FinAck,
}

impl PacketKind {
    /// `true` for datagrams exchanged while the file is being transferred
    /// (as opposed to the session handshake).
    pub fn is_transfer(self) -> bool {
        matches!(self, PacketKind::Data | PacketKind::Ack)
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketKind::Request => "REQUEST",
            PacketKind::Reply => "REPLY",
            PacketKind::Data => "DATA",
            PacketKind::Ack => "ACK",
            PacketKind::Fin => "FIN",
            PacketKind::FinAck => "FIN-ACK",
        };
        f.write_str(name)
    }
}

/// A complete protocol datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Session request: the receiver wants `file_name` in `block_size` chunks.
    Request { file_name: String, block_size: u32 },
    /// Session reply; `file_size` is meaningful only when `status` is `Ok`.
    Reply { status: ReplyStatus, file_size: u64 },
    /// One block of file content.
    Data(Block),
    /// Cumulative acknowledgement: every block up to and including `ack`
    /// has been delivered in order.
    Ack { ack: u32 },
    /// End of session announced by the sender.
    Fin { last_seq: u32 },
    /// End of session confirmed by the receiver.
    FinAck { last_seq: u32 },
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Request { .. } => PacketKind::Request,
            Packet::Reply { .. } => PacketKind::Reply,
            Packet::Data(_) => PacketKind::Data,
            Packet::Ack { .. } => PacketKind::Ack,
            Packet::Fin { .. } => PacketKind::Fin,
            Packet::FinAck { .. } => PacketKind::FinAck,
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// Fails only when a variable-length field does not fit its length
    /// prefix.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut buf = Vec::with_capacity(self.encoded_len_hint());

        match self {
            Packet::Request {
                file_name,
                block_size,
            } => {
                if file_name.len() > MAX_NAME_LEN {
                    return Err(PacketError::NameTooLong(file_name.len()));
                }
                buf.push(kind::REQUEST);
                buf.extend_from_slice(&block_size.to_be_bytes());
                buf.extend_from_slice(&(file_name.len() as u16).to_be_bytes());
                buf.extend_from_slice(file_name.as_bytes());
            }
            Packet::Reply { status, file_size } => {
                buf.push(kind::REPLY);
                buf.extend_from_slice(&status.to_i32().to_be_bytes());
                buf.extend_from_slice(&file_size.to_be_bytes());
            }
            Packet::Data(block) => {
                if block.payload.len() > MAX_PAYLOAD {
                    return Err(PacketError::PayloadTooLarge(block.payload.len()));
                }
                buf.push(kind::DATA);
                buf.extend_from_slice(&block.seq.to_be_bytes());
                buf.extend_from_slice(&(block.payload.len() as u16).to_be_bytes());
                buf.extend_from_slice(&block.payload);
            }
            Packet::Ack { ack } => {
                buf.push(kind::ACK);
                buf.extend_from_slice(&ack.to_be_bytes());
            }
            Packet::Fin { last_seq } => {
                buf.push(kind::FIN);
                buf.extend_from_slice(&last_seq.to_be_bytes());
            }
            Packet::FinAck { last_seq } => {
                buf.push(kind::FIN_ACK);
                buf.extend_from_slice(&last_seq.to_be_bytes());
            }
        }

        let csum = internet_checksum(&buf);
        buf.extend_from_slice(&csum.to_be_bytes());
        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is too short to hold a kind tag and a checksum,
    /// - the checksum does not verify,
    /// - the kind tag is unknown,
    /// - a field is truncated or bytes are left over after the body, or
    /// - a field carries an invalid value (non-UTF-8 name, unknown status).
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < KIND_LEN + CHECKSUM_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let (covered, trailer) = buf.split_at(buf.len() - CHECKSUM_LEN);
        let stored = u16::from_be_bytes([trailer[0], trailer[1]]);
        if internet_checksum(covered) != stored {
            return Err(PacketError::ChecksumFailed);
        }

        let mut r = Reader::new(covered);
        let packet = match r.u8()? {
            kind::REQUEST => {
                let block_size = r.u32()?;
                let name_len = r.u16()? as usize;
                let name = r.bytes(name_len)?;
                let file_name = std::str::from_utf8(name)
                    .map_err(|_| PacketError::InvalidName)?
                    .to_owned();
                Packet::Request {
                    file_name,
                    block_size,
                }
            }
            kind::REPLY => {
                let raw = r.i32()?;
                let status = ReplyStatus::from_i32(raw).ok_or(PacketError::UnknownStatus(raw))?;
                let file_size = r.u64()?;
                Packet::Reply { status, file_size }
            }
            kind::DATA => {
                let seq = r.u32()?;
                let len = r.u16()? as usize;
                let payload = r.bytes(len)?.to_vec();
                Packet::Data(Block { seq, payload })
            }
            kind::ACK => Packet::Ack { ack: r.u32()? },
            kind::FIN => Packet::Fin {
                last_seq: r.u32()?,
            },
            kind::FIN_ACK => Packet::FinAck {
                last_seq: r.u32()?,
            },
            other => return Err(PacketError::UnknownKind(other)),
        };

        if !r.is_empty() {
            return Err(PacketError::LengthMismatch);
        }
        Ok(packet)
    }

    fn encoded_len_hint(&self) -> usize {
        let body = match self {
            Packet::Request { file_name, .. } => 4 + 2 + file_name.len(),
            Packet::Reply { .. } => 4 + 8,
            Packet::Data(block) => 4 + 2 + block.payload.len(),
            Packet::Ack { .. } | Packet::Fin { .. } | Packet::FinAck { .. } => 4,
        };
        KIND_LEN + body + CHECKSUM_LEN
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can arise when building or parsing a datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than a kind tag plus checksum.
    BufferTooShort,
    /// A field ran past the end of the buffer, or bytes were left over.
    LengthMismatch,
    /// Checksum did not match recomputed value.
    ChecksumFailed,
    /// First byte is not a known kind tag.
    UnknownKind(u8),
    /// REPLY status code outside the known set.
    UnknownStatus(i32),
    /// REQUEST file name is not valid UTF-8.
    InvalidName,
    /// File name longer than [`MAX_NAME_LEN`].
    NameTooLong(usize),
    /// Payload longer than [`MAX_PAYLOAD`].
    PayloadTooLarge(usize),
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::BufferTooShort => write!(f, "buffer too short to contain a packet"),
            PacketError::LengthMismatch => write!(f, "field lengths do not match buffer"),
            PacketError::ChecksumFailed => write!(f, "checksum verification failed"),
            PacketError::UnknownKind(k) => write!(f, "unknown packet kind {k}"),
            PacketError::UnknownStatus(s) => write!(f, "unknown reply status {s}"),
            PacketError::InvalidName => write!(f, "file name is not valid UTF-8"),
            PacketError::NameTooLong(n) => write!(f, "file name of {n} bytes is too long"),
            PacketError::PayloadTooLarge(n) => write!(f, "payload of {n} bytes is too large"),
        }
    }
}

impl std::error::Error for PacketError {}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Bounds-checked big-endian cursor over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        let end = self.pos.checked_add(n).ok_or(PacketError::LengthMismatch)?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(PacketError::LengthMismatch)?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, PacketError> {
        self.array().map(u16::from_be_bytes)
    }

    fn u32(&mut self) -> Result<u32, PacketError> {
        self.array().map(u32::from_be_bytes)
    }

    fn i32(&mut self) -> Result<i32, PacketError> {
        self.array().map(i32::from_be_bytes)
    }

    fn u64(&mut self) -> Result<u64, PacketError> {
        self.array().map(u64::from_be_bytes)
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    // Odd trailing byte — pad with a zero byte on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}
