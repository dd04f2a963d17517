/// RSP packet codec
///
/// Framing (`$payload#xx`), `}` escaping, the modulo-256 checksum and the
/// single-character acknowledgment protocol, over any async byte stream.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::types::{Command, INTERRUPT};

const PACKET_START: u8 = b'$';
const PACKET_END: u8 = b'#';
const ESCAPE: u8 = b'}';
const ESCAPE_XOR: u8 = 0x20;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Wrong checksum for packet: declared {declared:02x}, computed {computed:02x}")]
    Checksum { declared: u8, computed: u8 },
    #[error("Expected start of packet character '$', got {0:?} instead")]
    UnexpectedByte(char),
    #[error("Invalid checksum digits {0:?}")]
    InvalidChecksum(String),
    #[error("Wrong acknowledge character received: {0:?}")]
    UnexpectedAck(char),
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl PacketError {
    /// Checksum mismatches are answered with a NACK; everything else drops the client
    pub fn is_checksum(&self) -> bool {
        matches!(self, PacketError::Checksum { .. })
    }
}

pub type Result<T> = std::result::Result<T, PacketError>;

/// Read and verify one packet from the stream
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Command> {
    let mut c = reader.read_u8().await?;

    if c == INTERRUPT {
        return Ok(Command::interrupt());
    }

    if c != PACKET_START {
        // gdb prefixes the very first packet with a stray ack
        if c == b'+' {
            c = reader.read_u8().await?;
        }
        if c != PACKET_START {
            return Err(PacketError::UnexpectedByte(char::from(c)));
        }
    }

    let mut cmd = String::new();
    let mut data = String::new();
    let mut cmd_part = true;
    let mut checksum: u8 = 0;

    loop {
        let mut c = reader.read_u8().await?;
        if c == PACKET_END {
            break;
        }

        checksum = checksum.wrapping_add(c);
        if c == ESCAPE {
            c = reader.read_u8().await? ^ ESCAPE_XOR;
            checksum = checksum.wrapping_add(c);
        }

        if cmd_part && matches!(c, b':' | b'.' | b';') {
            cmd_part = false;
        }

        if cmd_part {
            let first = cmd.is_empty();
            cmd.push(char::from(c));
            // only q and v commands have multi-character keywords
            if first && c != b'q' && c != b'v' {
                cmd_part = false;
            }
        } else {
            data.push(char::from(c));
        }
    }

    let declared = read_hex_byte(reader).await?;
    if declared != checksum {
        return Err(PacketError::Checksum {
            declared,
            computed: checksum,
        });
    }

    Ok(Command {
        cmd,
        data,
        checksum: declared,
    })
}

/// Frame a reply payload, escaping `#`, `$` and `}`
pub fn encode_packet(body: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 4);
    let mut checksum: u8 = 0;

    out.push(PACKET_START);
    for &b in body.as_bytes() {
        if matches!(b, PACKET_END | PACKET_START | ESCAPE) {
            out.push(ESCAPE);
            out.push(b ^ ESCAPE_XOR);
            checksum = checksum.wrapping_add(ESCAPE).wrapping_add(b);
        } else {
            out.push(b);
            checksum = checksum.wrapping_add(b);
        }
    }
    out.push(PACKET_END);
    out.extend_from_slice(format!("{:02x}", checksum).as_bytes());
    out
}

/// Read the client's `+`/`-` answer to a packet we sent
pub async fn read_ack<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool> {
    match reader.read_u8().await? {
        b'+' => Ok(true),
        b'-' => Ok(false),
        other => Err(PacketError::UnexpectedAck(char::from(other))),
    }
}

async fn read_hex_byte<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8> {
    let mut digits = [0u8; 2];
    reader.read_exact(&mut digits).await?;
    let text: String = digits.iter().map(|&b| char::from(b)).collect();
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(PacketError::InvalidChecksum(text));
    }
    u8::from_str_radix(&text, 16).map_err(|_| PacketError::InvalidChecksum(text))
}

pub fn to_hex_byte(value: u8) -> String {
    format!("{:02x}", value)
}

pub fn u32_to_padded_hex(value: u32) -> String {
    format!("{:08x}", value)
}

pub fn u64_to_padded_hex(value: u64) -> String {
    format!("{:016x}", value)
}

/// Parse an unprefixed hex number; rejects empty input and signs
pub fn parse_hex_u32(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(text, 16).ok()
}

pub fn parse_hex_u64(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(text, 16).ok()
}
