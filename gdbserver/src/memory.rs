/// Breakpoint and guest memory bridge
///
/// Parses `m`/`M`/`Z`/`z` request bodies and forwards them to the emulation core,
/// turning its failure modes into distinct error kinds.

use thiserror::Error;

use crate::parser::{parse_hex_u32, to_hex_byte};
use crate::target::{AddressSpace, BreakpointTable};
use crate::types::Access;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Malformed memory request {0:?}")]
    Malformed(String),
    #[error("Nothing readable at {0:#x}")]
    NothingRead(u32),
    #[error("Address {0:#x} is not writable")]
    Unwritable(u32),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

/// Decoded body of a `Z`/`z` packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointRequest {
    /// Type 0 at a plain address
    Software(u32),
    /// Type 0 carrying a condition list, which is not supported
    Conditional,
    /// Type 0 whose address does not parse
    Malformed,
    /// Hardware breakpoints and watchpoints
    Unsupported,
}

/// Parse `addr,len`
pub fn parse_read_request(data: &str) -> Result<(u32, u32)> {
    let malformed = || MemoryError::Malformed(data.to_string());
    let (addr, len) = data.split_once(',').ok_or_else(malformed)?;
    Ok((
        parse_hex_u32(addr).ok_or_else(malformed)?,
        parse_hex_u32(len).ok_or_else(malformed)?,
    ))
}

/// Parse `addr,len:XX...`, checking the payload holds `len` bytes
pub fn parse_write_request(data: &str) -> Result<(u32, Vec<u8>)> {
    let malformed = || MemoryError::Malformed(data.to_string());
    let (header, payload) = data.split_once(':').ok_or_else(malformed)?;
    let (addr, len) = header.split_once(',').ok_or_else(malformed)?;
    let addr = parse_hex_u32(addr).ok_or_else(malformed)?;
    let len = parse_hex_u32(len).ok_or_else(malformed)? as usize;

    if !payload.is_ascii() || payload.len() < len * 2 {
        return Err(malformed());
    }
    let bytes = (0..len)
        .map(|i| u8::from_str_radix(&payload[i * 2..i * 2 + 2], 16))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map_err(|_| malformed())?;
    Ok((addr, bytes))
}

/// Read up to `len` bytes, stopping at the first unreadable address.
/// A short read is a valid reply; reading nothing at all is not.
pub fn read_memory<A: AddressSpace + ?Sized>(space: &A, addr: u32, len: u32) -> Result<String> {
    let mut result = String::with_capacity(len as usize * 2);
    for offset in 0..len {
        let Some(current) = addr.checked_add(offset) else {
            break;
        };
        if !space.is_addr_valid(current, Access::Read) {
            break;
        }
        result.push_str(&to_hex_byte(space.read_byte(current)));
    }

    if len > 0 && result.is_empty() {
        return Err(MemoryError::NothingRead(addr));
    }
    Ok(result)
}

/// Write byte by byte; the first unwritable address aborts, earlier bytes stay written
pub fn write_memory<A: AddressSpace + ?Sized>(space: &A, addr: u32, bytes: &[u8]) -> Result<()> {
    for (offset, &value) in bytes.iter().enumerate() {
        let current = u32::try_from(offset)
            .ok()
            .and_then(|offset| addr.checked_add(offset))
            .ok_or(MemoryError::Unwritable(addr))?;
        if !space.is_addr_valid(current, Access::Write) {
            return Err(MemoryError::Unwritable(current));
        }
        space.write_byte(current, value);
    }
    Ok(())
}

/// Parse the body of a `Z` packet
pub fn parse_set_breakpoint(data: &str) -> BreakpointRequest {
    if !data.starts_with('0') {
        return BreakpointRequest::Unsupported;
    }
    if data.contains(';') {
        return BreakpointRequest::Conditional;
    }
    parse_software_address(data)
}

/// Parse the body of a `z` packet; a trailing condition list is ignored
pub fn parse_remove_breakpoint(data: &str) -> BreakpointRequest {
    if !data.starts_with('0') {
        return BreakpointRequest::Unsupported;
    }
    parse_software_address(data)
}

fn parse_software_address(data: &str) -> BreakpointRequest {
    let address = data
        .strip_prefix("0,")
        .and_then(|rest| rest.split(|c: char| c == ',' || c == ';').next())
        .and_then(parse_hex_u32);
    match address {
        Some(addr) => BreakpointRequest::Software(addr),
        None => BreakpointRequest::Malformed,
    }
}

pub fn set_breakpoint<B: BreakpointTable + ?Sized>(table: &B, addr: u32) {
    log::debug!("Adding breakpoint at {:#x}", addr);
    table.add_breakpoint(addr);
}

pub fn remove_breakpoint<B: BreakpointTable + ?Sized>(table: &B, addr: u32) {
    log::debug!("Removing breakpoint at {:#x}", addr);
    table.remove_breakpoint(addr);
}
