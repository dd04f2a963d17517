/// PPU register translation
///
/// Maps GDB register numbers to fields of the PPU register file. The numbering
/// and widths come from GDB's PowerPC-64 feature description
/// (`gdb/features/rs6000/powerpc-64.c`) and must not change.

use thiserror::Error;

use crate::parser::{parse_hex_u32, parse_hex_u64, u32_to_padded_hex, u64_to_padded_hex};

/// Number of registers exchanged by `g`/`G` (ids 0..=70)
pub const REGISTER_COUNT: u32 = 71;

pub const FPR_BASE: u32 = 32;
pub const PC: u32 = 64;
pub const MSR: u32 = 65;
pub const CR: u32 = 66;
pub const LR: u32 = 67;
pub const CTR: u32 = 68;
pub const XER: u32 = 69;
pub const FPSCR: u32 = 70;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegisterError {
    #[error("Wrong register id {0}")]
    UnknownRegister(u32),
    #[error("Invalid value {value:?} for register {id}")]
    InvalidValue { id: u32, value: String },
    #[error("Register payload too short: expected {expected} hex digits, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, RegisterError>;

/// Snapshot of the PPU registers visible to the debugger
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PpuRegisters {
    pub gpr: [u64; 32],
    pub fpr: [f64; 32],
    /// Current instruction address
    pub cia: u32,
    /// Condition register, packed
    pub cr: u32,
    pub lr: u64,
    pub ctr: u64,
}

/// Bytes occupied by a register on the wire, 0 for unknown ids
pub fn register_byte_width(id: u32) -> usize {
    match id {
        CR | XER | FPSCR => 4,
        id if id >= REGISTER_COUNT => 0,
        _ => 8,
    }
}

/// Whether a register is reported as "value not available"
pub fn is_placeholder(id: u32) -> bool {
    matches!(id, MSR | XER | FPSCR)
}

/// Render one register as big-endian hex; `None` for unknown ids
pub fn get_register(regs: &PpuRegisters, id: u32) -> Option<String> {
    let value = match id {
        PC => u64_to_padded_hex(u64::from(regs.cia)),
        CR => u32_to_padded_hex(regs.cr),
        LR => u64_to_padded_hex(regs.lr),
        CTR => u64_to_padded_hex(regs.ctr),
        MSR | XER | FPSCR => "x".repeat(register_byte_width(id) * 2),
        0..=31 => u64_to_padded_hex(regs.gpr[id as usize]),
        FPR_BASE..=63 => u64_to_padded_hex(regs.fpr[(id - FPR_BASE) as usize].to_bits()),
        _ => return None,
    };
    Some(value)
}

/// Store one register from its hex text; placeholders accept anything
pub fn set_register(regs: &mut PpuRegisters, id: u32, value: &str) -> Result<()> {
    if id >= REGISTER_COUNT {
        return Err(RegisterError::UnknownRegister(id));
    }
    if is_placeholder(id) {
        return Ok(());
    }

    let invalid = || RegisterError::InvalidValue {
        id,
        value: value.to_string(),
    };

    match id {
        CR => regs.cr = parse_hex_u32(value).ok_or_else(invalid)?,
        PC => {
            // the PPU instruction address is 32 bits wide
            regs.cia = parse_hex_u64(value).ok_or_else(invalid)? as u32;
        }
        LR => regs.lr = parse_hex_u64(value).ok_or_else(invalid)?,
        CTR => regs.ctr = parse_hex_u64(value).ok_or_else(invalid)?,
        FPR_BASE..=63 => {
            let bits = parse_hex_u64(value).ok_or_else(invalid)?;
            regs.fpr[(id - FPR_BASE) as usize] = f64::from_bits(bits);
        }
        _ => regs.gpr[id as usize] = parse_hex_u64(value).ok_or_else(invalid)?,
    }
    Ok(())
}

/// Concatenation of every register, in id order, as sent for `g`
pub fn read_all_registers(regs: &PpuRegisters) -> String {
    let mut out = String::with_capacity(68 * 16 + 3 * 8);
    for id in 0..REGISTER_COUNT {
        if let Some(value) = get_register(regs, id) {
            out.push_str(&value);
        }
    }
    out
}

/// Consume a `G` payload; nothing is stored unless every register parses
pub fn write_all_registers(regs: &mut PpuRegisters, payload: &str) -> Result<()> {
    let expected: usize = (0..REGISTER_COUNT).map(|id| register_byte_width(id) * 2).sum();
    if payload.len() < expected || !payload.is_ascii() {
        return Err(RegisterError::Truncated {
            expected,
            actual: payload.len(),
        });
    }

    let mut updated = *regs;
    let mut offset = 0;
    for id in 0..REGISTER_COUNT {
        let width = register_byte_width(id) * 2;
        set_register(&mut updated, id, &payload[offset..offset + width])?;
        offset += width;
    }
    *regs = updated;
    Ok(())
}
