use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// VME address modifiers used by readout stacks.
pub mod amods {
    pub const A16: u8 = 0x29;
    pub const A16_PRIV: u8 = 0x2d;
    pub const A24: u8 = 0x39;
    pub const A24_PRIV: u8 = 0x3d;
    pub const A32: u8 = 0x09;
    pub const A32_PRIV: u8 = 0x0d;

    pub const A24_BLT: u8 = 0x3b;
    pub const A24_BLT_PRIV: u8 = 0x3f;
    pub const A24_MBLT: u8 = 0x38;
    pub const A24_MBLT_PRIV: u8 = 0x3c;
    pub const BLT32: u8 = 0x0b;
    pub const BLT32_PRIV: u8 = 0x0f;
    pub const MBLT64: u8 = 0x08;
    pub const MBLT64_PRIV: u8 = 0x0c;
    pub const VME_2ESST64: u8 = 0x20;
}

/// Whether `amod` selects a block transfer (BLT, MBLT, 2eSST).
///
/// The controller encodes single and block reads with the same opcode, so
/// this classification decides how a read is interpreted.
pub fn is_block_amod(amod: u8) -> bool {
    matches!(
        amod,
        amods::A24_BLT
            | amods::A24_BLT_PRIV
            | amods::A24_MBLT
            | amods::A24_MBLT_PRIV
            | amods::BLT32
            | amods::BLT32_PRIV
            | amods::MBLT64
            | amods::MBLT64_PRIV
            | amods::VME_2ESST64
    )
}

pub fn is_mblt_amod(amod: u8) -> bool {
    matches!(
        amod,
        amods::MBLT64 | amods::MBLT64_PRIV | amods::A24_MBLT | amods::A24_MBLT_PRIV
    )
}

/// Resolve a symbolic address modifier such as `a32` or `mblt64`.
pub fn amod_from_name(name: &str) -> Option<u8> {
    let amod = match name.to_ascii_lowercase().as_str() {
        "a16" => amods::A16,
        "a24" => amods::A24,
        "a32" => amods::A32,
        "blt" | "blt32" => amods::BLT32,
        "mblt" | "mblt64" => amods::MBLT64,
        "a24_blt" => amods::A24_BLT,
        "a24_mblt" => amods::A24_MBLT,
        "2esst" | "2esst64" => amods::VME_2ESST64,
        _ => return None,
    };
    Some(amod)
}

/// Width of a single-cycle VME transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataWidth {
    D16,
    D32,
}

impl DataWidth {
    /// Value stored in the command's width field.
    pub fn code(self) -> u16 {
        match self {
            DataWidth::D16 => 0x1,
            DataWidth::D32 => 0x2,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x1 => Some(DataWidth::D16),
            0x2 => Some(DataWidth::D32),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataWidth::D16 => "d16",
            DataWidth::D32 => "d32",
        }
    }
}

impl fmt::Display for DataWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataWidth {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "d16" | "16" => Ok(DataWidth::D16),
            "d32" | "32" => Ok(DataWidth::D32),
            _ => Err(()),
        }
    }
}
