//! Numeric domains for host/guest integer transport.
//!
//! A [`NumericDomain`] names the signedness and width under which an integer
//! crosses the host/guest boundary. Ranges are expressed as `i128`, which
//! holds every value of all four domains exactly.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Signedness and bit width of an integer at the host/guest boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericDomain {
    /// `[-2^31, 2^31 - 1]`, carried as Wasm `i32`.
    SignedInt32,
    /// `[0, 2^32 - 1]`, carried as Wasm `i32`.
    UnsignedInt32,
    /// `[-2^63, 2^63 - 1]`, carried as Wasm `i64`.
    SignedInt64,
    /// `[0, 2^64 - 1]`, carried as Wasm `i64`.
    UnsignedInt64,
}

/// The Wasm value type a domain travels as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmIntType {
    I32,
    I64,
}

impl fmt::Display for WasmIntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WasmIntType::I32 => write!(f, "i32"),
            WasmIntType::I64 => write!(f, "i64"),
        }
    }
}

impl NumericDomain {
    /// All domains, narrowest first.
    pub const ALL: [NumericDomain; 4] = [
        NumericDomain::SignedInt32,
        NumericDomain::UnsignedInt32,
        NumericDomain::SignedInt64,
        NumericDomain::UnsignedInt64,
    ];

    /// Smallest representable value.
    pub const fn min(self) -> i128 {
        match self {
            NumericDomain::SignedInt32 => i32::MIN as i128,
            NumericDomain::SignedInt64 => i64::MIN as i128,
            NumericDomain::UnsignedInt32 | NumericDomain::UnsignedInt64 => 0,
        }
    }

    /// Largest representable value.
    pub const fn max(self) -> i128 {
        match self {
            NumericDomain::SignedInt32 => i32::MAX as i128,
            NumericDomain::UnsignedInt32 => u32::MAX as i128,
            NumericDomain::SignedInt64 => i64::MAX as i128,
            NumericDomain::UnsignedInt64 => u64::MAX as i128,
        }
    }

    /// Returns `true` if `value` is representable in this domain.
    pub const fn contains(self, value: i128) -> bool {
        value >= self.min() && value <= self.max()
    }

    pub const fn bit_width(self) -> u32 {
        match self {
            NumericDomain::SignedInt32 | NumericDomain::UnsignedInt32 => 32,
            NumericDomain::SignedInt64 | NumericDomain::UnsignedInt64 => 64,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, NumericDomain::SignedInt32 | NumericDomain::SignedInt64)
    }

    /// The Wasm value type used for arguments and results in this domain.
    pub const fn wasm_type(self) -> WasmIntType {
        match self.bit_width() {
            32 => WasmIntType::I32,
            _ => WasmIntType::I64,
        }
    }
}

impl fmt::Display for NumericDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.is_signed() { 's' } else { 'u' };
        write!(f, "{sign}{}", self.bit_width())
    }
}
