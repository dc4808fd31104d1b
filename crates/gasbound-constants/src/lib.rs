// SPDX-License-Identifier: AGPL-3.0

use lazy_static::lazy_static;
use num_bigint::BigUint;

/// Common EVM constants
pub const WORD_SIZE: usize = 32;
pub const WORD_BITS: u32 = 256;

/// Maximum stack depth for EVM execution
pub const MAX_STACK_DEPTH: usize = 1024;

lazy_static! {
    /// 2^256
    pub static ref WORD_MODULUS: BigUint = BigUint::from(1u8) << WORD_BITS;
    /// 2^256 - 1
    pub static ref WORD_MASK: BigUint = (BigUint::from(1u8) << WORD_BITS) - BigUint::from(1u8);
    /// 2^255, sign bit of a 256-bit word
    pub static ref SIGN_BIT: BigUint = BigUint::from(1u8) << (WORD_BITS - 1);
}

/// Gas tariffs (fixed part per instruction tier)
pub const GAS_ZERO: u64 = 0;
pub const GAS_JUMPDEST: u64 = 1;
pub const GAS_BASE: u64 = 2;
pub const GAS_VERYLOW: u64 = 3;
pub const GAS_LOW: u64 = 5;
pub const GAS_MID: u64 = 8;
pub const GAS_HIGH: u64 = 10;
pub const GAS_BALANCE: u64 = 400;
pub const GAS_EXTCODE: u64 = 700;
pub const GAS_BLOCKHASH: u64 = 20;

/// Storage
pub const GAS_SLOAD: u64 = 800;
pub const GAS_SSTORE_SET: u64 = 20_000;
pub const GAS_SSTORE_RESET: u64 = 5_000;

/// Dynamic components
pub const GAS_COPY: u64 = 3;
pub const GAS_COPY_WORD: u64 = 3;
pub const GAS_SHA3: u64 = 30;
pub const GAS_SHA3_WORD: u64 = 6;
pub const GAS_LOG: u64 = 375;
pub const GAS_LOG_TOPIC: u64 = 375;
pub const GAS_LOG_DATA: u64 = 8;
pub const GAS_EXP: u64 = 10;
pub const GAS_EXP_BYTE: u64 = 50;

/// Calls, creates and self-destruct
pub const GAS_CALL: u64 = 700;
pub const GAS_CREATE: u64 = 32_000;
pub const GAS_SELFDESTRUCT: u64 = 5_000;

/// Cost charged for instructions whose effect is not modeled
pub const UNMODELED_GAS: u64 = 700;

/// Analysis defaults
pub const DEFAULT_SOLVER_TIMEOUT_MS: u32 = 10_000;
pub const DEFAULT_LOOP_BOUND: u64 = 1024;
pub const DEFAULT_GAS_STEP: u64 = 10_000;
pub const DEFAULT_MAX_DEPTH: usize = 512;
pub const DEFAULT_MAX_PATHS: usize = 4096;
pub const DEFAULT_MAX_UNROLL: usize = 3;
pub const DEFAULT_MAX_SEARCH_ROUNDS: usize = 256;
pub const GAS_LIMIT_DEFAULT: u64 = 30_000_000;

/// Nesting limit for unwrapping conditional guards
pub const MAX_UNWRAP_DEPTH: usize = 64;

/// Width of the zero-padded offset column in opcode listings
pub const LISTING_OFFSET_WIDTH: usize = 6;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_modulus() {
        assert_eq!(WORD_MODULUS.bits(), 257);
        assert_eq!(WORD_MASK.bits(), 256);
        assert_eq!(&*WORD_MASK + BigUint::from(1u8), *WORD_MODULUS);
    }

    #[test]
    fn test_sign_bit() {
        assert_eq!(SIGN_BIT.bits(), 256);
    }

    #[test]
    fn test_sstore_tariffs() {
        assert!(GAS_SSTORE_SET > GAS_SSTORE_RESET);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(DEFAULT_GAS_STEP, 10_000);
        assert_eq!(DEFAULT_LOOP_BOUND, 1024);
        assert!(DEFAULT_MAX_UNROLL >= 2);
    }
}
