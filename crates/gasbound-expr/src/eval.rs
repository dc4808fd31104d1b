// SPDX-License-Identifier: AGPL-3.0

//! Concrete 256-bit word semantics
//!
//! Used both for constant folding in the smart constructors and for
//! evaluating expressions under a model.

use gasbound_constants::{SIGN_BIT, WORD_BITS, WORD_MASK, WORD_MODULUS, WORD_SIZE};
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive, Zero};
use sha3::{Digest, Keccak256};

use crate::expr::{BinaryOp, CmpOp, Expr, ExprKind, TernaryOp, UnaryOp};

/// Result of evaluating an expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Word(BigUint),
    Bool(bool),
}

impl Value {
    pub fn as_word(&self) -> Option<&BigUint> {
        match self {
            Value::Word(w) => Some(w),
            Value::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Word(_) => None,
        }
    }
}

/// Reduce modulo 2^256
pub fn normalize(value: BigUint) -> BigUint {
    value & &*WORD_MASK
}

fn to_signed(value: &BigUint) -> BigInt {
    if value < &*SIGN_BIT {
        BigInt::from(value.clone())
    } else {
        BigInt::from_biguint(Sign::Minus, &*WORD_MODULUS - value)
    }
}

fn from_signed(value: &BigInt) -> BigUint {
    match value.sign() {
        Sign::NoSign => BigUint::zero(),
        Sign::Plus => normalize(value.magnitude().clone()),
        Sign::Minus => {
            let magnitude = normalize(value.magnitude().clone());
            if magnitude.is_zero() {
                BigUint::zero()
            } else {
                &*WORD_MODULUS - magnitude
            }
        }
    }
}

/// Two's complement negation modulo 2^256
pub fn negate(value: &BigUint) -> BigUint {
    normalize(&*WORD_MODULUS - normalize(value.clone()))
}

fn small_shift(value: &BigUint) -> Option<usize> {
    value.to_usize().filter(|s| *s < WORD_BITS as usize)
}

pub(crate) fn apply_unary(op: UnaryOp, a: &BigUint) -> BigUint {
    match op {
        UnaryOp::Not => &*WORD_MASK ^ a,
    }
}

/// Operands are given in stack pop order
pub(crate) fn apply_binary(op: BinaryOp, a: &BigUint, b: &BigUint) -> BigUint {
    match op {
        BinaryOp::Add => normalize(a + b),
        BinaryOp::Sub => normalize(a + negate(b)),
        BinaryOp::Mul => normalize(a * b),
        BinaryOp::Div => {
            if b.is_zero() {
                BigUint::zero()
            } else {
                a / b
            }
        }
        BinaryOp::SDiv => {
            if b.is_zero() {
                BigUint::zero()
            } else {
                from_signed(&(to_signed(a) / to_signed(b)))
            }
        }
        BinaryOp::Mod => {
            if b.is_zero() {
                BigUint::zero()
            } else {
                a % b
            }
        }
        BinaryOp::SMod => {
            if b.is_zero() {
                BigUint::zero()
            } else {
                from_signed(&(to_signed(a) % to_signed(b)))
            }
        }
        BinaryOp::Exp => a.modpow(b, &WORD_MODULUS),
        BinaryOp::SignExtend => match a.to_usize() {
            Some(byte) if byte < WORD_SIZE - 1 => {
                let bit = byte * 8 + 7;
                let low_mask = (BigUint::one() << (bit + 1)) - BigUint::one();
                if b.bit(bit as u64) {
                    b | (&*WORD_MASK ^ &low_mask)
                } else {
                    b & low_mask
                }
            }
            _ => b.clone(),
        },
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Byte => match a.to_usize() {
            Some(i) if i < WORD_SIZE => (b >> (8 * (WORD_SIZE - 1 - i))) & BigUint::from(0xffu8),
            _ => BigUint::zero(),
        },
        BinaryOp::Shl => match small_shift(a) {
            Some(shift) => normalize(b << shift),
            None => BigUint::zero(),
        },
        BinaryOp::Shr => match small_shift(a) {
            Some(shift) => b >> shift,
            None => BigUint::zero(),
        },
        BinaryOp::Sar => {
            let negative = b >= &*SIGN_BIT;
            match small_shift(a) {
                Some(shift) => {
                    let shifted = b >> shift;
                    if negative {
                        let fill = &*WORD_MASK ^ (&*WORD_MASK >> shift);
                        shifted | fill
                    } else {
                        shifted
                    }
                }
                None if negative => WORD_MASK.clone(),
                None => BigUint::zero(),
            }
        }
    }
}

pub(crate) fn apply_ternary(op: TernaryOp, a: &BigUint, b: &BigUint, n: &BigUint) -> BigUint {
    if n.is_zero() {
        return BigUint::zero();
    }
    match op {
        TernaryOp::AddMod => (a + b) % n,
        TernaryOp::MulMod => (a * b) % n,
    }
}

pub(crate) fn compare(op: CmpOp, a: &BigUint, b: &BigUint) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Ult => a < b,
        CmpOp::Ule => a <= b,
        CmpOp::Ugt => a > b,
        CmpOp::Uge => a >= b,
        CmpOp::Slt => to_signed(a) < to_signed(b),
        CmpOp::Sle => to_signed(a) <= to_signed(b),
        CmpOp::Sgt => to_signed(a) > to_signed(b),
        CmpOp::Sge => to_signed(a) >= to_signed(b),
    }
}

/// Keccak-256 of the big-endian concatenation of 32-byte words
pub fn keccak_words(words: &[BigUint]) -> BigUint {
    let mut hasher = Keccak256::new();
    for word in words {
        let bytes = word.to_bytes_be();
        let mut padded = [0u8; WORD_SIZE];
        let start = WORD_SIZE.saturating_sub(bytes.len());
        let tail = &bytes[bytes.len().saturating_sub(WORD_SIZE)..];
        padded[start..].copy_from_slice(tail);
        hasher.update(padded);
    }
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Evaluate `expr` with variables resolved through `env`.
///
/// Returns `None` when a variable is unresolved.
pub fn evaluate(expr: &Expr, env: &dyn Fn(&str) -> Option<BigUint>) -> Option<Value> {
    let value = match expr.kind() {
        ExprKind::Word(w) => Value::Word(w.clone()),
        ExprKind::Bool(b) => Value::Bool(*b),
        ExprKind::Var(name) => Value::Word(normalize(env(&**name)?)),
        ExprKind::Unary(op, a) => Value::Word(apply_unary(*op, &eval_word(a, env)?)),
        ExprKind::Binary(op, a, b) => {
            Value::Word(apply_binary(*op, &eval_word(a, env)?, &eval_word(b, env)?))
        }
        ExprKind::Ternary(op, a, b, n) => Value::Word(apply_ternary(
            *op,
            &eval_word(a, env)?,
            &eval_word(b, env)?,
            &eval_word(n, env)?,
        )),
        ExprKind::Keccak(words) => {
            let words = words
                .iter()
                .map(|w| eval_word(w, env))
                .collect::<Option<Vec<_>>>()?;
            Value::Word(keccak_words(&words))
        }
        ExprKind::Cmp(op, a, b) => Value::Bool(compare(*op, &eval_word(a, env)?, &eval_word(b, env)?)),
        ExprKind::Not(a) => Value::Bool(!eval_bool(a, env)?),
        ExprKind::And(items) => {
            let mut result = true;
            for item in items {
                result &= eval_bool(item, env)?;
            }
            Value::Bool(result)
        }
        ExprKind::Or(items) => {
            let mut result = false;
            for item in items {
                result |= eval_bool(item, env)?;
            }
            Value::Bool(result)
        }
        ExprKind::Ite(c, t, e) => {
            if eval_bool(c, env)? {
                evaluate(t, env)?
            } else {
                evaluate(e, env)?
            }
        }
    };
    Some(value)
}

pub fn eval_word(expr: &Expr, env: &dyn Fn(&str) -> Option<BigUint>) -> Option<BigUint> {
    match evaluate(expr, env)? {
        Value::Word(w) => Some(w),
        Value::Bool(_) => None,
    }
}

pub fn eval_bool(expr: &Expr, env: &dyn Fn(&str) -> Option<BigUint>) -> Option<bool> {
    match evaluate(expr, env)? {
        Value::Bool(b) => Some(b),
        Value::Word(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(v: u64) -> BigUint {
        BigUint::from(v)
    }

    #[test]
    fn test_wrapping_arithmetic() {
        assert_eq!(apply_binary(BinaryOp::Sub, &w(0), &w(1)), WORD_MASK.clone());
        assert_eq!(apply_binary(BinaryOp::Add, &WORD_MASK, &w(2)), w(1));
        assert_eq!(apply_binary(BinaryOp::Div, &w(7), &w(0)), w(0));
    }

    #[test]
    fn test_signed_division() {
        let minus_six = negate(&w(6));
        let minus_three = negate(&w(3));
        assert_eq!(apply_binary(BinaryOp::SDiv, &minus_six, &w(2)), minus_three);
        assert_eq!(apply_binary(BinaryOp::SMod, &negate(&w(7)), &w(3)), negate(&w(1)));
    }

    #[test]
    fn test_signextend_and_byte() {
        assert_eq!(
            apply_binary(BinaryOp::SignExtend, &w(0), &w(0xff)),
            WORD_MASK.clone()
        );
        assert_eq!(apply_binary(BinaryOp::SignExtend, &w(0), &w(0x7f)), w(0x7f));
        assert_eq!(apply_binary(BinaryOp::Byte, &w(31), &w(0xabcd)), w(0xcd));
        assert_eq!(apply_binary(BinaryOp::Byte, &w(32), &w(0xabcd)), w(0));
    }

    #[test]
    fn test_shifts() {
        assert_eq!(apply_binary(BinaryOp::Shl, &w(4), &w(1)), w(16));
        assert_eq!(apply_binary(BinaryOp::Shr, &w(256), &w(1)), w(0));
        assert_eq!(
            apply_binary(BinaryOp::Sar, &w(4), &WORD_MASK),
            WORD_MASK.clone()
        );
    }

    #[test]
    fn test_signed_compare() {
        assert!(compare(CmpOp::Slt, &WORD_MASK, &w(0)));
        assert!(!compare(CmpOp::Ult, &WORD_MASK, &w(0)));
    }

    #[test]
    fn test_keccak_empty_word() {
        // keccak256(bytes32(0))
        let hash = keccak_words(&[w(0)]);
        assert_eq!(
            format!("{:x}", hash),
            "290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"
        );
    }
}
