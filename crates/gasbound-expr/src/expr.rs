// SPDX-License-Identifier: AGPL-3.0

//! Symbolic expressions over 256-bit words
//!
//! [`Expr`] is an immutable, reference-counted tree with a structural hash
//! cached at every node. Construction always goes through the smart
//! constructors, which fold arithmetic over constants and normalize a few
//! shapes (constants on the right of commutative operators, subtraction of
//! a constant as addition of its negation, negated comparisons as the
//! opposite comparison). Comparisons are never folded so that branch
//! predicates keep their operator and operands even when concrete.

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use xxhash_rust::xxh3::Xxh3;

use crate::eval::{self, apply_binary, apply_ternary, apply_unary, normalize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sort {
    Word,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
}

/// Word operators; operands are stored in stack pop order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    SDiv,
    Mod,
    SMod,
    Exp,
    SignExtend,
    And,
    Or,
    Xor,
    Byte,
    Shl,
    Shr,
    Sar,
}

impl BinaryOp {
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::SDiv => "/s",
            BinaryOp::Mod => "%",
            BinaryOp::SMod => "%s",
            BinaryOp::Exp => "**",
            BinaryOp::SignExtend => "signextend",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Byte => "byte",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::Sar => "sar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TernaryOp {
    AddMod,
    MulMod,
}

/// Comparison operators producing a boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CmpOp {
    /// Operator of the logical negation
    pub fn negate(&self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Ult => CmpOp::Uge,
            CmpOp::Ule => CmpOp::Ugt,
            CmpOp::Ugt => CmpOp::Ule,
            CmpOp::Uge => CmpOp::Ult,
            CmpOp::Slt => CmpOp::Sge,
            CmpOp::Sle => CmpOp::Sgt,
            CmpOp::Sgt => CmpOp::Sle,
            CmpOp::Sge => CmpOp::Slt,
        }
    }

    /// Operator with swapped operands
    pub fn flip(&self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Ult => CmpOp::Ugt,
            CmpOp::Ule => CmpOp::Uge,
            CmpOp::Ugt => CmpOp::Ult,
            CmpOp::Uge => CmpOp::Ule,
            CmpOp::Slt => CmpOp::Sgt,
            CmpOp::Sle => CmpOp::Sge,
            CmpOp::Sgt => CmpOp::Slt,
            CmpOp::Sge => CmpOp::Sle,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Ult => "<",
            CmpOp::Ule => "<=",
            CmpOp::Ugt => ">",
            CmpOp::Uge => ">=",
            CmpOp::Slt => "<s",
            CmpOp::Sle => "<=s",
            CmpOp::Sgt => ">s",
            CmpOp::Sge => ">=s",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Word(BigUint),
    Bool(bool),
    Var(Rc<str>),
    Unary(UnaryOp, Expr),
    Binary(BinaryOp, Expr, Expr),
    Ternary(TernaryOp, Expr, Expr, Expr),
    /// Keccak-256 over the concatenation of memory words
    Keccak(Vec<Expr>),
    Cmp(CmpOp, Expr, Expr),
    Not(Expr),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Ite(Expr, Expr, Expr),
}

#[derive(Debug)]
struct Node {
    kind: ExprKind,
    hash: u64,
}

/// Shared handle to an expression node
#[derive(Clone)]
pub struct Expr(Rc<Node>);

fn structural_hash(kind: &ExprKind) -> u64 {
    let mut hasher = Xxh3::new();
    let children = |hasher: &mut Xxh3, items: &[&Expr]| {
        for item in items {
            hasher.update(&item.0.hash.to_le_bytes());
        }
    };
    match kind {
        ExprKind::Word(w) => {
            hasher.update(&[0]);
            hasher.update(&w.to_bytes_le());
        }
        ExprKind::Bool(b) => hasher.update(&[1, *b as u8]),
        ExprKind::Var(name) => {
            hasher.update(&[2]);
            hasher.update(name.as_bytes());
        }
        ExprKind::Unary(op, a) => {
            hasher.update(&[3, *op as u8]);
            children(&mut hasher, &[a]);
        }
        ExprKind::Binary(op, a, b) => {
            hasher.update(&[4, *op as u8]);
            children(&mut hasher, &[a, b]);
        }
        ExprKind::Ternary(op, a, b, c) => {
            hasher.update(&[5, *op as u8]);
            children(&mut hasher, &[a, b, c]);
        }
        ExprKind::Keccak(words) => {
            hasher.update(&[6]);
            children(&mut hasher, &words.iter().collect::<Vec<_>>());
        }
        ExprKind::Cmp(op, a, b) => {
            hasher.update(&[7, *op as u8]);
            children(&mut hasher, &[a, b]);
        }
        ExprKind::Not(a) => {
            hasher.update(&[8]);
            children(&mut hasher, &[a]);
        }
        ExprKind::And(items) => {
            hasher.update(&[9]);
            children(&mut hasher, &items.iter().collect::<Vec<_>>());
        }
        ExprKind::Or(items) => {
            hasher.update(&[10]);
            children(&mut hasher, &items.iter().collect::<Vec<_>>());
        }
        ExprKind::Ite(c, t, e) => {
            hasher.update(&[11]);
            children(&mut hasher, &[c, t, e]);
        }
    }
    hasher.digest()
}

impl Expr {
    fn new(kind: ExprKind) -> Self {
        let hash = structural_hash(&kind);
        Expr(Rc::new(Node { kind, hash }))
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// Cached structural hash
    pub fn hash_value(&self) -> u64 {
        self.0.hash
    }

    /// Whether both handles point at the same node
    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn sort(&self) -> Sort {
        match self.kind() {
            ExprKind::Bool(_)
            | ExprKind::Cmp(..)
            | ExprKind::Not(_)
            | ExprKind::And(_)
            | ExprKind::Or(_) => Sort::Bool,
            ExprKind::Ite(_, t, _) => t.sort(),
            _ => Sort::Word,
        }
    }

    // === Leaves ===

    pub fn word(value: u64) -> Self {
        Self::new(ExprKind::Word(BigUint::from(value)))
    }

    pub fn from_biguint(value: BigUint) -> Self {
        Self::new(ExprKind::Word(normalize(value)))
    }

    pub fn from_bytes_be(bytes: &[u8]) -> Self {
        Self::from_biguint(BigUint::from_bytes_be(bytes))
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ExprKind::Bool(value))
    }

    /// Named variable; only the registry hands these out
    pub(crate) fn var(name: Rc<str>) -> Self {
        Self::new(ExprKind::Var(name))
    }

    pub fn as_word(&self) -> Option<&BigUint> {
        match self.kind() {
            ExprKind::Word(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_word().and_then(|w| w.to_u64())
    }

    pub fn as_usize(&self) -> Option<usize> {
        self.as_word().and_then(|w| w.to_usize())
    }

    pub fn as_bool_literal(&self) -> Option<bool> {
        match self.kind() {
            ExprKind::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn var_name(&self) -> Option<&str> {
        match self.kind() {
            ExprKind::Var(name) => Some(&**name),
            _ => None,
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self.kind(), ExprKind::Word(_) | ExprKind::Bool(_))
    }

    /// Truth value of a variable-free boolean, comparisons included
    pub fn concrete_bool(&self) -> Option<bool> {
        eval::eval_bool(self, &|_| None)
    }

    // === Word operators ===

    pub fn unary(op: UnaryOp, a: Expr) -> Self {
        if let Some(x) = a.as_word() {
            return Self::from_biguint(apply_unary(op, x));
        }
        if let (UnaryOp::Not, ExprKind::Unary(UnaryOp::Not, inner)) = (op, a.kind()) {
            return inner.clone();
        }
        Self::new(ExprKind::Unary(op, a))
    }

    pub fn binary(op: BinaryOp, a: Expr, b: Expr) -> Self {
        if let (Some(x), Some(y)) = (a.as_word(), b.as_word()) {
            return Self::from_biguint(apply_binary(op, x, y));
        }
        // Constants go to the right of commutative operators
        let (a, b) = if op.is_commutative() && a.is_concrete() {
            (b, a)
        } else {
            (a, b)
        };
        match op {
            BinaryOp::Add => Self::add_folded(a, b),
            BinaryOp::Sub => match b.as_word() {
                Some(c) => Self::add_folded(a, Self::from_biguint(eval::negate(c))),
                None if a == b => Self::word(0),
                None => Self::new(ExprKind::Binary(op, a, b)),
            },
            BinaryOp::Mul => match b.as_word() {
                Some(c) if c.is_zero() => Self::word(0),
                Some(c) if c.is_one() => a,
                _ => Self::new(ExprKind::Binary(op, a, b)),
            },
            BinaryOp::And => match b.as_word() {
                Some(c) if c.is_zero() => Self::word(0),
                Some(c) if *c == *gasbound_constants::WORD_MASK => a,
                _ => Self::new(ExprKind::Binary(op, a, b)),
            },
            BinaryOp::Or | BinaryOp::Xor => match b.as_word() {
                Some(c) if c.is_zero() => a,
                _ => Self::new(ExprKind::Binary(op, a, b)),
            },
            _ => Self::new(ExprKind::Binary(op, a, b)),
        }
    }

    /// `a + b` with `b` possibly constant; merges `(x + c1) + c2`
    fn add_folded(a: Expr, b: Expr) -> Self {
        match b.as_word() {
            Some(c) if c.is_zero() => a,
            Some(c2) => {
                if let ExprKind::Binary(BinaryOp::Add, x, c1) = a.kind() {
                    if let Some(c1) = c1.as_word() {
                        let sum = normalize(c1 + c2);
                        if sum.is_zero() {
                            return x.clone();
                        }
                        return Self::new(ExprKind::Binary(
                            BinaryOp::Add,
                            x.clone(),
                            Self::from_biguint(sum),
                        ));
                    }
                }
                Self::new(ExprKind::Binary(BinaryOp::Add, a, b))
            }
            None => Self::new(ExprKind::Binary(BinaryOp::Add, a, b)),
        }
    }

    pub fn ternary(op: TernaryOp, a: Expr, b: Expr, n: Expr) -> Self {
        if let (Some(x), Some(y), Some(m)) = (a.as_word(), b.as_word(), n.as_word()) {
            return Self::from_biguint(apply_ternary(op, x, y, m));
        }
        Self::new(ExprKind::Ternary(op, a, b, n))
    }

    pub fn keccak(words: Vec<Expr>) -> Self {
        let concrete: Option<Vec<BigUint>> = words.iter().map(|w| w.as_word().cloned()).collect();
        match concrete {
            Some(values) => Self::from_biguint(eval::keccak_words(&values)),
            None => Self::new(ExprKind::Keccak(words)),
        }
    }

    pub fn add(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Add, self, other)
    }

    pub fn sub(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Sub, self, other)
    }

    pub fn mul(self, other: Expr) -> Self {
        Self::binary(BinaryOp::Mul, self, other)
    }

    // === Booleans ===

    /// Comparison; kept structural even over constants
    pub fn cmp(op: CmpOp, a: Expr, b: Expr) -> Self {
        Self::new(ExprKind::Cmp(op, a, b))
    }

    pub fn not(a: Expr) -> Self {
        match a.kind() {
            ExprKind::Bool(b) => Self::bool(!b),
            ExprKind::Not(inner) => inner.clone(),
            ExprKind::Cmp(op, x, y) => Self::cmp(op.negate(), x.clone(), y.clone()),
            _ => Self::new(ExprKind::Not(a)),
        }
    }

    pub fn and(items: Vec<Expr>) -> Self {
        let mut flat = Vec::with_capacity(items.len());
        for item in items {
            match item.kind() {
                ExprKind::Bool(true) => {}
                ExprKind::Bool(false) => return Self::bool(false),
                ExprKind::And(inner) => flat.extend(inner.iter().cloned()),
                _ => flat.push(item),
            }
        }
        match flat.len() {
            0 => Self::bool(true),
            1 => flat.remove(0),
            _ => Self::new(ExprKind::And(flat)),
        }
    }

    pub fn or(items: Vec<Expr>) -> Self {
        let mut flat = Vec::with_capacity(items.len());
        for item in items {
            match item.kind() {
                ExprKind::Bool(false) => {}
                ExprKind::Bool(true) => return Self::bool(true),
                ExprKind::Or(inner) => flat.extend(inner.iter().cloned()),
                _ => flat.push(item),
            }
        }
        match flat.len() {
            0 => Self::bool(false),
            1 => flat.remove(0),
            _ => Self::new(ExprKind::Or(flat)),
        }
    }

    pub fn ite(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        match cond.as_bool_literal() {
            Some(true) => then,
            Some(false) => otherwise,
            None if then == otherwise => then,
            None => Self::new(ExprKind::Ite(cond, then, otherwise)),
        }
    }

    /// EVM boolean word: 1 when `cond` holds, 0 otherwise
    pub fn bool_to_word(cond: Expr) -> Self {
        Self::ite(cond, Self::word(1), Self::word(0))
    }

    /// Predicate `word != 0`, unwrapping `ite(b, 1, 0)` to `b`
    pub fn truthy(word: Expr) -> Self {
        if let Some(w) = word.as_word() {
            return Self::bool(!w.is_zero());
        }
        if let ExprKind::Ite(c, t, e) = word.kind() {
            match (t.as_u64(), e.as_u64()) {
                (Some(1), Some(0)) => return c.clone(),
                (Some(0), Some(1)) => return Self::not(c.clone()),
                _ => {}
            }
        }
        Self::cmp(CmpOp::Ne, word, Self::word(0))
    }

    /// EVM `ISZERO`, keeping comparisons visible under the negation
    pub fn is_zero(word: Expr) -> Self {
        if let Some(w) = word.as_word() {
            return Self::word(w.is_zero() as u64);
        }
        Self::bool_to_word(Self::not(Self::truthy(word)))
    }

    // === Traversal ===

    /// Direct children, left to right
    pub fn children(&self) -> Vec<&Expr> {
        match self.kind() {
            ExprKind::Word(_) | ExprKind::Bool(_) | ExprKind::Var(_) => Vec::new(),
            ExprKind::Unary(_, a) | ExprKind::Not(a) => vec![a],
            ExprKind::Binary(_, a, b) | ExprKind::Cmp(_, a, b) => vec![a, b],
            ExprKind::Ternary(_, a, b, c) | ExprKind::Ite(a, b, c) => vec![a, b, c],
            ExprKind::Keccak(items) | ExprKind::And(items) | ExprKind::Or(items) => {
                items.iter().collect()
            }
        }
    }

    /// Pre-order walk; `visit` returns false to skip a subtree
    pub fn walk<F: FnMut(&Expr) -> bool>(&self, mut visit: F) {
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            if visit(expr) {
                stack.extend(expr.children().into_iter().rev());
            }
        }
    }

    /// Distinct variable names in first-occurrence order
    pub fn variables(&self) -> indexmap::IndexSet<Rc<str>> {
        let mut vars = indexmap::IndexSet::new();
        self.walk(|e| {
            if let ExprKind::Var(name) = e.kind() {
                vars.insert(name.clone());
            }
            true
        });
        vars
    }

    pub fn contains_var(&self, name: &str) -> bool {
        let mut found = false;
        self.walk(|e| {
            if e.var_name() == Some(name) {
                found = true;
            }
            !found
        });
        found
    }

    /// Number of nodes in the tree, shared subtrees counted each time
    pub fn size(&self) -> usize {
        let mut count = 0;
        self.walk(|_| {
            count += 1;
            true
        });
        count
    }

    /// Rebuild with every variable for which `map` returns a replacement
    /// swapped out, refolding through the smart constructors.
    pub fn substitute(&self, map: &dyn Fn(&str) -> Option<Expr>) -> Expr {
        let mut memo: HashMap<u64, Vec<(Expr, Expr)>> = HashMap::new();
        self.substitute_memo(map, &mut memo)
    }

    fn substitute_memo(
        &self,
        map: &dyn Fn(&str) -> Option<Expr>,
        memo: &mut HashMap<u64, Vec<(Expr, Expr)>>,
    ) -> Expr {
        if let Some(bucket) = memo.get(&self.hash_value()) {
            if let Some((_, done)) = bucket.iter().find(|(from, _)| from == self) {
                return done.clone();
            }
        }
        let result = match self.kind() {
            ExprKind::Word(_) | ExprKind::Bool(_) => self.clone(),
            ExprKind::Var(name) => map(name).unwrap_or_else(|| self.clone()),
            ExprKind::Unary(op, a) => Self::unary(*op, a.substitute_memo(map, memo)),
            ExprKind::Binary(op, a, b) => Self::binary(
                *op,
                a.substitute_memo(map, memo),
                b.substitute_memo(map, memo),
            ),
            ExprKind::Ternary(op, a, b, c) => Self::ternary(
                *op,
                a.substitute_memo(map, memo),
                b.substitute_memo(map, memo),
                c.substitute_memo(map, memo),
            ),
            ExprKind::Keccak(words) => Self::keccak(
                words
                    .iter()
                    .map(|w| w.substitute_memo(map, memo))
                    .collect(),
            ),
            ExprKind::Cmp(op, a, b) => Self::cmp(
                *op,
                a.substitute_memo(map, memo),
                b.substitute_memo(map, memo),
            ),
            ExprKind::Not(a) => Self::not(a.substitute_memo(map, memo)),
            ExprKind::And(items) => Self::and(
                items
                    .iter()
                    .map(|i| i.substitute_memo(map, memo))
                    .collect(),
            ),
            ExprKind::Or(items) => Self::or(
                items
                    .iter()
                    .map(|i| i.substitute_memo(map, memo))
                    .collect(),
            ),
            ExprKind::Ite(c, t, e) => Self::ite(
                c.substitute_memo(map, memo),
                t.substitute_memo(map, memo),
                e.substitute_memo(map, memo),
            ),
        };
        memo.entry(self.hash_value())
            .or_default()
            .push((self.clone(), result.clone()));
        result
    }

    /// Split a word into `base + offset`. A constant has no base.
    pub fn linear_form(&self) -> (Option<Expr>, BigUint) {
        match self.kind() {
            ExprKind::Word(w) => (None, w.clone()),
            ExprKind::Binary(BinaryOp::Add, base, offset) => match offset.as_word() {
                Some(c) => (Some(base.clone()), c.clone()),
                None => (Some(self.clone()), BigUint::zero()),
            },
            _ => (Some(self.clone()), BigUint::zero()),
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.0.hash == other.0.hash && self.0.kind == other.0.kind)
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

fn fmt_word(w: &BigUint, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if w.bits() <= 32 {
        write!(f, "{}", w)
    } else {
        write!(f, "0x{:x}", w)
    }
}

fn fmt_list(f: &mut fmt::Formatter<'_>, name: &str, items: &[Expr]) -> fmt::Result {
    write!(f, "{}(", name)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, ")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::Word(w) => fmt_word(w, f),
            ExprKind::Bool(b) => write!(f, "{}", b),
            ExprKind::Var(name) => write!(f, "{}", name),
            ExprKind::Unary(UnaryOp::Not, a) => write!(f, "~{}", a),
            ExprKind::Binary(op, a, b) => match op {
                BinaryOp::SignExtend
                | BinaryOp::Byte
                | BinaryOp::Shl
                | BinaryOp::Shr
                | BinaryOp::Sar => write!(f, "{}({}, {})", op.symbol(), a, b),
                _ => write!(f, "({} {} {})", a, op.symbol(), b),
            },
            ExprKind::Ternary(op, a, b, n) => {
                let name = match op {
                    TernaryOp::AddMod => "addmod",
                    TernaryOp::MulMod => "mulmod",
                };
                write!(f, "{}({}, {}, {})", name, a, b, n)
            }
            ExprKind::Keccak(words) => fmt_list(f, "keccak", words),
            ExprKind::Cmp(op, a, b) => write!(f, "({} {} {})", a, op, b),
            ExprKind::Not(a) => write!(f, "!{}", a),
            ExprKind::And(items) => fmt_list(f, "and", items),
            ExprKind::Or(items) => fmt_list(f, "or", items),
            ExprKind::Ite(c, t, e) => write!(f, "ite({}, {}, {})", c, t, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(name: &str) -> Expr {
        Expr::var(Rc::from(name))
    }

    #[test]
    fn test_constant_folding() {
        let e = Expr::word(2).add(Expr::word(3)).mul(Expr::word(4));
        assert_eq!(e.as_u64(), Some(20));
    }

    #[test]
    fn test_structural_equality() {
        let a = v("x").add(Expr::word(1));
        let b = v("x").add(Expr::word(1));
        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);
        assert_eq!(a.hash_value(), b.hash_value());
        assert_ne!(a, v("x").add(Expr::word(2)));
    }

    #[test]
    fn test_constant_moves_right() {
        let e = Expr::word(5).add(v("x"));
        assert_eq!(e, v("x").add(Expr::word(5)));
    }

    #[test]
    fn test_sub_becomes_add() {
        let e = v("i").add(Expr::word(3)).sub(Expr::word(1));
        assert_eq!(e, v("i").add(Expr::word(2)));
        let back = e.sub(Expr::word(2));
        assert_eq!(back, v("i"));
    }

    #[test]
    fn test_linear_form() {
        let (base, offset) = v("n").add(Expr::word(7)).linear_form();
        assert_eq!(base, Some(v("n")));
        assert_eq!(offset, BigUint::from(7u8));

        let (base, offset) = Expr::word(9).linear_form();
        assert!(base.is_none());
        assert_eq!(offset, BigUint::from(9u8));
    }

    #[test]
    fn test_comparisons_not_folded() {
        let lt = Expr::cmp(CmpOp::Ult, Expr::word(1), Expr::word(10));
        assert!(matches!(lt.kind(), ExprKind::Cmp(CmpOp::Ult, _, _)));
        assert_eq!(lt.concrete_bool(), Some(true));
    }

    #[test]
    fn test_iszero_of_comparison() {
        let lt = Expr::bool_to_word(Expr::cmp(CmpOp::Ult, v("i"), Expr::word(10)));
        let negated = Expr::is_zero(lt);
        assert_eq!(
            Expr::truthy(negated),
            Expr::cmp(CmpOp::Uge, v("i"), Expr::word(10))
        );
    }

    #[test]
    fn test_double_negation() {
        let p = Expr::cmp(CmpOp::Eq, v("a"), v("b"));
        assert_eq!(Expr::not(Expr::not(p.clone())), p);
    }

    #[test]
    fn test_and_or_flatten() {
        let a = Expr::cmp(CmpOp::Ult, v("a"), Expr::word(1));
        let b = Expr::cmp(CmpOp::Ult, v("b"), Expr::word(1));
        let conj = Expr::and(vec![a.clone(), Expr::bool(true), Expr::and(vec![b.clone()])]);
        assert_eq!(conj, Expr::and(vec![a.clone(), b.clone()]));
        assert_eq!(Expr::or(vec![a, Expr::bool(true)]), Expr::bool(true));
    }

    #[test]
    fn test_substitute_refolds() {
        let e = v("k").mul(Expr::word(3)).add(Expr::word(1));
        let s = e.substitute(&|name: &str| (name == "k").then(|| Expr::word(4)));
        assert_eq!(s.as_u64(), Some(13));
        assert!(e.contains_var("k"));
        assert!(!s.contains_var("k"));
    }

    #[test]
    fn test_variables_in_order() {
        let e = v("b").add(v("a")).add(v("b"));
        let names: Vec<String> = e.variables().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_display() {
        let e = Expr::cmp(CmpOp::Ult, v("i").add(Expr::word(1)), Expr::word(10));
        assert_eq!(e.to_string(), "((i + 1) < 10)");
    }

    #[test]
    fn test_sort() {
        assert_eq!(Expr::word(1).sort(), Sort::Word);
        assert_eq!(Expr::cmp(CmpOp::Eq, v("a"), v("b")).sort(), Sort::Bool);
        assert_eq!(Expr::bool_to_word(Expr::cmp(CmpOp::Eq, v("a"), v("b"))).sort(), Sort::Word);
    }
}
