// SPDX-License-Identifier: AGPL-3.0

//! Lowering of symbolic expressions to z3 terms

use gasbound_constants::WORD_BITS;
use gasbound_exceptions::{GasboundException, GasboundResult};
use gasbound_expr::{BinaryOp, CmpOp, Expr, ExprKind, GasExpr, GasTerm, TernaryOp, UnaryOp};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use std::collections::HashMap;
use z3::ast::{Ast, Bool, Int, BV};
use z3::{Context, FuncDecl, Sort};

/// Largest concrete exponent expanded into repeated multiplication
const MAX_EXPANDED_EXPONENT: u64 = 8;

#[derive(Debug, Clone)]
pub enum Lowered<'ctx> {
    Word(BV<'ctx>),
    Bool(Bool<'ctx>),
}

/// Build a 256-bit constant byte by byte
pub fn biguint_to_bv<'ctx>(ctx: &'ctx Context, value: &BigUint) -> BV<'ctx> {
    if let Some(small) = value.to_u64() {
        return BV::from_u64(ctx, small, WORD_BITS);
    }
    let bytes = value.to_bytes_be();
    let mut padded = vec![0u8; 32usize.saturating_sub(bytes.len())];
    padded.extend_from_slice(&bytes[bytes.len().saturating_sub(32)..]);

    let mut acc = BV::from_u64(ctx, padded[0] as u64, 8);
    for byte in &padded[1..] {
        acc = acc.concat(&BV::from_u64(ctx, *byte as u64, 8));
    }
    acc
}

/// Parse a z3 numeral (`#x..`, `#b..` or decimal)
pub fn bv_to_biguint(bv: &BV) -> Option<BigUint> {
    if let Some(small) = bv.as_u64() {
        return Some(BigUint::from(small));
    }
    let text = bv.to_string();
    if let Some(hex) = text.strip_prefix("#x") {
        BigUint::parse_bytes(hex.as_bytes(), 16)
    } else if let Some(bin) = text.strip_prefix("#b") {
        BigUint::parse_bytes(bin.as_bytes(), 2)
    } else {
        BigUint::parse_bytes(text.as_bytes(), 10)
    }
}

/// Translates [`Expr`] trees into z3 terms, sharing repeated subterms
pub struct Lowering<'ctx> {
    ctx: &'ctx Context,
    vars: HashMap<String, BV<'ctx>>,
    cache: HashMap<u64, Vec<(Expr, Lowered<'ctx>)>>,
    functions: HashMap<String, FuncDecl<'ctx>>,
}

impl<'ctx> Lowering<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Self {
            ctx,
            vars: HashMap::new(),
            cache: HashMap::new(),
            functions: HashMap::new(),
        }
    }

    /// Variables lowered so far, by name
    pub fn variables(&self) -> impl Iterator<Item = (&String, &BV<'ctx>)> {
        self.vars.iter()
    }

    fn zero(&self) -> BV<'ctx> {
        BV::from_u64(self.ctx, 0, WORD_BITS)
    }

    fn word_const(&self, value: u64) -> BV<'ctx> {
        BV::from_u64(self.ctx, value, WORD_BITS)
    }

    fn function(&mut self, name: &str, arity: usize) -> &FuncDecl<'ctx> {
        let ctx = self.ctx;
        let key = format!("{}_{}", name, arity);
        self.functions.entry(key.clone()).or_insert_with(|| {
            let word = Sort::bitvector(ctx, WORD_BITS);
            let domain: Vec<&Sort> = (0..arity).map(|_| &word).collect();
            FuncDecl::new(ctx, key, &domain, &word)
        })
    }

    fn apply(&mut self, name: &str, args: &[BV<'ctx>]) -> GasboundResult<BV<'ctx>> {
        let decl = self.function(name, args.len());
        let refs: Vec<&dyn Ast<'ctx>> = args.iter().map(|a| a as &dyn Ast<'ctx>).collect();
        decl.apply(&refs).as_bv().ok_or_else(|| {
            GasboundException::Internal(format!("{} must return a bit-vector", name))
        })
    }

    pub fn word(&mut self, expr: &Expr) -> GasboundResult<BV<'ctx>> {
        match self.lower(expr)? {
            Lowered::Word(bv) => Ok(bv),
            Lowered::Bool(_) => Err(GasboundException::Internal(format!(
                "expected a word, got boolean {}",
                expr
            ))),
        }
    }

    pub fn boolean(&mut self, expr: &Expr) -> GasboundResult<Bool<'ctx>> {
        match self.lower(expr)? {
            Lowered::Bool(b) => Ok(b),
            Lowered::Word(_) => Err(GasboundException::Internal(format!(
                "expected a boolean, got word {}",
                expr
            ))),
        }
    }

    pub fn lower(&mut self, expr: &Expr) -> GasboundResult<Lowered<'ctx>> {
        if let Some(bucket) = self.cache.get(&expr.hash_value()) {
            if let Some((_, done)) = bucket.iter().find(|(e, _)| e == expr) {
                return Ok(done.clone());
            }
        }

        let ctx = self.ctx;
        let lowered = match expr.kind() {
            ExprKind::Word(w) => Lowered::Word(biguint_to_bv(ctx, w)),
            ExprKind::Bool(b) => Lowered::Bool(Bool::from_bool(ctx, *b)),
            ExprKind::Var(name) => {
                let bv = self
                    .vars
                    .entry(name.to_string())
                    .or_insert_with(|| BV::new_const(ctx, &**name, WORD_BITS))
                    .clone();
                Lowered::Word(bv)
            }
            ExprKind::Unary(UnaryOp::Not, a) => Lowered::Word(self.word(a)?.bvnot()),
            ExprKind::Binary(op, a, b) => Lowered::Word(self.binary(*op, a, b)?),
            ExprKind::Ternary(op, a, b, n) => {
                let a = self.word(a)?.zero_ext(WORD_BITS);
                let b = self.word(b)?.zero_ext(WORD_BITS);
                let n = self.word(n)?;
                let combined = match op {
                    TernaryOp::AddMod => a.bvadd(&b),
                    TernaryOp::MulMod => a.bvmul(&b),
                };
                let reduced = combined
                    .bvurem(&n.zero_ext(WORD_BITS))
                    .extract(WORD_BITS - 1, 0);
                Lowered::Word(n._eq(&self.zero()).ite(&self.zero(), &reduced))
            }
            ExprKind::Keccak(words) => {
                let args = words
                    .iter()
                    .map(|w| self.word(w))
                    .collect::<GasboundResult<Vec<_>>>()?;
                Lowered::Word(self.apply("keccak256", &args)?)
            }
            ExprKind::Cmp(op, a, b) => {
                let a = self.word(a)?;
                let b = self.word(b)?;
                Lowered::Bool(match op {
                    CmpOp::Eq => a._eq(&b),
                    CmpOp::Ne => a._eq(&b).not(),
                    CmpOp::Ult => a.bvult(&b),
                    CmpOp::Ule => a.bvule(&b),
                    CmpOp::Ugt => a.bvugt(&b),
                    CmpOp::Uge => a.bvuge(&b),
                    CmpOp::Slt => a.bvslt(&b),
                    CmpOp::Sle => a.bvsle(&b),
                    CmpOp::Sgt => a.bvsgt(&b),
                    CmpOp::Sge => a.bvsge(&b),
                })
            }
            ExprKind::Not(a) => Lowered::Bool(self.boolean(a)?.not()),
            ExprKind::And(items) | ExprKind::Or(items) => {
                let lowered = items
                    .iter()
                    .map(|i| self.boolean(i))
                    .collect::<GasboundResult<Vec<_>>>()?;
                let refs: Vec<&Bool<'ctx>> = lowered.iter().collect();
                Lowered::Bool(if matches!(expr.kind(), ExprKind::And(_)) {
                    Bool::and(ctx, &refs)
                } else {
                    Bool::or(ctx, &refs)
                })
            }
            ExprKind::Ite(c, t, e) => {
                let c = self.boolean(c)?;
                match (self.lower(t)?, self.lower(e)?) {
                    (Lowered::Word(t), Lowered::Word(e)) => Lowered::Word(c.ite(&t, &e)),
                    (Lowered::Bool(t), Lowered::Bool(e)) => Lowered::Bool(c.ite(&t, &e)),
                    _ => {
                        return Err(GasboundException::Internal(format!(
                            "ite branches of different sorts in {}",
                            expr
                        )))
                    }
                }
            }
        };

        self.cache
            .entry(expr.hash_value())
            .or_default()
            .push((expr.clone(), lowered.clone()));
        Ok(lowered)
    }

    fn binary(&mut self, op: BinaryOp, a: &Expr, b: &Expr) -> GasboundResult<BV<'ctx>> {
        let zero = self.zero();
        let x = self.word(a)?;
        let y = self.word(b)?;
        let y_is_zero = y._eq(&zero);
        Ok(match op {
            BinaryOp::Add => x.bvadd(&y),
            BinaryOp::Sub => x.bvsub(&y),
            BinaryOp::Mul => x.bvmul(&y),
            BinaryOp::Div => y_is_zero.ite(&zero, &x.bvudiv(&y)),
            BinaryOp::SDiv => y_is_zero.ite(&zero, &x.bvsdiv(&y)),
            BinaryOp::Mod => y_is_zero.ite(&zero, &x.bvurem(&y)),
            BinaryOp::SMod => y_is_zero.ite(&zero, &x.bvsrem(&y)),
            BinaryOp::Exp => self.exp(a, b, x, y)?,
            BinaryOp::SignExtend => self.sign_extend(a, x, y)?,
            BinaryOp::And => x.bvand(&y),
            BinaryOp::Or => x.bvor(&y),
            BinaryOp::Xor => x.bvxor(&y),
            // Operands in pop order: shift first, value second
            BinaryOp::Shl => y.bvshl(&x),
            BinaryOp::Shr => y.bvlshr(&x),
            BinaryOp::Sar => y.bvashr(&x),
            BinaryOp::Byte => {
                let in_range = x.bvult(&self.word_const(32));
                let shift = self.word_const(31).bvsub(&x).bvmul(&self.word_const(8));
                let byte = y.bvlshr(&shift).bvand(&self.word_const(0xff));
                in_range.ite(&byte, &zero)
            }
        })
    }

    /// Small concrete exponents are expanded, powers of two become shifts,
    /// everything else is an uninterpreted function.
    fn exp(
        &mut self,
        base: &Expr,
        exponent: &Expr,
        base_bv: BV<'ctx>,
        exponent_bv: BV<'ctx>,
    ) -> GasboundResult<BV<'ctx>> {
        if let Some(n) = exponent.as_u64().filter(|n| *n <= MAX_EXPANDED_EXPONENT) {
            let mut acc = self.word_const(1);
            for _ in 0..n {
                acc = acc.bvmul(&base_bv);
            }
            return Ok(acc);
        }
        if base.as_u64() == Some(2) {
            return Ok(self.word_const(1).bvshl(&exponent_bv));
        }
        self.apply("evm_exp", &[base_bv, exponent_bv])
    }

    fn sign_extend(
        &mut self,
        byte: &Expr,
        byte_bv: BV<'ctx>,
        value: BV<'ctx>,
    ) -> GasboundResult<BV<'ctx>> {
        match byte.as_u64() {
            Some(n) if n < 31 => {
                let bit = (n as u32) * 8 + 7;
                Ok(value.extract(bit, 0).sign_ext(WORD_BITS - 1 - bit))
            }
            Some(_) => Ok(value),
            None => self.apply("evm_signextend", &[byte_bv, value]),
        }
    }

    /// Gas as an unbounded integer
    pub fn gas(&mut self, gas: &GasExpr) -> GasboundResult<Int<'ctx>> {
        let ctx = self.ctx;
        let mut parts = vec![Int::from_u64(ctx, gas.constant)];
        for term in &gas.terms {
            parts.push(match term {
                GasTerm::Words { coeff, size } => {
                    let size = self.word(size)?.to_int(false);
                    let words = Int::add(ctx, &[&size, &Int::from_u64(ctx, 31)])
                        .div(&Int::from_u64(ctx, 32));
                    Int::mul(ctx, &[&Int::from_u64(ctx, *coeff), &words])
                }
                GasTerm::Bytes { coeff, size } => {
                    let size = self.word(size)?.to_int(false);
                    Int::mul(ctx, &[&Int::from_u64(ctx, *coeff), &size])
                }
                GasTerm::Select {
                    cond,
                    then,
                    otherwise,
                } => self
                    .boolean(cond)?
                    .ite(&Int::from_u64(ctx, *then), &Int::from_u64(ctx, *otherwise)),
                GasTerm::Scaled { counter, body } => {
                    let counter = self.word(counter)?.to_int(false);
                    let body = self.gas(body)?;
                    Int::mul(ctx, &[&counter, &body])
                }
            });
        }
        let refs: Vec<&Int<'ctx>> = parts.iter().collect();
        Ok(Int::add(ctx, &refs))
    }
}
