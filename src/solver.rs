//! Z3-backed facade translating the [`crate::expr`] DAG into bitvector
//! queries and back.
//!
//! Mirrors the recursive-dispatch shape of `generate_z3_bv` in the
//! EVM-specific concolic host this crate was generalized from, but against
//! the width-generic `ExprKind` instead of an EVM opcode set.

use std::collections::HashMap;
use std::time::Duration;

use z3::ast::{Ast, Bool, BV};
use z3::{Config, Context, SatResult};

use crate::error::{EngineError, Result};
use crate::expr::{BitVector, ConcolicValue, ExprKind};

/// Owns the Z3 context used for one solving session.
///
/// A fresh `Context` backs every [`Solver::check`] call: Z3 contexts are not
/// `Send`/`Sync` and the DAG itself is the only state that needs to survive
/// across calls.
pub struct Solver {
    timeout: Option<Duration>,
}

/// A satisfying assignment: concrete byte values keyed by symbol name.
#[derive(Clone, Debug, Default)]
pub struct Assignment {
    pub bindings: HashMap<String, Vec<u8>>,
}

impl Assignment {
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        let bytes = self.bindings.get(name)?;
        let mut buf = [0u8; 8];
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
        Some(u64::from_le_bytes(buf))
    }
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver {
    pub fn new() -> Self {
        Solver { timeout: None }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Build a concrete [`ConcolicValue`] from a little-endian byte buffer.
    pub fn bvc_from_bytes(&self, buf: &[u8]) -> ConcolicValue {
        let width = (buf.len() * 8) as u32;
        let mut value: u128 = 0;
        for (i, b) in buf.iter().enumerate() {
            value |= (*b as u128) << (8 * i);
        }
        ConcolicValue::new_concrete(width, value as u64)
    }

    /// Build a fresh named symbol of `width` bits, concretely seeded with
    /// `seed`.
    pub fn bvc_symbol(&self, name: &str, width: u32, seed: u64) -> ConcolicValue {
        ConcolicValue::new_symbolic(
            BitVector::constant(width, seed),
            BitVector::symbol(width, name),
        )
    }

    /// Render the concrete side of a value back to little-endian bytes.
    pub fn bvc_to_bytes(&self, value: &ConcolicValue, buf: &mut [u8]) {
        match value.concrete.kind() {
            ExprKind::Const(v) => {
                let bytes = v.to_le_bytes();
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
            }
            other => unreachable!("concrete side must be a constant, got {:?}", other),
        }
    }

    fn build<'ctx>(
        ctx: &'ctx Context,
        cache: &mut HashMap<*const (), BV<'ctx>>,
        expr: &BitVector,
    ) -> BV<'ctx> {
        let key = expr.raw_key();
        if let Some(bv) = cache.get(&key) {
            return bv.clone();
        }

        let built = match expr.kind() {
            ExprKind::Const(v) => BV::from_u64(ctx, *v, expr.width()),
            ExprKind::Symbol(name) => BV::new_const(ctx, name.clone(), expr.width()),
            ExprKind::Add => {
                Self::build(ctx, cache, &expr.child(0)).bvadd(&Self::build(ctx, cache, &expr.child(1)))
            }
            ExprKind::Sub => {
                Self::build(ctx, cache, &expr.child(0)).bvsub(&Self::build(ctx, cache, &expr.child(1)))
            }
            ExprKind::Mul => {
                Self::build(ctx, cache, &expr.child(0)).bvmul(&Self::build(ctx, cache, &expr.child(1)))
            }
            ExprKind::Udiv => Self::build(ctx, cache, &expr.child(0))
                .bvudiv(&Self::build(ctx, cache, &expr.child(1))),
            ExprKind::Sdiv => Self::build(ctx, cache, &expr.child(0))
                .bvsdiv(&Self::build(ctx, cache, &expr.child(1))),
            ExprKind::Urem => Self::build(ctx, cache, &expr.child(0))
                .bvurem(&Self::build(ctx, cache, &expr.child(1))),
            ExprKind::Srem => Self::build(ctx, cache, &expr.child(0))
                .bvsrem(&Self::build(ctx, cache, &expr.child(1))),
            ExprKind::Lshl => Self::build(ctx, cache, &expr.child(0))
                .bvshl(&Self::build(ctx, cache, &expr.child(1))),
            ExprKind::Lshr => Self::build(ctx, cache, &expr.child(0))
                .bvlshr(&Self::build(ctx, cache, &expr.child(1))),
            ExprKind::Ashr => Self::build(ctx, cache, &expr.child(0))
                .bvashr(&Self::build(ctx, cache, &expr.child(1))),
            ExprKind::Band => Self::build(ctx, cache, &expr.child(0))
                .bvand(&Self::build(ctx, cache, &expr.child(1))),
            ExprKind::Bor => Self::build(ctx, cache, &expr.child(0))
                .bvor(&Self::build(ctx, cache, &expr.child(1))),
            ExprKind::Bxor => Self::build(ctx, cache, &expr.child(0))
                .bvxor(&Self::build(ctx, cache, &expr.child(1))),
            ExprKind::Bnot => Self::build(ctx, cache, &expr.child(0)).bvnot(),
            ExprKind::Eq => bool_to_bv1(ctx, &Self::build(ctx, cache, &expr.child(0))
                ._eq(&Self::build(ctx, cache, &expr.child(1)))),
            ExprKind::Ne => bool_to_bv1(
                ctx,
                &Self::build(ctx, cache, &expr.child(0))
                    ._eq(&Self::build(ctx, cache, &expr.child(1)))
                    .not(),
            ),
            ExprKind::Ult => bool_to_bv1(ctx, &Self::build(ctx, cache, &expr.child(0))
                .bvult(&Self::build(ctx, cache, &expr.child(1)))),
            ExprKind::Ule => bool_to_bv1(ctx, &Self::build(ctx, cache, &expr.child(0))
                .bvule(&Self::build(ctx, cache, &expr.child(1)))),
            ExprKind::Uge => bool_to_bv1(ctx, &Self::build(ctx, cache, &expr.child(0))
                .bvuge(&Self::build(ctx, cache, &expr.child(1)))),
            ExprKind::Slt => bool_to_bv1(ctx, &Self::build(ctx, cache, &expr.child(0))
                .bvslt(&Self::build(ctx, cache, &expr.child(1)))),
            ExprKind::Sge => bool_to_bv1(ctx, &Self::build(ctx, cache, &expr.child(0))
                .bvsge(&Self::build(ctx, cache, &expr.child(1)))),
            ExprKind::Concat => Self::build(ctx, cache, &expr.child(0))
                .concat(&Self::build(ctx, cache, &expr.child(1))),
            ExprKind::Extract(offset, width) => {
                let child = Self::build(ctx, cache, &expr.child(0));
                child.extract(offset + width - 1, *offset)
            }
            ExprKind::Sext(width) => {
                let child = Self::build(ctx, cache, &expr.child(0));
                let extra = width - child.get_size();
                child.sign_ext(extra)
            }
            ExprKind::Zext(width) => {
                let child = Self::build(ctx, cache, &expr.child(0));
                let extra = width - child.get_size();
                child.zero_ext(extra)
            }
            ExprKind::Select => {
                let cond = Self::build(ctx, cache, &expr.child(0));
                let t = Self::build(ctx, cache, &expr.child(1));
                let f = Self::build(ctx, cache, &expr.child(2));
                cond._eq(&BV::from_u64(ctx, 1, 1)).ite(&t, &f)
            }
        };

        cache.insert(key, built.clone());
        built
    }

    /// Check satisfiability of `constraints` conjoined with `extra`,
    /// returning a satisfying [`Assignment`] if one exists.
    pub fn check(&self, constraints: &[BitVector], extra: &BitVector) -> Result<Option<Assignment>> {
        let mut cfg = Config::new();
        if let Some(t) = self.timeout {
            cfg.set_timeout_msec(t.as_millis() as u64);
        }
        let ctx = Context::new(&cfg);
        let solver = z3::Solver::new(&ctx);

        let mut cache = HashMap::new();
        for c in constraints {
            let bv = Self::build(&ctx, &mut cache, c);
            solver.assert(&bv._eq(&BV::from_u64(&ctx, 1, 1)));
        }
        let extra_bv = Self::build(&ctx, &mut cache, extra);
        solver.assert(&extra_bv._eq(&BV::from_u64(&ctx, 1, 1)));

        match solver.check() {
            SatResult::Sat => {
                let model = solver.get_model().ok_or_else(|| {
                    EngineError::Solver("sat result produced no model".into())
                })?;
                let mut bindings = HashMap::new();
                for (name, width) in collect_symbols(&[constraints.to_vec(), vec![extra.clone()]].concat()) {
                    let sym = BV::new_const(&ctx, name.clone(), width);
                    if let Some(v) = model.eval(&sym, true) {
                        if let Some(u) = v.as_u64() {
                            let nbytes = ((width + 7) / 8) as usize;
                            bindings.insert(name, u.to_le_bytes()[..nbytes.min(8)].to_vec());
                        }
                    }
                }
                Ok(Some(Assignment { bindings }))
            }
            SatResult::Unsat => Ok(None),
            SatResult::Unknown => Err(EngineError::Solver(
                solver.get_reason_unknown().unwrap_or_else(|| "unknown".into()),
            )),
        }
    }

    /// Evaluate a ground (fully concrete) expression to a `u64`, per
    /// `Solver::evalValue<T>` in the original.
    pub fn eval_value(&self, expr: &BitVector) -> Result<u64> {
        match expr.kind() {
            ExprKind::Const(v) => Ok(*v),
            _ => {
                let result = self.check(&[], expr)?;
                match result {
                    Some(assign) => assign
                        .bindings
                        .values()
                        .next()
                        .map(|b| {
                            let mut buf = [0u8; 8];
                            let n = b.len().min(8);
                            buf[..n].copy_from_slice(&b[..n]);
                            u64::from_le_bytes(buf)
                        })
                        .ok_or_else(|| EngineError::Solver("no binding for eval_value".into())),
                    None => Err(EngineError::Solver("eval_value on unsat expression".into())),
                }
            }
        }
    }
}

fn bool_to_bv1<'ctx>(ctx: &'ctx Context, b: &Bool<'ctx>) -> BV<'ctx> {
    b.ite(&BV::from_u64(ctx, 1, 1), &BV::from_u64(ctx, 0, 1))
}

fn collect_symbols(exprs: &[BitVector]) -> HashMap<String, u32> {
    fn walk(e: &BitVector, out: &mut HashMap<String, u32>) {
        if let ExprKind::Symbol(name) = e.kind() {
            out.insert(name.clone(), e.width());
        }
        for i in 0..e.child_count() {
            walk(&e.child(i), out);
        }
    }
    let mut out = HashMap::new();
    for e in exprs {
        walk(e, &mut out);
    }
    out
}
