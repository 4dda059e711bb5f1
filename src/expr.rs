//! Immutable bit-vector expression DAG and the concolic value pair built on
//! top of it.
//!
//! `ExprKind` is a tagged variant rather than a trait-object hierarchy:
//! expressions are values, and the solver facade is the only place that
//! needs to dispatch on the operator.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Operator tag for a node of the expression DAG.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum ExprKind {
    /// A concrete constant of `width` bits.
    Const(u64),
    /// A read of a named symbolic array, interpreted MSB-first.
    Symbol(String),
    Add,
    Sub,
    Mul,
    Udiv,
    Sdiv,
    Urem,
    Srem,
    Lshl,
    Lshr,
    Ashr,
    Band,
    Bor,
    Bxor,
    Bnot,
    Eq,
    Ne,
    Ult,
    Ule,
    Uge,
    Slt,
    Sge,
    Concat,
    /// `(offset, width)` in bits, offset counted from the LSB.
    Extract(u32, u32),
    Sext(u32),
    Zext(u32),
    /// `(condition, if_true, if_false)` children order is fixed: cond, t, f.
    Select,
}

/// A node of the immutable bit-vector expression DAG.
///
/// Nodes are append-only and shared via `Rc`; the DAG is never mutated
/// after construction, so cheap structural sharing is safe.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct ExprNode {
    pub width: u32,
    pub kind: ExprKind,
    pub children: Vec<BitVector>,
}

/// An opaque handle to a node of the expression DAG.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct BitVector(pub Rc<ExprNode>);

fn mask_to_width(width: u32, v: u64) -> u64 {
    if width >= 64 {
        v
    } else {
        v & ((1u64 << width) - 1)
    }
}

fn sign_extend_to_i64(width: u32, v: u64) -> i64 {
    if width >= 64 {
        v as i64
    } else {
        let shift = 64 - width;
        ((v << shift) as i64) >> shift
    }
}

fn const_of(bv: &BitVector) -> Option<u64> {
    match bv.kind() {
        ExprKind::Const(v) => Some(*v),
        _ => None,
    }
}

/// Fold a unary operator over a constant operand into a single `Const`, so
/// the concrete side of a `ConcolicValue` stays a constant through any chain
/// of operators instead of accumulating an operator tree.
fn fold_unary(width: u32, kind: &ExprKind, a: &BitVector) -> Option<BitVector> {
    let av = const_of(a)?;
    let result = match kind {
        ExprKind::Bnot => mask_to_width(width, !av),
        _ => return None,
    };
    Some(BitVector::constant(width, result))
}

/// Fold a binary operator over two constant operands into a single `Const`.
fn fold_binary(width: u32, kind: &ExprKind, a: &BitVector, b: &BitVector) -> Option<BitVector> {
    let av = const_of(a)?;
    let bv = const_of(b)?;
    let aw = a.width();
    let result = match kind {
        ExprKind::Add => mask_to_width(width, av.wrapping_add(bv)),
        ExprKind::Sub => mask_to_width(width, av.wrapping_sub(bv)),
        ExprKind::Mul => mask_to_width(width, av.wrapping_mul(bv)),
        ExprKind::Udiv => av.checked_div(bv).map(|v| mask_to_width(width, v)).unwrap_or(0),
        ExprKind::Sdiv => {
            let (sa, sb) = (sign_extend_to_i64(aw, av), sign_extend_to_i64(aw, bv));
            sa.checked_div(sb).map(|v| mask_to_width(width, v as u64)).unwrap_or(0)
        }
        ExprKind::Urem => av.checked_rem(bv).map(|v| mask_to_width(width, v)).unwrap_or(0),
        ExprKind::Srem => {
            let (sa, sb) = (sign_extend_to_i64(aw, av), sign_extend_to_i64(aw, bv));
            sa.checked_rem(sb).map(|v| mask_to_width(width, v as u64)).unwrap_or(0)
        }
        ExprKind::Lshl => {
            if bv >= aw as u64 {
                0
            } else {
                mask_to_width(width, av << bv)
            }
        }
        ExprKind::Lshr => {
            if bv >= aw as u64 {
                0
            } else {
                mask_to_width(width, av >> bv)
            }
        }
        ExprKind::Ashr => {
            let sa = sign_extend_to_i64(aw, av);
            let shift = bv.min(63) as u32;
            mask_to_width(width, (sa >> shift) as u64)
        }
        ExprKind::Band => mask_to_width(width, av & bv),
        ExprKind::Bor => mask_to_width(width, av | bv),
        ExprKind::Bxor => mask_to_width(width, av ^ bv),
        ExprKind::Eq => (av == bv) as u64,
        ExprKind::Ne => (av != bv) as u64,
        ExprKind::Ult => (av < bv) as u64,
        ExprKind::Ule => (av <= bv) as u64,
        ExprKind::Uge => (av >= bv) as u64,
        ExprKind::Slt => (sign_extend_to_i64(aw, av) < sign_extend_to_i64(aw, bv)) as u64,
        ExprKind::Sge => (sign_extend_to_i64(aw, av) >= sign_extend_to_i64(aw, bv)) as u64,
        ExprKind::Concat => {
            let bw = b.width();
            mask_to_width(width, (av << bw) | bv)
        }
        _ => return None,
    };
    Some(BitVector::constant(width, result))
}

impl BitVector {
    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    pub fn child_count(&self) -> usize {
        self.0.children.len()
    }

    pub fn child(&self, i: usize) -> BitVector {
        self.0.children[i].clone()
    }

    /// Identity key for memoizing Z3 translation across the shared DAG.
    pub fn raw_key(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }

    fn leaf(width: u32, kind: ExprKind) -> Self {
        BitVector(Rc::new(ExprNode {
            width,
            kind,
            children: vec![],
        }))
    }

    fn unary(width: u32, kind: ExprKind, a: BitVector) -> Self {
        if let Some(folded) = fold_unary(width, &kind, &a) {
            return folded;
        }
        BitVector(Rc::new(ExprNode {
            width,
            kind,
            children: vec![a],
        }))
    }

    fn binary(width: u32, kind: ExprKind, a: BitVector, b: BitVector) -> Self {
        assert_eq!(a.width(), b.width(), "operand width mismatch in {:?}", kind);
        if let Some(folded) = fold_binary(width, &kind, &a, &b) {
            return folded;
        }
        BitVector(Rc::new(ExprNode {
            width,
            kind,
            children: vec![a, b],
        }))
    }

    pub fn constant(width: u32, value: u64) -> Self {
        Self::leaf(width, ExprKind::Const(value))
    }

    pub fn symbol(width: u32, name: impl Into<String>) -> Self {
        Self::leaf(width, ExprKind::Symbol(name.into()))
    }

    pub fn is_concrete(&self) -> bool {
        match &self.0.kind {
            ExprKind::Const(_) => true,
            ExprKind::Symbol(_) => false,
            _ => self.0.children.iter().all(BitVector::is_concrete),
        }
    }

    pub fn depth(&self) -> u32 {
        1 + self
            .0
            .children
            .iter()
            .map(BitVector::depth)
            .max()
            .unwrap_or(0)
    }

    pub fn add(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Add, self.clone(), rhs.clone())
    }
    pub fn sub(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Sub, self.clone(), rhs.clone())
    }
    pub fn mul(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Mul, self.clone(), rhs.clone())
    }
    pub fn udiv(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Udiv, self.clone(), rhs.clone())
    }
    pub fn sdiv(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Sdiv, self.clone(), rhs.clone())
    }
    pub fn urem(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Urem, self.clone(), rhs.clone())
    }
    pub fn srem(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Srem, self.clone(), rhs.clone())
    }
    pub fn lshl(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Lshl, self.clone(), rhs.clone())
    }
    pub fn lshr(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Lshr, self.clone(), rhs.clone())
    }
    pub fn ashr(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Ashr, self.clone(), rhs.clone())
    }
    pub fn band(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Band, self.clone(), rhs.clone())
    }
    pub fn bor(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Bor, self.clone(), rhs.clone())
    }
    pub fn bxor(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(self.width(), ExprKind::Bxor, self.clone(), rhs.clone())
    }

    pub fn bnot(&self) -> BitVector {
        BitVector::unary(self.width(), ExprKind::Bnot, self.clone())
    }

    pub fn eq(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(1, ExprKind::Eq, self.clone(), rhs.clone())
    }
    pub fn ne(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(1, ExprKind::Ne, self.clone(), rhs.clone())
    }
    pub fn ult(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(1, ExprKind::Ult, self.clone(), rhs.clone())
    }
    pub fn ule(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(1, ExprKind::Ule, self.clone(), rhs.clone())
    }
    pub fn uge(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(1, ExprKind::Uge, self.clone(), rhs.clone())
    }
    pub fn slt(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(1, ExprKind::Slt, self.clone(), rhs.clone())
    }
    pub fn sge(&self, rhs: &BitVector) -> BitVector {
        BitVector::binary(1, ExprKind::Sge, self.clone(), rhs.clone())
    }

    pub fn concat(&self, rhs: &BitVector) -> BitVector {
        let width = self.width() + rhs.width();
        if let Some(folded) = fold_binary(width, &ExprKind::Concat, self, rhs) {
            return folded;
        }
        BitVector(Rc::new(ExprNode {
            width,
            kind: ExprKind::Concat,
            children: vec![self.clone(), rhs.clone()],
        }))
    }

    pub fn extract(&self, offset: u32, width: u32) -> BitVector {
        assert!(offset + width <= self.width(), "extract out of bounds");
        if let Some(v) = const_of(self) {
            return BitVector::constant(width, mask_to_width(width, v >> offset));
        }
        BitVector(Rc::new(ExprNode {
            width,
            kind: ExprKind::Extract(offset, width),
            children: vec![self.clone()],
        }))
    }

    pub fn sext(&self, width: u32) -> BitVector {
        assert!(width >= self.width(), "sext must not shrink a value");
        if let Some(v) = const_of(self) {
            let extended = sign_extend_to_i64(self.width(), v) as u64;
            return BitVector::constant(width, mask_to_width(width, extended));
        }
        BitVector(Rc::new(ExprNode {
            width,
            kind: ExprKind::Sext(width),
            children: vec![self.clone()],
        }))
    }

    pub fn zext(&self, width: u32) -> BitVector {
        assert!(width >= self.width(), "zext must not shrink a value");
        if let Some(v) = const_of(self) {
            return BitVector::constant(width, v);
        }
        BitVector(Rc::new(ExprNode {
            width,
            kind: ExprKind::Zext(width),
            children: vec![self.clone()],
        }))
    }

    /// 3-way choose. When `cond` is a constant, folds directly to whichever
    /// branch it selects rather than building a `Select` node around a
    /// foregone condition.
    pub fn select(cond: &BitVector, t: &BitVector, f: &BitVector) -> BitVector {
        assert_eq!(cond.width(), 1, "select condition must be 1-bit");
        assert_eq!(t.width(), f.width(), "select branches width mismatch");
        if let Some(c) = const_of(cond) {
            return if c != 0 { t.clone() } else { f.clone() };
        }
        BitVector(Rc::new(ExprNode {
            width: t.width(),
            kind: ExprKind::Select,
            children: vec![cond.clone(), t.clone(), f.clone()],
        }))
    }

    pub fn pretty_print_str(&self) -> String {
        if self.0.children.is_empty() {
            format!("{:?}", self.0.kind)
        } else {
            let args = self
                .0
                .children
                .iter()
                .map(BitVector::pretty_print_str)
                .collect::<Vec<_>>()
                .join(", ");
            format!("{:?}({})", self.0.kind, args)
        }
    }
}

/// A concrete value paired with an optional symbolic expression of the same
/// width.
///
/// The `concrete` side must always equal what the same operator sequence
/// would compute purely on concrete inputs; this is the concolic consistency
/// invariant every operator below must uphold.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConcolicValue {
    pub concrete: BitVector,
    pub symbolic: Option<BitVector>,
}

impl ConcolicValue {
    pub fn new_concrete(width: u32, value: u64) -> Self {
        Self {
            concrete: BitVector::constant(width, value),
            symbolic: None,
        }
    }

    pub fn new_symbolic(concrete: BitVector, symbolic: BitVector) -> Self {
        assert_eq!(
            concrete.width(),
            symbolic.width(),
            "concrete/symbolic width mismatch"
        );
        Self {
            concrete,
            symbolic: Some(symbolic),
        }
    }

    pub fn width(&self) -> u32 {
        self.concrete.width()
    }

    pub fn is_concrete(&self) -> bool {
        self.symbolic.is_none()
    }

    /// The expression the solver should reason about: the symbolic side if
    /// present, otherwise the concrete constant (promotion rule).
    pub fn sym_or_concrete(&self) -> BitVector {
        self.symbolic.clone().unwrap_or_else(|| self.concrete.clone())
    }

    fn lift(a: &ConcolicValue, b: &ConcolicValue) -> (BitVector, BitVector, bool) {
        match (&a.symbolic, &b.symbolic) {
            (None, None) => (a.concrete.clone(), b.concrete.clone(), false),
            _ => (a.sym_or_concrete(), b.sym_or_concrete(), true),
        }
    }

    pub fn add(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.add(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.add(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn sub(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.sub(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.sub(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn mul(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.mul(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.mul(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn udiv(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.udiv(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.udiv(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn sdiv(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.sdiv(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.sdiv(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn urem(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.urem(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.urem(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn srem(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.srem(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.srem(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn lshl(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.lshl(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.lshl(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn lshr(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.lshr(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.lshr(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn ashr(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.ashr(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.ashr(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn band(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.band(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.band(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn bor(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.bor(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.bor(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn bxor(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.bxor(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.bxor(&r));
        ConcolicValue { concrete, symbolic }
    }

    pub fn eq(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.eq(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.eq(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn ne(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.ne(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.ne(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn ult(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.ult(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.ult(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn ule(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.ule(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.ule(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn uge(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.uge(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.uge(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn slt(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.slt(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.slt(&r));
        ConcolicValue { concrete, symbolic }
    }
    pub fn sge(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.sge(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.sge(&r));
        ConcolicValue { concrete, symbolic }
    }

    pub fn bnot(&self) -> ConcolicValue {
        ConcolicValue {
            concrete: self.concrete.bnot(),
            symbolic: self.symbolic.as_ref().map(BitVector::bnot),
        }
    }

    pub fn concat(&self, rhs: &ConcolicValue) -> ConcolicValue {
        let concrete = self.concrete.concat(&rhs.concrete);
        let (l, r, has_symbolic) = Self::lift(self, rhs);
        let symbolic = has_symbolic.then(|| l.concat(&r));
        ConcolicValue { concrete, symbolic }
    }

    pub fn extract(&self, offset: u32, width: u32) -> ConcolicValue {
        ConcolicValue {
            concrete: self.concrete.extract(offset, width),
            symbolic: self.symbolic.as_ref().map(|s| s.extract(offset, width)),
        }
    }

    pub fn sext(&self, width: u32) -> ConcolicValue {
        ConcolicValue {
            concrete: self.concrete.sext(width),
            symbolic: self.symbolic.as_ref().map(|s| s.sext(width)),
        }
    }

    pub fn zext(&self, width: u32) -> ConcolicValue {
        ConcolicValue {
            concrete: self.concrete.zext(width),
            symbolic: self.symbolic.as_ref().map(|s| s.zext(width)),
        }
    }

    /// 3-way choose on a 1-bit condition. The concrete shadow follows
    /// whichever branch the condition's concrete side selects, even though
    /// the symbolic side is a proper ite() over all three children.
    pub fn select(cond: &ConcolicValue, t: &ConcolicValue, f: &ConcolicValue) -> ConcolicValue {
        assert_eq!(cond.width(), 1, "select condition must be 1-bit");
        assert_eq!(t.width(), f.width(), "select branches width mismatch");

        let cond_true = match cond.concrete.kind() {
            ExprKind::Const(v) => *v != 0,
            _ => unreachable!("concrete side of ConcolicValue must be a constant"),
        };
        let concrete = if cond_true {
            t.concrete.clone()
        } else {
            f.concrete.clone()
        };

        let symbolic = if cond.is_concrete() && t.is_concrete() && f.is_concrete() {
            None
        } else {
            Some(BitVector::select(
                &cond.sym_or_concrete(),
                &t.sym_or_concrete(),
                &f.sym_or_concrete(),
            ))
        };

        ConcolicValue { concrete, symbolic }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn c(width: u32, value: u64) -> ConcolicValue {
        ConcolicValue::new_concrete(width, value)
    }

    fn s(width: u32, value: u64, name: &str) -> ConcolicValue {
        ConcolicValue::new_symbolic(
            BitVector::constant(width, value),
            BitVector::symbol(width, name),
        )
    }

    #[test]
    fn concrete_shadow_matches_for_add() {
        let a = c(32, 10);
        let b = c(32, 5);
        let r = a.add(&b);
        assert_eq!(r.concrete, BitVector::constant(32, 15));
        assert!(r.symbolic.is_none());
    }

    #[test]
    fn promotion_lifts_concrete_operand() {
        let a = s(8, 3, "x");
        let b = c(8, 4);
        let r = a.add(&b);
        assert_eq!(r.concrete, BitVector::constant(8, 7));
        assert!(r.symbolic.is_some());
        // The promoted side must be a constant carrying the concrete value.
        match r.symbolic.unwrap().kind() {
            ExprKind::Add => {}
            other => panic!("expected Add, got {:?}", other),
        }
    }

    #[test]
    fn select_concrete_shadow_follows_condition() {
        let cond = s(1, 1, "c");
        let t = c(8, 0xAA);
        let f = c(8, 0x55);
        let r = ConcolicValue::select(&cond, &t, &f);
        assert_eq!(r.concrete, BitVector::constant(8, 0xAA));
        assert!(r.symbolic.is_some());
    }

    #[test]
    #[should_panic(expected = "operand width mismatch")]
    fn width_mismatch_is_fatal() {
        let a = BitVector::constant(8, 1);
        let b = BitVector::constant(16, 1);
        let _ = a.add(&b);
    }

    #[test]
    fn concat_widens() {
        let a = c(8, 0x12);
        let b = c(8, 0x34);
        let r = a.concat(&b);
        assert_eq!(r.width(), 16);
    }

    #[test]
    fn dag_nodes_are_shared_not_duplicated() {
        let shared = BitVector::symbol(8, "x");
        let left = shared.add(&BitVector::constant(8, 1));
        let right = shared.add(&BitVector::constant(8, 2));
        // Both expressions reference the same underlying Rc-backed node.
        assert!(Rc::ptr_eq(&shared.0, &left.0.children[0].0));
        assert!(Rc::ptr_eq(&shared.0, &right.0.children[0].0));
    }

    #[test]
    fn chained_arithmetic_on_derived_values_stays_constant() {
        // A long chain of operations on a concolic value's concrete side
        // must keep collapsing to `Const`, not build up an operator tree:
        // every downstream consumer (select, bvc_to_bytes, eval_value)
        // pattern-matches on `Const`.
        let a = c(32, 10);
        let b = c(32, 5);
        let r = a.add(&b).mul(&c(32, 2)).sub(&c(32, 3));
        assert_eq!(r.concrete, BitVector::constant(32, 27));
    }

    #[test]
    fn comparison_of_derived_values_folds_to_constant() {
        let a = c(8, 10);
        let b = c(8, 5);
        let sum = a.add(&b);
        let cmp = sum.ult(&c(8, 20));
        match cmp.concrete.kind() {
            ExprKind::Const(1) => {}
            other => panic!("expected a folded true comparison, got {:?}", other),
        }
    }

    #[test]
    fn select_on_constant_condition_folds_to_a_branch() {
        let cond = BitVector::constant(1, 1);
        let t = BitVector::symbol(8, "t");
        let f = BitVector::symbol(8, "f");
        let r = BitVector::select(&cond, &t, &f);
        match r.kind() {
            ExprKind::Symbol(name) => assert_eq!(name, "t"),
            other => panic!("expected the selected branch itself, got {:?}", other),
        }
    }

    #[test]
    fn extract_sext_zext_fold_over_constants() {
        let v = BitVector::constant(16, 0xFF80);
        assert_eq!(v.extract(8, 8), BitVector::constant(8, 0xFF));

        let narrow = BitVector::constant(8, 0x80);
        assert_eq!(narrow.sext(16), BitVector::constant(16, 0xFF80));
        assert_eq!(narrow.zext(16), BitVector::constant(16, 0x0080));
    }
}
