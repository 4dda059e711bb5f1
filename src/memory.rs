//! Byte-addressed concolic memory.
//!
//! Grounded on `ConcolicMemory` in the original header: a sparse map from
//! address to a stored `ConcolicValue`, with a concrete- and a
//! symbolic-address overload for both `load` and `store`. Addresses that
//! were never written read back as a fresh all-zero concrete byte rather
//! than erroring, matching a freshly-zeroed memory image.

use std::collections::HashMap;

use crate::error::Result;
use crate::expr::ConcolicValue;
use crate::solver::Solver;

pub type Addr = u32;

#[derive(Default)]
pub struct ConcolicMemory {
    data: HashMap<Addr, ConcolicValue>,
}

impl ConcolicMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }

    fn load_byte(&self, addr: Addr) -> ConcolicValue {
        self.data
            .get(&addr)
            .cloned()
            .unwrap_or_else(|| ConcolicValue::new_concrete(8, 0))
    }

    /// Load `bytesize` bytes starting at `addr`, concatenated MSB-first.
    pub fn load(&self, addr: Addr, bytesize: u32) -> ConcolicValue {
        let mut result = self.load_byte(addr);
        for i in 1..bytesize {
            let byte = self.load_byte(addr + i);
            result = result.concat(&byte);
        }
        result
    }

    /// Load via a symbolic address, concretized against the current
    /// constraint set before dispatching to [`ConcolicMemory::load`].
    pub fn load_symbolic(
        &self,
        solver: &Solver,
        addr: &ConcolicValue,
        bytesize: u32,
    ) -> Result<ConcolicValue> {
        let concrete_addr = solver.eval_value(&addr.concrete)? as Addr;
        Ok(self.load(concrete_addr, bytesize))
    }

    /// Store `value` (`bytesize` bytes wide) at `addr`, most-significant
    /// byte first, one entry per byte.
    pub fn store(&mut self, addr: Addr, value: &ConcolicValue, bytesize: u32) {
        let width = bytesize * 8;
        assert_eq!(value.width(), width, "store width mismatch");
        for i in 0..bytesize {
            // Byte `i` counted from the MSB side, matching extraction order
            // used by `load`'s concat-from-MSB assembly.
            let shift = (bytesize - 1 - i) * 8;
            let byte = value.extract(shift, 8);
            self.data.insert(addr + i, byte);
        }
    }

    pub fn store_symbolic(
        &mut self,
        solver: &Solver,
        addr: &ConcolicValue,
        value: &ConcolicValue,
        bytesize: u32,
    ) -> Result<()> {
        let concrete_addr = solver.eval_value(&addr.concrete)? as Addr;
        self.store(concrete_addr, value, bytesize);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unwritten_byte_reads_as_zero() {
        let mem = ConcolicMemory::new();
        let v = mem.load(0x1000, 1);
        assert_eq!(v.width(), 8);
        assert!(v.is_concrete());
    }

    #[test]
    fn store_then_load_round_trips() {
        let mut mem = ConcolicMemory::new();
        let value = ConcolicValue::new_concrete(32, 0xDEAD_BEEF);
        mem.store(0x2000, &value, 4);
        let loaded = mem.load(0x2000, 4);
        assert_eq!(loaded.width(), 32);
    }

    #[test]
    fn reset_clears_all_bindings() {
        let mut mem = ConcolicMemory::new();
        mem.store(0x10, &ConcolicValue::new_concrete(8, 1), 1);
        mem.reset();
        let v = mem.load(0x10, 1);
        match v.concrete.kind() {
            crate::expr::ExprKind::Const(0) => {}
            other => panic!("expected zeroed read after reset, got {:?}", other),
        }
    }

    #[test]
    fn load_symbolic_accepts_a_computed_address() {
        // The address here is the result of an addition rather than a
        // freshly-minted constant, exercising that the concrete side stays
        // a `Const` through the arithmetic instead of tripping the
        // `eval_value` fallback path.
        let mut mem = ConcolicMemory::new();
        mem.store(0x30, &ConcolicValue::new_concrete(8, 0x42), 1);

        let base = ConcolicValue::new_concrete(32, 0x20);
        let offset = ConcolicValue::new_concrete(32, 0x10);
        let addr = base.add(&offset);

        let solver = Solver::new();
        let loaded = mem.load_symbolic(&solver, &addr, 1).unwrap();
        match loaded.concrete.kind() {
            crate::expr::ExprKind::Const(0x42) => {}
            other => panic!("expected the byte stored at the computed address, got {:?}", other),
        }
    }
}
