//! Execution tree: the branch history of the program under test, used both
//! to build queries for the currently executing path and to pick new paths
//! to explore.
//!
//! Directly ported from `Trace`/`Trace::Node` in the original engine this
//! crate generalizes. The tree intentionally uses `Box`-owned children
//! rather than an `Rc`-shared tree so identity is unambiguous, and `Node`
//! carries a hand-written iterative [`Drop`] for the same reason the
//! original keeps raw pointers instead of `shared_ptr` for `true_branch`/
//! `false_branch`: a naive recursive free can blow the stack on a deep
//! execution tree.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use rand::Rng;

use crate::context::ConcreteStore;
use crate::error::Result;
use crate::expr::BitVector;
use crate::solver::{Assignment, Solver};

/// A single observed branch: the condition evaluated, where it happened,
/// and whether exploring its negation has already been attempted.
pub struct Branch {
    pub bv: BitVector,
    pub was_negated: Cell<bool>,
    pub addr: u32,
    pub pkt_seq_len: u32,
}

/// One step of a path through the execution tree: the branch and the
/// direction (`true`/`false`) taken at it.
pub type PathElement = (Rc<Branch>, bool);
pub type Path = Vec<PathElement>;

/// A node of the execution tree. `value` is `None` for a node that has been
/// allocated as somebody's child but not yet visited by a run.
struct Node {
    value: Option<Rc<Branch>>,
    true_branch: Option<Box<Node>>,
    false_branch: Option<Box<Node>>,
}

impl Node {
    fn placeholder() -> Self {
        Node {
            value: None,
            true_branch: None,
            false_branch: None,
        }
    }

    fn is_placeholder(&self) -> bool {
        self.value.is_none()
    }

    /// Find a seemingly random not-yet-negated branch, preferring nodes
    /// closer to the root. Leaves `path` holding the route to it (with the
    /// final element's direction set to the side that should be negated)
    /// and returns whether one was found.
    fn random_unnegated(&self, k: u32, path: &mut Path, rng: &mut impl Rng) -> bool {
        let branch = match &self.value {
            Some(b) => b.clone(),
            None => return false,
        };

        path.push((branch.clone(), false));

        let found = if rng.gen_bool(0.5) {
            Self::check_branch(&self.true_branch, k, path, rng)
                || Self::check_branch(&self.false_branch, k, path, rng)
        } else {
            Self::check_branch(&self.false_branch, k, path, rng)
                || Self::check_branch(&self.true_branch, k, path, rng)
        };
        if found {
            return true;
        }

        if branch.pkt_seq_len >= k
            && !branch.was_negated.get()
            && (self.true_branch.is_none() || self.false_branch.is_none())
        {
            path.last_mut().unwrap().1 = self.true_branch.is_some();
            return true;
        }

        path.pop();
        false
    }

    fn check_branch(child: &Option<Box<Node>>, k: u32, path: &mut Path, rng: &mut impl Rng) -> bool {
        match child {
            Some(node) => node.random_unnegated(k, path, rng),
            None => false,
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut queue = VecDeque::new();
        if let Some(t) = self.true_branch.take() {
            queue.push_back(t);
        }
        if let Some(f) = self.false_branch.take() {
            queue.push_back(f);
        }
        while let Some(mut node) = queue.pop_front() {
            if let Some(t) = node.true_branch.take() {
                queue.push_back(t);
            }
            if let Some(f) = node.false_branch.take() {
                queue.push_back(f);
            }
            // `node`'s children were already taken, so its own Drop glue
            // has nothing left to recurse into.
        }
    }
}

/// A solver query: a constraint set plus the expression to check for
/// satisfiability under it.
pub struct Query {
    pub constraints: Vec<BitVector>,
    pub expr: BitVector,
}

pub struct Trace {
    root: Box<Node>,
    current: *mut Node,
    cs: Vec<BitVector>,
    assume_cs: Vec<BitVector>,
    /// Addresses of branches recorded since the last `reset`, i.e. the
    /// branch coverage produced by the run in progress.
    visited: Vec<u32>,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

impl Trace {
    pub fn new() -> Self {
        Trace {
            root: Box::new(Node::placeholder()),
            current: std::ptr::null_mut(),
            cs: Vec::new(),
            assume_cs: Vec::new(),
            visited: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.cs.clear();
        self.current = std::ptr::null_mut();
        self.visited.clear();
    }

    /// Branch addresses recorded by the run in progress, in the order they
    /// were hit. The exploration driver feeds these into its
    /// `CoverageFeedback` collaborator to decide whether a run grew
    /// coverage.
    pub fn visited(&self) -> &[u32] {
        &self.visited
    }

    fn current_node(&mut self) -> &mut Node {
        if self.current.is_null() {
            &mut self.root
        } else {
            // SAFETY: `current` only ever points at a `Node` owned by a
            // `Box` reachable from `root`. Children are allocated once and
            // never removed or relocated while the `Trace` is alive, so the
            // pointer stays valid for the `Trace`'s whole lifetime.
            unsafe { &mut *self.current }
        }
    }

    /// Insert (or revisit) a tree node for `branch`, advancing the cursor
    /// down the `condition` edge. Returns whether this is the first time
    /// this node in the tree has been visited.
    fn add_branch(&mut self, branch: Rc<Branch>, condition: bool) -> bool {
        let node = self.current_node();
        let mut first_visit = false;
        if node.is_placeholder() {
            node.value = Some(branch);
            first_visit = true;
        }

        let child = if condition {
            &mut node.true_branch
        } else {
            &mut node.false_branch
        };
        if child.is_none() {
            *child = Some(Box::new(Node::placeholder()));
        }
        self.current = child.as_deref_mut().unwrap() as *mut Node;

        first_visit
    }

    /// Record that `bv` evaluated to `condition` at `pc`, under the packet
    /// sequence length active when this branch was reached.
    pub fn add(&mut self, condition: bool, bv: &BitVector, pc: u32, pkt_seq_len: u32) {
        let constraint = if condition { bv.clone() } else { bv.bnot() };
        self.cs.push(constraint);
        self.visited.push(pc);

        let branch = Rc::new(Branch {
            bv: bv.clone(),
            was_negated: Cell::new(false),
            addr: pc,
            pkt_seq_len,
        });
        self.add_branch(branch, condition);
    }

    /// Register a constraint that holds for every future run, independent
    /// of the execution tree (e.g. an input-format constraint).
    pub fn assume(&mut self, constraint: &BitVector) {
        self.assume_cs.push(constraint.clone());
    }

    /// Build a query asking whether `bv` is satisfiable under the
    /// currently tracked path constraints.
    pub fn get_query(&self, bv: &BitVector) -> Query {
        Query {
            constraints: self.cs.clone(),
            expr: bv.clone(),
        }
    }

    fn new_query(&self, path: &Path) -> Query {
        let query_idx = path.len() - 1;
        let mut constraints: Vec<BitVector> = self.assume_cs.clone();

        for (i, (branch, cond)) in path.iter().enumerate() {
            let bvcond = if *cond { branch.bv.clone() } else { branch.bv.bnot() };
            if i < query_idx {
                constraints.push(bvcond);
                continue;
            }
            // The last element on the path: negating it is how a new path
            // gets discovered.
            branch.was_negated.set(true);
            return Query {
                constraints,
                expr: bvcond.bnot(),
            };
        }
        unreachable!("path passed to new_query must be non-empty")
    }

    /// Search the tree for an unnegated branch whose packet-sequence length
    /// is at least `k`, and try to solve its negation. Loops past unsat
    /// candidates until a satisfying assignment is found or the tree is
    /// exhausted.
    pub fn find_new_path(
        &mut self,
        k: u32,
        solver: &Solver,
        rng: &mut impl Rng,
    ) -> Result<Option<Assignment>> {
        loop {
            let mut path: Path = Vec::new();
            if !self.root.random_unnegated(k, &mut path, rng) {
                return Ok(None);
            }

            let query = self.new_query(&path);
            if let Some(assign) = solver.check(&query.constraints, &query.expr)? {
                return Ok(Some(assign));
            }
            // Unsatisfiable: `randomUnnegated` already marked the branch as
            // negated, so the next iteration picks a different candidate.
        }
    }

    /// Ask whether the accumulated assumptions are jointly satisfiable at
    /// all, independent of any branch in the tree.
    pub fn from_assume(&self, solver: &Solver) -> Result<Option<Assignment>> {
        solver.check(&self.assume_cs, &BitVector::constant(1, 1))
    }

    pub fn get_store(&self, assign: &Assignment) -> ConcreteStore {
        assign.bindings.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(42)
    }

    #[test]
    fn single_branch_can_be_negated() {
        let mut trace = Trace::new();
        let bv = BitVector::symbol(1, "c");
        trace.add(true, &bv, 0x1000, 1);

        let solver = Solver::new();
        let mut r = rng();
        let assign = trace.find_new_path(1, &solver, &mut r).unwrap();
        assert!(assign.is_some());
    }

    #[test]
    fn negating_twice_exhausts_the_branch() {
        let mut trace = Trace::new();
        let bv = BitVector::symbol(1, "c");
        trace.add(true, &bv, 0x1000, 1);

        let solver = Solver::new();
        let mut r = rng();
        assert!(trace.find_new_path(1, &solver, &mut r).unwrap().is_some());
        // The single branch was marked negated by the first call; nothing
        // else exists in the tree to select.
        assert!(trace.find_new_path(1, &solver, &mut r).unwrap().is_none());
    }

    #[test]
    fn pkt_seq_len_bound_excludes_shallow_branches() {
        let mut trace = Trace::new();
        let bv = BitVector::symbol(1, "c");
        trace.add(true, &bv, 0x1000, 1);

        let solver = Solver::new();
        let mut r = rng();
        assert!(trace.find_new_path(5, &solver, &mut r).unwrap().is_none());
    }

    #[test]
    fn assume_is_checked_independent_of_tree() {
        let mut trace = Trace::new();
        let x = BitVector::symbol(8, "x");
        trace.assume(&x.ult(&BitVector::constant(8, 10)));

        let solver = Solver::new();
        let assign = trace.from_assume(&solver).unwrap();
        assert!(assign.is_some());
    }

    #[test]
    fn deep_tree_drops_without_stack_overflow() {
        let mut trace = Trace::new();
        for i in 0..20_000u32 {
            let bv = BitVector::symbol(1, format!("c{i}"));
            trace.add(true, &bv, i, 1);
        }
        drop(trace);
    }
}
