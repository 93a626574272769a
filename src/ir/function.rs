//! Function bodies: the op arena, regions and the value table.
//!
//! A [`Function`] owns every op, region and value of one kernel. Ops are
//! stored in an arena addressed by [`OpId`]; erasing an op leaves a tombstone
//! so that ids captured in a snapshot never alias a different op later.
//!
//! Regions are ordered op lists. The function body is a region without a
//! parent op; every other region belongs to exactly one op (a loop body).

use std::fmt;

use crate::{
    ir::{AllocOp, ForOp, Op, OpId, OpKind, RegionId, Type, ValueId},
    Result,
};

/// Source location attached to a function or diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Location {
    /// No source information
    #[default]
    Unknown,
    /// `file:line:col`
    FileLineCol {
        /// Source file
        file: String,
        /// 1-based line
        line: u32,
        /// 1-based column
        col: u32,
    },
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("loc(unknown)"),
            Self::FileLineCol { file, line, col } => write!(f, "loc({file}:{line}:{col})"),
        }
    }
}

/// Where a new op is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    /// Immediately before an existing op
    Before(OpId),
    /// Immediately after an existing op
    After(OpId),
    /// First op of a region
    Start(RegionId),
    /// Last op of a region
    End(RegionId),
}

/// One operand slot of one op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UseSite {
    /// The using op
    pub user: OpId,
    /// Operand number within the user
    pub operand: usize,
}

/// Type and defining op of an SSA value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInfo {
    /// Type of the value
    pub ty: Type,
    /// Defining op, `None` until the op is inserted
    pub def: Option<OpId>,
}

#[derive(Debug, Clone, Default)]
struct Region {
    ops: Vec<OpId>,
    parent: Option<OpId>,
}

/// A kernel function body.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    location: Location,
    ops: Vec<Option<Op>>,
    regions: Vec<Region>,
    values: Vec<ValueInfo>,
    body: RegionId,
}

impl Function {
    /// Creates an empty function.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: Location::Unknown,
            ops: Vec::new(),
            regions: vec![Region::default()],
            values: Vec::new(),
            body: RegionId::new(0),
        }
    }

    /// The function's symbol name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The function's source location.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Sets the function's source location.
    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    /// The top-level region.
    #[must_use]
    pub fn body(&self) -> RegionId {
        self.body
    }

    // ── Lookup ──────────────────────────────────────────────────────────

    /// Returns the op if it is live.
    #[must_use]
    pub fn op(&self, id: OpId) -> Option<&Op> {
        self.ops.get(id.index()).and_then(Option::as_ref)
    }

    /// Returns the op or a malformed-IR error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the op was erased or never existed.
    pub fn op_checked(&self, id: OpId) -> Result<&Op> {
        self.op(id)
            .ok_or_else(|| malformed_error!("{} is not a live op in @{}", id, self.name))
    }

    fn op_mut_checked(&mut self, id: OpId) -> Result<&mut Op> {
        let name = &self.name;
        self.ops
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| malformed_error!("{} is not a live op in @{}", id, name))
    }

    /// Returns true if the op exists and has not been erased.
    #[must_use]
    pub fn is_live(&self, id: OpId) -> bool {
        self.op(id).is_some()
    }

    /// Number of live ops.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.ops.iter().filter(|op| op.is_some()).count()
    }

    /// Iterates all live ops in arena order.
    pub fn ops(&self) -> impl Iterator<Item = (OpId, &Op)> {
        self.ops
            .iter()
            .enumerate()
            .filter_map(|(idx, op)| op.as_ref().map(|op| (OpId::new(idx), op)))
    }

    /// Returns the allocation payload of an `alloc` op.
    #[must_use]
    pub fn alloc(&self, id: OpId) -> Option<&AllocOp> {
        self.op(id).and_then(|op| op.kind().as_alloc())
    }

    /// Mutable allocation payload, used to strip directives.
    pub fn alloc_mut(&mut self, id: OpId) -> Option<&mut AllocOp> {
        match self.ops.get_mut(id.index()).and_then(Option::as_mut) {
            Some(op) => match op.kind_mut() {
                OpKind::Alloc(alloc) => Some(alloc),
                _ => None,
            },
            None => None,
        }
    }

    /// Returns the loop payload of a `for` op.
    #[must_use]
    pub fn for_op(&self, id: OpId) -> Option<&ForOp> {
        self.op(id).and_then(|op| op.kind().as_for())
    }

    /// Mutable loop payload.
    pub fn for_op_mut(&mut self, id: OpId) -> Option<&mut ForOp> {
        match self.ops.get_mut(id.index()).and_then(Option::as_mut) {
            Some(op) => match op.kind_mut() {
                OpKind::For(for_op) => Some(for_op),
                _ => None,
            },
            None => None,
        }
    }

    /// Type and definition of a value.
    #[must_use]
    pub fn value(&self, id: ValueId) -> Option<&ValueInfo> {
        self.values.get(id.index())
    }

    /// Type of a value.
    #[must_use]
    pub fn value_type(&self, id: ValueId) -> Option<&Type> {
        self.value(id).map(|info| &info.ty)
    }

    /// Live op defining a value.
    #[must_use]
    pub fn defining_op(&self, id: ValueId) -> Option<OpId> {
        self.value(id)
            .and_then(|info| info.def)
            .filter(|op| self.is_live(*op))
    }

    /// Number of values ever created.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Returns the constant held by a value defined by a `constant` op.
    #[must_use]
    pub fn constant_value(&self, id: ValueId) -> Option<i64> {
        let def = self.defining_op(id)?;
        match self.op(def)?.kind() {
            OpKind::Constant { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Ops of a region in order.
    #[must_use]
    pub fn region_ops(&self, region: RegionId) -> &[OpId] {
        self.regions
            .get(region.index())
            .map_or(&[], |region| region.ops.as_slice())
    }

    /// The op owning a region, `None` for the function body.
    #[must_use]
    pub fn region_parent(&self, region: RegionId) -> Option<OpId> {
        self.regions.get(region.index()).and_then(|r| r.parent)
    }

    // ── Structure queries ───────────────────────────────────────────────

    /// The op whose region contains `op`, `None` for top-level ops.
    #[must_use]
    pub fn parent_op(&self, op: OpId) -> Option<OpId> {
        let region = self.op(op)?.parent();
        self.region_parent(region)
    }

    /// All loops containing `op`, innermost first.
    #[must_use]
    pub fn enclosing_loops(&self, op: OpId) -> Vec<OpId> {
        let mut loops = Vec::new();
        let mut current = self.parent_op(op);
        while let Some(parent) = current {
            if self.for_op(parent).is_some() {
                loops.push(parent);
            }
            current = self.parent_op(parent);
        }
        loops
    }

    /// The innermost loop containing `op`.
    #[must_use]
    pub fn nearest_enclosing_loop(&self, op: OpId) -> Option<OpId> {
        self.enclosing_loops(op).into_iter().next()
    }

    /// Returns true if `op` is nested (at any depth) inside a region of `ancestor`.
    #[must_use]
    pub fn is_proper_ancestor(&self, ancestor: OpId, op: OpId) -> bool {
        let mut current = self.parent_op(op);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent_op(parent);
        }
        false
    }

    /// Index of `op` within its region.
    #[must_use]
    pub fn position(&self, op: OpId) -> Option<usize> {
        let region = self.op(op)?.parent();
        self.region_ops(region).iter().position(|id| *id == op)
    }

    /// All live ops in pre-order (an op precedes the ops of its regions).
    #[must_use]
    pub fn walk(&self) -> Vec<OpId> {
        let mut order = Vec::with_capacity(self.ops.len());
        self.walk_region(self.body, &mut order);
        order
    }

    /// All live ops nested in `op`'s regions, in pre-order, excluding `op`.
    #[must_use]
    pub fn walk_nested(&self, op: OpId) -> Vec<OpId> {
        let mut order = Vec::new();
        if let Some(region) = self.op(op).and_then(|op| op.kind().region()) {
            self.walk_region(region, &mut order);
        }
        order
    }

    fn walk_region(&self, region: RegionId, order: &mut Vec<OpId>) {
        for &id in self.region_ops(region) {
            order.push(id);
            if let Some(nested) = self.op(id).and_then(|op| op.kind().region()) {
                self.walk_region(nested, order);
            }
        }
    }

    /// Visits every live op in pre-order.
    pub fn visit<F>(&self, mut visitor: F)
    where
        F: FnMut(OpId, &Op),
    {
        for id in self.walk() {
            if let Some(op) = self.op(id) {
                visitor(id, op);
            }
        }
    }

    /// Every operand slot that reads `value`, in pre-order.
    #[must_use]
    pub fn uses_of(&self, value: ValueId) -> Vec<UseSite> {
        let mut uses = Vec::new();
        self.visit(|user, op| {
            for (operand, used) in op.kind().operands().into_iter().enumerate() {
                if used == value {
                    uses.push(UseSite { user, operand });
                }
            }
        });
        uses
    }

    // ── Mutation ────────────────────────────────────────────────────────

    /// Creates a value that will be defined by an op inserted later.
    pub fn fresh_value(&mut self, ty: Type) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(ValueInfo { ty, def: None });
        id
    }

    /// Creates an empty region that will be owned by an op inserted later.
    pub fn fresh_region(&mut self) -> RegionId {
        let id = RegionId::new(self.regions.len());
        self.regions.push(Region::default());
        id
    }

    /// Inserts an op and records it as the definition of its results.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the insertion point refers to an
    /// erased op or an unknown region.
    pub fn insert(&mut self, kind: OpKind, point: InsertPoint) -> Result<OpId> {
        let (region, index) = match point {
            InsertPoint::Before(anchor) => {
                let region = self.op_checked(anchor)?.parent();
                (region, self.position_checked(anchor)?)
            }
            InsertPoint::After(anchor) => {
                let region = self.op_checked(anchor)?.parent();
                (region, self.position_checked(anchor)? + 1)
            }
            InsertPoint::Start(region) => {
                self.region_checked(region)?;
                (region, 0)
            }
            InsertPoint::End(region) => (region, self.region_checked(region)?.ops.len()),
        };

        let id = OpId::new(self.ops.len());
        for value in kind.defined_values() {
            if let Some(info) = self.values.get_mut(value.index()) {
                info.def = Some(id);
            }
        }
        if let Some(owned) = kind.region() {
            match self.regions.get_mut(owned.index()) {
                Some(owned) => owned.parent = Some(id),
                None => return Err(malformed_error!("{} is not a region of @{}", owned, self.name)),
            }
        }

        self.ops.push(Some(Op::new(kind, region)));
        self.regions[region.index()].ops.insert(index, id);
        Ok(id)
    }

    /// Appends an op to a region created by this function. Used by the
    /// builder, which only ever appends to regions it allocated itself.
    pub(crate) fn append(&mut self, kind: OpKind, region: RegionId) -> OpId {
        let id = OpId::new(self.ops.len());
        for value in kind.defined_values() {
            if let Some(info) = self.values.get_mut(value.index()) {
                info.def = Some(id);
            }
        }
        if let Some(owned) = kind.region().and_then(|r| self.regions.get_mut(r.index())) {
            owned.parent = Some(id);
        }
        self.ops.push(Some(Op::new(kind, region)));
        if let Some(region) = self.regions.get_mut(region.index()) {
            region.ops.push(id);
        }
        id
    }

    /// Erases an op together with every op nested in its regions.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the op is not live.
    pub fn erase(&mut self, op: OpId) -> Result<()> {
        let region = self.op_checked(op)?.parent();
        let nested = self.walk_nested(op);
        if let Some(index) = self.position(op) {
            self.regions[region.index()].ops.remove(index);
        }
        for id in nested.into_iter().chain(std::iter::once(op)) {
            if let Some(slot) = self.ops.get_mut(id.index()) {
                *slot = None;
            }
        }
        if let Some(owned) = self.ops_region_of_erased(op) {
            self.regions[owned.index()].ops.clear();
        }
        Ok(())
    }

    fn ops_region_of_erased(&self, op: OpId) -> Option<RegionId> {
        self.regions
            .iter()
            .position(|region| region.parent == Some(op))
            .map(RegionId::new)
    }

    /// Replaces one operand of `user`, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the op is not live or has no such operand.
    pub fn replace_operand(&mut self, user: OpId, operand: usize, value: ValueId) -> Result<ValueId> {
        let name = self.name.clone();
        let op = self.op_mut_checked(user)?;
        let slot = op
            .kind_mut()
            .operand_mut(operand)
            .ok_or_else(|| malformed_error!("{} has no operand #{} in @{}", user, operand, name))?;
        Ok(std::mem::replace(slot, value))
    }

    fn position_checked(&self, op: OpId) -> Result<usize> {
        self.position(op)
            .ok_or_else(|| malformed_error!("{} is not placed in a region of @{}", op, self.name))
    }

    fn region_checked(&self, region: RegionId) -> Result<&Region> {
        self.regions
            .get(region.index())
            .ok_or_else(|| malformed_error!("{} is not a region of @{}", region, self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionBuilder;

    #[test]
    fn test_insert_and_walk_order() {
        let func = FunctionBuilder::new("walk").build_with(|b| {
            let lb = b.constant(0);
            let ub = b.constant(4);
            let step = b.constant(1);
            b.for_loop(lb, ub, step, |body, _iv| {
                body.barrier();
            });
            b.ret();
        });

        let names: Vec<_> = func
            .walk()
            .into_iter()
            .map(|id| func.op(id).unwrap().kind().mnemonic())
            .collect();
        assert_eq!(
            names,
            vec!["constant", "constant", "constant", "for", "barrier", "yield", "return"]
        );
    }

    #[test]
    fn test_enclosing_loops_innermost_first() {
        let mut inner_barrier = None;
        let mut loops = Vec::new();
        let func = FunctionBuilder::new("nest").build_with(|b| {
            let lb = b.constant(0);
            let ub = b.constant(4);
            let step = b.constant(1);
            let outer = b.for_loop(lb, ub, step, |outer, _| {
                let inner = outer.for_loop(lb, ub, step, |inner, _| {
                    inner_barrier = Some(inner.barrier());
                });
                loops.push(inner);
            });
            loops.push(outer);
        });

        let barrier = inner_barrier.unwrap();
        assert_eq!(func.enclosing_loops(barrier), loops);
        assert_eq!(func.nearest_enclosing_loop(barrier), Some(loops[0]));
        assert!(func.is_proper_ancestor(loops[1], barrier));
        assert!(!func.is_proper_ancestor(barrier, loops[1]));
    }

    #[test]
    fn test_erase_removes_nested_ops() {
        let mut the_loop = None;
        let mut func = FunctionBuilder::new("erase").build_with(|b| {
            let lb = b.constant(0);
            let step = b.constant(1);
            the_loop = Some(b.for_loop(lb, lb, step, |body, _| {
                body.barrier();
            }));
        });
        let before = func.op_count();
        func.erase(the_loop.unwrap()).unwrap();
        // for + barrier + yield
        assert_eq!(func.op_count(), before - 3);
        assert!(func.erase(the_loop.unwrap()).is_err());
    }
}
