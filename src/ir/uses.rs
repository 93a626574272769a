//! Def-use index for snapshotting value uses before a rewrite.
//!
//! [`UseIndex`] is built once from a [`Function`] and never updated. Rewrites
//! collect everything they are going to touch from the index first and only
//! then start mutating the function, so that a traversal is never perturbed
//! by the structure it is changing.
//!
//! ```rust
//! use multibuffer::ir::{BufferType, ElementType, FunctionBuilder, UseIndex};
//!
//! let mut buf = None;
//! let func = FunctionBuilder::new("k").build_with(|b| {
//!     let value = b.alloc(BufferType::new(ElementType::F32, vec![4]));
//!     b.dealloc(value);
//!     buf = Some(value);
//! });
//!
//! let index = UseIndex::build(&func);
//! assert_eq!(index.use_count(buf.unwrap()), 1);
//! ```

use std::collections::HashMap;

use crate::ir::{Function, OpId, UseSite, ValueId};

/// Immutable def-use snapshot of one function.
#[derive(Debug, Clone, Default)]
pub struct UseIndex {
    /// Defining op of every defined value.
    definitions: HashMap<ValueId, OpId>,
    /// Use sites of every used value, in pre-order.
    uses: HashMap<ValueId, Vec<UseSite>>,
    /// Pre-order position of every live op.
    order: HashMap<OpId, usize>,
}

impl UseIndex {
    /// Builds the index from the current state of `func`.
    #[must_use]
    pub fn build(func: &Function) -> Self {
        let mut index = Self::default();
        for (position, id) in func.walk().into_iter().enumerate() {
            index.order.insert(id, position);
            let Some(op) = func.op(id) else {
                continue;
            };
            for value in op.kind().defined_values() {
                index.definitions.insert(value, id);
            }
            for (operand, used) in op.kind().operands().into_iter().enumerate() {
                index
                    .uses
                    .entry(used)
                    .or_default()
                    .push(UseSite { user: id, operand });
            }
        }
        index
    }

    /// Use sites of `value`, in pre-order. Empty if unused.
    #[must_use]
    pub fn uses_of(&self, value: ValueId) -> &[UseSite] {
        self.uses.get(&value).map_or(&[], Vec::as_slice)
    }

    /// Number of operand slots reading `value`.
    #[must_use]
    pub fn use_count(&self, value: ValueId) -> usize {
        self.uses_of(value).len()
    }

    /// Returns true if `value` has no uses.
    #[must_use]
    pub fn is_unused(&self, value: ValueId) -> bool {
        self.use_count(value) == 0
    }

    /// Defining op of `value` at snapshot time.
    #[must_use]
    pub fn definition(&self, value: ValueId) -> Option<OpId> {
        self.definitions.get(&value).copied()
    }

    /// Pre-order position of `op` at snapshot time.
    #[must_use]
    pub fn order_of(&self, op: OpId) -> Option<usize> {
        self.order.get(&op).copied()
    }

    /// Returns true if `a` came strictly before `b` in pre-order.
    #[must_use]
    pub fn precedes(&self, a: OpId, b: OpId) -> bool {
        match (self.order_of(a), self.order_of(b)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BufferType, ElementType, FunctionBuilder};

    #[test]
    fn test_snapshot_is_not_affected_by_later_mutation() {
        let mut values = Vec::new();
        let mut func = FunctionBuilder::new("k").build_with(|b| {
            let ty = BufferType::new(ElementType::I32, vec![2]);
            let a = b.alloc(ty.clone());
            let c = b.alloc(ty);
            b.copy(a, c);
            values.push(a);
            values.push(c);
        });

        let index = UseIndex::build(&func);
        let copy = index.uses_of(values[0])[0];
        func.replace_operand(copy.user, copy.operand, values[1]).unwrap();

        assert_eq!(index.use_count(values[0]), 1);
        assert_eq!(func.uses_of(values[0]).len(), 0);
    }

    #[test]
    fn test_order_and_definitions() {
        let mut values = Vec::new();
        let func = FunctionBuilder::new("k").build_with(|b| {
            let a = b.constant(1);
            let c = b.constant(2);
            values.push(b.arith(crate::ir::ArithKind::Add, a, c));
            values.push(a);
        });
        let index = UseIndex::build(&func);
        let sum_def = index.definition(values[0]).unwrap();
        let a_def = index.definition(values[1]).unwrap();
        assert!(index.precedes(a_def, sum_def));
        assert!(!index.precedes(sum_def, a_def));
        assert!(index.is_unused(values[0]));
    }
}
