//! Operation kinds of the kernel IR.
//!
//! Operations form a closed tagged variant ([`OpKind`]). Passes dispatch with
//! `match` instead of probing free-form attributes; the two buffering
//! directives live as explicit optional fields on [`AllocOp`].

use bitflags::bitflags;
use strum::{Display, EnumString};

use crate::ir::{BufferType, RegionId, ValueId};

bitflags! {
    /// Effect an operation has on one of its buffer operands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryEffects: u8 {
        /// Reads some elements of the buffer
        const READ = 0b0001;
        /// Writes some elements of the buffer
        const WRITE = 0b0010;
        /// Writes every element of the buffer
        const OVERWRITE = 0b0100;
        /// Releases the buffer
        const FREE = 0b1000;
    }
}

/// Binary integer arithmetic on index values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ArithKind {
    /// `lhs + rhs`
    Add,
    /// `lhs - rhs`
    Sub,
    /// `lhs * rhs`
    Mul,
    /// `lhs / rhs` (floor division on non-negative operands)
    Div,
    /// `lhs mod rhs`
    Rem,
}

impl ArithKind {
    /// Folds the operation on constants. Returns `None` on division by zero
    /// or overflow.
    #[must_use]
    pub fn fold(self, lhs: i64, rhs: i64) -> Option<i64> {
        match self {
            Self::Add => lhs.checked_add(rhs),
            Self::Sub => lhs.checked_sub(rhs),
            Self::Mul => lhs.checked_mul(rhs),
            Self::Div => lhs.checked_div_euclid(rhs),
            Self::Rem => lhs.checked_rem_euclid(rhs),
        }
    }
}

/// A buffer allocation, optionally annotated with buffering directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocOp {
    /// The allocated buffer
    pub result: ValueId,
    /// Type of the allocated buffer
    pub ty: BufferType,
    /// Requested number of slots, consumed by the multi-buffering pass
    pub multibuffer: Option<i64>,
    /// Slot count to switch to after expansion, consumed with `multibuffer`
    pub remultibuffer: Option<i64>,
}

impl AllocOp {
    /// Returns true if any directive is still attached.
    #[must_use]
    pub fn has_directive(&self) -> bool {
        self.multibuffer.is_some() || self.remultibuffer.is_some()
    }
}

/// A structured counted loop `for iv = lower; iv < upper; iv += step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForOp {
    /// The induction variable, defined by the loop for its body
    pub induction: ValueId,
    /// Inclusive lower bound
    pub lower: ValueId,
    /// Exclusive upper bound
    pub upper: ValueId,
    /// Positive step
    pub step: ValueId,
    /// Loop body
    pub body: RegionId,
    /// How many iterations may be in flight at once after software pipelining
    pub pipeline_depth: Option<u32>,
}

/// Every kind of operation the IR knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// Allocates a buffer
    Alloc(AllocOp),
    /// Releases a buffer
    Dealloc {
        /// Released buffer
        buffer: ValueId,
    },
    /// Integer constant of index type
    Constant {
        /// Defined value
        result: ValueId,
        /// Constant value
        value: i64,
    },
    /// Index arithmetic
    Arith {
        /// Defined value
        result: ValueId,
        /// Operation
        kind: ArithKind,
        /// Left operand
        lhs: ValueId,
        /// Right operand
        rhs: ValueId,
    },
    /// Structured loop with a body region
    For(ForOp),
    /// Reads one element
    Load {
        /// Loaded scalar
        result: ValueId,
        /// Source buffer
        buffer: ValueId,
        /// Element coordinates
        indices: Vec<ValueId>,
    },
    /// Writes one element
    Store {
        /// Stored scalar
        value: ValueId,
        /// Target buffer
        buffer: ValueId,
        /// Element coordinates
        indices: Vec<ValueId>,
    },
    /// Writes one scalar into every element
    Fill {
        /// Target buffer
        buffer: ValueId,
        /// Fill value
        value: ValueId,
    },
    /// Copies a whole buffer into another of the same type
    Copy {
        /// Source buffer
        source: ValueId,
        /// Target buffer, fully overwritten
        target: ValueId,
    },
    /// Opaque compute op (a GEMM tile, a reduction, ...)
    Compute {
        /// Mnemonic
        name: String,
        /// Buffers read
        inputs: Vec<ValueId>,
        /// Buffers written
        outputs: Vec<ValueId>,
    },
    /// Selects one slot of a multi-buffer by a rotation index
    SelectSlot {
        /// The selected slot
        result: ValueId,
        /// Slots in ordinal order
        slots: Vec<ValueId>,
        /// Rotation index
        index: ValueId,
    },
    /// Workgroup-wide execution and memory barrier
    Barrier,
    /// Loop body terminator
    Yield,
    /// Function terminator
    Return,
}

impl OpKind {
    /// Returns the mnemonic used by the printer.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Alloc(_) => "alloc",
            Self::Dealloc { .. } => "dealloc",
            Self::Constant { .. } => "constant",
            Self::Arith { .. } => "arith",
            Self::For(_) => "for",
            Self::Load { .. } => "load",
            Self::Store { .. } => "store",
            Self::Fill { .. } => "fill",
            Self::Copy { .. } => "copy",
            Self::Compute { .. } => "compute",
            Self::SelectSlot { .. } => "select_slot",
            Self::Barrier => "barrier",
            Self::Yield => "yield",
            Self::Return => "return",
        }
    }

    /// Values defined by this op, including a loop's induction variable.
    #[must_use]
    pub fn defined_values(&self) -> Vec<ValueId> {
        match self {
            Self::Alloc(alloc) => vec![alloc.result],
            Self::Constant { result, .. }
            | Self::Arith { result, .. }
            | Self::Load { result, .. }
            | Self::SelectSlot { result, .. } => vec![*result],
            Self::For(for_op) => vec![for_op.induction],
            _ => Vec::new(),
        }
    }

    /// Operands in a stable order. The position of a value in this list is
    /// its operand number.
    #[must_use]
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Self::Alloc(_) | Self::Constant { .. } | Self::Barrier | Self::Yield | Self::Return => {
                Vec::new()
            }
            Self::Dealloc { buffer } => vec![*buffer],
            Self::Arith { lhs, rhs, .. } => vec![*lhs, *rhs],
            Self::For(for_op) => vec![for_op.lower, for_op.upper, for_op.step],
            Self::Load {
                buffer, indices, ..
            } => std::iter::once(*buffer).chain(indices.iter().copied()).collect(),
            Self::Store {
                value,
                buffer,
                indices,
            } => [*value, *buffer]
                .into_iter()
                .chain(indices.iter().copied())
                .collect(),
            Self::Fill { buffer, value } => vec![*buffer, *value],
            Self::Copy { source, target } => vec![*source, *target],
            Self::Compute {
                inputs, outputs, ..
            } => inputs.iter().chain(outputs.iter()).copied().collect(),
            Self::SelectSlot { slots, index, .. } => {
                slots.iter().copied().chain(std::iter::once(*index)).collect()
            }
        }
    }

    /// Mutable access to the operand with the given operand number.
    pub fn operand_mut(&mut self, operand: usize) -> Option<&mut ValueId> {
        match self {
            Self::Alloc(_) | Self::Constant { .. } | Self::Barrier | Self::Yield | Self::Return => {
                None
            }
            Self::Dealloc { buffer } => (operand == 0).then_some(buffer),
            Self::Arith { lhs, rhs, .. } => match operand {
                0 => Some(lhs),
                1 => Some(rhs),
                _ => None,
            },
            Self::For(for_op) => match operand {
                0 => Some(&mut for_op.lower),
                1 => Some(&mut for_op.upper),
                2 => Some(&mut for_op.step),
                _ => None,
            },
            Self::Load {
                buffer, indices, ..
            } => match operand {
                0 => Some(buffer),
                n => indices.get_mut(n - 1),
            },
            Self::Store {
                value,
                buffer,
                indices,
            } => match operand {
                0 => Some(value),
                1 => Some(buffer),
                n => indices.get_mut(n - 2),
            },
            Self::Fill { buffer, value } => match operand {
                0 => Some(buffer),
                1 => Some(value),
                _ => None,
            },
            Self::Copy { source, target } => match operand {
                0 => Some(source),
                1 => Some(target),
                _ => None,
            },
            Self::Compute {
                inputs, outputs, ..
            } => {
                let split = inputs.len();
                if operand < split {
                    inputs.get_mut(operand)
                } else {
                    outputs.get_mut(operand - split)
                }
            }
            Self::SelectSlot { slots, index, .. } => {
                if operand == slots.len() {
                    Some(index)
                } else {
                    slots.get_mut(operand)
                }
            }
        }
    }

    /// Memory effect this op has on the operand with the given operand number.
    ///
    /// Non-buffer operands and aliasing ops (`select_slot`) report no effect.
    #[must_use]
    pub fn effects_on(&self, operand: usize) -> MemoryEffects {
        match self {
            Self::Dealloc { .. } if operand == 0 => MemoryEffects::FREE,
            Self::Load { .. } if operand == 0 => MemoryEffects::READ,
            Self::Store { .. } if operand == 1 => MemoryEffects::WRITE,
            Self::Fill { .. } if operand == 0 => MemoryEffects::WRITE | MemoryEffects::OVERWRITE,
            Self::Copy { .. } => match operand {
                0 => MemoryEffects::READ,
                _ => MemoryEffects::WRITE | MemoryEffects::OVERWRITE,
            },
            Self::Compute { inputs, .. } => {
                if operand < inputs.len() {
                    MemoryEffects::READ
                } else {
                    MemoryEffects::WRITE
                }
            }
            _ => MemoryEffects::empty(),
        }
    }

    /// The region owned by this op, if any.
    #[must_use]
    pub fn region(&self) -> Option<RegionId> {
        match self {
            Self::For(for_op) => Some(for_op.body),
            _ => None,
        }
    }

    /// Returns the allocation payload if this is an `alloc`.
    #[must_use]
    pub fn as_alloc(&self) -> Option<&AllocOp> {
        match self {
            Self::Alloc(alloc) => Some(alloc),
            _ => None,
        }
    }

    /// Returns the loop payload if this is a `for`.
    #[must_use]
    pub fn as_for(&self) -> Option<&ForOp> {
        match self {
            Self::For(for_op) => Some(for_op),
            _ => None,
        }
    }
}

/// An operation placed in a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    kind: OpKind,
    parent: RegionId,
}

impl Op {
    /// Creates an op placed in `parent`.
    #[must_use]
    pub fn new(kind: OpKind, parent: RegionId) -> Self {
        Self { kind, parent }
    }

    /// The op payload.
    #[must_use]
    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    /// Mutable op payload.
    pub fn kind_mut(&mut self) -> &mut OpKind {
        &mut self.kind
    }

    /// The region this op is placed in.
    #[must_use]
    pub fn parent(&self) -> RegionId {
        self.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(n: usize) -> ValueId {
        ValueId::new(n)
    }

    #[test]
    fn test_operand_numbering_matches_operand_mut() {
        let mut store = OpKind::Store {
            value: v(1),
            buffer: v(2),
            indices: vec![v(3), v(4)],
        };
        assert_eq!(store.operands(), vec![v(1), v(2), v(3), v(4)]);
        *store.operand_mut(3).unwrap() = v(9);
        assert_eq!(store.operands(), vec![v(1), v(2), v(3), v(9)]);
        assert!(store.operand_mut(4).is_none());
    }

    #[test]
    fn test_select_slot_index_is_last_operand() {
        let mut select = OpKind::SelectSlot {
            result: v(10),
            slots: vec![v(1), v(2)],
            index: v(5),
        };
        *select.operand_mut(2).unwrap() = v(6);
        assert_eq!(select.operands(), vec![v(1), v(2), v(6)]);
    }

    #[test]
    fn test_effects() {
        let copy = OpKind::Copy {
            source: v(1),
            target: v(2),
        };
        assert_eq!(copy.effects_on(0), MemoryEffects::READ);
        assert!(copy.effects_on(1).contains(MemoryEffects::OVERWRITE));

        let compute = OpKind::Compute {
            name: "gemm".into(),
            inputs: vec![v(1), v(2)],
            outputs: vec![v(3)],
        };
        assert_eq!(compute.effects_on(1), MemoryEffects::READ);
        assert_eq!(compute.effects_on(2), MemoryEffects::WRITE);
        assert!(OpKind::Dealloc { buffer: v(1) }
            .effects_on(0)
            .contains(MemoryEffects::FREE));
    }

    #[test]
    fn test_fold() {
        assert_eq!(ArithKind::Rem.fold(7, 3), Some(1));
        assert_eq!(ArithKind::Rem.fold(-1, 3), Some(2));
        assert_eq!(ArithKind::Div.fold(1, 0), None);
        assert_eq!(ArithKind::Sub.to_string(), "sub");
    }
}
