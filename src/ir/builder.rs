//! Builder pattern for programmatic IR construction.
//!
//! The builder uses a closure-based API where nested regions are defined
//! inside the closure of the op that owns them, so the loop structure of a
//! kernel is visually apparent:
//!
//! ```rust
//! use multibuffer::ir::{BufferType, ElementType, FunctionBuilder};
//!
//! let func = FunctionBuilder::new("kernel").build_with(|b| {
//!     let lds = b.alloc_annotated(BufferType::new(ElementType::F16, vec![256]), Some(2), None);
//!     let (lb, ub, step) = (b.constant(0), b.constant(8), b.constant(1));
//!     b.for_loop(lb, ub, step, |body, iv| {
//!         let zero = body.constant(0);
//!         body.fill(lds, zero);
//!         body.load(lds, vec![iv]);
//!     });
//!     b.ret();
//! });
//! assert_eq!(func.name(), "kernel");
//! ```
//!
//! Loop bodies are terminated with `yield` automatically.

use crate::ir::{
    AllocOp, ArithKind, BufferType, ForOp, Function, OpId, OpKind, RegionId, Type, ValueId,
};

/// Builder for constructing functions programmatically.
#[derive(Debug)]
pub struct FunctionBuilder {
    func: Function,
}

impl FunctionBuilder {
    /// Creates a builder for an empty function.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            func: Function::new(name),
        }
    }

    /// Builds the function using a closure that fills the top-level region.
    pub fn build_with<F>(mut self, f: F) -> Function
    where
        F: FnOnce(&mut RegionBuilder<'_>),
    {
        let body = self.func.body();
        let mut region = RegionBuilder {
            func: &mut self.func,
            region: body,
        };
        f(&mut region);
        self.func
    }
}

/// Appends ops to one region.
///
/// Operations that produce values return the allocated [`ValueId`]; the
/// others return the [`OpId`] of the new op.
pub struct RegionBuilder<'a> {
    func: &'a mut Function,
    region: RegionId,
}

impl RegionBuilder<'_> {
    fn push(&mut self, kind: OpKind) -> OpId {
        self.func.append(kind, self.region)
    }

    /// The region being filled.
    #[must_use]
    pub fn region(&self) -> RegionId {
        self.region
    }

    /// Adds: `%r = constant value`
    pub fn constant(&mut self, value: i64) -> ValueId {
        let result = self.func.fresh_value(Type::Index);
        self.push(OpKind::Constant { result, value });
        result
    }

    /// Adds: `%r = arith.kind lhs, rhs`
    pub fn arith(&mut self, kind: ArithKind, lhs: ValueId, rhs: ValueId) -> ValueId {
        let result = self.func.fresh_value(Type::Index);
        self.push(OpKind::Arith {
            result,
            kind,
            lhs,
            rhs,
        });
        result
    }

    /// Adds an allocation without directives.
    pub fn alloc(&mut self, ty: BufferType) -> ValueId {
        self.alloc_annotated(ty, None, None)
    }

    /// Adds an allocation carrying the given buffering directives.
    pub fn alloc_annotated(
        &mut self,
        ty: BufferType,
        multibuffer: Option<i64>,
        remultibuffer: Option<i64>,
    ) -> ValueId {
        let result = self.func.fresh_value(Type::Buffer(ty.clone()));
        self.push(OpKind::Alloc(AllocOp {
            result,
            ty,
            multibuffer,
            remultibuffer,
        }));
        result
    }

    /// Adds: `dealloc buffer`
    pub fn dealloc(&mut self, buffer: ValueId) -> OpId {
        self.push(OpKind::Dealloc { buffer })
    }

    /// Adds: `%r = load buffer[indices]`
    pub fn load(&mut self, buffer: ValueId, indices: Vec<ValueId>) -> ValueId {
        let ty = match self.func.value_type(buffer).and_then(Type::as_buffer) {
            Some(buffer) => scalar_type(buffer),
            None => Type::Index,
        };
        let result = self.func.fresh_value(ty);
        self.push(OpKind::Load {
            result,
            buffer,
            indices,
        });
        result
    }

    /// Adds: `store value, buffer[indices]`
    pub fn store(&mut self, value: ValueId, buffer: ValueId, indices: Vec<ValueId>) -> OpId {
        self.push(OpKind::Store {
            value,
            buffer,
            indices,
        })
    }

    /// Adds: `fill buffer, value`
    pub fn fill(&mut self, buffer: ValueId, value: ValueId) -> OpId {
        self.push(OpKind::Fill { buffer, value })
    }

    /// Adds: `copy source -> target`
    pub fn copy(&mut self, source: ValueId, target: ValueId) -> OpId {
        self.push(OpKind::Copy { source, target })
    }

    /// Adds an opaque compute op.
    pub fn compute(
        &mut self,
        name: impl Into<String>,
        inputs: Vec<ValueId>,
        outputs: Vec<ValueId>,
    ) -> OpId {
        self.push(OpKind::Compute {
            name: name.into(),
            inputs,
            outputs,
        })
    }

    /// Adds a workgroup barrier.
    pub fn barrier(&mut self) -> OpId {
        self.push(OpKind::Barrier)
    }

    /// Adds a function terminator.
    pub fn ret(&mut self) -> OpId {
        self.push(OpKind::Return)
    }

    /// Adds a loop without a pipelining annotation.
    pub fn for_loop<F>(&mut self, lower: ValueId, upper: ValueId, step: ValueId, f: F) -> OpId
    where
        F: FnOnce(&mut RegionBuilder<'_>, ValueId),
    {
        self.build_loop(lower, upper, step, None, f)
    }

    /// Adds a loop whose iterations may overlap `depth` deep.
    pub fn pipelined_loop<F>(
        &mut self,
        lower: ValueId,
        upper: ValueId,
        step: ValueId,
        depth: u32,
        f: F,
    ) -> OpId
    where
        F: FnOnce(&mut RegionBuilder<'_>, ValueId),
    {
        self.build_loop(lower, upper, step, Some(depth), f)
    }

    fn build_loop<F>(
        &mut self,
        lower: ValueId,
        upper: ValueId,
        step: ValueId,
        pipeline_depth: Option<u32>,
        f: F,
    ) -> OpId
    where
        F: FnOnce(&mut RegionBuilder<'_>, ValueId),
    {
        let body = self.func.fresh_region();
        let induction = self.func.fresh_value(Type::Index);
        {
            let mut inner = RegionBuilder {
                func: &mut *self.func,
                region: body,
            };
            f(&mut inner, induction);
            inner.push(OpKind::Yield);
        }
        self.push(OpKind::For(ForOp {
            induction,
            lower,
            upper,
            step,
            body,
            pipeline_depth,
        }))
    }
}

/// Scalar type of one element of `buffer`.
pub(crate) fn scalar_type(buffer: &BufferType) -> Type {
    use crate::ir::ElementType;

    match &buffer.element {
        ElementType::F16 | ElementType::BF16 => Type::Float(16),
        ElementType::F32 => Type::Float(32),
        ElementType::F64 => Type::Float(64),
        ElementType::Index => Type::Index,
        ElementType::I1 => Type::Int(1),
        ElementType::I8 => Type::Int(8),
        ElementType::I16 => Type::Int(16),
        ElementType::I32 => Type::Int(32),
        ElementType::I64 | ElementType::Opaque(_) => Type::Int(64),
    }
}
