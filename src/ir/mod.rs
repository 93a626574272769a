//! Structured kernel IR.
//!
//! A deliberately small IR that stands in for the host compiler's dialects:
//! buffer allocations, counted loops, index arithmetic, element accesses and
//! workgroup barriers.
//!
//! # Key Types
//!
//! - [`Function`] - Op arena, regions and value table of one kernel
//! - [`OpKind`] - Closed set of operation kinds
//! - [`AllocOp`] - Allocation with its optional buffering directives
//! - [`ForOp`] - Structured loop providing an induction variable
//! - [`UseIndex`] - Immutable def-use snapshot taken before a rewrite
//! - [`FunctionBuilder`] - Closure-based construction API
//! - [`Module`] - A set of independent functions
//!
//! # Example
//!
//! ```rust
//! use multibuffer::ir::{BufferType, ElementType, FunctionBuilder};
//!
//! let func = FunctionBuilder::new("copy_tile").build_with(|b| {
//!     let src = b.alloc(BufferType::new(ElementType::F32, vec![64]));
//!     let dst = b.alloc(BufferType::new(ElementType::F32, vec![64]));
//!     b.copy(src, dst);
//!     b.ret();
//! });
//! assert!(func.verify().is_ok());
//! println!("{func}");
//! ```

mod builder;
mod display;
mod function;
mod ids;
mod module;
mod ops;
mod types;
mod uses;
mod verify;

pub use builder::{FunctionBuilder, RegionBuilder};
pub use function::{Function, InsertPoint, Location, UseSite, ValueInfo};
pub use ids::{OpId, RegionId, ValueId};
pub use module::Module;
pub use ops::{AllocOp, ArithKind, ForOp, MemoryEffects, Op, OpKind};
pub use types::{AddressSpace, BufferType, ElementType, Type};
pub use uses::UseIndex;
