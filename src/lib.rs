// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # multibuffer
//!
//! Multi-buffering for software-pipelined GPU kernels.
//!
//! A tile buffer that is filled and consumed in every iteration of a loop
//! serializes the loop: iteration `k + 1` cannot start loading before
//! iteration `k` is done reading. This crate rewrites such an allocation
//! into `N` physical slots and rotates between them by iteration number,
//! so loads for upcoming iterations can run ahead of compute on the current
//! one.
//!
//! ## Features
//!
//! - **Structured kernel IR** - Allocations, counted loops, index arithmetic,
//!   element accesses and barriers, with a verifier and a textual printer
//! - **Allocation discovery** - Finds allocations carrying `multibuffer = N`
//!   and `remultibuffer = M` directives
//! - **Expansion** - Replaces one allocation by `N` slots, a rotation index
//!   and a slot selector, rebinding every access
//! - **Refactoring** - Changes the slot count of an expanded buffer, reusing
//!   slots in place where the counts divide evenly
//! - **Guards** - Inserts a workgroup barrier where pipeline depth could let
//!   a shared slot be overwritten while still being read
//! - **Parallel pipeline** - Runs passes over every function of a module in
//!   parallel, collecting events and failure diagnostics
//!
//! ## Quick Start
//!
//! ```rust
//! use multibuffer::prelude::*;
//!
//! let func = FunctionBuilder::new("gemm").build_with(|b| {
//!     let src = b.alloc(BufferType::new(ElementType::F16, vec![64]).in_space(AddressSpace::Global));
//!     let tile = b.alloc_annotated(BufferType::new(ElementType::F16, vec![64]), Some(3), Some(2));
//!     let lb = b.constant(0);
//!     let ub = b.constant(16);
//!     let step = b.constant(1);
//!     b.for_loop(lb, ub, step, |body, iv| {
//!         body.copy(src, tile);
//!         body.load(tile, vec![iv]);
//!     });
//!     b.dealloc(tile);
//!     b.ret();
//! });
//!
//! let mut module: Module = std::iter::once(func).collect();
//! let mut scheduler = PassScheduler::new(SchedulerConfig::default());
//! scheduler.add_pass(Box::new(MultibufferPass::new()));
//!
//! let ctx = CompilerContext::new();
//! let report = scheduler.run(&mut module, &ctx)?;
//! assert!(report.succeeded());
//! assert!(ctx.events.has(EventKind::SlotsReallocated));
//! # Ok::<(), multibuffer::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - The kernel IR, its builder, verifier and def-use index
//! - [`compiler`] - Pass trait, registry, scheduler, context and event log
//! - [`compiler::passes::multibuffer`] - The multi-buffering transformation
//! - [`config`] - Pass and scheduler configuration
//! - [`prelude`] - Commonly used types in one import
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`](Result). Transformation
//! failures of a single allocation are reported per site by the driver and
//! never abort the rest of the function; the function as a whole is then
//! flagged with a `Pass failure` diagnostic.

#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types.
///
/// ```rust
/// use multibuffer::prelude::*;
///
/// let pass = MultibufferPass::with_config(MultibufferConfig::strict());
/// assert_eq!(pass.name(), "multibuffer");
/// ```
pub mod prelude;

pub mod compiler;
pub mod config;
pub mod ir;

/// `multibuffer` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `multibuffer` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for
/// the list of variants.
pub use error::Error;
