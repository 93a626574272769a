//! Expansion of one allocation into `factor` rotating slots.
//!
//! # Algorithm
//!
//! 1. Validate: the factor, the element type, the qualifying loop and
//!    (optionally) that the first in-loop access overwrites the buffer. Uses
//!    are snapshotted with a [`UseIndex`] before anything is touched, and no
//!    check runs after the first mutation.
//! 2. Allocate the slots right after the original `alloc`.
//! 3. Insert the guard barrier if the slot count requires one.
//! 4. Materialise the rotation index and one `select_slot` at the top of the
//!    loop body.
//! 5. Re-point every access operand at the selected slot and split every
//!    release into one `dealloc` per slot.
//! 6. Erase the original `alloc`.
//!
//! ```text
//! %t = alloc : buffer<32xf16, workgroup>        %s0 = alloc : buffer<32xf16, workgroup>
//! for %iv = %c0 to %c8 step %c1 {         =>    %s1 = alloc : buffer<32xf16, workgroup>
//!   copy %src -> %t                             for %iv = %c0 to %c8 step %c1 {
//! }                                               %n = constant 2
//! dealloc %t                                      %i = rem %iv, %n
//!                                                 %t' = select_slot [%s0, %s1][%i]
//!                                                 copy %src -> %t'
//!                                               }
//!                                               dealloc %s0
//!                                               dealloc %s1
//! ```

use crate::{
    compiler::{
        context::RewriteContext,
        events::EventKind,
        passes::multibuffer::{
            locator::AllocationSite,
            rotation::{body_entry, build_rotation, ensure_guard, guard_required, Cursor},
            set::{ExpandedBufferSet, Release, Slot, SlotOrigin, UseSiteBinding},
        },
    },
    config::MultibufferConfig,
    ir::{
        AllocOp, BufferType, Function, InsertPoint, MemoryEffects, OpId, OpKind, Type, UseIndex,
        UseSite, ValueId,
    },
    Error, Result,
};

/// Converts a directive factor to a slot count.
///
/// # Errors
///
/// Returns [`Error::InvalidFactor`] if `factor < 1`.
pub(crate) fn slot_count(factor: i64) -> Result<usize> {
    if factor < 1 {
        return Err(Error::InvalidFactor(factor));
    }
    usize::try_from(factor).map_err(|_| Error::InvalidFactor(factor))
}

/// Emits `count` fresh slot allocations at `cursor`, numbered from `first`.
pub(super) fn emit_slots(
    func: &mut Function,
    ty: &BufferType,
    first: usize,
    count: usize,
    origin: impl Fn(usize) -> SlotOrigin,
    cursor: &mut Cursor,
) -> Result<Vec<Slot>> {
    let mut slots = Vec::with_capacity(count);
    for ordinal in first..first + count {
        let value = func.fresh_value(Type::Buffer(ty.clone()));
        let alloc = cursor.emit(
            func,
            OpKind::Alloc(AllocOp {
                result: value,
                ty: ty.clone(),
                multibuffer: None,
                remultibuffer: None,
            }),
        )?;
        slots.push(Slot {
            ordinal,
            alloc,
            value,
            origin: origin(ordinal),
        });
    }
    Ok(slots)
}

/// Emits `%sel = select_slot [slots][index]` at `cursor`.
pub(super) fn emit_selector(
    func: &mut Function,
    ty: &BufferType,
    slots: &[Slot],
    index: ValueId,
    cursor: &mut Cursor,
) -> Result<(OpId, ValueId)> {
    let result = func.fresh_value(Type::Buffer(ty.clone()));
    let op = cursor.emit(
        func,
        OpKind::SelectSlot {
            result,
            slots: slots.iter().map(|slot| slot.value).collect(),
            index,
        },
    )?;
    Ok((op, result))
}

/// Emits one `dealloc` per slot at `cursor`, in ordinal order.
pub(super) fn emit_releases(func: &mut Function, slots: &[Slot], cursor: &mut Cursor) -> Result<Vec<OpId>> {
    slots
        .iter()
        .map(|slot| cursor.emit(func, OpKind::Dealloc { buffer: slot.value }))
        .collect()
}

/// Innermost loop enclosing every access without enclosing the allocation.
fn qualifying_loop(func: &Function, alloc: OpId, accesses: &[UseSite]) -> Option<OpId> {
    let first = accesses.first()?;
    func.enclosing_loops(first.user).into_iter().find(|&candidate| {
        !func.is_proper_ancestor(candidate, alloc)
            && accesses
                .iter()
                .all(|site| func.is_proper_ancestor(candidate, site.user))
    })
}

/// What the validation phase hands to the mutation phase.
struct Plan {
    slots: usize,
    loop_op: OpId,
    accesses: Vec<UseSite>,
    releases: Vec<UseSite>,
}

fn plan(func: &Function, site: &AllocationSite, factor: i64, config: &MultibufferConfig) -> Result<Plan> {
    let slots = slot_count(factor)?;
    if !site.ty.element.is_replicable() {
        return Err(Error::UnsupportedElementType(site.ty.element.clone()));
    }
    match func.alloc(site.alloc) {
        Some(alloc) if alloc.result == site.buffer => {}
        _ => {
            return Err(malformed_error!(
                "{} no longer allocates {} in @{}",
                site.alloc,
                site.buffer,
                func.name()
            ))
        }
    }

    let index = UseIndex::build(func);
    let (releases, accesses): (Vec<UseSite>, Vec<UseSite>) = index
        .uses_of(site.buffer)
        .iter()
        .copied()
        .partition(|use_site| {
            matches!(
                func.op(use_site.user).map(|op| op.kind()),
                Some(OpKind::Dealloc { .. })
            )
        });

    let loop_op = qualifying_loop(func, site.alloc, &accesses)
        .ok_or(Error::MissingLoopContext { alloc: site.alloc })?;

    if !config.skip_override_analysis {
        let overwrites = accesses.first().is_some_and(|first| {
            func.op(first.user).is_some_and(|op| {
                op.kind()
                    .effects_on(first.operand)
                    .contains(MemoryEffects::OVERWRITE)
            })
        });
        if !overwrites {
            return Err(Error::LoopCarriedDependency { alloc: site.alloc });
        }
    }

    Ok(Plan {
        slots,
        loop_op,
        accesses,
        releases,
    })
}

/// Replaces `site` with `factor` slots rotating across the iterations of its
/// innermost qualifying loop.
///
/// On success the original allocation is erased and no operand refers to it.
///
/// # Errors
///
/// - [`Error::InvalidFactor`] if `factor < 1`
/// - [`Error::UnsupportedElementType`] if the element type has no byte width
/// - [`Error::MissingLoopContext`] if no loop encloses every access without
///   enclosing the allocation
/// - [`Error::LoopCarriedDependency`] if the override analysis is enabled and
///   the first in-loop access does not overwrite the buffer
///
/// None of these leave a partial rewrite behind. [`Error::Malformed`] is
/// returned if the IR changes under the rewrite in an inconsistent way.
pub fn expand(
    ctx: &mut RewriteContext<'_>,
    site: &AllocationSite,
    factor: i64,
    config: &MultibufferConfig,
) -> Result<ExpandedBufferSet> {
    let plan = plan(ctx.func(), site, factor, config)?;
    let ty = site.ty.clone();

    let mut cursor = Cursor::new(InsertPoint::After(site.alloc));
    let slots = emit_slots(
        ctx.func_mut(),
        &ty,
        0,
        plan.slots,
        |_| SlotOrigin::Fresh,
        &mut cursor,
    )?;
    ctx.record(EventKind::SlotsCreated, site.alloc)
        .message(format!("{} x {}", plan.slots, ty));

    let guard = if guard_required(ctx.func(), &ty, plan.loop_op, plan.slots, config) {
        Some(ensure_guard(ctx, plan.loop_op)?)
    } else {
        None
    };

    let mut cursor = Cursor::new(body_entry(ctx.func(), plan.loop_op)?);
    let rotation = build_rotation(ctx, plan.loop_op, plan.slots, &mut cursor)?;
    let (selector, selected) =
        emit_selector(ctx.func_mut(), &ty, &slots, rotation.value, &mut cursor)?;

    let mut bindings = Vec::with_capacity(plan.accesses.len());
    for use_site in &plan.accesses {
        ctx.func_mut()
            .replace_operand(use_site.user, use_site.operand, selected)?;
        ctx.record(EventKind::UseRebound, use_site.user)
            .message(format!("operand #{} -> {}", use_site.operand, selected));
        bindings.push(UseSiteBinding {
            site: *use_site,
            selector,
        });
    }

    let mut releases = Vec::with_capacity(plan.releases.len());
    for use_site in &plan.releases {
        let mut cursor = Cursor::new(InsertPoint::Before(use_site.user));
        let ops = emit_releases(ctx.func_mut(), &slots, &mut cursor)?;
        ctx.func_mut().erase(use_site.user)?;
        releases.push(Release { ops });
    }

    ctx.func_mut().erase(site.alloc)?;
    let leftover = ctx.func().uses_of(site.buffer);
    if let Some(stale) = leftover.first() {
        return Err(malformed_error!(
            "{} still reads {} after expansion",
            stale.user,
            site.buffer
        ));
    }

    Ok(ExpandedBufferSet {
        ty,
        slots,
        loop_op: plan.loop_op,
        rotation,
        selector,
        selected,
        bindings,
        releases,
        guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{events::EventLog, passes::multibuffer::locator::locate},
        ir::{AddressSpace, ElementType, FunctionBuilder},
        test::{straight_line_kernel, tiled_kernel, Kernel, TileSpec},
    };

    fn run(kernel: &mut Kernel, config: &MultibufferConfig) -> (Result<ExpandedBufferSet>, EventLog) {
        let log = EventLog::new();
        let result = {
            let mut ctx = RewriteContext::new(&mut kernel.func, &log, "multibuffer");
            let site = locate(&mut ctx).sites.remove(0);
            expand(&mut ctx, &site, site.factor, config)
        };
        (result, log)
    }

    #[test]
    fn test_double_buffer_in_eight_trip_loop() {
        let mut kernel = tiled_kernel("gemm", TileSpec::default().factor(2));
        let (result, log) = run(&mut kernel, &MultibufferConfig::default());
        let set = result.unwrap();
        let func = &kernel.func;

        assert_eq!(set.factor(), 2);
        // two 32x8 f16 tiles
        assert_eq!(set.total_bytes(), Some(1024));
        for slot in &set.slots {
            let alloc = func.alloc(slot.alloc).unwrap();
            assert_eq!(alloc.ty, TileSpec::default().ty);
            assert!(!alloc.has_directive());
        }
        assert_eq!(set.rewritten_use_count(), kernel.uses);
        assert!(!func.is_live(kernel.alloc));
        assert!(func.uses_of(kernel.tile).is_empty());

        // %i = rem %iv, 2
        let for_op = func.for_op(set.loop_op).unwrap();
        match func.op(*set.rotation.ops.last().unwrap()).unwrap().kind() {
            OpKind::Arith { kind, lhs, rhs, .. } => {
                assert_eq!(*kind, crate::ir::ArithKind::Rem);
                assert_eq!(*lhs, for_op.induction);
                assert_eq!(func.constant_value(*rhs), Some(2));
            }
            other => panic!("unexpected rotation op {other:?}"),
        }
        assert!(set.guard.is_none());
        assert_eq!(log.count_kind(EventKind::UseRebound), 3);
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_every_factor_yields_exact_slot_count() {
        for factor in 1..=6 {
            let mut kernel = tiled_kernel("k", TileSpec::default().factor(factor));
            let (result, _) = run(&mut kernel, &MultibufferConfig::default());
            let set = result.unwrap();
            assert_eq!(set.factor(), usize::try_from(factor).unwrap());
            assert_eq!(
                set.total_bytes(),
                TileSpec::default()
                    .ty
                    .size_in_bytes()
                    .map(|bytes| bytes * u64::try_from(factor).unwrap())
            );
            assert_eq!(set.rewritten_use_count(), kernel.uses);
            assert_eq!(
                set.releases[0].ops.len(),
                set.factor(),
                "one release per slot"
            );
            assert!(kernel.func.verify().is_ok());
        }
    }

    #[test]
    fn test_single_slot_rotation_is_zero() {
        let mut kernel = tiled_kernel("k", TileSpec::default().factor(1));
        let (result, log) = run(&mut kernel, &MultibufferConfig::default());
        let set = result.unwrap();
        assert_eq!(set.factor(), 1);
        assert_eq!(kernel.func.constant_value(set.rotation.value), Some(0));
        // depth 1 >= 1 slot in workgroup memory
        assert!(set.guard.is_some_and(|guard| guard.inserted));
        assert!(log.has(EventKind::GuardInserted));
    }

    #[test]
    fn test_zero_factor_is_rejected_without_mutation() {
        let mut kernel = tiled_kernel("k", TileSpec::default().factor(0));
        let ops_before = kernel.func.op_count();
        let (result, _) = run(&mut kernel, &MultibufferConfig::default());
        assert_eq!(result.unwrap_err(), Error::InvalidFactor(0));
        assert_eq!(kernel.func.op_count(), ops_before);
        assert!(!kernel.func.alloc(kernel.alloc).unwrap().has_directive());
    }

    #[test]
    fn test_negative_factor_is_rejected() {
        assert_eq!(slot_count(-3).unwrap_err(), Error::InvalidFactor(-3));
        assert_eq!(slot_count(4).unwrap(), 4);
    }

    #[test]
    fn test_missing_loop_leaves_allocation_alone() {
        let (mut func, _, alloc) = straight_line_kernel(2);
        let log = EventLog::new();
        let mut ctx = RewriteContext::new(&mut func, &log, "multibuffer");
        let site = locate(&mut ctx).sites.remove(0);
        let before = ctx.func().to_string();

        let err = expand(&mut ctx, &site, 2, &MultibufferConfig::default()).unwrap_err();
        assert_eq!(err, Error::MissingLoopContext { alloc });
        assert_eq!(ctx.func().to_string(), before);
        assert!(func.is_live(alloc));
    }

    #[test]
    fn test_unused_allocation_has_no_loop_context() {
        let mut func = FunctionBuilder::new("k").build_with(|b| {
            b.alloc_annotated(BufferType::new(ElementType::F32, vec![4]), Some(2), None);
        });
        let log = EventLog::new();
        let mut ctx = RewriteContext::new(&mut func, &log, "multibuffer");
        let site = locate(&mut ctx).sites.remove(0);
        assert!(matches!(
            expand(&mut ctx, &site, 2, &MultibufferConfig::default()),
            Err(Error::MissingLoopContext { .. })
        ));
    }

    #[test]
    fn test_bit_packed_elements_are_unsupported() {
        let mut kernel = tiled_kernel(
            "k",
            TileSpec::default().ty(BufferType::new(ElementType::I1, vec![64])),
        );
        let (result, _) = run(&mut kernel, &MultibufferConfig::default());
        assert_eq!(
            result.unwrap_err(),
            Error::UnsupportedElementType(ElementType::I1)
        );
        assert!(kernel.func.is_live(kernel.alloc));
    }

    #[test]
    fn test_loop_containing_the_allocation_does_not_qualify() {
        let mut inner_loop = None;
        let mut func = FunctionBuilder::new("k").build_with(|b| {
            let lb = b.constant(0);
            let ub = b.constant(4);
            let step = b.constant(1);
            b.for_loop(lb, ub, step, |outer, _| {
                let tile = outer.alloc_annotated(
                    BufferType::new(ElementType::F32, vec![16]),
                    Some(2),
                    None,
                );
                inner_loop = Some(outer.for_loop(lb, ub, step, |inner, iv| {
                    let v = inner.load(tile, vec![iv]);
                    inner.store(v, tile, vec![iv]);
                }));
                outer.dealloc(tile);
            });
        });

        let log = EventLog::new();
        let mut ctx = RewriteContext::new(&mut func, &log, "multibuffer");
        let site = locate(&mut ctx).sites.remove(0);
        let set = expand(&mut ctx, &site, 2, &MultibufferConfig::default()).unwrap();
        assert_eq!(Some(set.loop_op), inner_loop);
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_override_analysis() {
        let strict = MultibufferConfig::default().with_override_analysis(true);

        // copy fully overwrites the tile first
        let mut kernel = tiled_kernel("ok", TileSpec::default());
        assert!(run(&mut kernel, &strict).0.is_ok());

        // a load first observes the previous contents
        let mut func = FunctionBuilder::new("carried").build_with(|b| {
            let tile =
                b.alloc_annotated(BufferType::new(ElementType::F32, vec![8]), Some(2), None);
            let lb = b.constant(0);
            let step = b.constant(1);
            b.for_loop(lb, lb, step, |body, iv| {
                let v = body.load(tile, vec![iv]);
                body.store(v, tile, vec![iv]);
            });
        });
        let log = EventLog::new();
        let mut ctx = RewriteContext::new(&mut func, &log, "multibuffer");
        let site = locate(&mut ctx).sites.remove(0);
        assert_eq!(
            expand(&mut ctx, &site, 2, &strict).unwrap_err(),
            Error::LoopCarriedDependency { alloc: site.alloc }
        );
        assert!(expand(&mut ctx, &site, 2, &MultibufferConfig::default()).is_ok());
    }

    #[test]
    fn test_pipelined_loop_adopts_leading_barrier() {
        let mut kernel = tiled_kernel(
            "k",
            TileSpec::default().factor(2).depth(2).leading_barrier(),
        );
        let (result, log) = run(&mut kernel, &MultibufferConfig::default());
        let set = result.unwrap();
        let guard = set.guard.unwrap();
        assert!(!guard.inserted);
        assert!(log.has(EventKind::GuardAdopted));
        assert!(!log.has(EventKind::GuardInserted));

        let body = kernel.func.for_op(set.loop_op).unwrap().body;
        let ops = kernel.func.region_ops(body);
        assert_eq!(ops[0], guard.op);
        assert_eq!(ops[1], set.rotation.ops[0]);
        assert_eq!(
            kernel
                .func
                .ops()
                .filter(|(_, op)| matches!(op.kind(), OpKind::Barrier))
                .count(),
            1
        );
    }

    #[test]
    fn test_private_buffers_never_get_a_guard() {
        let ty = BufferType::new(ElementType::F32, vec![4]).in_space(AddressSpace::Private);
        let mut kernel = tiled_kernel("k", TileSpec::default().ty(ty).factor(1).depth(4));
        let (result, log) = run(&mut kernel, &MultibufferConfig::default());
        assert!(result.unwrap().guard.is_none());
        assert!(!log.has(EventKind::GuardInserted));
    }

    #[test]
    fn test_offset_loop_rotation_counts_iterations() {
        let mut kernel = tiled_kernel("k", TileSpec::default().factor(3).bounds(16, 4));
        let (result, _) = run(&mut kernel, &MultibufferConfig::default());
        let set = result.unwrap();
        let kinds: Vec<_> = set
            .rotation
            .ops
            .iter()
            .map(|op| kernel.func.op(*op).unwrap().kind().mnemonic())
            .collect();
        assert_eq!(kinds, vec!["arith", "arith", "constant", "arith"]);
        assert!(kernel.func.verify().is_ok());
    }
}
