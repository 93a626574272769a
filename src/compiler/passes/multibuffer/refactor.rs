//! Changing the slot count of an already expanded buffer.
//!
//! Going from `N` to `M` slots picks one of three strategies:
//!
//! | Relation              | Strategy     | Storage                                   |
//! |-----------------------|--------------|-------------------------------------------|
//! | `M == N`, `N % M == 0`| shrink       | keep slots `0..M`, erase the rest         |
//! | `M % N == 0`          | grow         | keep every slot, append `M - N` new ones  |
//! | otherwise             | reallocate   | `M` new slots, slot `k` inherits `k mod N`|
//!
//! The in-place strategies rewrite only the rotation arithmetic and the slot
//! list of the `select_slot`; the selected value keeps its id, so the rewritten
//! accesses are not touched. A reallocation creates a new selector and
//! re-points every binding at it.
//!
//! In every case the guard rule is re-evaluated for `M`.

use strum::Display;

use crate::{
    compiler::{
        context::RewriteContext,
        events::EventKind,
        passes::multibuffer::{
            expand::{emit_releases, emit_selector, emit_slots, slot_count},
            rotation::{
                body_entry, build_rotation, erase_rotation, guard_required, reapply_guard, Cursor,
            },
            set::{ExpandedBufferSet, Release, Slot, SlotOrigin, UseSiteBinding},
        },
    },
    config::MultibufferConfig,
    ir::{Function, InsertPoint, OpId, OpKind, ValueId},
    Error, Result,
};

/// How the storage of the old set is turned into the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RefactorStrategy {
    /// Keep the first `M` slots.
    Shrink,
    /// Keep every slot and append new ones.
    Grow,
    /// Allocate `M` new slots and drop the old ones.
    Reallocate,
}

impl RefactorStrategy {
    /// Picks the strategy for going from `current` to `target` slots.
    /// Both counts must be non-zero.
    #[must_use]
    pub fn choose(current: usize, target: usize) -> Self {
        if target == current || current % target == 0 {
            Self::Shrink
        } else if target % current == 0 {
            Self::Grow
        } else {
            Self::Reallocate
        }
    }
}

fn check_live(func: &Function, set: &ExpandedBufferSet) -> Result<()> {
    if func.for_op(set.loop_op).is_none() {
        return Err(malformed_error!("loop {} of the expanded set is gone", set.loop_op));
    }
    let stale = set
        .slots
        .iter()
        .map(|slot| slot.alloc)
        .chain(std::iter::once(set.selector))
        .chain(set.rotation.ops.iter().copied())
        .chain(set.releases.iter().flat_map(|release| release.ops.iter().copied()))
        .find(|op| !func.is_live(*op));
    match stale {
        Some(op) => Err(malformed_error!(
            "{} of the expanded set was erased in @{}",
            op,
            func.name()
        )),
        None => Ok(()),
    }
}

/// Replaces the selector in place, keeping its result value.
fn reselect(
    func: &mut Function,
    set: &ExpandedBufferSet,
    slots: &[Slot],
    index: ValueId,
    cursor: &mut Cursor,
) -> Result<OpId> {
    let op = cursor.emit(
        func,
        OpKind::SelectSlot {
            result: set.selected,
            slots: slots.iter().map(|slot| slot.value).collect(),
            index,
        },
    )?;
    func.erase(set.selector)?;
    Ok(op)
}

/// Converts `set` to `new_factor` slots.
///
/// The returned set replaces `set`, which must not be used afterwards.
///
/// # Errors
///
/// - [`Error::InvalidFactor`] if `new_factor < 1`
/// - [`Error::EmptySource`] if `set` has no slot
///
/// Neither leaves a partial rewrite behind. [`Error::Malformed`] is returned
/// if ops recorded in `set` were erased in the meantime.
pub fn refactor(
    ctx: &mut RewriteContext<'_>,
    set: &ExpandedBufferSet,
    new_factor: i64,
    config: &MultibufferConfig,
) -> Result<ExpandedBufferSet> {
    let target = slot_count(new_factor)?;
    if set.is_empty() {
        return Err(Error::EmptySource);
    }
    check_live(ctx.func(), set)?;

    let current = set.factor();
    let strategy = RefactorStrategy::choose(current, target);
    let loop_op = set.loop_op;

    let needed = guard_required(ctx.func(), &set.ty, loop_op, target, config);
    let guard = reapply_guard(ctx, set.guard, needed, loop_op, set.selector, config)?;

    let mut cursor = Cursor::new(body_entry(ctx.func(), loop_op)?);
    let rotation = build_rotation(ctx, loop_op, target, &mut cursor)?;

    let last_alloc = set.slots[current - 1].alloc;
    let (slots, selector, selected, releases) = match strategy {
        RefactorStrategy::Shrink | RefactorStrategy::Grow => {
            let mut slots: Vec<Slot> = set
                .slots
                .iter()
                .take(target)
                .map(|slot| Slot {
                    origin: SlotOrigin::Reused { from: slot.ordinal },
                    ..slot.clone()
                })
                .collect();

            let mut appended = Vec::new();
            if target > current {
                let mut alloc_cursor = Cursor::new(InsertPoint::After(last_alloc));
                appended = emit_slots(
                    ctx.func_mut(),
                    &set.ty,
                    current,
                    target - current,
                    |_| SlotOrigin::Fresh,
                    &mut alloc_cursor,
                )?;
                slots.extend(appended.iter().cloned());
            }

            let selector = reselect(ctx.func_mut(), set, &slots, rotation.value, &mut cursor)?;

            let mut releases = Vec::with_capacity(set.releases.len());
            for release in &set.releases {
                let mut ops: Vec<OpId> = release.ops.iter().take(target).copied().collect();
                for &dropped in release.ops.iter().skip(target) {
                    ctx.func_mut().erase(dropped)?;
                }
                if let Some(&last) = release.ops.last() {
                    if !appended.is_empty() {
                        let mut release_cursor = Cursor::new(InsertPoint::After(last));
                        ops.extend(emit_releases(ctx.func_mut(), &appended, &mut release_cursor)?);
                    }
                }
                releases.push(Release { ops });
            }

            for slot in set.slots.iter().skip(target) {
                ctx.func_mut().erase(slot.alloc)?;
                ctx.record(EventKind::SlotDiscarded, slot.alloc)
                    .message(format!("slot {} ({})", slot.ordinal, slot.value));
            }

            ctx.record(EventKind::SlotsRegrouped, selector)
                .message(format!("{current} -> {target} slots ({strategy})"));
            (slots, selector, set.selected, releases)
        }
        RefactorStrategy::Reallocate => {
            let mut alloc_cursor = Cursor::new(InsertPoint::After(last_alloc));
            let slots = emit_slots(
                ctx.func_mut(),
                &set.ty,
                0,
                target,
                |ordinal| SlotOrigin::Inherited {
                    from: ordinal % current,
                },
                &mut alloc_cursor,
            )?;
            let (selector, selected) =
                emit_selector(ctx.func_mut(), &set.ty, &slots, rotation.value, &mut cursor)?;

            for binding in &set.bindings {
                let previous = ctx.func_mut().replace_operand(
                    binding.site.user,
                    binding.site.operand,
                    selected,
                )?;
                if previous != set.selected {
                    return Err(malformed_error!(
                        "operand #{} of {} read {} instead of {}",
                        binding.site.operand,
                        binding.site.user,
                        previous,
                        set.selected
                    ));
                }
                ctx.record(EventKind::UseRebound, binding.site.user)
                    .message(format!("operand #{} -> {}", binding.site.operand, selected));
            }

            let mut releases = Vec::with_capacity(set.releases.len());
            for release in &set.releases {
                let Some(&first) = release.ops.first() else {
                    continue;
                };
                let mut release_cursor = Cursor::new(InsertPoint::Before(first));
                let ops = emit_releases(ctx.func_mut(), &slots, &mut release_cursor)?;
                for &old in &release.ops {
                    ctx.func_mut().erase(old)?;
                }
                releases.push(Release { ops });
            }

            ctx.func_mut().erase(set.selector)?;
            for slot in &set.slots {
                ctx.func_mut().erase(slot.alloc)?;
                ctx.record(EventKind::SlotDiscarded, slot.alloc)
                    .message(format!("slot {} ({})", slot.ordinal, slot.value));
            }

            ctx.record(EventKind::SlotsReallocated, selector)
                .message(format!("{current} -> {target} slots"));
            (slots, selector, selected, releases)
        }
    };

    erase_rotation(ctx.func_mut(), &set.rotation)?;

    let bindings = set
        .bindings
        .iter()
        .map(|binding| UseSiteBinding {
            site: binding.site,
            selector,
        })
        .collect();

    Ok(ExpandedBufferSet {
        ty: set.ty.clone(),
        slots,
        loop_op,
        rotation,
        selector,
        selected,
        bindings,
        releases,
        guard,
    })
}
