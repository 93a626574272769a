//! Rotation index arithmetic and the guard barrier at the top of a loop body.
//!
//! The rotation index of loop `for iv = lb to ub step s` with `n` slots is
//! `((iv - lb) / s) mod n`, the zero-based iteration number modulo the slot
//! count. Trivial parts are not materialised:
//!
//! ```text
//! n == 1              ->  %idx = constant 0
//! lb == 0 && s == 1   ->  %idx = rem %iv, %n
//! otherwise           ->  %idx = rem (div (sub %iv, %lb), %s), %n
//! ```

use crate::{
    compiler::{
        context::RewriteContext,
        events::EventKind,
        passes::multibuffer::set::{Guard, RotationIndex},
    },
    config::MultibufferConfig,
    ir::{ArithKind, BufferType, Function, InsertPoint, OpId, OpKind, Type, ValueId},
    Result,
};

/// Inserts ops one after another, starting at a given point.
pub(crate) struct Cursor {
    point: InsertPoint,
}

impl Cursor {
    pub(crate) fn new(point: InsertPoint) -> Self {
        Self { point }
    }

    /// Inserts `kind` at the cursor and moves the cursor past it.
    pub(crate) fn emit(&mut self, func: &mut Function, kind: OpKind) -> Result<OpId> {
        let id = func.insert(kind, self.point)?;
        self.point = InsertPoint::After(id);
        Ok(id)
    }

    /// Emits `%r = constant value`.
    fn constant(&mut self, func: &mut Function, value: i64, ops: &mut Vec<OpId>) -> Result<ValueId> {
        let result = func.fresh_value(Type::Index);
        ops.push(self.emit(func, OpKind::Constant { result, value })?);
        Ok(result)
    }

    /// Emits `%r = kind lhs, rhs`.
    fn arith(
        &mut self,
        func: &mut Function,
        kind: ArithKind,
        lhs: ValueId,
        rhs: ValueId,
        ops: &mut Vec<OpId>,
    ) -> Result<ValueId> {
        let result = func.fresh_value(Type::Index);
        ops.push(self.emit(
            func,
            OpKind::Arith {
                result,
                kind,
                lhs,
                rhs,
            },
        )?);
        Ok(result)
    }

    /// The point right after the last emitted op.
    pub(crate) fn point(&self) -> InsertPoint {
        self.point
    }
}

/// Where new ops go at the top of `loop_op`'s body: right after a leading
/// barrier if the body has one, otherwise at the very start.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if `loop_op` is not a live loop.
pub(crate) fn body_entry(func: &Function, loop_op: OpId) -> Result<InsertPoint> {
    let body = func
        .for_op(loop_op)
        .map(|for_op| for_op.body)
        .ok_or_else(|| malformed_error!("{} is not a live loop", loop_op))?;
    match func.region_ops(body).first() {
        Some(&first) if matches!(func.op(first).map(|op| op.kind()), Some(OpKind::Barrier)) => {
            Ok(InsertPoint::After(first))
        }
        _ => Ok(InsertPoint::Start(body)),
    }
}

/// Materialises `iteration mod factor` for `loop_op` at `cursor`.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if `loop_op` is not a live loop or an
/// insertion fails.
pub(crate) fn build_rotation(
    ctx: &mut RewriteContext<'_>,
    loop_op: OpId,
    factor: usize,
    cursor: &mut Cursor,
) -> Result<RotationIndex> {
    let for_op = ctx
        .func()
        .for_op(loop_op)
        .cloned()
        .ok_or_else(|| malformed_error!("{} is not a live loop", loop_op))?;
    let modulus =
        i64::try_from(factor).map_err(|_| malformed_error!("slot count {} overflows", factor))?;

    let func = ctx.func_mut();
    let mut ops = Vec::new();
    let value = if factor == 1 {
        cursor.constant(func, 0, &mut ops)?
    } else {
        let mut iteration = for_op.induction;
        if func.constant_value(for_op.lower) != Some(0) {
            iteration = cursor.arith(func, ArithKind::Sub, iteration, for_op.lower, &mut ops)?;
        }
        if func.constant_value(for_op.step) != Some(1) {
            iteration = cursor.arith(func, ArithKind::Div, iteration, for_op.step, &mut ops)?;
        }
        let n = cursor.constant(func, modulus, &mut ops)?;
        cursor.arith(func, ArithKind::Rem, iteration, n, &mut ops)?
    };

    ctx.record(EventKind::RotationDerived, loop_op)
        .message(format!("{value} = iteration mod {factor}"));
    Ok(RotationIndex { value, ops, factor })
}

/// Erases the ops of a rotation index, last first.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if one of the ops was already erased.
pub(crate) fn erase_rotation(func: &mut Function, rotation: &RotationIndex) -> Result<()> {
    for &op in rotation.ops.iter().rev() {
        func.erase(op)?;
    }
    Ok(())
}

/// Returns true if `factor` slots of `ty` need a guard barrier in `loop_op`.
///
/// Reuse of a slot can only race when more than one thread sees the storage
/// and at least `factor` iterations may be in flight at once.
#[must_use]
pub(crate) fn guard_required(
    func: &Function,
    ty: &BufferType,
    loop_op: OpId,
    factor: usize,
    config: &MultibufferConfig,
) -> bool {
    if !config.insert_guards || !ty.space.is_shared() {
        return false;
    }
    let depth = func
        .for_op(loop_op)
        .and_then(|for_op| for_op.pipeline_depth)
        .unwrap_or(config.default_pipeline_depth);
    usize::try_from(depth).map_or(true, |depth| depth >= factor)
}

/// Makes sure the body of `loop_op` starts with a barrier, adopting an
/// existing leading barrier.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if `loop_op` is not a live loop.
pub(crate) fn ensure_guard(ctx: &mut RewriteContext<'_>, loop_op: OpId) -> Result<Guard> {
    let body = ctx
        .func()
        .for_op(loop_op)
        .map(|for_op| for_op.body)
        .ok_or_else(|| malformed_error!("{} is not a live loop", loop_op))?;

    let leading = ctx.func().region_ops(body).first().copied();
    if let Some(first) = leading {
        if matches!(ctx.func().op(first).map(|op| op.kind()), Some(OpKind::Barrier)) {
            ctx.record(EventKind::GuardAdopted, first);
            return Ok(Guard {
                op: first,
                inserted: false,
            });
        }
    }

    let op = ctx.func_mut().insert(OpKind::Barrier, InsertPoint::Start(body))?;
    ctx.record(EventKind::GuardInserted, op);
    Ok(Guard { op, inserted: true })
}

/// Returns true if another expanded set in `loop_op`, one whose selector
/// is not `selector`, still needs the guard barrier.
fn guard_still_needed(
    func: &Function,
    loop_op: OpId,
    selector: OpId,
    config: &MultibufferConfig,
) -> bool {
    let Some(body) = func.for_op(loop_op).map(|for_op| for_op.body) else {
        return false;
    };
    func.region_ops(body)
        .iter()
        .filter(|&&op| op != selector)
        .filter_map(|&op| match func.op(op).map(|op| op.kind()) {
            Some(OpKind::SelectSlot { result, slots, .. }) => Some((*result, slots.len())),
            _ => None,
        })
        .any(|(result, factor)| {
            func.value_type(result)
                .and_then(Type::as_buffer)
                .is_some_and(|ty| guard_required(func, ty, loop_op, factor, config))
        })
}

/// Re-applies the guard rule to the set selected by `selector` after its
/// slot count changed.
///
/// Returns the guard the new set should carry. A barrier this pass inserted
/// earlier is removed again when neither this set nor any other set
/// expanded in the same loop needs it; an adopted one is left alone.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the loop or the old guard is gone.
pub(crate) fn reapply_guard(
    ctx: &mut RewriteContext<'_>,
    current: Option<Guard>,
    needed: bool,
    loop_op: OpId,
    selector: OpId,
    config: &MultibufferConfig,
) -> Result<Option<Guard>> {
    match (current, needed) {
        (Some(guard), true) => Ok(Some(guard)),
        (None, true) => ensure_guard(ctx, loop_op).map(Some),
        (Some(guard), false) => {
            if guard.inserted && !guard_still_needed(ctx.func(), loop_op, selector, config) {
                ctx.func_mut().erase(guard.op)?;
            }
            Ok(None)
        }
        (None, false) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::events::EventLog,
        ir::{AddressSpace, ElementType, FunctionBuilder},
    };

    fn loop_kernel(lower: i64, step: i64, depth: Option<u32>) -> (Function, OpId) {
        let mut the_loop = None;
        let func = FunctionBuilder::new("k").build_with(|b| {
            let lb = b.constant(lower);
            let ub = b.constant(64);
            let s = b.constant(step);
            the_loop = Some(match depth {
                Some(depth) => b.pipelined_loop(lb, ub, s, depth, |body, _| {
                    body.barrier();
                }),
                None => b.for_loop(lb, ub, s, |body, _| {
                    body.compute("mma", vec![], vec![]);
                }),
            });
        });
        (func, the_loop.unwrap())
    }

    fn mnemonics(func: &Function, ops: &[OpId]) -> Vec<String> {
        ops.iter()
            .map(|op| match func.op(*op).unwrap().kind() {
                OpKind::Arith { kind, .. } => kind.to_string(),
                other => other.mnemonic().to_string(),
            })
            .collect()
    }

    fn rotation_for(func: &mut Function, loop_op: OpId, factor: usize) -> RotationIndex {
        let log = EventLog::new();
        let entry = body_entry(func, loop_op).unwrap();
        let mut ctx = RewriteContext::new(func, &log, "test");
        let mut cursor = Cursor::new(entry);
        build_rotation(&mut ctx, loop_op, factor, &mut cursor).unwrap()
    }

    #[test]
    fn test_unit_loop_uses_plain_rem() {
        let (mut func, loop_op) = loop_kernel(0, 1, None);
        let rotation = rotation_for(&mut func, loop_op, 2);
        assert_eq!(mnemonics(&func, &rotation.ops), vec!["constant", "rem"]);
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_offset_strided_loop_normalises_iteration() {
        let (mut func, loop_op) = loop_kernel(4, 2, None);
        let rotation = rotation_for(&mut func, loop_op, 3);
        assert_eq!(
            mnemonics(&func, &rotation.ops),
            vec!["sub", "div", "constant", "rem"]
        );
        let body = func.for_op(loop_op).unwrap().body;
        assert_eq!(&func.region_ops(body)[..4], rotation.ops.as_slice());
    }

    #[test]
    fn test_single_slot_is_constant_zero() {
        let (mut func, loop_op) = loop_kernel(0, 1, None);
        let rotation = rotation_for(&mut func, loop_op, 1);
        assert_eq!(func.constant_value(rotation.value), Some(0));

        erase_rotation(&mut func, &rotation).unwrap();
        assert!(rotation.ops.iter().all(|op| !func.is_live(*op)));
    }

    #[test]
    fn test_guard_rule() {
        let (func, loop_op) = loop_kernel(0, 1, Some(2));
        let config = MultibufferConfig::default();
        let shared = BufferType::new(ElementType::F16, vec![8]);
        let private = shared.clone().in_space(AddressSpace::Private);

        assert!(guard_required(&func, &shared, loop_op, 2, &config));
        assert!(!guard_required(&func, &shared, loop_op, 3, &config));
        assert!(!guard_required(&func, &private, loop_op, 1, &config));
        assert!(!guard_required(
            &func,
            &shared,
            loop_op,
            2,
            &MultibufferConfig::default().with_guards(false)
        ));

        let (plain, plain_loop) = loop_kernel(0, 1, None);
        assert!(guard_required(&plain, &shared, plain_loop, 1, &config));
        assert!(!guard_required(&plain, &shared, plain_loop, 2, &config));
    }

    #[test]
    fn test_leading_barrier_is_adopted() {
        let (mut func, loop_op) = loop_kernel(0, 1, Some(2));
        let config = MultibufferConfig::default();
        let log = EventLog::new();
        let mut ctx = RewriteContext::new(&mut func, &log, "test");
        let guard = ensure_guard(&mut ctx, loop_op).unwrap();
        assert!(!guard.inserted);
        assert!(log.has(EventKind::GuardAdopted));

        // adopted guards survive when no longer needed
        let mut ctx = RewriteContext::new(&mut func, &log, "test");
        assert_eq!(reapply_guard(&mut ctx, Some(guard), false, loop_op, guard.op, &config).unwrap(), None);
        assert!(func.is_live(guard.op));
    }

    #[test]
    fn test_inserted_guard_is_removed_when_not_needed() {
        let (mut func, loop_op) = loop_kernel(0, 1, None);
        let config = MultibufferConfig::default();
        let log = EventLog::new();
        let mut ctx = RewriteContext::new(&mut func, &log, "test");
        let guard = ensure_guard(&mut ctx, loop_op).unwrap();
        assert!(guard.inserted);
        let body = ctx.func().for_op(loop_op).unwrap().body;
        assert_eq!(ctx.func().region_ops(body)[0], guard.op);

        assert_eq!(reapply_guard(&mut ctx, Some(guard), false, loop_op, guard.op, &config).unwrap(), None);
        assert!(!func.is_live(guard.op));
    }

    #[test]
    fn test_rotation_goes_after_leading_barrier() {
        let (mut func, loop_op) = loop_kernel(0, 1, Some(2));
        let body = func.for_op(loop_op).unwrap().body;
        let barrier = func.region_ops(body)[0];
        assert_eq!(body_entry(&func, loop_op).unwrap(), InsertPoint::After(barrier));

        let rotation = rotation_for(&mut func, loop_op, 2);
        assert_eq!(func.region_ops(body)[0], barrier);
        assert_eq!(func.region_ops(body)[1], rotation.ops[0]);
    }
}
