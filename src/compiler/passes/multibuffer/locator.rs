//! Discovery of annotated allocations.
//!
//! One pre-order walk of the function collects every `alloc` carrying a
//! buffering directive. Both directives are stripped from the IR as soon as
//! they are read, so an allocation counts as "scheduled" independently of
//! whether its rewrite later succeeds.

use crate::{
    compiler::{context::RewriteContext, events::EventKind},
    ir::{BufferType, OpId, ValueId},
};

/// One allocation scheduled for multi-buffering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationSite {
    /// The annotated `alloc` op
    pub alloc: OpId,
    /// The buffer it defines
    pub buffer: ValueId,
    /// Type of the buffer
    pub ty: BufferType,
    /// Requested slot count, as written in the directive
    pub factor: i64,
    /// Slot count to switch to after expansion
    pub refactor: Option<i64>,
}

/// Everything discovery found in one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Annotated allocations in pre-order
    pub sites: Vec<AllocationSite>,
    /// Allocations that carried only a refactor directive
    pub orphans: Vec<OpId>,
}

/// Collects the annotated allocations of the function under rewrite and
/// strips every directive it reads.
pub fn locate(ctx: &mut RewriteContext<'_>) -> Discovery {
    let mut discovery = Discovery::default();

    for id in ctx.func().walk() {
        let Some(alloc) = ctx.func_mut().alloc_mut(id) else {
            continue;
        };
        if !alloc.has_directive() {
            continue;
        }
        let factor = alloc.multibuffer.take();
        let refactor = alloc.remultibuffer.take();
        let buffer = alloc.result;
        let ty = alloc.ty.clone();

        match factor {
            Some(factor) => {
                let message = match refactor {
                    Some(refactor) => format!("multibuffer = {factor}, remultibuffer = {refactor}"),
                    None => format!("multibuffer = {factor}"),
                };
                ctx.record(EventKind::DirectiveConsumed, id).message(message);
                discovery.sites.push(AllocationSite {
                    alloc: id,
                    buffer,
                    ty,
                    factor,
                    refactor,
                });
            }
            None => {
                ctx.warn(
                    id,
                    format!(
                        "remultibuffer = {} without multibuffer directive, dropped",
                        refactor.unwrap_or_default()
                    ),
                );
                discovery.orphans.push(id);
            }
        }
    }

    discovery
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::events::EventLog,
        ir::{ElementType, FunctionBuilder},
    };

    #[test]
    fn test_sites_in_walk_order_and_directives_stripped() {
        let mut buffers = Vec::new();
        let mut func = FunctionBuilder::new("k").build_with(|b| {
            let ty = BufferType::new(ElementType::F32, vec![16]);
            buffers.push(b.alloc_annotated(ty.clone(), Some(2), None));
            b.alloc(ty.clone());
            let c = b.constant(0);
            b.for_loop(c, c, c, |body, _| {
                buffers.push(body.alloc_annotated(ty.clone(), Some(3), Some(2)));
            });
            b.alloc_annotated(ty, None, Some(4));
        });

        let log = EventLog::new();
        let mut ctx = RewriteContext::new(&mut func, &log, "multibuffer");
        let discovery = locate(&mut ctx);

        assert_eq!(
            discovery.sites.iter().map(|s| s.buffer).collect::<Vec<_>>(),
            buffers
        );
        assert_eq!(discovery.sites[0].factor, 2);
        assert_eq!(discovery.sites[1].refactor, Some(2));
        assert_eq!(discovery.orphans.len(), 1);
        assert!(func.ops().all(|(_, op)| op
            .kind()
            .as_alloc()
            .map_or(true, |alloc| !alloc.has_directive())));
        assert_eq!(log.count_kind(EventKind::DirectiveConsumed), 2);
        assert_eq!(log.warnings().count(), 1);
    }

    #[test]
    fn test_second_discovery_finds_nothing() {
        let mut func = FunctionBuilder::new("k").build_with(|b| {
            b.alloc_annotated(BufferType::new(ElementType::F32, vec![4]), Some(0), None);
        });
        let log = EventLog::new();

        let first = locate(&mut RewriteContext::new(&mut func, &log, "multibuffer"));
        assert_eq!(first.sites.len(), 1);
        assert_eq!(first.sites[0].factor, 0);

        let second = locate(&mut RewriteContext::new(&mut func, &log, "multibuffer"));
        assert!(second.sites.is_empty());
    }

    #[test]
    fn test_unannotated_allocation_untouched() {
        let mut func = FunctionBuilder::new("k").build_with(|b| {
            b.alloc(BufferType::new(ElementType::I32, vec![4]));
        });
        let before = func.to_string();
        let log = EventLog::new();
        let discovery = locate(&mut RewriteContext::new(&mut func, &log, "multibuffer"));
        assert_eq!(discovery, Discovery::default());
        assert_eq!(func.to_string(), before);
        assert!(log.is_empty());
    }
}
