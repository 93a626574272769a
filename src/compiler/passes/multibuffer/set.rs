//! Output shape shared by expansion and refactoring.

use crate::ir::{BufferType, OpId, UseSite, ValueId};

/// Where a slot's storage and role come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotOrigin {
    /// Allocated by the expansion or appended by an in-place grow.
    Fresh,
    /// Storage kept from the previous set at the same ordinal.
    Reused {
        /// Ordinal in the previous set
        from: usize,
    },
    /// Freshly allocated by a reallocation, taking over the role of an old
    /// slot round-robin.
    Inherited {
        /// Ordinal in the previous set
        from: usize,
    },
}

/// One physical copy of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Position in the rotation
    pub ordinal: usize,
    /// The `alloc` op creating this slot
    pub alloc: OpId,
    /// The buffer value of this slot
    pub value: ValueId,
    /// Provenance
    pub origin: SlotOrigin,
}

/// The ops computing `iteration mod factor` at the top of the loop body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationIndex {
    /// The index value
    pub value: ValueId,
    /// Materialising ops in program order
    pub ops: Vec<OpId>,
    /// The modulus
    pub factor: usize,
}

/// One rewritten access: an operand that now reads the selected slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UseSiteBinding {
    /// The rewritten operand
    pub site: UseSite,
    /// The `select_slot` op the operand reads
    pub selector: OpId,
}

/// The per-slot releases replacing one release of the original buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// `dealloc` ops, indexed by slot ordinal
    pub ops: Vec<OpId>,
}

/// The synchronization barrier protecting slot reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guard {
    /// The barrier op at the top of the loop body
    pub op: OpId,
    /// True if the barrier was inserted by this rewrite, false if an existing
    /// barrier was adopted
    pub inserted: bool,
}

/// N physical slots replacing one allocation site.
///
/// All slots share [`ExpandedBufferSet::ty`]; total storage is
/// `slots.len() * ty.size_in_bytes()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedBufferSet {
    /// Type shared by every slot
    pub ty: BufferType,
    /// Slots in ordinal order
    pub slots: Vec<Slot>,
    /// The loop whose induction variable drives the rotation
    pub loop_op: OpId,
    /// Rotation index expression
    pub rotation: RotationIndex,
    /// The `select_slot` op
    pub selector: OpId,
    /// Value produced by the selector
    pub selected: ValueId,
    /// Rewritten accesses
    pub bindings: Vec<UseSiteBinding>,
    /// Rewritten releases
    pub releases: Vec<Release>,
    /// Guard barrier, if the slot count requires one
    pub guard: Option<Guard>,
}

impl ExpandedBufferSet {
    /// Number of slots.
    #[must_use]
    pub fn factor(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the set holds no slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of original uses this set accounts for: one per rewritten
    /// access operand plus one per original release.
    #[must_use]
    pub fn rewritten_use_count(&self) -> usize {
        self.bindings.len() + self.releases.len()
    }

    /// Slot buffer values in ordinal order.
    #[must_use]
    pub fn slot_values(&self) -> Vec<ValueId> {
        self.slots.iter().map(|slot| slot.value).collect()
    }

    /// Total bytes allocated by the set, if the element width is known.
    #[must_use]
    pub fn total_bytes(&self) -> Option<u64> {
        let count = u64::try_from(self.slots.len()).ok()?;
        self.ty.size_in_bytes()?.checked_mul(count)
    }
}
