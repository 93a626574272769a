//! Structural verifier.
//!
//! Checks that every operand names a value whose definition is live and
//! visible at the use: either earlier in the same region, earlier in an
//! enclosing region, or the induction variable of an enclosing loop.

use crate::{
    ir::{Function, OpId, ValueId},
    Result,
};

impl Function {
    /// Returns true if `value` is visible at `user`.
    #[must_use]
    pub fn value_visible_at(&self, value: ValueId, user: OpId) -> bool {
        let Some(def) = self.defining_op(value) else {
            return false;
        };
        if self
            .for_op(def)
            .is_some_and(|for_op| for_op.induction == value)
        {
            return self.is_proper_ancestor(def, user);
        }
        let Some(def_region) = self.op(def).map(|op| op.parent()) else {
            return false;
        };

        let mut current = Some(user);
        while let Some(candidate) = current {
            let Some(region) = self.op(candidate).map(|op| op.parent()) else {
                return false;
            };
            if region == def_region {
                return match (self.position(def), self.position(candidate)) {
                    (Some(d), Some(u)) => d < u,
                    _ => false,
                };
            }
            current = self.parent_op(candidate);
        }
        false
    }

    /// Verifies the structural invariants of the function.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] describing the first violation found.
    pub fn verify(&self) -> Result<()> {
        for id in self.walk() {
            let op = self.op_checked(id)?;
            if let Some(region) = op.kind().region() {
                if self.region_parent(region) != Some(id) {
                    return Err(malformed_error!("{} does not own its region {}", id, region));
                }
            }
            for (operand, value) in op.kind().operands().into_iter().enumerate() {
                if self.defining_op(value).is_none() {
                    return Err(malformed_error!(
                        "operand #{} of {} ({}) has no live definition",
                        operand,
                        id,
                        value
                    ));
                }
                if !self.value_visible_at(value, id) {
                    return Err(malformed_error!(
                        "operand #{} of {} ({}) is not visible at its use",
                        operand,
                        id,
                        value
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{BufferType, ElementType, FunctionBuilder, InsertPoint, OpKind};

    #[test]
    fn test_well_formed_kernel_verifies() {
        let func = FunctionBuilder::new("k").build_with(|b| {
            let buf = b.alloc(BufferType::new(ElementType::F32, vec![4]));
            let lb = b.constant(0);
            let ub = b.constant(4);
            let step = b.constant(1);
            b.for_loop(lb, ub, step, |body, iv| {
                let v = body.load(buf, vec![iv]);
                body.store(v, buf, vec![iv]);
            });
            b.dealloc(buf);
        });
        assert!(func.verify().is_ok());
    }

    #[test]
    fn test_use_before_def_is_rejected() {
        let mut captured = None;
        let mut func = FunctionBuilder::new("k").build_with(|b| {
            let buf = b.alloc(BufferType::new(ElementType::F32, vec![4]));
            b.dealloc(buf);
            captured = Some(buf);
        });
        let buf = captured.unwrap();
        let alloc = func.defining_op(buf).unwrap();
        func.insert(OpKind::Dealloc { buffer: buf }, InsertPoint::Before(alloc))
            .unwrap();
        assert!(func.verify().is_err());
    }

    #[test]
    fn test_erased_definition_is_rejected() {
        let mut buf = None;
        let mut func = FunctionBuilder::new("k").build_with(|b| {
            let value = b.alloc(BufferType::new(ElementType::F32, vec![4]));
            b.dealloc(value);
            buf = Some(value);
        });
        let alloc = func.defining_op(buf.unwrap()).unwrap();
        func.erase(alloc).unwrap();
        assert!(func.verify().is_err());
    }

    #[test]
    fn test_induction_variable_only_visible_inside_loop() {
        let mut iv_out = None;
        let mut func = FunctionBuilder::new("k").build_with(|b| {
            let c = b.constant(0);
            b.for_loop(c, c, c, |_, iv| {
                iv_out = Some(iv);
            });
        });
        let body = func.body();
        func.insert(
            OpKind::Dealloc {
                buffer: iv_out.unwrap(),
            },
            InsertPoint::End(body),
        )
        .unwrap();
        assert!(func.verify().is_err());
    }
}
