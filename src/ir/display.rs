//! Textual form of functions, in the style of MLIR's generic printer.

use std::fmt::{self, Write};

use crate::ir::{Function, OpId, OpKind, RegionId, ValueId};

fn join(values: &[ValueId]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Function {
    fn print_region(&self, f: &mut fmt::Formatter<'_>, region: RegionId, depth: usize) -> fmt::Result {
        for &id in self.region_ops(region) {
            self.print_op(f, id, depth)?;
        }
        Ok(())
    }

    fn print_op(&self, f: &mut fmt::Formatter<'_>, id: OpId, depth: usize) -> fmt::Result {
        let Some(op) = self.op(id) else {
            return Ok(());
        };
        let indent = "  ".repeat(depth);
        let mut line = String::new();
        match op.kind() {
            OpKind::Alloc(alloc) => {
                write!(line, "{} = alloc : {}", alloc.result, alloc.ty)?;
                let mut attrs = Vec::new();
                if let Some(factor) = alloc.multibuffer {
                    attrs.push(format!("multibuffer = {factor}"));
                }
                if let Some(factor) = alloc.remultibuffer {
                    attrs.push(format!("remultibuffer = {factor}"));
                }
                if !attrs.is_empty() {
                    write!(line, " {{{}}}", attrs.join(", "))?;
                }
            }
            OpKind::Dealloc { buffer } => write!(line, "dealloc {buffer}")?,
            OpKind::Constant { result, value } => write!(line, "{result} = constant {value}")?,
            OpKind::Arith {
                result,
                kind,
                lhs,
                rhs,
            } => write!(line, "{result} = {kind} {lhs}, {rhs}")?,
            OpKind::For(for_op) => {
                write!(
                    line,
                    "for {} = {} to {} step {}",
                    for_op.induction, for_op.lower, for_op.upper, for_op.step
                )?;
                if let Some(depth) = for_op.pipeline_depth {
                    write!(line, " {{pipeline_depth = {depth}}}")?;
                }
                writeln!(f, "{indent}{line} {{")?;
                self.print_region(f, for_op.body, depth + 1)?;
                return writeln!(f, "{indent}}}");
            }
            OpKind::Load {
                result,
                buffer,
                indices,
            } => write!(line, "{result} = load {buffer}[{}]", join(indices))?,
            OpKind::Store {
                value,
                buffer,
                indices,
            } => write!(line, "store {value}, {buffer}[{}]", join(indices))?,
            OpKind::Fill { buffer, value } => write!(line, "fill {buffer}, {value}")?,
            OpKind::Copy { source, target } => write!(line, "copy {source} -> {target}")?,
            OpKind::Compute {
                name,
                inputs,
                outputs,
            } => write!(
                line,
                "compute \"{name}\" ins({}) outs({})",
                join(inputs),
                join(outputs)
            )?,
            OpKind::SelectSlot {
                result,
                slots,
                index,
            } => write!(line, "{result} = select_slot [{}][{index}]", join(slots))?,
            OpKind::Barrier | OpKind::Yield | OpKind::Return => {
                line.push_str(op.kind().mnemonic());
            }
        }
        writeln!(f, "{indent}{line}")
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "func @{}() {} {{", self.name(), self.location())?;
        self.print_region(f, self.body(), 1)?;
        writeln!(f, "}}")
    }
}
