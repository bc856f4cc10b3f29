//! Arithmetic action
//!
//! Picks any arithmetic template compatible with the supplied operands (or
//! the pinned opcode) and wires its sources. Sources the step leaves open get
//! fresh value ids, which legalization later fills with random `li`s.

use crate::context::LoweringContext;
use crate::isa::{Category, Instruction, InstructionFilter};
use crate::plan::{Step, StepInput};
use crate::{Error, Result};

/// Immediate-shift and rotate forms whose immediate is a 5-bit shift amount
const SHIFT_IMMEDIATE_OPS: &[&str] = &[
    "slli", "srli", "srai", "slliw", "sraiw", "srliw", "rori", "roriw",
];

/// Generic computation on up to two registers or a register and an immediate
#[derive(Debug, Clone, Default)]
pub struct ArithmeticAction {
    /// Pinned opcode
    pub op: Option<String>,
    /// First source value id
    pub src1: Option<String>,
    /// Second source value id
    pub src2: Option<String>,
    /// Immediate operand
    pub imm: Option<i64>,
}

impl ArithmeticAction {
    /// `op src1, src2` with a pinned opcode
    pub fn binary(op: impl Into<String>, src1: impl Into<String>, src2: impl Into<String>) -> Self {
        Self {
            op: Some(op.into()),
            src1: Some(src1.into()),
            src2: Some(src2.into()),
            imm: None,
        }
    }

    /// Interpret step inputs: at most two, at most one immediate
    pub fn from_step(step: &Step, op: Option<String>) -> Result<Self> {
        let mut action = Self {
            op,
            ..Self::default()
        };
        match step.inputs.as_slice() {
            [] => {}
            [StepInput::Imm(v)] => action.imm = Some(*v),
            [StepInput::Ref(id)] => action.src1 = Some(id.clone()),
            [StepInput::Imm(_), StepInput::Imm(_)] => {
                return Err(Error::invalid_step(
                    &step.id,
                    "arithmetic step has two immediate inputs",
                ))
            }
            [StepInput::Imm(v), StepInput::Ref(id)] | [StepInput::Ref(id), StepInput::Imm(v)] => {
                action.src1 = Some(id.clone());
                action.imm = Some(*v);
            }
            [StepInput::Ref(a), StepInput::Ref(b)] => {
                action.src1 = Some(a.clone());
                action.src2 = Some(b.clone());
            }
            more => {
                return Err(Error::invalid_step(
                    &step.id,
                    format!("arithmetic step has {} inputs, at most 2 are supported", more.len()),
                ))
            }
        }
        Ok(action)
    }

    pub(crate) fn for_each_id(&mut self, f: &mut dyn FnMut(&mut String)) {
        if let Some(src) = self.src1.as_mut() {
            f(src);
        }
        if let Some(src) = self.src2.as_mut() {
            f(src);
        }
    }

    pub(crate) fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(op) = &self.op {
            parts.push(format!("op={}", op));
        }
        if let Some(s) = &self.src1 {
            parts.push(format!("'{}'", s));
        }
        if let Some(s) = &self.src2 {
            parts.push(format!("'{}'", s));
        }
        if let Some(v) = self.imm {
            parts.push(format!("0x{:x}", v));
        }
        parts.join(", ")
    }

    fn filter(&self) -> InstructionFilter {
        let mut filter = InstructionFilter::category(Category::Arithmetic);
        filter.source_reg_count = match (&self.src1, &self.src2) {
            (Some(_), Some(_)) => Some(2),
            (Some(_), None) | (None, Some(_)) => Some(1),
            (None, None) => None,
        };
        if self.imm.is_some() {
            filter.has_immediate = Some(true);
        }
        filter
    }

    pub(crate) fn pick_instruction(&self, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        let pinned = match &self.op {
            Some(op) => match ctx.instruction(op) {
                Ok(instr) => Some(instr),
                Err(Error::InstructionNotFound { .. }) => {
                    tracing::warn!(
                        op = %op,
                        action = %desc,
                        "pinned opcode not in catalog, falling back to constraint selection"
                    );
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        let mut instr = match pinned {
            Some(instr) => instr,
            None => ctx.choose_instruction(&self.filter())?,
        };

        for (slot, src) in [("rs1", &self.src1), ("rs2", &self.src2)] {
            match instr.source_mut(slot) {
                Some(operand) => {
                    let id = match src {
                        Some(id) => id.clone(),
                        None => ctx.new_value_id(),
                    };
                    operand.set_virtual(id);
                }
                None if src.is_some() => {
                    return Err(Error::OperandSlotMissing {
                        instruction: instr.name.clone(),
                        slot: slot.to_string(),
                        action: desc.to_string(),
                    })
                }
                None => {}
            }
        }

        let is_shift = SHIFT_IMMEDIATE_OPS.contains(&instr.name.as_str());
        match instr.immediate_mut() {
            Some(operand) => {
                let value = match self.imm {
                    Some(v) => v,
                    None if is_shift => ctx.random_n_width_number(5, 2)?,
                    // 11 bits keeps the value positive in a signed 12-bit field
                    None => ctx.random_n_width_number(11, 2)?,
                };
                operand.set_imm(value);
            }
            None if self.imm.is_some() => {
                return Err(Error::OperandSlotMissing {
                    instruction: instr.name.clone(),
                    slot: "imm".to_string(),
                    action: desc.to_string(),
                })
            }
            None => {}
        }

        if let Some(rs3) = instr.source_mut("rs3") {
            rs3.set_virtual(ctx.new_value_id());
        }
        Ok(instr)
    }
}
