//! Leaf actions: immediates, moves through t2, labels, system instructions
//! and comments

use crate::context::LoweringContext;
use crate::isa::{regs, Instruction, Operand, OperandType, OperandValue, Register};
use crate::Result;
use std::fmt;

/// Registers destroyed by the runtime's t2-based directives
pub const RUNTIME_API_CLOBBERS: [Register; 3] = [regs::T1, regs::T2, regs::T6];

/// Value loaded by `li`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Immediate {
    /// Integer constant
    Value(i64),
    /// Link-time symbol or expression
    Symbol(String),
}

impl From<i64> for Immediate {
    fn from(v: i64) -> Self {
        Immediate::Value(v)
    }
}

impl From<String> for Immediate {
    fn from(s: String) -> Self {
        Immediate::Symbol(s)
    }
}

impl From<&str> for Immediate {
    fn from(s: &str) -> Self {
        Immediate::Symbol(s.to_string())
    }
}

impl From<&Immediate> for OperandValue {
    fn from(imm: &Immediate) -> Self {
        match imm {
            Immediate::Value(v) => OperandValue::Imm(*v),
            Immediate::Symbol(s) => OperandValue::Symbol(s.clone()),
        }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Value(v) => write!(f, "0x{:x}", v),
            Immediate::Symbol(s) => f.write_str(s),
        }
    }
}

/// Load immediate
#[derive(Debug, Clone)]
pub struct LiAction {
    /// Loaded value
    pub value: Immediate,
}

impl LiAction {
    /// Create a load of `value`
    pub fn new(value: impl Into<Immediate>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub(crate) fn pick_instruction(&self, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        let mut li = ctx.instruction("li")?;
        li.require_immediate(desc)?.value = OperandValue::from(&self.value);
        Ok(li)
    }

    /// `li t2, value` for a runtime directive
    pub(crate) fn pick_t2_instruction(&self, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        let mut li = self.pick_instruction(desc, ctx)?;
        li.require_destination(desc)?.set_register(regs::T2);
        Ok(li.with_clobbers(&RUNTIME_API_CLOBBERS))
    }
}

/// Register move through t2
#[derive(Debug, Clone)]
pub struct MoveAction {
    /// Copied value id (unused when moving out of t2)
    pub src: String,
}

impl MoveAction {
    /// `mv t2, src`
    pub(crate) fn pick_to_t2(&self, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        let mut mv = ctx.instruction("mv")?;
        mv.require_destination(desc)?.set_register(regs::T2);
        mv.require_source("rs1", desc)?.set_virtual(&self.src);
        Ok(mv.with_clobbers(&RUNTIME_API_CLOBBERS))
    }

    /// `mv rd, t2`; the destination is filled with the action id by elaboration
    pub(crate) fn pick_from_t2(&self, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        let mut mv = ctx.instruction("mv")?;
        mv.require_source("rs1", desc)?.set_register(regs::T2);
        Ok(mv)
    }
}

/// Code label
#[derive(Debug, Clone)]
pub struct LabelAction {
    /// Label name
    pub name: String,
    /// Label is an exception PC and stays glued to the next instruction
    pub instruction_pointer: bool,
}

/// Named instruction with no operands to wire (`ecall`, `fence`, ...)
#[derive(Debug, Clone)]
pub struct SystemAction {
    /// Mnemonic
    pub instruction: String,
}

/// Comment line
#[derive(Debug, Clone)]
pub struct CommentAction {
    /// Text
    pub text: String,
}

/// Source operand holding a fixed register
pub(crate) fn fixed_source(name: &str, reg: Register) -> Operand {
    Operand::with_value(name, OperandType::from(reg.file()), OperandValue::Reg(reg))
}
