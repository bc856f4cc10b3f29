//! CSR reads and writes
//!
//! A CSR at or above the test's privilege level is accessed directly with a
//! Zicsr instruction. A more privileged CSR goes through the runtime's
//! `;#csr_rw` directive, which takes and returns its value in t2.

use super::simple::{fixed_source, RUNTIME_API_CLOBBERS};
use super::{Action, ActionKind, LiAction, MoveAction, Splice};
use crate::context::LoweringContext;
use crate::isa::{
    regs, Category, CsrApiCall, Extensions, Instruction, InstructionForm, Operand, OperandType,
    OperandValue,
};
use crate::plan::{Step, StepInput};
use crate::{Error, Result};
use std::fmt;

/// Unsigned 5-bit window of the `csrr*i` immediate
const ZIMM_RANGE: std::ops::Range<i64> = 0..32;

/// Read-modify-write flavor of a CSR write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrOperation {
    /// `csrrw`
    Write,
    /// `csrrs`
    Set,
    /// `csrrc`
    Clear,
}

impl CsrOperation {
    fn mnemonic(self, immediate: bool) -> &'static str {
        match (self, immediate) {
            (CsrOperation::Write, false) => "csrrw",
            (CsrOperation::Set, false) => "csrrs",
            (CsrOperation::Clear, false) => "csrrc",
            (CsrOperation::Write, true) => "csrrwi",
            (CsrOperation::Set, true) => "csrrsi",
            (CsrOperation::Clear, true) => "csrrci",
        }
    }

    fn api_call(self) -> CsrApiCall {
        match self {
            CsrOperation::Write => CsrApiCall::Write,
            CsrOperation::Set => CsrApiCall::Set,
            CsrOperation::Clear => CsrApiCall::Clear,
        }
    }
}

impl fmt::Display for CsrOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.api_call(), f)
    }
}

/// Runtime CSR directive instruction
pub(crate) fn csr_api_instruction(csr: &str, call: CsrApiCall, direct: bool) -> Instruction {
    let instr = Instruction::new("csr_rw", Category::System, Extensions::ZICSR)
        .with_clobbers(&RUNTIME_API_CLOBBERS)
        .with_form(InstructionForm::CsrApi {
            csr: csr.to_string(),
            call,
            direct,
        });
    match call {
        CsrApiCall::Read => instr.with_destination(Operand::with_value(
            "rd",
            OperandType::Gpr,
            OperandValue::Reg(regs::T2),
        )),
        CsrApiCall::Write | CsrApiCall::Set | CsrApiCall::Clear => {
            instr.with_source(fixed_source("rs1", regs::T2))
        }
    }
}

/// CSR read into a fresh value
#[derive(Debug, Clone)]
pub struct CsrReadAction {
    /// CSR name
    pub csr_name: String,
    /// Bypass the runtime's privilege emulation
    pub direct_read: bool,
}

impl CsrReadAction {
    /// API reads write t2; the value is moved out under the original id
    pub(crate) fn expand(&mut self, id: &str, ctx: &mut LoweringContext) -> Option<Splice> {
        if !ctx.env.needs_csr_api(&self.csr_name) {
            return None;
        }
        let mv = Action::new(
            id,
            ActionKind::MoveFromT2(MoveAction {
                src: regs::T2.name().to_string(),
            }),
        );
        Some(Splice {
            before: Vec::new(),
            after: vec![mv],
            rename: Some(ctx.new_value_id()),
        })
    }

    pub(crate) fn pick_instruction(&self, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        if ctx.env.needs_csr_api(&self.csr_name) {
            return Ok(csr_api_instruction(&self.csr_name, CsrApiCall::Read, self.direct_read));
        }
        let mut csrr = ctx.instruction("csrr")?;
        csrr.require_source("csr", desc)?.set_symbol(&self.csr_name);
        Ok(csrr)
    }
}

/// CSR write, set or clear
#[derive(Debug, Clone)]
pub struct CsrWriteAction {
    /// CSR name
    pub csr_name: String,
    /// Write flavor
    pub operation: CsrOperation,
    /// Immediate value or mask
    pub value: Option<i64>,
    /// Value id supplying the value
    pub src: Option<String>,
    /// Bypass the runtime's privilege emulation
    pub direct_write: bool,
}

impl CsrWriteAction {
    /// A set or clear mask selects the flavor; a referenced input supplies
    /// the value from a register
    pub fn from_step(
        step: &Step,
        csr_name: &str,
        value: Option<i64>,
        set_mask: Option<i64>,
        clear_mask: Option<i64>,
        direct_write: bool,
    ) -> Result<Self> {
        let (operation, mut value) = match (set_mask, clear_mask) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid_step(
                    &step.id,
                    "csr write takes either a set mask or a clear mask, not both",
                ))
            }
            (Some(mask), None) => (CsrOperation::Set, Some(mask)),
            (None, Some(mask)) => (CsrOperation::Clear, Some(mask)),
            (None, None) => (CsrOperation::Write, value),
        };
        let mut src = None;
        match step.inputs.as_slice() {
            [] => {}
            [StepInput::Ref(id)] => src = Some(id.clone()),
            [StepInput::Imm(v)] if value.is_none() => value = Some(*v),
            _ => {
                return Err(Error::invalid_step(
                    &step.id,
                    "csr write takes at most one input, and no immediate input when a value is given",
                ))
            }
        }
        Ok(Self {
            csr_name: csr_name.to_string(),
            operation,
            value,
            src,
            direct_write,
        })
    }

    pub(crate) fn describe(&self) -> String {
        let mut s = format!("'{}' {}", self.csr_name, self.operation);
        if let Some(src) = &self.src {
            s.push_str(&format!(" '{}'", src));
        } else if let Some(v) = self.value {
            s.push_str(&format!(" 0x{:x}", v));
        }
        s
    }

    pub(crate) fn expand(&mut self, ctx: &mut LoweringContext) -> Result<Option<Vec<Action>>> {
        let api = ctx.env.needs_csr_api(&self.csr_name);
        if let Some(src) = &self.src {
            if !api {
                return Ok(None);
            }
            let mv = Action::new(
                ctx.new_value_id(),
                ActionKind::MoveToT2(MoveAction { src: src.clone() }),
            );
            self.src = Some(mv.id.clone());
            return Ok(Some(vec![mv]));
        }

        let value = match self.value {
            Some(v) => v,
            None => ctx.rng.random_word(),
        };
        self.value = Some(value);
        if ZIMM_RANGE.contains(&value) && !api {
            return Ok(None);
        }
        let li = LiAction::new(value);
        let kind = if api {
            ActionKind::LiToT2(li)
        } else {
            ActionKind::Li(li)
        };
        let li = Action::new(ctx.new_value_id(), kind);
        self.src = Some(li.id.clone());
        Ok(Some(vec![li]))
    }

    pub(crate) fn pick_instruction(&self, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        if ctx.env.needs_csr_api(&self.csr_name) {
            return Ok(csr_api_instruction(
                &self.csr_name,
                self.operation.api_call(),
                self.direct_write,
            ));
        }
        let use_imm = self.value.is_some() && self.src.is_none();
        let mut instr = ctx.instruction(self.operation.mnemonic(use_imm))?;
        instr.require_source("csr", desc)?.set_symbol(&self.csr_name);
        if use_imm {
            let value = self.value.unwrap_or_default();
            instr.require_immediate(desc)?.set_imm(value);
        } else {
            let src = self
                .src
                .clone()
                .ok_or_else(|| Error::internal(format!("{} has no source value; expand it first", desc)))?;
            instr.require_source("rs1", desc)?.set_virtual(src);
        }
        Ok(instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoweringOptions;
    use crate::isa::TemplateCatalog;
    use crate::plan::{PrivilegeMode, StepKind, TestEnv, Xlen};

    fn write(value: Option<i64>) -> CsrWriteAction {
        CsrWriteAction {
            csr_name: "mscratch".into(),
            operation: CsrOperation::Write,
            value,
            src: None,
            direct_write: false,
        }
    }

    #[test]
    fn test_small_value_uses_immediate_form() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::default());
        let mut action = write(Some(7));
        assert!(action.expand(&mut ctx).unwrap().is_none());
        let instr = action.pick_instruction("CsrWrite", &mut ctx).unwrap();
        assert_eq!(instr.name, "csrrwi");
        assert_eq!(instr.immediate().map(|o| o.value.clone()), Some(OperandValue::Imm(7)));
    }

    #[test]
    fn test_large_value_loads_immediate() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::default());
        let mut action = write(Some(100));
        let before = action.expand(&mut ctx).unwrap().unwrap();
        assert_eq!(before.len(), 1);
        assert!(matches!(before[0].kind, ActionKind::Li(_)));
        let instr = action.pick_instruction("CsrWrite", &mut ctx).unwrap();
        assert_eq!(instr.name, "csrrw");
        assert_eq!(
            instr.source("rs1").map(|o| o.value.clone()),
            Some(OperandValue::Virtual(before[0].id.clone()))
        );
    }

    #[test]
    fn test_machine_csr_from_supervisor_uses_api() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let env = TestEnv {
            priv_mode: PrivilegeMode::Supervisor,
            ..TestEnv::default()
        };
        let mut ctx = LoweringContext::new(&catalog, env, LoweringOptions::default());
        let mut action = write(Some(3));
        let before = action.expand(&mut ctx).unwrap().unwrap();
        assert!(matches!(before[0].kind, ActionKind::LiToT2(_)));
        let instr = action.pick_instruction("CsrWrite", &mut ctx).unwrap();
        assert_eq!(instr.to_string(), ";#csr_rw(mscratch, write, false)");
        assert!(instr.clobbers.contains(&regs::T2));

        let mut read = CsrReadAction {
            csr_name: "mepc".into(),
            direct_read: true,
        };
        let splice = read.expand("r5", &mut ctx).unwrap();
        assert!(splice.rename.is_some());
        assert_eq!(splice.after[0].id, "r5");
        let instr = read.pick_instruction("CsrRead", &mut ctx).unwrap();
        assert_eq!(instr.to_string(), ";#csr_rw(mepc, read, true)");
    }

    #[test]
    fn test_from_step_masks() {
        let step = Step::new(
            "w",
            StepKind::CsrWrite {
                csr_name: "sstatus".into(),
                value: None,
                set_mask: Some(2),
                clear_mask: None,
                direct_write: false,
            },
        );
        let action = CsrWriteAction::from_step(&step, "sstatus", None, Some(2), None, false).unwrap();
        assert_eq!(action.operation, CsrOperation::Set);
        assert_eq!(action.value, Some(2));
        assert!(CsrWriteAction::from_step(&step, "sstatus", None, Some(2), Some(4), false).is_err());
    }
}
