//! Self-checking actions
//!
//! A failing check jumps through the runtime's `failed_addr` pointer; a
//! passing one branches over that jump to a fresh label.

use super::{Action, ActionKind, Address, AccessTarget, LoadAction};
use crate::context::LoweringContext;
use crate::isa::{Category, Extensions, Instruction, InstructionForm, Operand, OperandType, OperandValue};
use crate::plan::{ExceptionCause, Step, Xlen};
use crate::{Error, Result};

/// Branch over the failure jump when the comparison holds
#[derive(Debug, Clone)]
pub struct AssertAction {
    /// Left value id
    pub lhs: String,
    /// Right value id
    pub rhs: String,
    /// Branch target, set by expansion
    pub pass_label: Option<String>,
}

impl AssertAction {
    /// Both inputs must be step references
    pub fn from_step(step: &Step) -> Result<Self> {
        let ids: Vec<&str> = step.inputs.iter().filter_map(|i| i.as_ref_id()).collect();
        match ids.as_slice() {
            [lhs, rhs] if step.inputs.len() == 2 => Ok(Self {
                lhs: lhs.to_string(),
                rhs: rhs.to_string(),
                pass_label: None,
            }),
            _ => Err(Error::invalid_step(
                &step.id,
                "assertion needs exactly two step references",
            )),
        }
    }

    pub(crate) fn expand(&mut self, ctx: &mut LoweringContext) -> Vec<Action> {
        let pass = ctx.unique_label("pass_label");
        self.pass_label = Some(pass.clone());
        let fail = Action::new(
            ctx.new_value_id(),
            ActionKind::JumpToFail(JumpToFailAction::default()),
        );
        vec![fail, Action::label(ctx.new_label(), pass, false)]
    }

    pub(crate) fn pick_instruction(&self, branch: &str, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        let pass = self
            .pass_label
            .clone()
            .ok_or_else(|| Error::internal(format!("{} has no pass label; expand it first", desc)))?;
        let mut instr = ctx.instruction(branch)?;
        instr.require_source("rs1", desc)?.set_virtual(&self.lhs);
        instr.require_source("rs2", desc)?.set_virtual(&self.rhs);
        instr.require_source("offset", desc)?.set_symbol(pass);
        Ok(instr)
    }
}

/// Indirect jump to the address stored at `failed_addr`
#[derive(Debug, Clone, Default)]
pub struct JumpToFailAction {
    /// Value id holding the handler address, set by expansion
    pub address: Option<String>,
}

impl JumpToFailAction {
    pub(crate) fn expand(&mut self, ctx: &mut LoweringContext) -> Vec<Action> {
        let symbol = ctx.options.failed_addr_symbol.clone();
        let li = Action::li(ctx.new_value_id(), symbol);
        let op = match ctx.env.xlen {
            Xlen::Rv64 => "ld",
            Xlen::Rv32 => "lw",
        };
        let mut access = AccessTarget::new(Some(Address::Value(li.id.clone())), 0);
        access.op = Some(op.to_string());
        let load = Action::new(ctx.new_value_id(), ActionKind::Load(LoadAction { access }));
        self.address = Some(load.id.clone());
        vec![li, load]
    }

    pub(crate) fn pick_instruction(&self, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        let address = self
            .address
            .clone()
            .ok_or_else(|| Error::internal(format!("{} has no target register; expand it first", desc)))?;
        let mut jr = ctx.instruction("jr")?;
        jr.require_source("rs1", desc)?.set_virtual(address);
        Ok(jr)
    }
}

/// Expect the nested code to trap with `cause`
#[derive(Debug, Clone)]
pub struct AssertExceptionAction {
    /// Expected exception
    pub cause: ExceptionCause,
    /// Nested code; the last action is expected to fault
    pub code: Vec<Action>,
    /// Label placed right before the faulting instruction
    pub fault_label: Option<String>,
    /// Label the trap handler returns to
    pub return_label: Option<String>,
}

impl AssertExceptionAction {
    /// Wrap already-built nested actions
    pub fn new(cause: ExceptionCause, code: Vec<Action>) -> Self {
        Self {
            cause,
            code,
            fault_label: None,
            return_label: None,
        }
    }

    pub(crate) fn expand(&mut self, ctx: &mut LoweringContext) -> Result<Vec<Action>> {
        let code = std::mem::take(&mut self.code);
        if code.is_empty() {
            return Err(Error::internal(
                "exception assertion has no code to fault on",
            ));
        }
        let mut body = Vec::with_capacity(code.len() + 3);
        for action in code {
            body.extend(action.expand(ctx)?.into_actions());
        }

        let fault = ctx.unique_label("fault_label");
        let ret = ctx.unique_label("excp_return_label");
        let fault_at = body.len() - 1;
        body.insert(fault_at, Action::label(ctx.new_label(), fault.as_str(), true));
        body.push(Action::new(
            ctx.new_value_id(),
            ActionKind::JumpToFail(JumpToFailAction::default()),
        ));
        body.push(Action::label(ctx.new_label(), ret.as_str(), false));
        self.fault_label = Some(fault);
        self.return_label = Some(ret);
        Ok(body)
    }

    pub(crate) fn pick_instruction(&self, desc: &str) -> Result<Instruction> {
        let (fault, ret) = match (&self.fault_label, &self.return_label) {
            (Some(f), Some(r)) => (f.clone(), r.clone()),
            _ => {
                return Err(Error::internal(format!(
                    "{} has no fault labels; expand it first",
                    desc
                )))
            }
        };
        Ok(Instruction::new("OS_SETUP_CHECK_EXCP", Category::System, Extensions::I)
            .with_source(Operand::with_value(
                "cause",
                OperandType::Imm,
                OperandValue::Imm(self.cause.code()),
            ))
            .with_source(Operand::with_value("fault", OperandType::Symbol, OperandValue::Symbol(fault)))
            .with_source(Operand::with_value("return", OperandType::Symbol, OperandValue::Symbol(ret)))
            .with_form(InstructionForm::Macro))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Expansion, SystemAction};
    use crate::config::LoweringOptions;
    use crate::isa::TemplateCatalog;
    use crate::plan::{StepKind, TestEnv};

    fn catalog() -> TemplateCatalog {
        TemplateCatalog::builtin(Xlen::Rv64).unwrap()
    }

    #[test]
    fn test_assert_needs_two_refs() {
        let ok = Step::new("a", StepKind::AssertEqual).with_inputs(["x", "y"]);
        assert!(AssertAction::from_step(&ok).is_ok());
        let one = Step::new("a", StepKind::AssertEqual).with_inputs(["x"]);
        assert!(AssertAction::from_step(&one).is_err());
        let imm = Step::new("a", StepKind::AssertEqual).with_inputs(vec![
            crate::plan::StepInput::Ref("x".into()),
            crate::plan::StepInput::Imm(1),
        ]);
        assert!(AssertAction::from_step(&imm).is_err());
    }

    #[test]
    fn test_assert_equal_expansion() {
        let catalog = catalog();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::default());
        let action = Action::new(
            "r0",
            ActionKind::AssertEqual(AssertAction {
                lhs: "a".into(),
                rhs: "b".into(),
                pass_label: None,
            }),
        );
        let out = match action.expand(&mut ctx).unwrap() {
            Expansion::Expansion(out) => out,
            Expansion::NoExpansion(_) => panic!("assertions always expand"),
        };
        let kinds: Vec<_> = out.iter().map(|a| a.kind_name()).collect();
        assert_eq!(kinds, vec!["AssertEqual", "JumpToFail", "Label"]);

        let mut branch = out[0].clone();
        let instr = branch.pick_instruction(&mut ctx).unwrap();
        assert_eq!(instr.name, "beq");
        assert_eq!(
            instr.source("offset").map(|o| o.value.clone()),
            Some(OperandValue::Symbol("pass_label_0".into()))
        );
    }

    #[test]
    fn test_jump_to_fail_loads_handler() {
        let catalog = catalog();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::default());
        let mut jump = JumpToFailAction::default();
        let before = jump.expand(&mut ctx);
        assert_eq!(before.len(), 2);
        match &before[1].kind {
            ActionKind::Load(l) => assert_eq!(l.access.op.as_deref(), Some("ld")),
            other => panic!("unexpected {:?}", other),
        }
        let instr = jump.pick_instruction("JumpToFail", &mut ctx).unwrap();
        assert_eq!(instr.name, "jr");
    }

    #[test]
    fn test_exception_fault_label_precedes_last_action() {
        let catalog = catalog();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::default());
        let code = vec![
            Action::li("x", 1),
            Action::new(
                "e",
                ActionKind::System(SystemAction {
                    instruction: "ecall".into(),
                }),
            ),
        ];
        let mut excp = AssertExceptionAction::new(ExceptionCause::EcallFromMachine, code);
        let body = excp.expand(&mut ctx).unwrap();
        let kinds: Vec<_> = body.iter().map(|a| a.kind_name()).collect();
        assert_eq!(kinds, vec!["Li", "Label", "System", "JumpToFail", "Label"]);
        let instr = excp.pick_instruction("AssertException").unwrap();
        assert_eq!(
            instr.to_string(),
            "OS_SETUP_CHECK_EXCP 11, fault_label_0, excp_return_label_0"
        );
    }

    #[test]
    fn test_empty_exception_body_rejected() {
        let catalog = catalog();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::default());
        let mut excp = AssertExceptionAction::new(ExceptionCause::IllegalInstruction, Vec::new());
        assert!(excp.expand(&mut ctx).is_err());
    }
}
