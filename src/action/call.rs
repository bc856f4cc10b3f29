//! Call of a code page: `li base, target` followed by `jalr ra, 0(base)`

use super::{Action, StepScope};
use crate::context::LoweringContext;
use crate::isa::{regs, Instruction, InstructionForm};
use crate::plan::Step;
use crate::{Error, Result};

/// Call of a function lifted from a code page
#[derive(Debug, Clone)]
pub struct CallAction {
    /// Code page id
    pub target: String,
    /// Value id holding the target address, set by expansion
    pub base: Option<String>,
}

impl CallAction {
    /// The first referenced input must name a code page step
    pub fn from_step(step: &Step, scope: &StepScope) -> Result<Self> {
        let target = step
            .inputs
            .iter()
            .find_map(|i| i.as_ref_id())
            .ok_or_else(|| Error::invalid_step(&step.id, "call step names no code page"))?;
        if !scope.is_code(target) {
            return Err(Error::invalid_step(
                &step.id,
                format!("call target '{}' is not a code page", target),
            ));
        }
        Ok(Self {
            target: target.to_string(),
            base: None,
        })
    }

    pub(crate) fn for_each_id(&mut self, f: &mut dyn FnMut(&mut String)) {
        f(&mut self.target);
        if let Some(base) = self.base.as_mut() {
            f(base);
        }
    }

    pub(crate) fn expand(&mut self, ctx: &mut LoweringContext) -> Vec<Action> {
        let li = Action::li(ctx.new_value_id(), self.target.as_str());
        self.base = Some(li.id.clone());
        vec![li]
    }

    pub(crate) fn pick_instruction(&self, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        let base = self
            .base
            .clone()
            .ok_or_else(|| Error::internal(format!("{} has no target register; expand it first", desc)))?;
        let mut jalr = ctx.instruction("jalr")?;
        jalr.require_destination(desc)?.set_register(regs::RA);
        jalr.require_source("rs1", desc)?.set_virtual(base);
        jalr.require_immediate(desc)?.set_imm(0);
        Ok(jalr.with_form(InstructionForm::Call {
            target: self.target.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::config::LoweringOptions;
    use crate::isa::{OperandValue, TemplateCatalog};
    use crate::plan::{MemorySpec, StepKind, TestEnv, Xlen};

    #[test]
    fn test_call_requires_code_page() {
        let steps = vec![
            Step::new("fn", StepKind::CodePage(MemorySpec::default())),
            Step::new("m", StepKind::Memory(MemorySpec::default())),
        ];
        let scope = StepScope::from_steps(&steps);
        let ok = Step::new("c", StepKind::Call).with_inputs(["fn"]);
        assert_eq!(CallAction::from_step(&ok, &scope).unwrap().target, "fn");
        let bad = Step::new("c", StepKind::Call).with_inputs(["m"]);
        assert!(CallAction::from_step(&bad, &scope).is_err());
    }

    #[test]
    fn test_call_lowers_to_jalr() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::default());
        let mut call = CallAction {
            target: "code_mem0".into(),
            base: None,
        };
        let before = call.expand(&mut ctx);
        assert!(matches!(&before[0].kind, ActionKind::Li(_)));
        let instr = call.pick_instruction("Call", &mut ctx).unwrap();
        assert_eq!(instr.name, "jalr");
        assert_eq!(instr.destination.as_ref().and_then(|d| d.register()), Some(regs::RA));
        assert_eq!(
            instr.source("rs1").map(|o| o.value.clone()),
            Some(OperandValue::Virtual(before[0].id.clone()))
        );
        assert_eq!(instr.form, InstructionForm::Call { target: "code_mem0".into() });
    }
}
