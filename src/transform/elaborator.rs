//! Elaboration pass: one concrete instruction per action

use crate::action::Action;
use crate::context::LoweringContext;
use crate::isa::{Instruction, OperandValue};
use crate::Result;

/// Pick and wire an instruction for every action.
///
/// A register-typed destination the action left unset receives the action id
/// as its virtual register.
pub fn elaborate(actions: Vec<Action>, ctx: &mut LoweringContext) -> Result<Vec<Instruction>> {
    let mut out = Vec::with_capacity(actions.len());
    for mut action in actions {
        let mut instr = action.pick_instruction(ctx)?;
        if let Some(dest) = instr.destination.as_mut() {
            if dest.ty.is_register() && dest.value == OperandValue::Unset {
                dest.set_virtual(&action.id);
            }
        }
        out.push(instr);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, ArithmeticAction};
    use crate::config::LoweringOptions;
    use crate::isa::{regs, TemplateCatalog};
    use crate::plan::{TestEnv, Xlen};

    #[test]
    fn test_destination_takes_action_id() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::default());
        let actions = vec![
            Action::li("r0", 5),
            Action::new("r1", ActionKind::Arithmetic(ArithmeticAction::binary("add", "r0", "r0"))),
            Action::new("r2", ActionKind::LiToT2(crate::action::LiAction::new(9))),
        ];
        let instrs = elaborate(actions, &mut ctx).unwrap();
        assert_eq!(instrs[0].id, "r0");
        assert_eq!(instrs[1].destination.as_ref().unwrap().virtual_id(), Some("r1"));
        assert_eq!(instrs[1].to_string(), "add r1, r0, r0");
        assert_eq!(instrs[2].destination.as_ref().unwrap().register(), Some(regs::T2));
    }
}
