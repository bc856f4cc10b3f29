//! Page table entry access
//!
//! Reads and writes go through the runtime's `;#read_pte` / `;#write_pte`
//! directives with the value in t2. Modifying a non-leaf entry is plain code:
//! the next level's physical page number is stored into the entry.

use super::simple::{fixed_source, RUNTIME_API_CLOBBERS};
use super::{AccessTarget, Action, ActionKind, Address, LiAction, MoveAction, Splice, StepScope, StoreAction};
use crate::context::LoweringContext;
use crate::isa::{regs, Category, Extensions, Instruction, InstructionForm, Operand, OperandType, OperandValue};
use crate::plan::{Step, StepInput, Xlen};
use crate::{Error, Result};

/// Read or write of one page table entry of a page's walk
#[derive(Debug, Clone)]
pub struct PteAction {
    /// Page whose translation is walked
    pub memory: String,
    /// Table level; `None` is the leaf for the active paging mode
    pub level: Option<u8>,
    /// Value id written (writes only)
    pub src: Option<String>,
}

impl PteAction {
    /// First input names the page; for writes an optional second input is the value
    pub fn from_step(step: &Step, scope: &StepScope, level: Option<u8>, write: bool) -> Result<Self> {
        let mut refs = Vec::new();
        for input in &step.inputs {
            match input {
                StepInput::Ref(id) => refs.push(id.clone()),
                StepInput::Imm(v) => {
                    return Err(Error::invalid_step(
                        &step.id,
                        format!("page table entry inputs must be step references, got {}", v),
                    ))
                }
            }
        }
        let max_inputs = if write { 2 } else { 1 };
        if refs.is_empty() || refs.len() > max_inputs {
            return Err(Error::invalid_step(
                &step.id,
                format!("expected a page and at most {} value input(s)", max_inputs - 1),
            ));
        }
        let mut refs = refs.into_iter();
        let memory = refs.next().unwrap_or_default();
        if !scope.is_memory(&memory) {
            return Err(Error::invalid_step(
                &step.id,
                format!("'{}' is not a memory step", memory),
            ));
        }
        Ok(Self {
            memory,
            level,
            src: refs.next(),
        })
    }

    pub(crate) fn for_each_id(&mut self, f: &mut dyn FnMut(&mut String)) {
        f(&mut self.memory);
        if let Some(src) = self.src.as_mut() {
            f(src);
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self.level {
            Some(level) => format!("'{}' level {}", self.memory, level),
            None => format!("'{}' leaf", self.memory),
        }
    }

    /// The read lands in t2; a move makes it an allocatable value under `id`
    pub(crate) fn expand_read(&mut self, id: &str, ctx: &mut LoweringContext) -> Splice {
        let mv = Action::new(
            id,
            ActionKind::MoveFromT2(MoveAction {
                src: regs::T2.name().to_string(),
            }),
        );
        Splice {
            before: Vec::new(),
            after: vec![mv],
            rename: Some(ctx.new_value_id()),
        }
    }

    pub(crate) fn expand_write(&mut self, ctx: &mut LoweringContext) -> Vec<Action> {
        let load = match &self.src {
            Some(src) => Action::new(
                ctx.new_value_id(),
                ActionKind::MoveToT2(MoveAction { src: src.clone() }),
            ),
            None => {
                let value = ctx.rng.random_word();
                Action::new(ctx.new_value_id(), ActionKind::LiToT2(LiAction::new(value)))
            }
        };
        self.src = Some(load.id.clone());
        vec![load]
    }

    pub(crate) fn pick_instruction(&self, write: bool, ctx: &mut LoweringContext) -> Instruction {
        let paging_mode = ctx.env.paging_mode;
        let level = self.level.unwrap_or_else(|| paging_mode.leaf_level());
        let name = if write { "write_pte" } else { "read_pte" };
        let instr = Instruction::new(name, Category::System, Extensions::I)
            .with_clobbers(&RUNTIME_API_CLOBBERS)
            .with_form(InstructionForm::PteApi {
                memory: self.memory.clone(),
                paging_mode,
                level,
                write,
            });
        if write {
            instr.with_source(fixed_source("rs1", regs::T2))
        } else {
            instr.with_destination(Operand::with_value(
                "rd",
                OperandType::Gpr,
                OperandValue::Reg(regs::T2),
            ))
        }
    }
}

/// Point a table entry at the next level's table, or back at its own
#[derive(Debug, Clone)]
pub struct ModifyPteAction {
    /// Page whose translation is modified
    pub memory: String,
    /// Table level of the entry
    pub level: u8,
    /// Point the entry at its own table
    pub make_recursive: bool,
}

impl ModifyPteAction {
    /// The single input names the page
    pub fn from_step(step: &Step, scope: &StepScope, level: u8, make_recursive: bool) -> Result<Self> {
        match step.inputs.as_slice() {
            [StepInput::Ref(memory)] if scope.is_memory(memory) => Ok(Self {
                memory: memory.clone(),
                level,
                make_recursive,
            }),
            _ => Err(Error::invalid_step(
                &step.id,
                "modify_pte takes exactly one memory step input",
            )),
        }
    }

    /// `li` of the pointer entry, then a store into the table
    pub(crate) fn expand(&mut self, ctx: &mut LoweringContext) -> Vec<Action> {
        let next = if self.make_recursive {
            self.level
        } else {
            self.level + 1
        };
        let entry = format!(
            "(({}__pt_level{}__phys >> 12) << 10) | 0x1",
            self.memory, next
        );
        let li = Action::li(ctx.new_value_id(), entry);
        let op = match ctx.env.xlen {
            Xlen::Rv64 => "sd",
            Xlen::Rv32 => "sw",
        };
        let table = format!("{}__pt_level{}", self.memory, self.level);
        let mut access = AccessTarget::new(Some(Address::Symbol(table)), 0);
        access.op = Some(op.to_string());
        let store = Action::new(
            ctx.new_value_id(),
            ActionKind::Store(StoreAction {
                access,
                value: Some(li.id.clone()),
            }),
        );
        vec![li, store]
    }
}
