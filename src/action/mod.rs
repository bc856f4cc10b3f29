//! # Action IR
//!
//! An [`Action`] wraps one abstract step (or a piece of code synthesized while
//! lowering one) and knows how to
//!
//! 1. **expand** itself into the primitive actions it needs around it
//!    (address loads, offset folding, pass/fail labels, ...), exactly once;
//! 2. **pick** a concrete [`Instruction`] from the catalog and wire its
//!    operand slots to the action's ids and immediates;
//! 3. **rename** the ids it refers to when a batch is canonicalized.
//!
//! The set of variants is closed ([`ActionKind`]); every pass matches it
//! exhaustively.
//!
//! ```text
//! Step ──from_step──▶ Action ──expand──▶ [Action..] ──pick_instruction──▶ Instruction
//! ```

pub mod arithmetic;
pub mod assertions;
pub mod call;
pub mod csr;
pub mod memory;
pub mod memory_access;
pub mod pte;
pub mod registry;
pub mod simple;

pub use arithmetic::ArithmeticAction;
pub use assertions::{AssertAction, AssertExceptionAction, JumpToFailAction};
pub use call::CallAction;
pub use csr::{CsrOperation, CsrReadAction, CsrWriteAction};
pub use memory::{CodePageAction, MemoryAction};
pub use memory_access::{AccessTarget, Address, LoadAction, StoreAction};
pub use pte::{ModifyPteAction, PteAction};
pub use registry::{ActionBuilder, ActionRegistry, DiscreteTest, StepScope};
pub use simple::{CommentAction, Immediate, LabelAction, LiAction, MoveAction, SystemAction};

use crate::context::LoweringContext;
use crate::isa::Instruction;
use crate::{Error, Result};
use std::collections::HashMap;

/// Whether an action has already been expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionState {
    /// `expand` has not run yet
    Unexpanded,
    /// `expand` ran; further calls are no-ops
    Expanded,
}

/// Result of expanding one action
#[derive(Debug)]
pub enum Expansion {
    /// The action stands alone; it is handed back unchanged (but marked expanded)
    NoExpansion(Action),
    /// The action is replaced by this list, which usually contains it
    Expansion(Vec<Action>),
}

impl Expansion {
    /// Flatten into a list
    pub fn into_actions(self) -> Vec<Action> {
        match self {
            Expansion::NoExpansion(action) => vec![action],
            Expansion::Expansion(actions) => actions,
        }
    }
}

/// Actions to place around an expanded action
#[derive(Debug, Default)]
pub(crate) struct Splice {
    pub before: Vec<Action>,
    pub after: Vec<Action>,
    /// New id for the expanded action; its old id moves to an action in `after`
    pub rename: Option<String>,
}

impl Splice {
    pub fn before(before: Vec<Action>) -> Self {
        Self {
            before,
            ..Self::default()
        }
    }

    pub fn after(after: Vec<Action>) -> Self {
        Self {
            after,
            ..Self::default()
        }
    }

    fn assemble(self, mut action: Action) -> Vec<Action> {
        if let Some(id) = self.rename {
            action.id = id;
        }
        let mut out = self.before;
        out.push(action);
        out.extend(self.after);
        out
    }
}

/// Variant payloads
#[derive(Debug, Clone)]
pub enum ActionKind {
    /// Integer or float computation
    Arithmetic(ArithmeticAction),
    /// Load immediate into a fresh value
    Li(LiAction),
    /// Load immediate into t2 for a runtime directive
    LiToT2(LiAction),
    /// Copy a value into t2 for a runtime directive
    MoveToT2(MoveAction),
    /// Copy t2 into a fresh value after a runtime directive
    MoveFromT2(MoveAction),
    /// Code label
    Label(LabelAction),
    /// Memory read
    Load(LoadAction),
    /// Memory write
    Store(StoreAction),
    /// Data page reservation
    Memory(MemoryAction),
    /// Function body on its own code page
    CodePage(CodePageAction),
    /// `ret` closing a code page
    Return,
    /// Call of a code page
    Call(CallAction),
    /// CSR read
    CsrRead(CsrReadAction),
    /// CSR write, set or clear
    CsrWrite(CsrWriteAction),
    /// Branch past the failure jump when both values are equal
    AssertEqual(AssertAction),
    /// Branch past the failure jump when both values differ
    AssertNotEqual(AssertAction),
    /// Expect the nested code to raise an exception
    AssertException(AssertExceptionAction),
    /// Jump to the shared failure handler
    JumpToFail(JumpToFailAction),
    /// Read a page table entry into t2
    ReadPte(PteAction),
    /// Write t2 into a page table entry
    WritePte(PteAction),
    /// Rewrite a non-leaf page table entry
    ModifyPte(ModifyPteAction),
    /// Named system instruction
    System(SystemAction),
    /// Comment line
    Comment(CommentAction),
}

/// Mutable IR node between steps and instructions
#[derive(Debug, Clone)]
pub struct Action {
    /// Identity; becomes the instruction id and its virtual destination
    pub id: String,
    /// Expansion tag
    pub state: ExpansionState,
    /// Variant payload
    pub kind: ActionKind,
}

impl Action {
    /// Create an unexpanded action
    pub fn new(id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: id.into(),
            state: ExpansionState::Unexpanded,
            kind,
        }
    }

    /// `li` of an integer or symbol into a fresh value
    pub fn li(id: impl Into<String>, value: impl Into<Immediate>) -> Self {
        Self::new(id, ActionKind::Li(LiAction::new(value)))
    }

    /// Label action
    pub fn label(id: impl Into<String>, name: impl Into<String>, instruction_pointer: bool) -> Self {
        Self::new(
            id,
            ActionKind::Label(LabelAction {
                name: name.into(),
                instruction_pointer,
            }),
        )
    }

    /// Variant name
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ActionKind::Arithmetic(_) => "Arithmetic",
            ActionKind::Li(_) => "Li",
            ActionKind::LiToT2(_) => "LiToT2",
            ActionKind::MoveToT2(_) => "MoveToT2",
            ActionKind::MoveFromT2(_) => "MoveFromT2",
            ActionKind::Label(_) => "Label",
            ActionKind::Load(_) => "Load",
            ActionKind::Store(_) => "Store",
            ActionKind::Memory(_) => "Memory",
            ActionKind::CodePage(_) => "CodePage",
            ActionKind::Return => "Return",
            ActionKind::Call(_) => "Call",
            ActionKind::CsrRead(_) => "CsrRead",
            ActionKind::CsrWrite(_) => "CsrWrite",
            ActionKind::AssertEqual(_) => "AssertEqual",
            ActionKind::AssertNotEqual(_) => "AssertNotEqual",
            ActionKind::AssertException(_) => "AssertException",
            ActionKind::JumpToFail(_) => "JumpToFail",
            ActionKind::ReadPte(_) => "ReadPte",
            ActionKind::WritePte(_) => "WritePte",
            ActionKind::ModifyPte(_) => "ModifyPte",
            ActionKind::System(_) => "System",
            ActionKind::Comment(_) => "Comment",
        }
    }

    /// Names of the fields holding ids that canonicalization rewrites
    pub fn register_fields(&self) -> &'static [&'static str] {
        match &self.kind {
            ActionKind::Arithmetic(_) => &["src1", "src2"],
            ActionKind::MoveToT2(_) | ActionKind::MoveFromT2(_) => &["src"],
            ActionKind::Li(_) | ActionKind::LiToT2(_) => &[],
            ActionKind::Label(_) => &[],
            ActionKind::Load(_) => &["memory", "rs1"],
            ActionKind::Store(_) => &["value", "memory", "rs1"],
            ActionKind::Memory(_) | ActionKind::CodePage(_) | ActionKind::Return => &[],
            ActionKind::Call(_) => &["target", "rs1"],
            ActionKind::CsrRead(_) => &[],
            ActionKind::CsrWrite(_) => &["src"],
            ActionKind::AssertEqual(_) | ActionKind::AssertNotEqual(_) => &["lhs", "rhs"],
            ActionKind::AssertException(_) | ActionKind::JumpToFail(_) => &[],
            ActionKind::ReadPte(_) => &["memory"],
            ActionKind::WritePte(_) => &["memory", "src"],
            ActionKind::ModifyPte(_) => &["memory"],
            ActionKind::System(_) | ActionKind::Comment(_) => &[],
        }
    }

    /// Visit every id held in a register field
    fn for_each_field_id(&mut self, f: &mut dyn FnMut(&mut String)) {
        match &mut self.kind {
            ActionKind::Arithmetic(a) => a.for_each_id(f),
            ActionKind::MoveToT2(m) | ActionKind::MoveFromT2(m) => f(&mut m.src),
            ActionKind::Load(l) => l.access.for_each_id(f),
            ActionKind::Store(s) => s.for_each_id(f),
            ActionKind::Call(c) => c.for_each_id(f),
            ActionKind::CsrWrite(c) => {
                if let Some(src) = c.src.as_mut() {
                    f(src)
                }
            }
            ActionKind::AssertEqual(a) | ActionKind::AssertNotEqual(a) => {
                f(&mut a.lhs);
                f(&mut a.rhs);
            }
            ActionKind::ReadPte(p) | ActionKind::WritePte(p) => p.for_each_id(f),
            ActionKind::ModifyPte(p) => f(&mut p.memory),
            ActionKind::Li(_)
            | ActionKind::LiToT2(_)
            | ActionKind::Label(_)
            | ActionKind::Memory(_)
            | ActionKind::CodePage(_)
            | ActionKind::Return
            | ActionKind::CsrRead(_)
            | ActionKind::AssertException(_)
            | ActionKind::JumpToFail(_)
            | ActionKind::System(_)
            | ActionKind::Comment(_) => {}
        }
    }

    /// Ids currently held in register fields
    pub fn field_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.clone().for_each_field_id(&mut |id| ids.push(id.clone()));
        ids
    }

    /// Rewrite the action id and every register field through `map`.
    ///
    /// The action's own id must be in the map; field ids that are not are
    /// left alone (they name pages or symbols defined elsewhere).
    pub fn rename_ids(&mut self, map: &HashMap<String, String>) -> Result<()> {
        let new_id = map.get(&self.id).ok_or_else(|| Error::UndefinedId {
            id: self.id.clone(),
            scope: format!("rename of {}", self.describe()),
        })?;
        self.id = new_id.clone();
        self.for_each_field_id(&mut |id| {
            if let Some(renamed) = map.get(id.as_str()) {
                *id = renamed.clone();
            }
        });
        Ok(())
    }

    /// Nested code owned by composite actions
    pub fn code(&self) -> Option<&Vec<Action>> {
        match &self.kind {
            ActionKind::CodePage(c) => Some(&c.code),
            ActionKind::AssertException(a) => Some(&a.code),
            _ => None,
        }
    }

    /// Mutable nested code owned by composite actions
    pub fn code_mut(&mut self) -> Option<&mut Vec<Action>> {
        match &mut self.kind {
            ActionKind::CodePage(c) => Some(&mut c.code),
            ActionKind::AssertException(a) => Some(&mut a.code),
            _ => None,
        }
    }

    /// Data page reservation
    pub fn is_memory(&self) -> bool {
        matches!(self.kind, ActionKind::Memory(_))
    }

    /// Code page (function body)
    pub fn is_code_page(&self) -> bool {
        matches!(self.kind, ActionKind::CodePage(_))
    }

    /// Expand into the actions this one needs around it.
    ///
    /// Runs at most once: a second call returns [`Expansion::NoExpansion`].
    /// The action is consumed; when it survives expansion it is returned
    /// inside the result, marked expanded.
    pub fn expand(mut self, ctx: &mut LoweringContext) -> Result<Expansion> {
        if self.state == ExpansionState::Expanded {
            return Ok(Expansion::NoExpansion(self));
        }
        self.state = ExpansionState::Expanded;

        let splice = match &mut self.kind {
            ActionKind::Load(l) => l.expand(ctx)?.map(Splice::before),
            ActionKind::Store(s) => s.expand(ctx)?.map(Splice::before),
            ActionKind::Call(c) => Some(Splice::before(c.expand(ctx))),
            ActionKind::CsrRead(c) => c.expand(&self.id, ctx),
            ActionKind::CsrWrite(c) => c.expand(ctx)?.map(Splice::before),
            ActionKind::CodePage(c) => Some(Splice::after(c.expand(ctx))),
            ActionKind::AssertEqual(a) | ActionKind::AssertNotEqual(a) => {
                Some(Splice::after(a.expand(ctx)))
            }
            ActionKind::AssertException(a) => Some(Splice::after(a.expand(ctx)?)),
            ActionKind::JumpToFail(j) => Some(Splice::before(j.expand(ctx))),
            ActionKind::ReadPte(p) => Some(p.expand_read(&self.id, ctx)),
            ActionKind::WritePte(p) => Some(Splice::before(p.expand_write(ctx))),
            ActionKind::ModifyPte(p) => return Ok(Expansion::Expansion(p.expand(ctx))),
            ActionKind::Arithmetic(_)
            | ActionKind::Li(_)
            | ActionKind::LiToT2(_)
            | ActionKind::MoveToT2(_)
            | ActionKind::MoveFromT2(_)
            | ActionKind::Label(_)
            | ActionKind::Memory(_)
            | ActionKind::Return
            | ActionKind::System(_)
            | ActionKind::Comment(_) => None,
        };

        Ok(match splice {
            Some(splice) => Expansion::Expansion(splice.assemble(self)),
            None => Expansion::NoExpansion(self),
        })
    }

    /// Select and wire the instruction this action lowers to
    pub fn pick_instruction(&mut self, ctx: &mut LoweringContext) -> Result<Instruction> {
        let desc = self.describe();
        let id = self.id.clone();
        let instr = match &mut self.kind {
            ActionKind::Arithmetic(a) => a.pick_instruction(&desc, ctx)?,
            ActionKind::Li(li) => li.pick_instruction(&desc, ctx)?,
            ActionKind::LiToT2(li) => li.pick_t2_instruction(&desc, ctx)?,
            ActionKind::MoveToT2(m) => m.pick_to_t2(&desc, ctx)?,
            ActionKind::MoveFromT2(m) => m.pick_from_t2(&desc, ctx)?,
            ActionKind::Label(l) => Instruction::label(&id, &l.name, l.instruction_pointer),
            ActionKind::Load(l) => l.pick_instruction(&desc, ctx)?,
            ActionKind::Store(s) => s.pick_instruction(&desc, ctx)?,
            ActionKind::Memory(_) => {
                return Err(Error::internal(format!(
                    "{} reserves memory and has no instruction; it must be lifted by canonicalization",
                    desc
                )))
            }
            ActionKind::CodePage(_) => Instruction::label(&id, &id, false),
            ActionKind::Return => ctx.instruction("ret")?,
            ActionKind::Call(c) => c.pick_instruction(&desc, ctx)?,
            ActionKind::CsrRead(c) => c.pick_instruction(&desc, ctx)?,
            ActionKind::CsrWrite(c) => c.pick_instruction(&desc, ctx)?,
            ActionKind::AssertEqual(a) => a.pick_instruction("beq", &desc, ctx)?,
            ActionKind::AssertNotEqual(a) => a.pick_instruction("bne", &desc, ctx)?,
            ActionKind::AssertException(a) => a.pick_instruction(&desc)?,
            ActionKind::JumpToFail(j) => j.pick_instruction(&desc, ctx)?,
            ActionKind::ReadPte(p) => p.pick_instruction(false, ctx),
            ActionKind::WritePte(p) => p.pick_instruction(true, ctx),
            ActionKind::ModifyPte(_) => {
                return Err(Error::internal(format!(
                    "{} is replaced during expansion and has no instruction",
                    desc
                )))
            }
            ActionKind::System(s) => ctx.instruction(&s.instruction)?,
            ActionKind::Comment(c) => Instruction::comment(&id, &c.text),
        };
        Ok(instr.with_id(id))
    }

    /// Short human readable description, used in error messages and logs
    pub fn describe(&self) -> String {
        let info = match &self.kind {
            ActionKind::Arithmetic(a) => a.describe(),
            ActionKind::Li(li) | ActionKind::LiToT2(li) => li.value.to_string(),
            ActionKind::MoveToT2(m) | ActionKind::MoveFromT2(m) => format!("'{}'", m.src),
            ActionKind::Label(l) => l.name.clone(),
            ActionKind::Load(l) => l.access.describe(),
            ActionKind::Store(s) => format!("{} <- {:?}", s.access.describe(), s.value),
            ActionKind::Memory(m) => format!("size=0x{:x}", m.spec.size),
            ActionKind::CodePage(c) => format!("size=0x{:x}, {} actions", c.spec.size, c.code.len()),
            ActionKind::Return => String::new(),
            ActionKind::Call(c) => format!("'{}'", c.target),
            ActionKind::CsrRead(c) => format!("'{}'", c.csr_name),
            ActionKind::CsrWrite(c) => c.describe(),
            ActionKind::AssertEqual(a) => format!("{} == {}", a.lhs, a.rhs),
            ActionKind::AssertNotEqual(a) => format!("{} != {}", a.lhs, a.rhs),
            ActionKind::AssertException(a) => {
                format!("{:?}, {} actions", a.cause, a.code.len())
            }
            ActionKind::JumpToFail(_) => String::new(),
            ActionKind::ReadPte(p) | ActionKind::WritePte(p) => p.describe(),
            ActionKind::ModifyPte(p) => format!("memory={}, level={}", p.memory, p.level),
            ActionKind::System(s) => s.instruction.clone(),
            ActionKind::Comment(c) => format!("'{}'", c.text),
        };
        if info.is_empty() {
            format!("{}({})", self.kind_name(), self.id)
        } else {
            format!("{}({}: {})", self.kind_name(), self.id, info)
        }
    }
}
