//! Instruction IR: the output of elaboration and the unit every later pass
//! rewrites

use super::operand::{Operand, OperandType, OperandValue};
use super::register::Register;
use crate::plan::PagingMode;
use crate::{Error, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction category used for catalog filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Integer and float computation
    Arithmetic,
    /// Memory reads
    Load,
    /// Memory writes
    Store,
    /// Conditional branches
    Branch,
    /// Unconditional jumps and calls
    Jump,
    /// CSR access
    Csr,
    /// Register file / type conversions
    Cast,
    /// Privileged and environment instructions, runtime directives
    System,
    /// Assembler pseudo-instructions, labels, comments
    Pseudo,
}

bitflags! {
    /// ISA extensions an instruction belongs to.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
    pub struct Extensions: u32 {
        /// Base integer ISA
        const I = 1 << 0;
        /// Integer multiply/divide
        const M = 1 << 1;
        /// Atomics
        const A = 1 << 2;
        /// Single precision float
        const F = 1 << 3;
        /// Double precision float
        const D = 1 << 4;
        /// Compressed
        const C = 1 << 5;
        /// CSR instructions
        const ZICSR = 1 << 6;
        /// Instruction fetch fence
        const ZIFENCEI = 1 << 7;
        /// Basic bit manipulation
        const ZBB = 1 << 8;
        /// Fine-grained address translation cache invalidation
        const SVINVAL = 1 << 9;
    }
}

/// Runtime CSR access routine requested by an API directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsrApiCall {
    /// Read into t2
    Read,
    /// Write t2
    Write,
    /// Set bits from t2
    Set,
    /// Clear bits from t2
    Clear,
}

impl fmt::Display for CsrApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CsrApiCall::Read => "read",
            CsrApiCall::Write => "write",
            CsrApiCall::Set => "set",
            CsrApiCall::Clear => "clear",
        };
        f.write_str(s)
    }
}

/// Rendering form of an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionForm {
    /// Plain `name operands`
    Native,
    /// `name:`; an instruction-pointer label marks the following instruction's address
    Label {
        /// Label is used as an exception PC and must stay glued to the next instruction
        instruction_pointer: bool,
    },
    /// `# text`
    Comment(String),
    /// Call into a lowered function
    Call {
        /// Canonical code id of the callee
        target: String,
    },
    /// `;#csr_rw(csr, call, direct)` runtime directive, value in t2
    CsrApi {
        /// CSR name
        csr: String,
        /// Requested routine
        call: CsrApiCall,
        /// Bypass the runtime's privilege emulation
        direct: bool,
    },
    /// `;#read_pte` / `;#write_pte` runtime directive, value in t2
    PteApi {
        /// Page the walk starts from
        memory: String,
        /// Translation scheme
        paging_mode: PagingMode,
        /// Table level of the entry
        level: u8,
        /// Write t2 to the entry instead of reading it
        write: bool,
    },
    /// Assembler macro expanded by the runtime (`OS_SETUP_CHECK_EXCP`)
    Macro,
}

/// Concrete instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Identity, taken from the action that produced it
    pub id: String,
    /// Mnemonic, or label / macro name
    pub name: String,
    /// Catalog category
    pub category: Category,
    /// Owning extension(s)
    pub extension: Extensions,
    /// Written register, if any
    pub destination: Option<Operand>,
    /// Read operands, in assembly order
    pub sources: Vec<Operand>,
    /// Registers destroyed as a side effect
    pub clobbers: Vec<Register>,
    /// Rendering form
    pub form: InstructionForm,
}

impl Instruction {
    /// Create a native instruction with no operands
    pub fn new(name: impl Into<String>, category: Category, extension: Extensions) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            category,
            extension,
            destination: None,
            sources: Vec::new(),
            clobbers: Vec::new(),
            form: InstructionForm::Native,
        }
    }

    /// Create a label
    pub fn label(id: impl Into<String>, name: impl Into<String>, instruction_pointer: bool) -> Self {
        let mut instr = Self::new(name, Category::Pseudo, Extensions::I);
        instr.id = id.into();
        instr.form = InstructionForm::Label {
            instruction_pointer,
        };
        instr
    }

    /// Create a comment line
    pub fn comment(id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut instr = Self::new("#", Category::Pseudo, Extensions::I);
        instr.id = id.into();
        instr.form = InstructionForm::Comment(text.into());
        instr
    }

    /// Builder: set the identity
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder: set a destination operand
    pub fn with_destination(mut self, operand: Operand) -> Self {
        self.destination = Some(operand);
        self
    }

    /// Builder: append a source operand
    pub fn with_source(mut self, operand: Operand) -> Self {
        self.sources.push(operand);
        self
    }

    /// Builder: set the clobber list
    pub fn with_clobbers(mut self, clobbers: &[Register]) -> Self {
        self.clobbers = clobbers.to_vec();
        self
    }

    /// Builder: set the rendering form
    pub fn with_form(mut self, form: InstructionForm) -> Self {
        self.form = form;
        self
    }

    /// Whether this is a label
    pub fn is_label(&self) -> bool {
        matches!(self.form, InstructionForm::Label { .. })
    }

    /// Whether this label marks the address of the next instruction rather
    /// than a jump target; code inserted before that instruction goes after it
    pub fn is_instruction_pointer(&self) -> bool {
        matches!(
            self.form,
            InstructionForm::Label {
                instruction_pointer: true
            }
        )
    }

    /// Source operand by slot name
    pub fn source(&self, name: &str) -> Option<&Operand> {
        self.sources.iter().find(|op| op.name == name)
    }

    /// Mutable source operand by slot name
    pub fn source_mut(&mut self, name: &str) -> Option<&mut Operand> {
        self.sources.iter_mut().find(|op| op.name == name)
    }

    /// First immediate operand
    pub fn immediate(&self) -> Option<&Operand> {
        self.sources.iter().find(|op| op.ty == OperandType::Imm)
    }

    /// Mutable first immediate operand
    pub fn immediate_mut(&mut self) -> Option<&mut Operand> {
        self.sources.iter_mut().find(|op| op.ty == OperandType::Imm)
    }

    /// Whether the template carries an immediate
    pub fn has_immediate(&self) -> bool {
        self.immediate().is_some()
    }

    /// Number of register-typed source operands
    pub fn source_reg_count(&self) -> usize {
        self.sources.iter().filter(|op| op.ty.is_register()).count()
    }

    /// Source slot that must exist for `action` to wire it
    pub fn require_source(&mut self, name: &str, action: &str) -> Result<&mut Operand> {
        let instruction = self.name.clone();
        self.source_mut(name).ok_or_else(|| Error::OperandSlotMissing {
            instruction,
            slot: name.to_string(),
            action: action.to_string(),
        })
    }

    /// Immediate slot that must exist for `action` to wire it
    pub fn require_immediate(&mut self, action: &str) -> Result<&mut Operand> {
        let instruction = self.name.clone();
        self.immediate_mut().ok_or_else(|| Error::OperandSlotMissing {
            instruction,
            slot: "imm".to_string(),
            action: action.to_string(),
        })
    }

    /// Destination slot that must exist for `action` to wire it
    pub fn require_destination(&mut self, action: &str) -> Result<&mut Operand> {
        let instruction = self.name.clone();
        self.destination
            .as_mut()
            .ok_or_else(|| Error::OperandSlotMissing {
                instruction,
                slot: "rd".to_string(),
                action: action.to_string(),
            })
    }

    /// Every operand is a concrete register, immediate or symbol
    pub fn is_fully_allocated(&self) -> bool {
        self.destination.iter().all(Operand::is_concrete)
            && self.sources.iter().all(Operand::is_concrete)
    }

    /// Placeholder ids read by this instruction
    pub fn virtual_sources(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().filter_map(Operand::virtual_id)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.form {
            InstructionForm::Label { .. } => return write!(f, "{}:", self.name),
            InstructionForm::Comment(text) => return write!(f, "# {}", text),
            InstructionForm::CsrApi { csr, call, direct } => {
                return write!(f, ";#csr_rw({}, {}, {})", csr, call, direct)
            }
            InstructionForm::PteApi {
                memory,
                paging_mode,
                level,
                write,
            } => {
                let directive = if *write { "write_pte" } else { "read_pte" };
                return write!(f, ";#{}({}, {}, {})", directive, memory, paging_mode, level);
            }
            InstructionForm::Native | InstructionForm::Call { .. } | InstructionForm::Macro => {}
        }

        write!(f, "{}", self.name)?;
        let mut operands = self.destination.iter().chain(self.sources.iter()).peekable();
        if operands.peek().is_some() {
            f.write_str(" ")?;
        }
        let mut first = true;
        for op in operands {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            match &op.value {
                OperandValue::Unset => write!(f, "<{}>", op.name)?,
                v => write!(f, "{}", v)?,
            }
        }
        Ok(())
    }
}
