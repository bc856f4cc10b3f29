//! Typed instruction operands

use super::register::{Register, RegisterFile};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operand type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperandType {
    /// General purpose register
    Gpr,
    /// Floating point register
    Fpr,
    /// Immediate value (integer or link-time symbol)
    Imm,
    /// Code label
    Symbol,
    /// Control and status register name
    Csr,
}

impl OperandType {
    /// Whether the operand names a register that may need allocation
    pub fn is_register(self) -> bool {
        matches!(self, OperandType::Gpr | OperandType::Fpr)
    }

    /// Register file for register operands
    pub fn register_file(self) -> Option<RegisterFile> {
        match self {
            OperandType::Gpr => Some(RegisterFile::Gpr),
            OperandType::Fpr => Some(RegisterFile::Fpr),
            _ => None,
        }
    }
}

impl From<RegisterFile> for OperandType {
    fn from(file: RegisterFile) -> Self {
        match file {
            RegisterFile::Gpr => OperandType::Gpr,
            RegisterFile::Fpr => OperandType::Fpr,
        }
    }
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperandType::Gpr => "gpr",
            OperandType::Fpr => "fpr",
            OperandType::Imm => "imm",
            OperandType::Symbol => "symbol",
            OperandType::Csr => "csr",
        };
        f.write_str(s)
    }
}

/// Current value of an operand
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OperandValue {
    /// Not wired yet
    #[default]
    Unset,
    /// Placeholder id awaiting register allocation
    Virtual(String),
    /// Concrete register
    Reg(Register),
    /// Integer immediate
    Imm(i64),
    /// Label, CSR name or symbolic expression
    Symbol(String),
}

impl fmt::Display for OperandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandValue::Unset => f.write_str("?"),
            OperandValue::Virtual(id) => f.write_str(id),
            OperandValue::Reg(reg) => write!(f, "{}", reg),
            OperandValue::Imm(v) => write!(f, "{}", v),
            OperandValue::Symbol(s) => f.write_str(s),
        }
    }
}

/// Named, typed operand slot of an instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    /// Slot name (`rd`, `rs1`, `imm`, `csr`, `offset`)
    pub name: String,
    /// Expected type
    pub ty: OperandType,
    /// Wired value
    pub value: OperandValue,
}

impl Operand {
    /// Create an unset operand
    pub fn new(name: impl Into<String>, ty: OperandType) -> Self {
        Self {
            name: name.into(),
            ty,
            value: OperandValue::Unset,
        }
    }

    /// Create an operand already holding a value
    pub fn with_value(name: impl Into<String>, ty: OperandType, value: OperandValue) -> Self {
        Self {
            name: name.into(),
            ty,
            value,
        }
    }

    /// Placeholder id if this is an unallocated register operand
    pub fn virtual_id(&self) -> Option<&str> {
        match (&self.value, self.ty.is_register()) {
            (OperandValue::Virtual(id), true) => Some(id),
            _ => None,
        }
    }

    /// Concrete register, if assigned
    pub fn register(&self) -> Option<Register> {
        match self.value {
            OperandValue::Reg(r) => Some(r),
            _ => None,
        }
    }

    /// Wire a placeholder id
    pub fn set_virtual(&mut self, id: impl Into<String>) {
        self.value = OperandValue::Virtual(id.into());
    }

    /// Wire a concrete register
    pub fn set_register(&mut self, reg: Register) {
        self.value = OperandValue::Reg(reg);
    }

    /// Wire an integer immediate
    pub fn set_imm(&mut self, v: i64) {
        self.value = OperandValue::Imm(v);
    }

    /// Wire a symbol
    pub fn set_symbol(&mut self, s: impl Into<String>) {
        self.value = OperandValue::Symbol(s.into());
    }

    /// True once no placeholder or unset value remains
    pub fn is_concrete(&self) -> bool {
        !matches!(self.value, OperandValue::Unset | OperandValue::Virtual(_))
    }
}
