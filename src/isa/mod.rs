//! # RISC-V ISA model
//!
//! Registers, typed operands, the [`Instruction`] IR node and the
//! [`InstructionCatalog`] the lowering passes select templates from.

pub mod catalog;
pub mod instruction;
pub mod operand;
pub mod register;

pub use catalog::{InstructionCatalog, InstructionFilter, TemplateCatalog, TemplateSpec};
pub use instruction::{Category, CsrApiCall, Extensions, Instruction, InstructionForm};
pub use operand::{Operand, OperandType, OperandValue};
pub use register::{lookup, registers, regs, Register, RegisterClass, RegisterFile};
