//! Instruction catalog: template lookup by name or by constraint
//!
//! The pipeline only sees the [`InstructionCatalog`] trait. [`TemplateCatalog`]
//! is the table-driven implementation: each template is declared with an
//! assembly-like field list (`"rd, rs1, imm"`) that is resolved once, at load
//! time, through [`OPERAND_FIELDS`] into typed operand slots. Lookups hand out
//! fresh clones, so callers can wire operands freely.

use super::instruction::{Category, Extensions, Instruction};
use super::operand::{Operand, OperandType};
use crate::plan::Xlen;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Source of instruction templates
pub trait InstructionCatalog {
    /// Template with exactly this name
    fn get_instruction(&self, name: &str) -> Result<Instruction>;

    /// All templates satisfying `filter`, in catalog order
    fn filter(&self, filter: &InstructionFilter) -> Vec<Instruction>;
}

/// Constraint set for catalog queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionFilter {
    /// Required category
    pub category: Option<Category>,
    /// Required number of register sources
    pub source_reg_count: Option<usize>,
    /// Required presence (or absence) of an immediate
    pub has_immediate: Option<bool>,
    /// Extensions to leave out
    pub exclude_extensions: Extensions,
    /// Required type of the first register source
    pub source_type: Option<OperandType>,
    /// Required destination type
    pub destination_type: Option<OperandType>,
}

impl InstructionFilter {
    /// Filter on category only
    pub fn category(category: Category) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    /// Cast from one operand type to another
    pub fn cast(from: OperandType, to: OperandType) -> Self {
        Self {
            category: Some(Category::Cast),
            source_type: Some(from),
            destination_type: Some(to),
            ..Self::default()
        }
    }

    /// Whether `instr` satisfies every constraint
    pub fn matches(&self, instr: &Instruction) -> bool {
        if let Some(category) = self.category {
            if instr.category != category {
                return false;
            }
        }
        if let Some(count) = self.source_reg_count {
            if instr.source_reg_count() != count {
                return false;
            }
        }
        if let Some(has_imm) = self.has_immediate {
            if instr.has_immediate() != has_imm {
                return false;
            }
        }
        if instr.extension.intersects(self.exclude_extensions) {
            return false;
        }
        if let Some(ty) = self.source_type {
            match instr.sources.iter().find(|op| op.ty.is_register()) {
                Some(op) if op.ty == ty => {}
                _ => return false,
            }
        }
        if let Some(ty) = self.destination_type {
            match &instr.destination {
                Some(op) if op.ty == ty => {}
                _ => return false,
            }
        }
        true
    }
}

impl fmt::Display for InstructionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(c) = self.category {
            parts.push(format!("category={:?}", c));
        }
        if let Some(n) = self.source_reg_count {
            parts.push(format!("source_reg_count={}", n));
        }
        if let Some(b) = self.has_immediate {
            parts.push(format!("has_immediate={}", b));
        }
        if !self.exclude_extensions.is_empty() {
            parts.push(format!("exclude={:?}", self.exclude_extensions));
        }
        if let Some(t) = self.source_type {
            parts.push(format!("source_type={}", t));
        }
        if let Some(t) = self.destination_type {
            parts.push(format!("destination_type={}", t));
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Operand kind a template field name resolves to
#[derive(Debug, Clone, Copy)]
pub struct FieldKind {
    /// Field as written in a template
    pub field: &'static str,
    /// Slot name on the instruction
    pub slot: &'static str,
    /// Operand type
    pub ty: OperandType,
    /// Whether the field is the destination
    pub destination: bool,
}

const fn field(field: &'static str, slot: &'static str, ty: OperandType, destination: bool) -> FieldKind {
    FieldKind {
        field,
        slot,
        ty,
        destination,
    }
}

/// Template field name → operand kind
///
/// Float sources keep the `rs1`..`rs3` slot names so actions wire integer and
/// float templates the same way.
pub const OPERAND_FIELDS: &[FieldKind] = &[
    field("rd", "rd", OperandType::Gpr, true),
    field("fd", "rd", OperandType::Fpr, true),
    field("rs1", "rs1", OperandType::Gpr, false),
    field("rs2", "rs2", OperandType::Gpr, false),
    field("rs3", "rs3", OperandType::Gpr, false),
    field("fs1", "rs1", OperandType::Fpr, false),
    field("fs2", "rs2", OperandType::Fpr, false),
    field("fs3", "rs3", OperandType::Fpr, false),
    field("imm", "imm", OperandType::Imm, false),
    field("zimm", "imm", OperandType::Imm, false),
    field("shamt", "imm", OperandType::Imm, false),
    field("offset", "offset", OperandType::Symbol, false),
    field("csr", "csr", OperandType::Csr, false),
];

/// Serialized template declaration
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSpec {
    /// Mnemonic
    pub name: String,
    /// Comma separated field list
    #[serde(default)]
    pub operands: String,
    /// Catalog category
    pub category: Category,
    /// Owning extension(s)
    #[serde(default = "base_extension")]
    pub extension: Extensions,
    /// Only valid on RV64
    #[serde(default)]
    pub rv64_only: bool,
}

fn base_extension() -> Extensions {
    Extensions::I
}

/// Table-driven instruction catalog
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: Vec<Instruction>,
    by_name: HashMap<String, usize>,
}

impl TemplateCatalog {
    /// Build a catalog from template declarations, skipping RV64-only
    /// templates on RV32
    pub fn from_specs(specs: impl IntoIterator<Item = TemplateSpec>, xlen: Xlen) -> Result<Self> {
        let mut templates = Vec::new();
        let mut by_name = HashMap::new();
        for spec in specs {
            if spec.rv64_only && xlen == Xlen::Rv32 {
                continue;
            }
            let template = resolve_template(&spec)?;
            if by_name.insert(spec.name.clone(), templates.len()).is_some() {
                return Err(Error::CatalogLoad(format!(
                    "duplicate template '{}'",
                    spec.name
                )));
            }
            templates.push(template);
        }
        Ok(Self { templates, by_name })
    }

    /// Load templates from a JSON array of [`TemplateSpec`]
    pub fn from_json(json: &str, xlen: Xlen) -> Result<Self> {
        let specs: Vec<TemplateSpec> =
            serde_json::from_str(json).map_err(|e| Error::CatalogLoad(e.to_string()))?;
        Self::from_specs(specs, xlen)
    }

    /// Built-in RV32/RV64 IMFD + Zicsr + Zbb subset
    pub fn builtin(xlen: Xlen) -> Result<Self> {
        let specs = BUILTIN_TEMPLATES
            .iter()
            .map(|&(name, operands, category, extension, rv64_only)| TemplateSpec {
                name: name.to_string(),
                operands: operands.to_string(),
                category,
                extension,
                rv64_only,
            });
        Self::from_specs(specs, xlen)
    }

    /// Number of templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the catalog holds no templates
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl InstructionCatalog for TemplateCatalog {
    fn get_instruction(&self, name: &str) -> Result<Instruction> {
        self.by_name
            .get(name)
            .map(|&idx| self.templates[idx].clone())
            .ok_or_else(|| Error::InstructionNotFound {
                name: name.to_string(),
            })
    }

    fn filter(&self, filter: &InstructionFilter) -> Vec<Instruction> {
        self.templates
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect()
    }
}

fn resolve_template(spec: &TemplateSpec) -> Result<Instruction> {
    let mut instr = Instruction::new(spec.name.clone(), spec.category, spec.extension);
    for raw in spec.operands.split(',') {
        let name = raw.trim();
        if name.is_empty() {
            continue;
        }
        let kind = OPERAND_FIELDS
            .iter()
            .find(|k| k.field == name)
            .ok_or_else(|| {
                Error::CatalogLoad(format!(
                    "template '{}': unknown operand field '{}'",
                    spec.name, name
                ))
            })?;
        if kind.destination {
            if instr.destination.is_some() {
                return Err(Error::CatalogLoad(format!(
                    "template '{}': more than one destination",
                    spec.name
                )));
            }
            instr.destination = Some(Operand::new(kind.slot, kind.ty));
        } else {
            if instr.source(kind.slot).is_some() {
                return Err(Error::CatalogLoad(format!(
                    "template '{}': operand slot '{}' declared twice",
                    spec.name, kind.slot
                )));
            }
            instr.sources.push(Operand::new(kind.slot, kind.ty));
        }
    }
    Ok(instr)
}

type BuiltinTemplate = (&'static str, &'static str, Category, Extensions, bool);

use Category::{Arithmetic as AR, Branch as BR, Cast as CA, Csr as CS, Jump as JP, Load as LD};
use Category::{Pseudo as PS, Store as ST, System as SY};

const I: Extensions = Extensions::I;
const M: Extensions = Extensions::M;
const A: Extensions = Extensions::A;
const F: Extensions = Extensions::F;
const D: Extensions = Extensions::D;
const ZICSR: Extensions = Extensions::ZICSR;
const ZBB: Extensions = Extensions::ZBB;

#[rustfmt::skip]
const BUILTIN_TEMPLATES: &[BuiltinTemplate] = &[
    // Integer computation
    ("add", "rd, rs1, rs2", AR, I, false),
    ("sub", "rd, rs1, rs2", AR, I, false),
    ("and", "rd, rs1, rs2", AR, I, false),
    ("or", "rd, rs1, rs2", AR, I, false),
    ("xor", "rd, rs1, rs2", AR, I, false),
    ("sll", "rd, rs1, rs2", AR, I, false),
    ("srl", "rd, rs1, rs2", AR, I, false),
    ("sra", "rd, rs1, rs2", AR, I, false),
    ("slt", "rd, rs1, rs2", AR, I, false),
    ("sltu", "rd, rs1, rs2", AR, I, false),
    ("addi", "rd, rs1, imm", AR, I, false),
    ("andi", "rd, rs1, imm", AR, I, false),
    ("ori", "rd, rs1, imm", AR, I, false),
    ("xori", "rd, rs1, imm", AR, I, false),
    ("slti", "rd, rs1, imm", AR, I, false),
    ("sltiu", "rd, rs1, imm", AR, I, false),
    ("slli", "rd, rs1, shamt", AR, I, false),
    ("srli", "rd, rs1, shamt", AR, I, false),
    ("srai", "rd, rs1, shamt", AR, I, false),
    ("lui", "rd, imm", AR, I, false),
    ("addw", "rd, rs1, rs2", AR, I, true),
    ("subw", "rd, rs1, rs2", AR, I, true),
    ("sllw", "rd, rs1, rs2", AR, I, true),
    ("srlw", "rd, rs1, rs2", AR, I, true),
    ("sraw", "rd, rs1, rs2", AR, I, true),
    ("addiw", "rd, rs1, imm", AR, I, true),
    ("slliw", "rd, rs1, shamt", AR, I, true),
    ("srliw", "rd, rs1, shamt", AR, I, true),
    ("sraiw", "rd, rs1, shamt", AR, I, true),
    ("mul", "rd, rs1, rs2", AR, M, false),
    ("mulh", "rd, rs1, rs2", AR, M, false),
    ("mulhu", "rd, rs1, rs2", AR, M, false),
    ("div", "rd, rs1, rs2", AR, M, false),
    ("divu", "rd, rs1, rs2", AR, M, false),
    ("rem", "rd, rs1, rs2", AR, M, false),
    ("remu", "rd, rs1, rs2", AR, M, false),
    ("mulw", "rd, rs1, rs2", AR, M, true),
    ("divw", "rd, rs1, rs2", AR, M, true),
    ("remw", "rd, rs1, rs2", AR, M, true),
    ("andn", "rd, rs1, rs2", AR, ZBB, false),
    ("orn", "rd, rs1, rs2", AR, ZBB, false),
    ("xnor", "rd, rs1, rs2", AR, ZBB, false),
    ("rol", "rd, rs1, rs2", AR, ZBB, false),
    ("ror", "rd, rs1, rs2", AR, ZBB, false),
    ("rori", "rd, rs1, shamt", AR, ZBB, false),
    ("roriw", "rd, rs1, shamt", AR, ZBB, true),
    // Float computation
    ("fadd.s", "fd, fs1, fs2", AR, F, false),
    ("fsub.s", "fd, fs1, fs2", AR, F, false),
    ("fmul.s", "fd, fs1, fs2", AR, F, false),
    ("fmin.s", "fd, fs1, fs2", AR, F, false),
    ("fmax.s", "fd, fs1, fs2", AR, F, false),
    ("fmadd.s", "fd, fs1, fs2, fs3", AR, F, false),
    ("fadd.d", "fd, fs1, fs2", AR, D, false),
    ("fsub.d", "fd, fs1, fs2", AR, D, false),
    ("fmul.d", "fd, fs1, fs2", AR, D, false),
    ("fmadd.d", "fd, fs1, fs2, fs3", AR, D, false),
    // Register file moves
    ("fmv.w.x", "fd, rs1", CA, F, false),
    ("fmv.x.w", "rd, fs1", CA, F, false),
    ("fmv.d.x", "fd, rs1", CA, D, true),
    ("fmv.x.d", "rd, fs1", CA, D, true),
    // Memory
    ("lb", "rd, rs1, imm", LD, I, false),
    ("lh", "rd, rs1, imm", LD, I, false),
    ("lw", "rd, rs1, imm", LD, I, false),
    ("lbu", "rd, rs1, imm", LD, I, false),
    ("lhu", "rd, rs1, imm", LD, I, false),
    ("lwu", "rd, rs1, imm", LD, I, true),
    ("ld", "rd, rs1, imm", LD, I, true),
    ("flw", "fd, rs1, imm", LD, F, false),
    ("fld", "fd, rs1, imm", LD, D, false),
    ("sb", "rs2, rs1, imm", ST, I, false),
    ("sh", "rs2, rs1, imm", ST, I, false),
    ("sw", "rs2, rs1, imm", ST, I, false),
    ("sd", "rs2, rs1, imm", ST, I, true),
    ("fsw", "fs2, rs1, imm", ST, F, false),
    ("fsd", "fs2, rs1, imm", ST, D, false),
    ("sc.w", "rd, rs2, rs1", ST, A, false),
    ("sc.d", "rd, rs2, rs1", ST, A, true),
    // Control flow
    ("beq", "rs1, rs2, offset", BR, I, false),
    ("bne", "rs1, rs2, offset", BR, I, false),
    ("blt", "rs1, rs2, offset", BR, I, false),
    ("bge", "rs1, rs2, offset", BR, I, false),
    ("bltu", "rs1, rs2, offset", BR, I, false),
    ("bgeu", "rs1, rs2, offset", BR, I, false),
    ("jal", "rd, offset", JP, I, false),
    ("jalr", "rd, rs1, imm", JP, I, false),
    ("jr", "rs1", JP, I, false),
    ("ret", "", JP, I, false),
    // CSR access
    ("csrrw", "rd, csr, rs1", CS, ZICSR, false),
    ("csrrs", "rd, csr, rs1", CS, ZICSR, false),
    ("csrrc", "rd, csr, rs1", CS, ZICSR, false),
    ("csrrwi", "rd, csr, zimm", CS, ZICSR, false),
    ("csrrsi", "rd, csr, zimm", CS, ZICSR, false),
    ("csrrci", "rd, csr, zimm", CS, ZICSR, false),
    ("csrr", "rd, csr", CS, ZICSR, false),
    ("csrw", "csr, rs1", CS, ZICSR, false),
    // Pseudo-instructions
    ("li", "rd, imm", PS, I, false),
    ("mv", "rd, rs1", PS, I, false),
    ("nop", "", PS, I, false),
    // System
    ("ecall", "", SY, I, false),
    ("ebreak", "", SY, I, false),
    ("fence", "", SY, I, false),
    ("fence.i", "", SY, Extensions::ZIFENCEI, false),
    ("wfi", "", SY, I, false),
    ("mret", "", SY, I, false),
    ("sret", "", SY, I, false),
    ("sfence.vma", "rs1, rs2", SY, I, false),
];
