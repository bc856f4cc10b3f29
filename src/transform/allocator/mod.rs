//! # Register Allocation
//!
//! Linear scan over straight-line routines, followed by a rewrite that
//! replaces every virtual operand with its register and inserts spill code:
//!
//! ```text
//! ld   t0, 8(sp)      # reload of a spilled source
//! add  t0, t0, a3
//! sd   t0, 16(sp)     # store of a spilled destination
//! ```
//!
//! Spill slots live in a frame opened with `addi sp, sp, -N` at routine
//! entry (after a leading label) and closed before every `ret`.

pub mod linear_scan;
pub mod register_pool;

pub use linear_scan::{allocate_registers, compute_intervals, AllocationResult, LinearScan, LiveInterval};
pub use register_pool::{scratch, RegisterPool, FPR_SCRATCH, GPR_SCRATCH};

use crate::context::LoweringContext;
use crate::isa::{regs, Instruction, Register, RegisterFile};
use crate::plan::Xlen;
use crate::transform::legalizer::splice_before_last;
use crate::{Error, Result};
use std::collections::HashMap;

/// Allocate one routine with the full register pool
pub fn allocate(instrs: Vec<Instruction>, ctx: &mut LoweringContext) -> Result<Vec<Instruction>> {
    allocate_with_pool(instrs, &RegisterPool::new(), ctx)
}

/// Allocate one routine with a custom pool
pub fn allocate_with_pool(
    instrs: Vec<Instruction>,
    pool: &RegisterPool,
    ctx: &mut LoweringContext,
) -> Result<Vec<Instruction>> {
    let result = allocate_registers(&instrs, pool, ctx)?;
    tracing::debug!(
        instructions = instrs.len(),
        intervals = result.intervals.len(),
        spilled = result.spill_count(),
        "allocated routine"
    );
    rewrite(instrs, &result, ctx)
}

/// Substitute registers and insert spill code and the spill frame
pub fn rewrite(
    instrs: Vec<Instruction>,
    result: &AllocationResult,
    ctx: &LoweringContext,
) -> Result<Vec<Instruction>> {
    let spill = SpillCode::new(ctx)?;
    let mut out = Vec::with_capacity(instrs.len());

    for mut instr in instrs {
        let mut scratch_of: HashMap<String, Register> = HashMap::new();
        let mut used: HashMap<RegisterFile, usize> = HashMap::new();
        let mut reloads = Vec::new();

        for src in instr.sources.iter_mut() {
            let Some(id) = src.virtual_id().map(str::to_string) else { continue };
            let Some(file) = src.ty.register_file() else { continue };
            match result.location(&id)? {
                Some(reg) => src.set_register(reg),
                None => {
                    let reg = match scratch_of.get(&id) {
                        Some(reg) => *reg,
                        None => {
                            let reg = next_scratch(file, &mut used, &instr.id)?;
                            reloads.push(spill.reload(reg, result.spill_slots[&id], &id)?);
                            scratch_of.insert(id.clone(), reg);
                            reg
                        }
                    };
                    src.set_register(reg);
                }
            }
        }

        let mut store = None;
        if let Some(dest) = instr.destination.as_mut() {
            if let (Some(id), Some(file)) = (dest.virtual_id().map(str::to_string), dest.ty.register_file()) {
                match result.location(&id)? {
                    Some(reg) => dest.set_register(reg),
                    None => {
                        // sources are dead once the instruction executes
                        let reg = scratch_of
                            .get(&id)
                            .copied()
                            .unwrap_or_else(|| scratch(file)[0]);
                        dest.set_register(reg);
                        store = Some(spill.store(reg, result.spill_slots[&id], &id)?);
                    }
                }
            }
        }

        splice_before_last(&mut out, reloads);
        out.push(instr);
        out.extend(store);
    }

    if result.spill_count() > 0 {
        spill.insert_frame(&mut out, result.spill_count())?;
    }
    Ok(out)
}

fn next_scratch(file: RegisterFile, used: &mut HashMap<RegisterFile, usize>, instr: &str) -> Result<Register> {
    let n = used.entry(file).or_insert(0);
    let reg = scratch(file).get(*n).copied().ok_or_else(|| {
        Error::internal(format!("instruction {} reloads more spilled values than scratch registers", instr))
    })?;
    *n += 1;
    Ok(reg)
}

/// Templates and sizes for spill traffic
struct SpillCode {
    width: i64,
    gpr_load: Instruction,
    gpr_store: Instruction,
    fpr_load: Option<Instruction>,
    fpr_store: Option<Instruction>,
    addi: Instruction,
}

impl SpillCode {
    fn new(ctx: &LoweringContext) -> Result<Self> {
        let (load, store, fload, fstore) = match ctx.env.xlen {
            Xlen::Rv64 => ("ld", "sd", "fld", "fsd"),
            Xlen::Rv32 => ("lw", "sw", "flw", "fsw"),
        };
        Ok(Self {
            width: ctx.register_bytes(),
            gpr_load: ctx.instruction(load)?,
            gpr_store: ctx.instruction(store)?,
            fpr_load: ctx.instruction(fload).ok(),
            fpr_store: ctx.instruction(fstore).ok(),
            addi: ctx.instruction("addi")?,
        })
    }

    fn template(&self, reg: Register, load: bool) -> Result<Instruction> {
        let template = match (reg.file(), load) {
            (RegisterFile::Gpr, true) => Some(&self.gpr_load),
            (RegisterFile::Gpr, false) => Some(&self.gpr_store),
            (RegisterFile::Fpr, true) => self.fpr_load.as_ref(),
            (RegisterFile::Fpr, false) => self.fpr_store.as_ref(),
        };
        template
            .cloned()
            .ok_or_else(|| Error::internal(format!("catalog has no spill instruction for {}", reg)))
    }

    fn reload(&self, reg: Register, slot: usize, id: &str) -> Result<Instruction> {
        let mut instr = self.template(reg, true)?.with_id(format!("{}.reload", id));
        instr.require_destination("spill reload")?.set_register(reg);
        instr.require_source("rs1", "spill reload")?.set_register(regs::SP);
        instr.require_immediate("spill reload")?.set_imm(slot as i64 * self.width);
        Ok(instr)
    }

    fn store(&self, reg: Register, slot: usize, id: &str) -> Result<Instruction> {
        let mut instr = self.template(reg, false)?.with_id(format!("{}.spill", id));
        instr.require_source("rs2", "spill store")?.set_register(reg);
        instr.require_source("rs1", "spill store")?.set_register(regs::SP);
        instr.require_immediate("spill store")?.set_imm(slot as i64 * self.width);
        Ok(instr)
    }

    fn adjust_sp(&self, delta: i64, id: &str) -> Result<Instruction> {
        let mut instr = self.addi.clone().with_id(id);
        instr.require_destination("spill frame")?.set_register(regs::SP);
        instr.require_source("rs1", "spill frame")?.set_register(regs::SP);
        instr.require_immediate("spill frame")?.set_imm(delta);
        Ok(instr)
    }

    fn insert_frame(&self, out: &mut Vec<Instruction>, slots: usize) -> Result<()> {
        let size = slots as i64 * self.width;
        let mut framed = Vec::with_capacity(out.len() + 2);
        let mut rest = std::mem::take(out).into_iter().peekable();
        if let Some(label) = rest.next_if(Instruction::is_label) {
            framed.push(label);
        }
        framed.push(self.adjust_sp(-size, "spill_frame_open")?);
        for instr in rest {
            if instr.name == "ret" {
                framed.push(self.adjust_sp(size, "spill_frame_close")?);
            }
            framed.push(instr);
        }
        *out = framed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoweringOptions;
    use crate::isa::{InstructionCatalog, OperandValue, TemplateCatalog};
    use crate::plan::TestEnv;

    fn li(catalog: &TemplateCatalog, id: &str) -> Instruction {
        let mut instr = catalog.get_instruction("li").unwrap().with_id(id);
        instr.destination.as_mut().unwrap().set_virtual(id);
        instr.immediate_mut().unwrap().set_imm(7);
        instr
    }

    fn add(catalog: &TemplateCatalog, id: &str, a: &str, b: &str) -> Instruction {
        let mut instr = catalog.get_instruction("add").unwrap().with_id(id);
        instr.destination.as_mut().unwrap().set_virtual(id);
        instr.source_mut("rs1").unwrap().set_virtual(a);
        instr.source_mut("rs2").unwrap().set_virtual(b);
        instr
    }

    #[test]
    fn test_rewrite_leaves_no_placeholders() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::with_seed(2));
        let instrs = vec![
            Instruction::label("f", "code_mem0", false),
            li(&catalog, "a"),
            li(&catalog, "b"),
            add(&catalog, "c", "a", "b"),
            catalog.get_instruction("ret").unwrap().with_id("r"),
        ];
        let out = allocate(instrs, &mut ctx).unwrap();
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(Instruction::is_fully_allocated));
    }

    #[test]
    fn test_spill_code_and_frame() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::with_seed(2));
        let instrs = vec![
            Instruction::label("f", "code_mem0", false),
            li(&catalog, "a"),
            li(&catalog, "b"),
            li(&catalog, "c"),
            add(&catalog, "d", "a", "b"),
            add(&catalog, "e", "d", "c"),
            catalog.get_instruction("ret").unwrap().with_id("r"),
        ];
        let out = allocate_with_pool(instrs, &RegisterPool::limited(2, 0), &mut ctx).unwrap();
        assert!(out.iter().all(Instruction::is_fully_allocated));

        let text: Vec<String> = out.iter().map(|i| i.to_string()).collect();
        assert_eq!(text[0], "code_mem0:");
        assert!(text[1].starts_with("addi sp, sp, -"), "{}", text[1]);
        assert!(text.iter().any(|t| t.starts_with("sd t0, ")));
        assert!(text.iter().any(|t| t.starts_with("ld t0, ") || t.starts_with("ld t6, ")));
        let close = text.len() - 2;
        assert!(text[close].starts_with("addi sp, sp, "), "{}", text[close]);
        assert_eq!(text[close + 1], "ret");
    }

    #[test]
    fn test_instruction_pointer_label_stays_on_faulting_instruction() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::with_seed(2));
        let instrs = vec![
            li(&catalog, "a"),
            li(&catalog, "b"),
            li(&catalog, "c"),
            Instruction::label("l", "fault_label_0", true),
            add(&catalog, "d", "a", "b"),
            add(&catalog, "e", "d", "c"),
        ];
        let out = allocate_with_pool(instrs, &RegisterPool::limited(2, 0), &mut ctx).unwrap();
        let at = out.iter().position(|i| i.name == "fault_label_0").unwrap();
        assert_eq!(out[at + 1].id, "d");
    }

    #[test]
    fn test_unspilled_operands_take_assigned_registers() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::default());
        let instrs = vec![li(&catalog, "a"), add(&catalog, "b", "a", "a")];
        let result = allocate_registers(&instrs, &RegisterPool::new(), &mut ctx).unwrap();
        let out = rewrite(instrs, &result, &ctx).unwrap();
        let a = result.assignments["a"];
        assert_eq!(out[1].source("rs1").map(|o| o.value.clone()), Some(OperandValue::Reg(a)));
    }
}
