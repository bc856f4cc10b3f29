//! Legalization: make every virtual source defined and correctly typed
//!
//! 1. Sources nothing defines get a synthetic `li` of a random value right
//!    before their first use.
//! 2. Sources whose producer writes the other register file get a cast
//!    (`fmv.*`) spliced in front of the consumer.

use crate::context::LoweringContext;
use crate::isa::{Instruction, InstructionFilter, OperandType};
use crate::random::{DEFAULT_MIN_BITS, DEFAULT_WIDTH};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Run both legalization passes
pub fn legalize(instrs: Vec<Instruction>, ctx: &mut LoweringContext) -> Result<Vec<Instruction>> {
    let instrs = resolve_immediates(instrs, ctx)?;
    insert_casts(instrs, ctx)
}

/// Materialize undefined virtual sources with `li`
pub fn resolve_immediates(instrs: Vec<Instruction>, ctx: &mut LoweringContext) -> Result<Vec<Instruction>> {
    let mut out: Vec<Instruction> = Vec::with_capacity(instrs.len());
    let mut ids = HashSet::new();
    let mut defined: HashSet<String> = HashSet::new();
    let mut synthesized = 0usize;

    for instr in instrs {
        if !instr.id.is_empty() && !ids.insert(instr.id.clone()) {
            return Err(Error::DuplicateId {
                id: instr.id.clone(),
                scope: "instruction list".to_string(),
            });
        }

        let mut lis = Vec::new();
        for src in instr.sources.iter().filter(|op| op.ty.is_register()) {
            let Some(id) = src.virtual_id() else { continue };
            if defined.contains(id) {
                continue;
            }
            let mut li = ctx.instruction("li")?.with_id(id);
            let value = ctx.random_n_width_number(DEFAULT_WIDTH, DEFAULT_MIN_BITS)?;
            li.require_immediate("immediate resolution")?.set_imm(value);
            li.require_destination("immediate resolution")?.set_virtual(id);
            defined.insert(id.to_string());
            ids.insert(id.to_string());
            lis.push(li);
        }

        if !lis.is_empty() {
            synthesized += lis.len();
            splice_before_last(&mut out, lis);
        }

        defined.insert(instr.id.clone());
        if let Some(dest) = instr.destination.as_ref().and_then(|d| d.virtual_id()) {
            defined.insert(dest.to_string());
        }
        out.push(instr);
    }

    tracing::debug!(synthesized, "resolved undefined sources");
    Ok(out)
}

/// Splice casts between producers and consumers of different register files
pub fn insert_casts(instrs: Vec<Instruction>, ctx: &mut LoweringContext) -> Result<Vec<Instruction>> {
    let mut out: Vec<Instruction> = Vec::with_capacity(instrs.len());
    let mut produced: HashMap<String, OperandType> = HashMap::new();

    for mut instr in instrs {
        let mut casts = Vec::new();
        for idx in 0..instr.sources.len() {
            let (id, expected) = {
                let src = &instr.sources[idx];
                match src.virtual_id() {
                    Some(id) => (id.to_string(), src.ty),
                    None => continue,
                }
            };
            let from = match produced.get(&id) {
                Some(ty) if *ty != expected => *ty,
                _ => continue,
            };

            let filter = InstructionFilter::cast(from, expected);
            let candidates = ctx.catalog.filter(&filter);
            if candidates.is_empty() {
                return Err(Error::NoCastCandidate {
                    from: from.to_string(),
                    to: expected.to_string(),
                    operand: id,
                    instruction: instr.id.clone(),
                });
            }
            let cast_id = ctx.new_value_id();
            let mut cast = ctx.choose_from(candidates, &filter)?.with_id(&cast_id);
            cast.require_source("rs1", "cast insertion")?.set_virtual(&id);
            cast.require_destination("cast insertion")?.set_virtual(&cast_id);
            tracing::trace!(cast = %cast.name, operand = %id, consumer = %instr.id, "inserted cast");

            produced.insert(cast_id.clone(), expected);
            instr.sources[idx].set_virtual(cast_id);
            casts.push(cast);
        }
        splice_before_last(&mut out, casts);

        if let Some(dest) = &instr.destination {
            if let Some(id) = dest.virtual_id() {
                produced.insert(id.to_string(), dest.ty);
            }
        }
        out.push(instr);
    }
    Ok(out)
}

/// Append `code` ahead of the instruction about to be pushed. A trailing
/// instruction-pointer label moves after it; jump targets stay in front so
/// the inserted code runs on every path reaching the instruction.
pub(crate) fn splice_before_last(out: &mut Vec<Instruction>, code: Vec<Instruction>) {
    if code.is_empty() {
        return;
    }
    let label = match out.last() {
        Some(prev) if prev.is_instruction_pointer() => out.pop(),
        _ => None,
    };
    out.extend(code);
    out.extend(label);
}
