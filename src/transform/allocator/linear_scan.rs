//! Live interval analysis and the linear scan main loop
//!
//! Straight-line code only: an interval spans from a value's first definition
//! to its last use. Intervals are visited by increasing start; when every
//! usable register of the class is taken, the interval that lives longest is
//! spilled to the stack for its whole lifetime.

use super::register_pool::RegisterPool;
use crate::context::LoweringContext;
use crate::isa::{Instruction, InstructionForm, Register, RegisterFile};
use crate::random::RandNum;
use crate::{Error, Result};
use std::collections::HashMap;

/// Lifetime of one virtual register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveInterval {
    /// Virtual id
    pub id: String,
    /// Register file the value lives in
    pub file: RegisterFile,
    /// Index of the first definition
    pub start: usize,
    /// Index of the last use (or the definition when never read)
    pub end: usize,
    /// Registers destroyed by instructions strictly inside the interval
    pub excluded: Vec<Register>,
}

impl LiveInterval {
    /// Whether `index` lies strictly inside the interval
    pub fn straddles(&self, index: usize) -> bool {
        self.start < index && index < self.end
    }
}

/// Register assignment for a routine
#[derive(Debug, Clone, Default)]
pub struct AllocationResult {
    /// Intervals in allocation order
    pub intervals: Vec<LiveInterval>,
    /// Virtual id → register
    pub assignments: HashMap<String, Register>,
    /// Virtual id → stack slot
    pub spill_slots: HashMap<String, usize>,
}

impl AllocationResult {
    /// Number of stack slots used
    pub fn spill_count(&self) -> usize {
        self.spill_slots.len()
    }

    /// Register holding `id`, `None` when it lives on the stack
    pub fn location(&self, id: &str) -> Result<Option<Register>> {
        if let Some(reg) = self.assignments.get(id) {
            return Ok(Some(*reg));
        }
        if self.spill_slots.contains_key(id) {
            return Ok(None);
        }
        Err(Error::UnresolvedAllocation { id: id.to_string() })
    }
}

/// Compute `[first def, last use]` for every virtual register, with the
/// clobbers of the instructions each interval straddles
pub fn compute_intervals(instrs: &[Instruction], ctx: &LoweringContext) -> Result<Vec<LiveInterval>> {
    let mut intervals: Vec<LiveInterval> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut clobber_points: Vec<(usize, Vec<Register>)> = Vec::new();

    for (idx, instr) in instrs.iter().enumerate() {
        for src in &instr.sources {
            let Some(id) = src.virtual_id() else { continue };
            match by_id.get(id) {
                Some(&slot) => intervals[slot].end = idx,
                None => {
                    return Err(Error::UseBeforeDef {
                        id: id.to_string(),
                        index: idx,
                    })
                }
            }
        }
        if let Some(dest) = &instr.destination {
            if let (Some(id), Some(file)) = (dest.virtual_id(), dest.ty.register_file()) {
                match by_id.get(id) {
                    Some(&slot) => intervals[slot].end = idx,
                    None => {
                        by_id.insert(id.to_string(), intervals.len());
                        intervals.push(LiveInterval {
                            id: id.to_string(),
                            file,
                            start: idx,
                            end: idx,
                            excluded: Vec::new(),
                        });
                    }
                }
            }
        }

        let mut clobbers = instr.clobbers.clone();
        if let InstructionForm::Call { target } = &instr.form {
            let callee = ctx
                .function_clobbers
                .get(target)
                .ok_or_else(|| Error::UnknownFunction { id: target.clone() })?;
            clobbers.extend(callee.iter().copied());
        }
        if !clobbers.is_empty() {
            clobber_points.push((idx, clobbers));
        }
    }

    for interval in &mut intervals {
        for (idx, clobbers) in &clobber_points {
            if interval.straddles(*idx) {
                for reg in clobbers {
                    if reg.file() == interval.file && !interval.excluded.contains(reg) {
                        interval.excluded.push(*reg);
                    }
                }
            }
        }
    }

    // Already ordered by start; the sort keeps equal starts stable
    intervals.sort_by_key(|i| i.start);
    Ok(intervals)
}

/// Linear scan over sorted intervals
pub struct LinearScan<'a> {
    pool: &'a RegisterPool,
    intervals: Vec<LiveInterval>,
    /// Indices into `intervals` currently holding a register
    active: Vec<usize>,
    assignments: HashMap<String, Register>,
    spill_slots: HashMap<String, usize>,
}

impl<'a> LinearScan<'a> {
    /// Prepare a scan of `intervals` (sorted by start) over `pool`
    pub fn new(pool: &'a RegisterPool, intervals: Vec<LiveInterval>) -> Self {
        Self {
            pool,
            intervals,
            active: Vec::new(),
            assignments: HashMap::new(),
            spill_slots: HashMap::new(),
        }
    }

    /// Assign a register or a stack slot to every interval
    pub fn run(mut self, rng: &mut RandNum) -> Result<AllocationResult> {
        for current in 0..self.intervals.len() {
            self.expire(current);

            let interval = &self.intervals[current];
            let candidates = self.pool.candidates(interval.file, &interval.excluded);
            let same_class = self
                .active
                .iter()
                .filter(|&&a| self.intervals[a].file == interval.file)
                .count();

            if same_class >= candidates.len() {
                self.spill_at(current);
                continue;
            }

            let taken: Vec<Register> = self
                .active
                .iter()
                .filter_map(|a| self.assignments.get(&self.intervals[*a].id).copied())
                .collect();
            let free: Vec<Register> = candidates.into_iter().filter(|r| !taken.contains(r)).collect();
            let reg = *rng.choice(&free).ok_or_else(|| {
                Error::internal(format!("no free register for '{}'", self.intervals[current].id))
            })?;
            tracing::trace!(id = %self.intervals[current].id, reg = %reg, "allocated");
            self.assignments.insert(self.intervals[current].id.clone(), reg);
            self.active.push(current);
        }

        Ok(AllocationResult {
            intervals: self.intervals,
            assignments: self.assignments,
            spill_slots: self.spill_slots,
        })
    }

    /// Free the registers of intervals that ended before `current` starts
    fn expire(&mut self, current: usize) {
        let start = self.intervals[current].start;
        let intervals = &self.intervals;
        self.active.retain(|&a| intervals[a].end >= start);
    }

    /// Spill the longest-lived same-class interval whose register `current`
    /// could use. Among equal ends the most recently activated one is the
    /// victim; a victim ending with `current` is still evicted
    fn spill_at(&mut self, current: usize) {
        let id = self.intervals[current].id.clone();
        let end = self.intervals[current].end;
        let file = self.intervals[current].file;
        let excluded = self.intervals[current].excluded.clone();

        let mut victim: Option<usize> = None;
        for (pos, &a) in self.active.iter().enumerate() {
            let other = &self.intervals[a];
            if other.file != file {
                continue;
            }
            let Some(reg) = self.assignments.get(&other.id) else { continue };
            if excluded.contains(reg) || !self.pool.registers(file).contains(reg) {
                continue;
            }
            match victim {
                Some(v) if self.intervals[self.active[v]].end > other.end => {}
                _ => victim = Some(pos),
            }
        }

        match victim {
            Some(pos) if self.intervals[self.active[pos]].end >= end => {
                let evicted = self.active.remove(pos);
                let evicted_id = self.intervals[evicted].id.clone();
                let reg = self.assignments.remove(&evicted_id);
                self.assign_slot(&evicted_id);
                if let Some(reg) = reg {
                    tracing::trace!(evicted = %evicted_id, id = %id, reg = %reg, "spilled active interval");
                    self.assignments.insert(id, reg);
                    self.active.push(current);
                }
            }
            _ => {
                tracing::trace!(id = %id, "spilled new interval");
                self.assign_slot(&id);
            }
        }
    }

    fn assign_slot(&mut self, id: &str) {
        let slot = self.spill_slots.len();
        self.spill_slots.insert(id.to_string(), slot);
    }
}

/// Analyze and scan one routine
pub fn allocate_registers(
    instrs: &[Instruction],
    pool: &RegisterPool,
    ctx: &mut LoweringContext,
) -> Result<AllocationResult> {
    let intervals = compute_intervals(instrs, ctx)?;
    LinearScan::new(pool, intervals).run(&mut ctx.rng)
}
