//! Shared lowering state
//!
//! A [`LoweringContext`] lives for one batch and is passed by `&mut` to every
//! stage. It owns the id allocators, the memory registry, the recorded
//! function clobber sets and the seeded random source.

use crate::config::LoweringOptions;
use crate::isa::{Instruction, InstructionCatalog, InstructionFilter, Register};
use crate::memory::MemoryRegistry;
use crate::plan::TestEnv;
use crate::random::RandNum;
use crate::{Error, Result};
use std::collections::HashMap;

/// Monotonic id allocators
#[derive(Debug, Clone, Default)]
pub struct IdTracker {
    values: u64,
    memory: u64,
    labels: u64,
    names: HashMap<String, u64>,
}

impl IdTracker {
    /// Next value id: `r0`, `r1`, ...
    pub fn new_value_id(&mut self) -> String {
        let id = format!("r{}", self.values);
        self.values += 1;
        id
    }

    /// Next data memory id: `mem0`, ...
    pub fn new_memory_id(&mut self) -> String {
        let id = format!("mem{}", self.memory);
        self.memory += 1;
        id
    }

    /// Next code memory id; shares the data memory counter
    pub fn new_code_memory_id(&mut self) -> String {
        let id = format!("code_mem{}", self.memory);
        self.memory += 1;
        id
    }

    /// Next anonymous label: `L0`, ...
    pub fn new_label(&mut self) -> String {
        let id = format!("L{}", self.labels);
        self.labels += 1;
        id
    }

    /// `{prefix}_{n}` with a counter per prefix
    pub fn unique_name(&mut self, prefix: &str) -> String {
        let count = self.names.entry(prefix.to_string()).or_insert(0);
        let name = format!("{}_{}", prefix, count);
        *count += 1;
        name
    }
}

/// State shared by every lowering stage of one batch
pub struct LoweringContext<'a> {
    /// Template source
    pub catalog: &'a dyn InstructionCatalog,
    /// Resolved environment
    pub env: TestEnv,
    /// Run options
    pub options: LoweringOptions,
    /// Seeded random source
    pub rng: RandNum,
    /// Reserved pages
    pub memory: MemoryRegistry,
    /// Id allocators
    pub ids: IdTracker,
    /// Registers written by each lowered function, by canonical code id
    pub function_clobbers: HashMap<String, Vec<Register>>,
}

impl<'a> LoweringContext<'a> {
    /// Create a context seeded from `options.seed`
    pub fn new(catalog: &'a dyn InstructionCatalog, env: TestEnv, options: LoweringOptions) -> Self {
        let rng = RandNum::new(options.seed);
        Self {
            catalog,
            env,
            options,
            rng,
            memory: MemoryRegistry::new(),
            ids: IdTracker::default(),
            function_clobbers: HashMap::new(),
        }
    }

    /// Next value id
    pub fn new_value_id(&mut self) -> String {
        self.ids.new_value_id()
    }

    /// Next data memory id
    pub fn new_memory_id(&mut self) -> String {
        self.ids.new_memory_id()
    }

    /// Next code memory id
    pub fn new_code_memory_id(&mut self) -> String {
        self.ids.new_code_memory_id()
    }

    /// Next anonymous label
    pub fn new_label(&mut self) -> String {
        self.ids.new_label()
    }

    /// Unique label with a readable prefix
    pub fn unique_label(&mut self, prefix: &str) -> String {
        self.ids.unique_name(prefix)
    }

    /// See [`RandNum::random_n_width_number`]
    pub fn random_n_width_number(&mut self, n: u32, min_bits: u32) -> Result<i64> {
        self.rng.random_n_width_number(n, min_bits)
    }

    /// Exact-name template lookup
    pub fn instruction(&self, name: &str) -> Result<Instruction> {
        self.catalog.get_instruction(name)
    }

    /// Random template among those matching `filter`
    pub fn choose_instruction(&mut self, filter: &InstructionFilter) -> Result<Instruction> {
        let candidates = self.catalog.filter(filter);
        self.choose_from(candidates, filter)
    }

    /// Random template among `candidates`; `filter` only names the query in errors
    pub fn choose_from(
        &mut self,
        candidates: Vec<Instruction>,
        filter: &InstructionFilter,
    ) -> Result<Instruction> {
        self.rng
            .choice(&candidates)
            .cloned()
            .ok_or_else(|| Error::NoCandidates {
                filter: filter.to_string(),
            })
    }

    /// Integer register width in bytes
    pub fn register_bytes(&self) -> i64 {
        self.env.xlen.bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_formats() {
        let mut ids = IdTracker::default();
        assert_eq!(ids.new_value_id(), "r0");
        assert_eq!(ids.new_value_id(), "r1");
        assert_eq!(ids.new_memory_id(), "mem0");
        assert_eq!(ids.new_code_memory_id(), "code_mem1");
        assert_eq!(ids.new_label(), "L0");
        assert_eq!(ids.unique_name("pass"), "pass_0");
        assert_eq!(ids.unique_name("pass"), "pass_1");
        assert_eq!(ids.unique_name("fault"), "fault_0");
    }
}
