//! Load and store actions
//!
//! Both address memory as `offset(base)`. During expansion the base is
//! materialized: a page label gets an address `li`, a missing page is
//! reserved on the fly, and an offset outside the 12-bit signed window is
//! folded into the base with `li` + `add`.

use super::{Action, ActionKind, ArithmeticAction, StepScope};
use crate::context::LoweringContext;
use crate::isa::{Category, Extensions, Instruction, InstructionFilter};
use crate::plan::{MemorySpec, PageFlags, Step, StepInput};
use crate::{Error, Result};

/// Signed 12-bit immediate window of load/store offsets
const OFFSET_RANGE: std::ops::RangeInclusive<i64> = -2048..=2047;

/// Where an access points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// Registered data or code page, by id
    Page(String),
    /// Link-time symbol not tracked by the memory registry
    Symbol(String),
    /// Value id holding the address
    Value(String),
}

impl Address {
    fn id_mut(&mut self) -> &mut String {
        match self {
            Address::Page(id) | Address::Symbol(id) | Address::Value(id) => id,
        }
    }

    /// Classify a referenced step id
    pub fn from_ref(id: &str, scope: &StepScope) -> Self {
        if scope.is_memory(id) {
            Address::Page(id.to_string())
        } else {
            Address::Value(id.to_string())
        }
    }
}

/// Addressing state shared by loads and stores
#[derive(Debug, Clone)]
pub struct AccessTarget {
    /// Byte offset
    pub offset: i64,
    /// Addressed memory, reserved during expansion when absent
    pub memory: Option<Address>,
    /// Value id of the base register
    pub base: Option<String>,
    /// Access width in bytes
    pub access_size: Option<u8>,
    /// Pinned opcode
    pub op: Option<String>,
}

impl AccessTarget {
    /// Target `offset(memory)`
    pub fn new(memory: Option<Address>, offset: i64) -> Self {
        let base = match &memory {
            Some(Address::Value(id)) => Some(id.clone()),
            _ => None,
        };
        Self {
            offset,
            memory,
            base,
            access_size: None,
            op: None,
        }
    }

    fn validate_size(step: &Step, access_size: Option<u8>) -> Result<()> {
        match access_size {
            None | Some(1) | Some(2) | Some(4) | Some(8) => Ok(()),
            Some(n) => Err(Error::invalid_step(
                &step.id,
                format!("invalid access size {}", n),
            )),
        }
    }

    pub(crate) fn for_each_id(&mut self, f: &mut dyn FnMut(&mut String)) {
        if let Some(memory) = self.memory.as_mut() {
            f(memory.id_mut());
        }
        if let Some(base) = self.base.as_mut() {
            f(base);
        }
    }

    pub(crate) fn describe(&self) -> String {
        let memory = match &self.memory {
            Some(Address::Page(id)) | Some(Address::Symbol(id)) | Some(Address::Value(id)) => {
                id.as_str()
            }
            None => "?",
        };
        format!("{}('{}')", self.offset, memory)
    }

    /// Materialize the base register and fold out-of-range offsets
    fn expand(&mut self, flags: PageFlags, ctx: &mut LoweringContext) -> Result<Option<Vec<Action>>> {
        let mut before = Vec::new();
        let label = match &self.memory {
            None => {
                let size = (ctx.random_n_width_number(32, 12)? as u64 & 0xFFFF_F000).max(0x1000);
                let mem_id = ctx.new_memory_id();
                ctx.memory
                    .allocate_data(&mem_id, &MemorySpec::new(size, flags))?;
                self.memory = Some(Address::Page(mem_id.clone()));
                Some(mem_id)
            }
            Some(Address::Page(id)) => {
                if !ctx.memory.is_memory_label(id) {
                    return Err(Error::PageNotFound { id: id.clone() });
                }
                Some(id.clone())
            }
            Some(Address::Symbol(sym)) => Some(sym.clone()),
            Some(Address::Value(_)) => None,
        };
        if let Some(label) = label {
            let li = Action::li(ctx.new_value_id(), label);
            self.base = Some(li.id.clone());
            before.push(li);
        }

        if !OFFSET_RANGE.contains(&self.offset) {
            let base = self.base.clone().ok_or_else(|| {
                Error::internal(format!("access {} has no base register", self.describe()))
            })?;
            let li = Action::li(ctx.new_value_id(), self.offset);
            let add = Action::new(
                ctx.new_value_id(),
                ActionKind::Arithmetic(ArithmeticAction::binary("add", base, li.id.clone())),
            );
            self.base = Some(add.id.clone());
            self.offset = 0;
            before.push(li);
            before.push(add);
        }

        Ok(if before.is_empty() { None } else { Some(before) })
    }

    fn filter_candidates(&self, filter: &InstructionFilter, ctx: &LoweringContext, skip: &[&str]) -> Vec<Instruction> {
        let suffix = match self.access_size {
            Some(1) => Some('b'),
            Some(2) => Some('h'),
            Some(4) => Some('w'),
            Some(8) => Some('d'),
            _ => None,
        };
        ctx.catalog
            .filter(filter)
            .into_iter()
            .filter(|i| !skip.iter().any(|s| i.name.contains(s)))
            .filter(|i| suffix.map_or(true, |c| i.name.ends_with(c)))
            .collect()
    }

    /// Wire `offset(base)` into the chosen template
    fn wire(&self, instr: &mut Instruction, desc: &str) -> Result<()> {
        match instr.immediate_mut() {
            Some(imm) => imm.set_imm(self.offset),
            None if self.offset != 0 => {
                return Err(Error::OperandSlotMissing {
                    instruction: instr.name.clone(),
                    slot: "imm".to_string(),
                    action: desc.to_string(),
                })
            }
            None => {}
        }
        let base = self.base.clone().ok_or_else(|| {
            Error::internal(format!("{} has no base register; expand it first", desc))
        })?;
        instr.require_source("rs1", desc)?.set_virtual(base);
        Ok(())
    }
}

/// Memory read
#[derive(Debug, Clone)]
pub struct LoadAction {
    /// Addressing
    pub access: AccessTarget,
}

impl LoadAction {
    /// Load from `memory` (first referenced input) at the step's offset
    pub fn from_step(
        step: &Step,
        scope: &StepScope,
        offset: i64,
        access_size: Option<u8>,
        op: Option<String>,
    ) -> Result<Self> {
        AccessTarget::validate_size(step, access_size)?;
        let memory = step
            .inputs
            .iter()
            .find_map(StepInput::as_ref_id)
            .map(|id| Address::from_ref(id, scope));
        let mut access = AccessTarget::new(memory, offset);
        access.access_size = access_size;
        access.op = op;
        Ok(Self { access })
    }

    pub(crate) fn expand(&mut self, ctx: &mut LoweringContext) -> Result<Option<Vec<Action>>> {
        self.access.expand(PageFlags::READ, ctx)
    }

    pub(crate) fn pick_instruction(&self, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        let mut filter = InstructionFilter::category(Category::Load);
        if self.access.offset != 0 {
            filter.has_immediate = Some(true);
        }
        let mut instr = match &self.access.op {
            Some(op) => ctx.instruction(op)?,
            None => {
                // stack-pointer-relative forms address sp implicitly
                let candidates = self.access.filter_candidates(&filter, ctx, &["sp"]);
                ctx.choose_from(candidates, &filter)?
            }
        };
        self.access.wire(&mut instr, desc)?;
        Ok(instr)
    }
}

/// Memory write
#[derive(Debug, Clone)]
pub struct StoreAction {
    /// Addressing
    pub access: AccessTarget,
    /// Stored value id; a fresh (random) value when absent
    pub value: Option<String>,
}

impl StoreAction {
    /// Store the first non-memory input to the first memory input
    pub fn from_step(
        step: &Step,
        scope: &StepScope,
        offset: i64,
        access_size: Option<u8>,
        op: Option<String>,
    ) -> Result<Self> {
        AccessTarget::validate_size(step, access_size)?;
        let mut memory = None;
        let mut value = None;
        for input in &step.inputs {
            match input {
                StepInput::Ref(id) if scope.is_memory(id) && memory.is_none() => {
                    memory = Some(Address::Page(id.clone()))
                }
                StepInput::Ref(id) if value.is_none() => value = Some(id.clone()),
                StepInput::Ref(id) => {
                    return Err(Error::invalid_step(
                        &step.id,
                        format!("unexpected extra store input '{}'", id),
                    ))
                }
                StepInput::Imm(v) => {
                    return Err(Error::invalid_step(
                        &step.id,
                        format!("store inputs must be step references, got immediate {}", v),
                    ))
                }
            }
        }
        let mut access = AccessTarget::new(memory, offset);
        access.access_size = access_size;
        access.op = op;
        Ok(Self { access, value })
    }

    pub(crate) fn for_each_id(&mut self, f: &mut dyn FnMut(&mut String)) {
        if let Some(value) = self.value.as_mut() {
            f(value);
        }
        self.access.for_each_id(f);
    }

    pub(crate) fn expand(&mut self, ctx: &mut LoweringContext) -> Result<Option<Vec<Action>>> {
        self.access.expand(PageFlags::READ | PageFlags::WRITE, ctx)
    }

    pub(crate) fn pick_instruction(&self, desc: &str, ctx: &mut LoweringContext) -> Result<Instruction> {
        let mut filter = InstructionFilter::category(Category::Store);
        filter.exclude_extensions = Extensions::A | Extensions::SVINVAL;
        if self.access.offset != 0 {
            filter.has_immediate = Some(true);
        }
        let mut instr = match &self.access.op {
            Some(op) => ctx.instruction(op)?,
            None => {
                let candidates = self.access.filter_candidates(&filter, ctx, &["sp", "sc"]);
                ctx.choose_from(candidates, &filter)?
            }
        };
        self.access.wire(&mut instr, desc)?;
        let value = match &self.value {
            Some(v) => v.clone(),
            None => ctx.new_value_id(),
        };
        instr.require_source("rs2", desc)?.set_virtual(value);
        Ok(instr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ExpansionState;
    use crate::config::LoweringOptions;
    use crate::isa::{OperandValue, TemplateCatalog};
    use crate::plan::{StepKind, TestEnv, Xlen};

    fn ctx(catalog: &TemplateCatalog) -> LoweringContext<'_> {
        LoweringContext::new(catalog, TestEnv::default(), LoweringOptions::with_seed(5))
    }

    #[test]
    fn test_load_without_memory_reserves_page() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = ctx(&catalog);
        let mut load = LoadAction {
            access: AccessTarget::new(None, 8),
        };
        let before = load.expand(&mut ctx).unwrap().unwrap();
        assert_eq!(before.len(), 1);
        assert!(matches!(before[0].kind, ActionKind::Li(_)));
        assert_eq!(ctx.memory.data_pages().len(), 1);
        assert_eq!(load.access.base.as_deref(), Some(before[0].id.as_str()));
        assert_eq!(before[0].state, ExpansionState::Unexpanded);
    }

    #[test]
    fn test_value_base_needs_no_li() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = ctx(&catalog);
        let mut load = LoadAction {
            access: AccessTarget::new(Some(Address::Value("r9".into())), 16),
        };
        assert!(load.expand(&mut ctx).unwrap().is_none());
        let instr = load.pick_instruction("Load", &mut ctx).unwrap();
        assert_eq!(
            instr.source("rs1").map(|o| o.value.clone()),
            Some(OperandValue::Virtual("r9".into()))
        );
        assert_eq!(instr.immediate().map(|o| o.value.clone()), Some(OperandValue::Imm(16)));
    }

    #[test]
    fn test_large_offset_folded() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = ctx(&catalog);
        let mut load = LoadAction {
            access: AccessTarget::new(Some(Address::Value("r9".into())), -4096),
        };
        let before = load.expand(&mut ctx).unwrap().unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(load.access.offset, 0);
        assert_eq!(load.access.base.as_deref(), Some(before[1].id.as_str()));
    }

    #[test]
    fn test_unregistered_page_rejected() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = ctx(&catalog);
        let mut store = StoreAction {
            access: AccessTarget::new(Some(Address::Page("mem7".into())), 0),
            value: None,
        };
        assert!(matches!(
            store.expand(&mut ctx),
            Err(Error::PageNotFound { .. })
        ));
    }

    #[test]
    fn test_store_access_size_and_exclusions() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = ctx(&catalog);
        let mut access = AccessTarget::new(Some(Address::Value("r1".into())), 0);
        access.access_size = Some(4);
        let store = StoreAction { access, value: Some("r2".into()) };
        for _ in 0..20 {
            let instr = store.pick_instruction("Store", &mut ctx).unwrap();
            assert!(instr.name == "sw" || instr.name == "fsw", "{}", instr.name);
        }
    }

    #[test]
    fn test_store_from_step_rejects_immediates() {
        let step = Step::new("s", StepKind::Store { offset: 0, access_size: None, op: None })
            .with_inputs(vec![StepInput::Imm(3)]);
        let scope = StepScope::default();
        assert!(StoreAction::from_step(&step, &scope, 0, None, None).is_err());
    }

    #[test]
    fn test_bad_access_size() {
        let step = Step::new("l", StepKind::Load { offset: 0, access_size: Some(3), op: None });
        assert!(LoadAction::from_step(&step, &StepScope::default(), 0, Some(3), None).is_err());
    }
}
