//! Step kind → action constructor table

use super::*;
use crate::plan::{Step, StepInput, StepKind, StepTag, TestScenario};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Ids of a scenario's memory-reserving steps, used to classify references
#[derive(Debug, Clone, Default)]
pub struct StepScope {
    memory_ids: HashSet<String>,
    code_ids: HashSet<String>,
}

impl StepScope {
    /// Collect memory and code page ids at any nesting depth
    pub fn from_steps(steps: &[Step]) -> Self {
        let mut scope = Self::default();
        scope.collect(steps);
        scope
    }

    fn collect(&mut self, steps: &[Step]) {
        for step in steps {
            match &step.kind {
                StepKind::Memory(_) => {
                    self.memory_ids.insert(step.id.clone());
                }
                StepKind::CodePage(_) => {
                    self.memory_ids.insert(step.id.clone());
                    self.code_ids.insert(step.id.clone());
                }
                _ => {}
            }
            self.collect(&step.code);
        }
    }

    /// Id names a data or code page
    pub fn is_memory(&self, id: &str) -> bool {
        self.memory_ids.contains(id)
    }

    /// Id names a code page
    pub fn is_code(&self, id: &str) -> bool {
        self.code_ids.contains(id)
    }
}

/// Builds an action from a step, its scope and its already-built nested code
pub type ActionBuilder = fn(&Step, &StepScope, Vec<Action>) -> Result<Action>;

/// One scenario lowered to actions
#[derive(Debug, Clone)]
pub struct DiscreteTest {
    /// Scenario name
    pub name: String,
    /// Top-level actions in program order
    pub actions: Vec<Action>,
}

/// Maps each step kind to its constructor
pub struct ActionRegistry {
    builders: HashMap<StepTag, ActionBuilder>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        let mut registry = Self {
            builders: HashMap::new(),
        };
        registry.register(StepTag::Arithmetic, build_arithmetic);
        registry.register(StepTag::Load, build_load);
        registry.register(StepTag::Store, build_store);
        registry.register(StepTag::Memory, build_memory);
        registry.register(StepTag::CodePage, build_code_page);
        registry.register(StepTag::Call, build_call);
        registry.register(StepTag::CsrRead, build_csr_read);
        registry.register(StepTag::CsrWrite, build_csr_write);
        registry.register(StepTag::AssertEqual, build_assert);
        registry.register(StepTag::AssertNotEqual, build_assert);
        registry.register(StepTag::AssertException, build_assert_exception);
        registry.register(StepTag::ReadPte, build_pte);
        registry.register(StepTag::WritePte, build_pte);
        registry.register(StepTag::ReadLeafPte, build_pte);
        registry.register(StepTag::WriteLeafPte, build_pte);
        registry.register(StepTag::ModifyPte, build_modify_pte);
        registry.register(StepTag::System, build_system);
        registry.register(StepTag::Comment, build_comment);
        registry
    }
}

impl ActionRegistry {
    /// Registry with no constructors
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Install or replace the constructor for a kind
    pub fn register(&mut self, tag: StepTag, builder: ActionBuilder) {
        self.builders.insert(tag, builder);
    }

    /// Build one step, nested code first
    pub fn build(&self, step: &Step, scope: &StepScope) -> Result<Action> {
        if !step.code.is_empty() && !step.kind.accepts_code() {
            return Err(Error::invalid_step(
                &step.id,
                format!("{} steps cannot own nested code", step.kind.tag()),
            ));
        }
        let builder = self
            .builders
            .get(&step.kind.tag())
            .ok_or_else(|| Error::UnregisteredStep {
                step_id: step.id.clone(),
                kind: step.kind.tag().to_string(),
            })?;
        let code = step
            .code
            .iter()
            .map(|s| self.build(s, scope))
            .collect::<Result<Vec<_>>>()?;
        builder(step, scope, code)
    }

    /// Build every step of a scenario
    pub fn build_test(&self, scenario: &TestScenario) -> Result<DiscreteTest> {
        let scope = StepScope::from_steps(&scenario.steps);
        let actions = scenario
            .steps
            .iter()
            .map(|s| self.build(s, &scope))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(test = %scenario.name, actions = actions.len(), "built test actions");
        Ok(DiscreteTest {
            name: scenario.name.clone(),
            actions,
        })
    }
}

fn mismatch(step: &Step) -> Error {
    Error::invalid_step(
        &step.id,
        format!("constructor does not handle {} steps", step.kind.tag()),
    )
}

fn no_inputs(step: &Step) -> Result<()> {
    if step.inputs.is_empty() {
        Ok(())
    } else {
        Err(Error::invalid_step(
            &step.id,
            format!("{} steps take no inputs", step.kind.tag()),
        ))
    }
}

fn build_arithmetic(step: &Step, _: &StepScope, _: Vec<Action>) -> Result<Action> {
    let StepKind::Arithmetic { op } = &step.kind else {
        return Err(mismatch(step));
    };
    let action = ArithmeticAction::from_step(step, op.clone())?;
    Ok(Action::new(&step.id, ActionKind::Arithmetic(action)))
}

fn build_load(step: &Step, scope: &StepScope, _: Vec<Action>) -> Result<Action> {
    let StepKind::Load {
        offset,
        access_size,
        op,
    } = &step.kind
    else {
        return Err(mismatch(step));
    };
    if step.inputs.len() > 1 {
        return Err(Error::invalid_step(&step.id, "load takes at most one input"));
    }
    if let Some(v) = step.inputs.iter().find_map(|i| match i {
        StepInput::Imm(v) => Some(*v),
        StepInput::Ref(_) => None,
    }) {
        return Err(Error::invalid_step(
            &step.id,
            format!("load address must be a step reference, got immediate {}", v),
        ));
    }
    let action = LoadAction::from_step(step, scope, *offset, *access_size, op.clone())?;
    Ok(Action::new(&step.id, ActionKind::Load(action)))
}

fn build_store(step: &Step, scope: &StepScope, _: Vec<Action>) -> Result<Action> {
    let StepKind::Store {
        offset,
        access_size,
        op,
    } = &step.kind
    else {
        return Err(mismatch(step));
    };
    let action = StoreAction::from_step(step, scope, *offset, *access_size, op.clone())?;
    Ok(Action::new(&step.id, ActionKind::Store(action)))
}

fn build_memory(step: &Step, _: &StepScope, _: Vec<Action>) -> Result<Action> {
    let StepKind::Memory(spec) = &step.kind else {
        return Err(mismatch(step));
    };
    no_inputs(step)?;
    if spec.size == 0 {
        return Err(Error::invalid_step(&step.id, "memory size must be non-zero"));
    }
    Ok(Action::new(
        &step.id,
        ActionKind::Memory(MemoryAction { spec: spec.clone() }),
    ))
}

fn build_code_page(step: &Step, _: &StepScope, code: Vec<Action>) -> Result<Action> {
    let StepKind::CodePage(spec) = &step.kind else {
        return Err(mismatch(step));
    };
    no_inputs(step)?;
    Ok(Action::new(
        &step.id,
        ActionKind::CodePage(CodePageAction {
            spec: spec.clone(),
            code,
        }),
    ))
}

fn build_call(step: &Step, scope: &StepScope, _: Vec<Action>) -> Result<Action> {
    let action = CallAction::from_step(step, scope)?;
    Ok(Action::new(&step.id, ActionKind::Call(action)))
}

fn build_csr_read(step: &Step, _: &StepScope, _: Vec<Action>) -> Result<Action> {
    let StepKind::CsrRead {
        csr_name,
        direct_read,
    } = &step.kind
    else {
        return Err(mismatch(step));
    };
    no_inputs(step)?;
    Ok(Action::new(
        &step.id,
        ActionKind::CsrRead(CsrReadAction {
            csr_name: csr_name.clone(),
            direct_read: *direct_read,
        }),
    ))
}

fn build_csr_write(step: &Step, _: &StepScope, _: Vec<Action>) -> Result<Action> {
    let StepKind::CsrWrite {
        csr_name,
        value,
        set_mask,
        clear_mask,
        direct_write,
    } = &step.kind
    else {
        return Err(mismatch(step));
    };
    let action = CsrWriteAction::from_step(step, csr_name, *value, *set_mask, *clear_mask, *direct_write)?;
    Ok(Action::new(&step.id, ActionKind::CsrWrite(action)))
}

fn build_assert(step: &Step, _: &StepScope, _: Vec<Action>) -> Result<Action> {
    let action = AssertAction::from_step(step)?;
    let kind = match step.kind {
        StepKind::AssertEqual => ActionKind::AssertEqual(action),
        StepKind::AssertNotEqual => ActionKind::AssertNotEqual(action),
        _ => return Err(mismatch(step)),
    };
    Ok(Action::new(&step.id, kind))
}

fn build_assert_exception(step: &Step, _: &StepScope, code: Vec<Action>) -> Result<Action> {
    let StepKind::AssertException { cause } = &step.kind else {
        return Err(mismatch(step));
    };
    no_inputs(step)?;
    if code.is_empty() {
        return Err(Error::invalid_step(
            &step.id,
            "exception assertion needs nested code ending in the faulting step",
        ));
    }
    Ok(Action::new(
        &step.id,
        ActionKind::AssertException(AssertExceptionAction::new(*cause, code)),
    ))
}

fn build_pte(step: &Step, scope: &StepScope, _: Vec<Action>) -> Result<Action> {
    let kind = match step.kind {
        StepKind::ReadPte { level } => ActionKind::ReadPte(PteAction::from_step(step, scope, Some(level), false)?),
        StepKind::ReadLeafPte => ActionKind::ReadPte(PteAction::from_step(step, scope, None, false)?),
        StepKind::WritePte { level } => ActionKind::WritePte(PteAction::from_step(step, scope, Some(level), true)?),
        StepKind::WriteLeafPte => ActionKind::WritePte(PteAction::from_step(step, scope, None, true)?),
        _ => return Err(mismatch(step)),
    };
    Ok(Action::new(&step.id, kind))
}

fn build_modify_pte(step: &Step, scope: &StepScope, _: Vec<Action>) -> Result<Action> {
    let StepKind::ModifyPte {
        level,
        make_recursive,
    } = &step.kind
    else {
        return Err(mismatch(step));
    };
    let action = ModifyPteAction::from_step(step, scope, *level, *make_recursive)?;
    Ok(Action::new(&step.id, ActionKind::ModifyPte(action)))
}

fn build_system(step: &Step, _: &StepScope, _: Vec<Action>) -> Result<Action> {
    let StepKind::System { instruction } = &step.kind else {
        return Err(mismatch(step));
    };
    no_inputs(step)?;
    if instruction.trim().is_empty() {
        return Err(Error::invalid_step(&step.id, "system step names no instruction"));
    }
    Ok(Action::new(
        &step.id,
        ActionKind::System(SystemAction {
            instruction: instruction.trim().to_string(),
        }),
    ))
}

fn build_comment(step: &Step, _: &StepScope, _: Vec<Action>) -> Result<Action> {
    let StepKind::Comment { text } = &step.kind else {
        return Err(mismatch(step));
    };
    Ok(Action::new(
        &step.id,
        ActionKind::Comment(CommentAction { text: text.clone() }),
    ))
}
