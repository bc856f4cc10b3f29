//! Canonicalization: batch-global ids, page registration and function lifting
//!
//! Step ids are only unique within their scenario. Before lowering, every
//! action of every test is renamed into one batch-wide id space:
//!
//! - code pages become `code_memN`, are registered as code pages and lifted
//!   out of the test into the function list;
//! - memory reservations become `memN`, are registered as data pages and
//!   dropped from the action lists;
//! - everything else becomes `rN`.

use crate::action::{Action, ActionKind, DiscreteTest};
use crate::context::LoweringContext;
use crate::{Error, Result};
use std::collections::HashMap;

/// Tests and lifted functions sharing one id space
#[derive(Debug, Clone, Default)]
pub struct CanonicalBatch {
    /// Tests with memory and code page actions removed
    pub tests: Vec<DiscreteTest>,
    /// Lifted code page actions, nested pages before their parents
    pub functions: Vec<Action>,
}

/// Canonicalize every test of a batch
pub fn canonicalize(tests: Vec<DiscreteTest>, ctx: &mut LoweringContext) -> Result<CanonicalBatch> {
    let mut batch = CanonicalBatch::default();
    for mut test in tests {
        let mut map = HashMap::new();
        assign_ids(&test.actions, &test.name, ctx, &mut map)?;
        rename(&mut test.actions, &map)?;
        let before = batch.functions.len();
        test.actions = strip(test.actions, &mut batch.functions);
        tracing::debug!(
            test = %test.name,
            ids = map.len(),
            functions = batch.functions.len() - before,
            "canonicalized test"
        );
        batch.tests.push(test);
    }
    Ok(batch)
}

/// Post-order walk: nested code is numbered before its owner
fn assign_ids(
    actions: &[Action],
    test: &str,
    ctx: &mut LoweringContext,
    map: &mut HashMap<String, String>,
) -> Result<()> {
    for action in actions {
        if let Some(code) = action.code() {
            assign_ids(code, test, ctx, map)?;
        }
        if map.contains_key(&action.id) {
            return Err(Error::DuplicateId {
                id: action.id.clone(),
                scope: format!("test '{}'", test),
            });
        }
        let id = match &action.kind {
            ActionKind::CodePage(page) => {
                let id = ctx.new_code_memory_id();
                ctx.memory.allocate_code(&id, &page.spec)?;
                id
            }
            ActionKind::Memory(mem) => {
                let id = ctx.new_memory_id();
                ctx.memory.allocate_data(&id, &mem.spec)?;
                id
            }
            _ => ctx.new_value_id(),
        };
        map.insert(action.id.clone(), id);
    }
    Ok(())
}

fn rename(actions: &mut [Action], map: &HashMap<String, String>) -> Result<()> {
    for action in actions {
        action.rename_ids(map)?;
        if let Some(code) = action.code_mut() {
            rename(code, map)?;
        }
    }
    Ok(())
}

fn strip(actions: Vec<Action>, functions: &mut Vec<Action>) -> Vec<Action> {
    let mut out = Vec::with_capacity(actions.len());
    for mut action in actions {
        if let Some(code) = action.code_mut() {
            let nested = std::mem::take(code);
            *code = strip(nested, functions);
        }
        if action.is_memory() {
            continue;
        }
        if action.is_code_page() {
            functions.push(action);
            continue;
        }
        out.push(action);
    }
    out
}
