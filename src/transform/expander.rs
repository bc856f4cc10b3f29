//! Expansion pass: replaces each action with the primitive actions it needs

use crate::action::{Action, Expansion};
use crate::context::LoweringContext;
use crate::Result;

/// Expand `actions` depth first, preserving order.
///
/// An action whose expansion yields a list is replaced by that list, which is
/// itself expanded in place. Errors are wrapped with the failing action's
/// description.
pub fn expand(actions: Vec<Action>, ctx: &mut LoweringContext) -> Result<Vec<Action>> {
    let mut out = Vec::with_capacity(actions.len());
    expand_into(actions, ctx, &mut out)?;
    Ok(out)
}

fn expand_into(actions: Vec<Action>, ctx: &mut LoweringContext, out: &mut Vec<Action>) -> Result<()> {
    for action in actions {
        let desc = action.describe();
        match action.expand(ctx).map_err(|e| e.in_expansion(desc))? {
            Expansion::NoExpansion(action) => out.push(action),
            Expansion::Expansion(list) => expand_into(list, ctx, out)?,
        }
    }
    Ok(())
}
