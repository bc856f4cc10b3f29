//! Page reservations

use super::{Action, ActionKind};
use crate::context::LoweringContext;
use crate::plan::MemorySpec;

/// Data page reservation; lifted into the memory registry by canonicalization
#[derive(Debug, Clone)]
pub struct MemoryAction {
    /// Reservation parameters
    pub spec: MemorySpec,
}

/// Function body placed on its own code page
#[derive(Debug, Clone)]
pub struct CodePageAction {
    /// Reservation parameters
    pub spec: MemorySpec,
    /// Function body
    pub code: Vec<Action>,
}

impl CodePageAction {
    /// Detach the body and close it with `ret`
    pub(crate) fn expand(&mut self, ctx: &mut LoweringContext) -> Vec<Action> {
        let mut body = std::mem::take(&mut self.code);
        body.push(Action::new(ctx.new_value_id(), ActionKind::Return));
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Expansion;
    use crate::config::LoweringOptions;
    use crate::isa::TemplateCatalog;
    use crate::plan::{TestEnv, Xlen};

    #[test]
    fn test_code_page_expands_once() {
        let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
        let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::default());
        let page = Action::new(
            "code_mem0",
            ActionKind::CodePage(CodePageAction {
                spec: MemorySpec::default(),
                code: vec![Action::li("x", 1)],
            }),
        );
        let out = page.expand(&mut ctx).unwrap().into_actions();
        let kinds: Vec<_> = out.iter().map(|a| a.kind_name()).collect();
        assert_eq!(kinds, vec!["CodePage", "Li", "Return"]);
        assert_eq!(out[0].code().map(Vec::len), Some(0));

        let again = out[0].clone().expand(&mut ctx).unwrap();
        assert!(matches!(again, Expansion::NoExpansion(_)));
    }
}
