//! Error types for the test plan lowering pipeline

use thiserror::Error;

/// Lowering pipeline errors
///
/// Two families exist: content errors describe malformed inputs (a step with
/// the wrong shape, an unknown step kind, an unreadable catalog) and carry the
/// offending id; internal consistency errors describe an IR that violates a
/// pipeline invariant and are always fatal.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Content errors
    /// Step payload or inputs have the wrong shape for its kind
    ///
    /// **Triggered by:** an arithmetic step with three inputs, a store without
    /// a memory reference, a system step with no instruction name
    #[error("Invalid step '{step_id}': {message}")]
    InvalidStep {
        /// Id of the offending step
        step_id: String,
        /// What was wrong with it
        message: String,
    },

    /// No action constructor is registered for a step kind
    #[error("No action registered for step '{step_id}' of kind {kind}")]
    UnregisteredStep {
        /// Id of the offending step
        step_id: String,
        /// Step kind name
        kind: String,
    },

    /// Options or scenario JSON could not be read
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Instruction template table could not be loaded
    ///
    /// **Triggered by:** an operand field with no known operand kind, a
    /// duplicated template name, malformed catalog JSON
    #[error("Catalog load error: {0}")]
    CatalogLoad(String),

    // Internal consistency errors
    /// The same id was defined twice in one scope
    #[error("Duplicate id '{id}' in {scope}")]
    DuplicateId {
        /// Duplicated id
        id: String,
        /// Test, routine or registry where it was seen twice
        scope: String,
    },

    /// An id was referenced but never defined
    #[error("Undefined id '{id}' in {scope}")]
    UndefinedId {
        /// Missing id
        id: String,
        /// Where the lookup happened
        scope: String,
    },

    /// A chosen instruction template lacks an operand the action must wire
    ///
    /// **Triggered by:** pinning an opcode that has no immediate on an
    /// arithmetic step that supplies one
    #[error("Instruction '{instruction}' has no '{slot}' operand (needed by {action})")]
    OperandSlotMissing {
        /// Instruction name
        instruction: String,
        /// Operand slot name
        slot: String,
        /// Description of the action being elaborated
        action: String,
    },

    /// No cast instruction converts between two operand types
    #[error("No cast from {from} to {to} for operand '{operand}' of {instruction}")]
    NoCastCandidate {
        /// Producer destination type
        from: String,
        /// Consumer source type
        to: String,
        /// Consumer operand id
        operand: String,
        /// Consumer instruction id
        instruction: String,
    },

    /// A virtual register was read before any instruction defined it
    #[error("Virtual register '{id}' used before definition at instruction {index}")]
    UseBeforeDef {
        /// Virtual id
        id: String,
        /// Index of the reading instruction
        index: usize,
    },

    /// Register allocation was queried for an id that was never live
    #[error("No allocation recorded for '{id}'")]
    UnresolvedAllocation {
        /// Virtual id
        id: String,
    },

    /// Exact-name catalog lookup failed
    #[error("Instruction not found in catalog: {name}")]
    InstructionNotFound {
        /// Requested instruction name
        name: String,
    },

    /// Constraint-filtered catalog lookup returned nothing
    #[error("No instruction matches {filter}")]
    NoCandidates {
        /// Rendered filter
        filter: String,
    },

    /// Memory registry lookup failed
    #[error("Page not found: {id}")]
    PageNotFound {
        /// Page id
        id: String,
    },

    /// A call targets a function whose clobber set was never recorded
    #[error("Call to function '{id}' with no recorded clobber set")]
    UnknownFunction {
        /// Canonical code id
        id: String,
    },

    /// Expanding one action failed
    #[error("Failed to expand {action}: {source}")]
    Expansion {
        /// Description of the failing action
        action: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Invariant violated somewhere in the pipeline
    #[error("Internal lowering error: {0}")]
    Internal(String),
}

/// Error origin classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied malformed steps, options or catalog data
    Content,
    /// The pipeline produced an inconsistent IR
    Internal,
}

impl Error {
    /// Create a content error for a step
    pub fn invalid_step(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidStep {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    /// Create an internal consistency error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Wrap an error with the description of the action that raised it
    pub fn in_expansion(self, action: impl Into<String>) -> Self {
        Error::Expansion {
            action: action.into(),
            source: Box::new(self),
        }
    }

    /// Classify where the error originated
    pub fn classify(&self) -> ErrorKind {
        match self {
            Error::InvalidStep { .. } => ErrorKind::Content,
            Error::UnregisteredStep { .. } => ErrorKind::Content,
            Error::InvalidConfig(_) => ErrorKind::Content,
            Error::CatalogLoad(_) => ErrorKind::Content,

            Error::Expansion { source, .. } => source.classify(),

            _ => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}

/// Result type for lowering operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_content_errors() {
        assert_eq!(
            Error::invalid_step("s1", "bad").classify(),
            ErrorKind::Content
        );
        assert_eq!(
            Error::CatalogLoad("x".into()).classify(),
            ErrorKind::Content
        );
        assert_eq!(Error::internal("x").classify(), ErrorKind::Internal);
    }

    #[test]
    fn test_expansion_keeps_inner_kind() {
        let err = Error::invalid_step("s1", "bad").in_expansion("Load(r1)");
        assert_eq!(err.classify(), ErrorKind::Content);
        assert!(err.to_string().contains("Load(r1)"));
        assert!(err.to_string().contains("s1"));
    }
}
