use thiserror::Error;

/// Broad category of a [`RampartError`]
///
/// Parse errors are raised while building a model and leave the enforcer unusable.
/// Everything else is scoped to the single call that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Parameter,
    RoleManager,
    Effect,
    MatcherRuntime,
    Policy,
    Io,
}

#[derive(Error, Debug)]
pub enum RampartError {
    #[error("Model parse error: {0}")]
    ModelParse(String),

    #[error("Missing required sections: {0}")]
    MissingSections(String),

    #[error("Matcher parse error at line {line}, column {col}: {message}")]
    MatcherParse {
        message: String,
        line: usize,
        col: usize,
    },

    #[error("Invalid policy effect: {0}")]
    InvalidEffect(String),

    #[error("Invalid constraint definition: {0}")]
    ConstraintParse(String),

    #[error("Constraints require a role definition ([role_definition] g)")]
    ConstraintRequiresRoles,

    #[error("Invalid request size: expected {expected}, got {got}")]
    RequestArity { expected: usize, got: usize },

    #[error("Request argument {index} is not valid JSON: {message}")]
    InvalidJsonRequest { index: usize, message: String },

    #[error("Invalid policy size for {ptype}: expected {expected}, got {got}")]
    PolicyArity {
        ptype: String,
        expected: usize,
        got: usize,
    },

    #[error("Domain should be 1 parameter, got {0}")]
    DomainParameter(usize),

    #[error("Indeterminate decision: {0}")]
    Indeterminate(String),

    #[error("Matcher evaluation failed: {0}")]
    MatcherRuntime(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Invalid arguments for {function}: {message}")]
    FunctionArgument { function: String, message: String },

    #[error("Unknown policy type: {sec}.{ptype}")]
    UnknownPolicyType { sec: String, ptype: String },

    #[error("Constraint {name} violated: {message}")]
    ConstraintViolation { name: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Options error: {0}")]
    Options(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RampartError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RampartError::ModelParse(_)
            | RampartError::MissingSections(_)
            | RampartError::MatcherParse { .. }
            | RampartError::ConstraintParse(_)
            | RampartError::ConstraintRequiresRoles
            | RampartError::Options(_) => ErrorKind::Parse,
            RampartError::InvalidEffect(_) | RampartError::Indeterminate(_) => ErrorKind::Effect,
            RampartError::RequestArity { .. }
            | RampartError::InvalidJsonRequest { .. }
            | RampartError::PolicyArity { .. } => ErrorKind::Parameter,
            RampartError::DomainParameter(_) => ErrorKind::RoleManager,
            RampartError::MatcherRuntime(_)
            | RampartError::UnknownFunction(_)
            | RampartError::FunctionArgument { .. }
            | RampartError::Serialization(_) => ErrorKind::MatcherRuntime,
            RampartError::UnknownPolicyType { .. } | RampartError::ConstraintViolation { .. } => {
                ErrorKind::Policy
            }
            RampartError::Io(_) => ErrorKind::Io,
        }
    }

    /// Shorthand for a function argument error
    pub(crate) fn argument(function: &str, message: impl Into<String>) -> Self {
        RampartError::FunctionArgument {
            function: function.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RampartError>;
