use std::fmt;
use thiserror::Error;

/// A 0-based position inside an expression string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// 0-based line number
    pub line: usize,
    /// 0-based column (character offset within the line)
    pub column: usize,
    /// 0-based absolute byte offset from the start of input
    pub offset: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A failure while parsing or evaluating a guard or formula expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("{begin}: {message}")]
    Syntax {
        message: String,
        begin: Position,
        end: Position,
    },
    #[error("name '{0}' is not defined")]
    UnknownName(String),
    #[error("{0}")]
    Type(String),
    #[error("'{op}' not supported between instances of '{left}' and '{right}'")]
    IncomparableTypes {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("division by zero")]
    ZeroDivision,
    #[error("{0}")]
    Index(String),
    #[error("{0}")]
    Value(String),
    #[error("evaluation budget exceeded: {0}")]
    Budget(String),
}

impl EvalError {
    pub fn syntax_error(message: String, begin: Position, end: Position) -> Self {
        EvalError::Syntax {
            message,
            begin,
            end,
        }
    }

    /// Errors meaning "this text is not an expression at all", as opposed to
    /// an expression that is well-formed but fails.
    pub fn is_not_an_expression(&self) -> bool {
        matches!(self, EvalError::Syntax { .. } | EvalError::UnknownName(_))
    }
}

/// Every failure the reduction engine and the parameter set can report.
#[derive(Debug, Error)]
pub enum ParamGenError {
    #[error("cannot {0} an empty ParamGen")]
    EmptyInput(&'static str),

    #[error("ParamGen data already reduced")]
    AlreadyReduced,

    #[error("ParamGen data must be reduced before it can be written")]
    NotReduced,

    #[error("only a subset of the keys are guards; guards: {guards:?}, plain keys: {plain:?}")]
    AmbiguousGuardMix {
        guards: Vec<String>,
        plain: Vec<String>,
    },

    #[error("guard \"{guard}\" evaluated to {value}, not a boolean")]
    NonBooleanGuard { guard: String, value: String },

    #[error("guard \"{guard}\" still contains an unexpanded variable")]
    UnexpandedVariable { guard: String },

    #[error("cannot expand the variable ${name} in \"{expr}\"")]
    UndefinedVariable { name: String, expr: String },

    #[error("cannot evaluate guard \"{guard}\"")]
    GuardEvaluation {
        guard: String,
        #[source]
        source: EvalError,
    },

    #[error("formula may be comparing different types of variables: {formula}")]
    ComparisonType {
        formula: String,
        #[source]
        source: EvalError,
    },

    #[error("cannot evaluate formula: {formula}")]
    FormulaEvaluation {
        formula: String,
        #[source]
        source: EvalError,
    },

    #[error("cannot append ParamGen instances in different states (reduced: {this_reduced}, other reduced: {other_reduced})")]
    LifecycleMismatch {
        this_reduced: bool,
        other_reduced: bool,
    },

    #[error("unknown match policy \"{0}\"; expected \"first\" or \"last\"")]
    InvalidMatchPolicy(String),

    #[error("invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported input data: {0}")]
    InvalidData(String),

    #[error("namelist line {line}: {message}")]
    Namelist { line: usize, message: String },
}

impl ParamGenError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ParamGenError::EmptyInput(_) => "empty-input",
            ParamGenError::AlreadyReduced => "already-reduced",
            ParamGenError::NotReduced => "not-reduced",
            ParamGenError::AmbiguousGuardMix { .. } => "ambiguous-guard-mix",
            ParamGenError::NonBooleanGuard { .. } => "non-boolean-guard",
            ParamGenError::UnexpandedVariable { .. } => "unexpanded-variable",
            ParamGenError::UndefinedVariable { .. } => "undefined-variable",
            ParamGenError::GuardEvaluation { .. } => "guard-evaluation",
            ParamGenError::ComparisonType { .. } => "comparison-type",
            ParamGenError::FormulaEvaluation { .. } => "formula-evaluation",
            ParamGenError::LifecycleMismatch { .. } => "lifecycle-mismatch",
            ParamGenError::InvalidMatchPolicy(_) => "invalid-match-policy",
            ParamGenError::Json(_) => "invalid-json",
            ParamGenError::InvalidData(_) => "invalid-data",
            ParamGenError::Namelist { .. } => "namelist-syntax",
        }
    }
}

pub type Result<T> = std::result::Result<T, ParamGenError>;
