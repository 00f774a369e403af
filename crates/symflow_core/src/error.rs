use crate::parser::ParseError;
use crate::trajectory::Trajectory;
use thiserror::Error;

/// Structural and compile-time failures. Always fatal: no partial system or
/// compiled field is produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SystemError {
    #[error("dimension mismatch: {symbols} state symbols but {equations} equations")]
    DimensionMismatch { symbols: usize, equations: usize },

    #[error("duplicate symbol `{0}`")]
    DuplicateSymbol(String),

    #[error("unbound variable `{name}` in {context}")]
    UnboundVariable { name: String, context: String },

    #[error("unsupported operator `{operator}` in {context}")]
    UnsupportedOperator { operator: String, context: String },

    #[error("`{0}` is not a parameter of this system")]
    UnknownParameter(String),

    #[error("parameter `{0}` shadows a state symbol")]
    ParameterShadowsState(String),

    #[error("expected {expected} parameter values, got {got}")]
    ParameterCount { expected: usize, got: usize },

    #[error("failed to parse equation {equation}: {source}")]
    Parse {
        equation: usize,
        #[source]
        source: ParseError,
    },
}

/// Reason an elementary operation has no finite result.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("logarithm of a non-positive value")]
    LogOfNonPositive,
    #[error("square root of a negative value")]
    SqrtOfNegative,
    #[error("power with no real result")]
    InvalidPower,
    #[error("result overflowed")]
    Overflow,
    #[error("non-finite input")]
    NonFiniteInput,
    #[error("uninterpreted function has no numeric value")]
    Uninterpreted,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("state has {got} components, system dimension is {expected}")]
    StateLength { expected: usize, got: usize },

    #[error("equation {equation} (d{symbol}/dt) is not representable: {cause}")]
    NumericDomain {
        equation: usize,
        symbol: String,
        cause: DomainError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceReason {
    /// The state left the finite floating-point range.
    NonFiniteState,
    /// The controller asked for a step below `min_step`.
    StepSizeUnderflow,
    /// `max_steps` steps were taken before reaching the final time.
    StepLimit,
}

impl std::fmt::Display for DivergenceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DivergenceReason::NonFiniteState => write!(f, "state became non-finite"),
            DivergenceReason::StepSizeUnderflow => write!(f, "step size underflow"),
            DivergenceReason::StepLimit => write!(f, "step limit exhausted"),
        }
    }
}

/// The solver could not reach the final time. Everything computed up to the
/// failure point is kept in `partial`.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationDivergence {
    pub reason: DivergenceReason,
    pub time: f64,
    pub state: Vec<f64>,
    pub partial: Trajectory,
}

impl std::fmt::Display for IntegrationDivergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "integration diverged at t = {} ({}) after {} samples",
            self.time,
            self.reason,
            self.partial.len()
        )
    }
}

impl std::error::Error for IntegrationDivergence {}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    #[error("initial state has {got} components, field dimension is {expected}")]
    StateLength { expected: usize, got: usize },

    #[error("invalid time specification: {0}")]
    InvalidTimeSpec(String),

    #[error("invalid integrator settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Divergence(Box<IntegrationDivergence>),
}

impl IntegrationError {
    pub fn divergence(&self) -> Option<&IntegrationDivergence> {
        match self {
            IntegrationError::Divergence(d) => Some(d),
            _ => None,
        }
    }
}
