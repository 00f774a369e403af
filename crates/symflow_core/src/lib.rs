pub mod compiler;
pub mod derivative;
pub mod error;
pub mod expr;
pub mod parser;
pub mod solvers;
pub mod stability;
pub mod system;
/// The `symflow_core` crate turns symbolic continuous-time systems into
/// compiled vector fields and integrates them.
///
/// Key components:
/// - **Expressions**: `Expr` trees with operator overloading, a parser, simplification and symbolic derivatives.
/// - **Systems**: `SymbolicSystem` validates symbols, equations and parameters and caches its Jacobian.
/// - **Compiler**: lowers equations to stack bytecode run by a small VM, generic over `Scalar`.
/// - **Trajectories**: adaptive Tsit5 / fixed RK4 integration as a lazy iterator or a collected `Trajectory`.
/// - **Stability**: numeric linearization and eigenvalue checks via `nalgebra`.
pub mod traits;
pub mod trajectory;

pub use compiler::{
    compile, compile_jacobian, compile_scalar, CompiledField, CompiledJacobian, CompiledScalar,
};
pub use error::{
    DivergenceReason, DomainError, EvaluationError, IntegrationDivergence, IntegrationError,
    SystemError,
};
pub use expr::{symbols, Expr, Symbol};
pub use parser::{parse, ParseError};
pub use system::{EvaluationMode, Parameter, SymbolicSystem};
pub use traits::{DynamicalSystem, Scalar};
pub use trajectory::{
    integrate, Integrator, IntegratorSettings, Method, Sample, TimeSpec, Tolerance, Trajectory,
};
