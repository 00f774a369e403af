use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in our dynamical systems.
/// Must support basic arithmetic, debug printing, and conversion from f64.
/// `Send + Sync` so compiled fields can be shared across integration threads.
pub trait Scalar: Float + FromPrimitive + Debug + Send + Sync + 'static {
    /// Converts an `f64` literal into this backend, yielding NaN when the
    /// value has no representation.
    fn lit(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }
}

impl<T: Float + FromPrimitive + Debug + Send + Sync + 'static> Scalar for T {}

/// Represents a continuous-time vector field `dx/dt = f(x, t)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// x: current state
    /// t: current time
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A solver advancing a system by a fixed step.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

/// A solver that proposes a step and reports its local error estimate,
/// leaving acceptance to the caller.
pub trait EmbeddedStep<T: Scalar> {
    /// Order of the lower-order embedded solution, used for step-size control.
    fn error_order(&self) -> i32;

    /// Attempts a step of size dt from (t, state), writing the candidate into
    /// `next` and the per-component error estimate into `error`.
    fn attempt(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        next: &mut [T],
        error: &mut [T],
    );
}
