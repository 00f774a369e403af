use crate::error::EvaluationError;
use crate::system::{EvaluationMode, SymbolicSystem};
use nalgebra::{Complex, DMatrix};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

/// Linearization of a system at a single point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAnalysis {
    pub state: Vec<f64>,
    pub residual_norm: f64,
    /// Row-major Jacobian.
    pub jacobian: Vec<f64>,
    pub eigenvalues: Vec<ComplexNumber>,
    pub stable: bool,
}

/// Numeric Jacobian of an autonomous system at `state`. Entries with no
/// finite value are errors.
pub fn linearize(
    system: &SymbolicSystem,
    state: &[f64],
) -> Result<DMatrix<f64>, EvaluationError> {
    linearize_at(system, state, 0.0)
}

pub fn linearize_at(
    system: &SymbolicSystem,
    state: &[f64],
    t: f64,
) -> Result<DMatrix<f64>, EvaluationError> {
    let dim = system.dimension();
    let entries = system.jacobian_at(state, t, EvaluationMode::Strict)?;
    Ok(DMatrix::from_row_slice(dim, dim, &entries))
}

pub fn eigenvalues(matrix: &DMatrix<f64>) -> Vec<Complex<f64>> {
    if matrix.is_empty() {
        return Vec::new();
    }
    matrix.complex_eigenvalues().iter().copied().collect()
}

/// True when every eigenvalue has strictly negative real part.
pub fn is_locally_stable(matrix: &DMatrix<f64>) -> bool {
    eigenvalues(matrix).iter().all(|lambda| lambda.re < 0.0)
}

/// Euclidean norm of the vector field at `state`; zero at an equilibrium.
pub fn equilibrium_residual(
    system: &SymbolicSystem,
    state: &[f64],
) -> Result<f64, EvaluationError> {
    let values = system.evaluate(state, 0.0, EvaluationMode::Strict)?;
    Ok(l2_norm(&values))
}

/// Residual, Jacobian and spectrum at `state` in one pass.
pub fn analyze(system: &SymbolicSystem, state: &[f64]) -> Result<LocalAnalysis, EvaluationError> {
    let residual_norm = equilibrium_residual(system, state)?;
    let matrix = linearize(system, state)?;
    let spectrum = eigenvalues(&matrix);
    let stable = spectrum.iter().all(|lambda| lambda.re < 0.0);
    let dim = system.dimension();
    let mut jacobian = Vec::with_capacity(dim * dim);
    for i in 0..dim {
        jacobian.extend(matrix.row(i).iter().copied());
    }

    Ok(LocalAnalysis {
        state: state.to_vec(),
        residual_norm,
        jacobian,
        eigenvalues: spectrum.into_iter().map(ComplexNumber::from).collect(),
        stable,
    })
}

fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}
