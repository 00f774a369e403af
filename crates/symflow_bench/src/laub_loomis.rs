//! Laub-Loomis benchmark (ARCH-COMP LALO20): a 7-dimensional model of an
//! enzymatic activity network.
//!
//! The initial set is the box `[c_i - W, c_i + W]` around the nominal state.
//! For `W = 0.01` and `W = 0.05` the unsafe set is `x4 >= 4.5`, for `W = 0.1`
//! it is `x4 >= 5`. The time horizon is `[0, 20]` in all cases.
use crate::benchmark::Benchmark;
use crate::metadata::{InitialBox, TimeHorizon, UnsafeRegion};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use symflow_core::{symbols, Expr, Symbol};

pub const NOMINAL_STATE: [f64; 7] = [1.2, 1.05, 1.5, 2.4, 1.0, 0.1, 0.45];
pub const HORIZON: (f64, f64) = (0.0, 20.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LaubLoomisCase {
    /// `W = 0.01`
    #[default]
    Narrow,
    /// `W = 0.05`
    Medium,
    /// `W = 0.1`
    Wide,
}

impl LaubLoomisCase {
    pub const ALL: [LaubLoomisCase; 3] = [Self::Narrow, Self::Medium, Self::Wide];

    pub fn width(self) -> f64 {
        match self {
            Self::Narrow => 0.01,
            Self::Medium => 0.05,
            Self::Wide => 0.1,
        }
    }

    pub fn unsafe_threshold(self) -> f64 {
        match self {
            Self::Narrow | Self::Medium => 4.5,
            Self::Wide => 5.0,
        }
    }
}

pub fn vector_field() -> (Vec<Symbol>, Vec<Expr>) {
    let symbols = symbols("x1 x2 x3 x4 x5 x6 x7");
    let x: Vec<Expr> = symbols.iter().map(Symbol::expr).collect();
    let equations = vec![
        1.4 * &x[2] - 0.9 * &x[0],
        2.5 * &x[4] - 1.5 * &x[1],
        0.6 * &x[6] - 0.8 * &x[1] * &x[2],
        2.0 - 1.3 * &x[2] * &x[3],
        0.7 * &x[0] - &x[3] * &x[4],
        0.3 * &x[0] - 3.1 * &x[5],
        1.8 * &x[5] - 1.5 * &x[1] * &x[6],
    ];
    (symbols, equations)
}

pub fn laub_loomis(case: LaubLoomisCase) -> Result<Benchmark> {
    let (symbols, equations) = vector_field();
    let names: Vec<&str> = symbols.iter().map(Symbol::name).collect();
    let initial_box = InitialBox::around(&names, &NOMINAL_STATE, case.width())?;
    Ok(Benchmark {
        name: format!("laub-loomis (W = {})", case.width()),
        initial_box,
        nominal_state: NOMINAL_STATE.to_vec(),
        horizon: TimeHorizon::new(HORIZON.0, HORIZON.1)?,
        unsafe_region: Some(UnsafeRegion::new("x4", case.unsafe_threshold())),
        symbols,
        equations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use symflow_core::{DynamicalSystem, EvaluationMode, Integrator, TimeSpec};

    #[test]
    fn equations_print_like_the_model() {
        let (_, equations) = vector_field();
        let printed: Vec<String> = equations.iter().map(ToString::to_string).collect();
        assert_eq!(printed[0], "1.4*x3 - 0.9*x1");
        assert_eq!(printed[3], "2 - 1.3*x3*x4");
        assert_eq!(printed[4], "0.7*x1 - x4*x5");
    }

    #[test]
    fn nominal_run_covers_horizon_without_nan() {
        let bench = laub_loomis(LaubLoomisCase::Narrow).unwrap();
        let traj = bench.simulate_nominal(&Integrator::default()).unwrap();

        let (t0, x0) = traj.first().unwrap();
        assert_eq!(t0, 0.0);
        assert_eq!(x0, &NOMINAL_STATE[..]);
        let (tf, xf) = traj.last().unwrap();
        assert_eq!(tf, 20.0);
        assert!(traj.states().iter().flatten().all(|v| v.is_finite()));
        assert_abs_diff_eq!(xf[3], 2.68326, epsilon = 1e-3);
    }

    #[test]
    fn nominal_run_is_bounded_and_safe() {
        for case in LaubLoomisCase::ALL {
            let bench = laub_loomis(case).unwrap();
            let traj = bench
                .simulate(&Integrator::default(), &bench.nominal_state, Some(201))
                .unwrap();
            assert_eq!(traj.len(), 201);
            assert!(traj.states().iter().flatten().all(|v| v.abs() < 5.0));
            let check = bench.unsafe_check().unwrap().expect("unsafe region");
            assert_eq!(check.first_violation(&traj).unwrap(), None);
        }
    }

    #[test]
    fn repeated_runs_agree() {
        let bench = laub_loomis(LaubLoomisCase::Medium).unwrap();
        let a = bench.simulate_nominal(&Integrator::default()).unwrap();
        let b = bench.simulate_nominal(&Integrator::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn origin_is_not_an_equilibrium() {
        let bench = laub_loomis(LaubLoomisCase::Narrow).unwrap();
        let system = bench.system().unwrap();
        let derivative = system.evaluate(&[0.0; 7], 0.0, EvaluationMode::Strict).unwrap();
        assert_eq!(derivative, vec![0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0]);

        let field = bench.compile().unwrap();
        let mut out = [f64::NAN; 7];
        field.apply(0.0, &[0.0; 7], &mut out);
        assert_eq!(out.to_vec(), derivative);
    }

    #[test]
    fn box_corners_stay_bounded_over_short_horizon() {
        let bench = laub_loomis(LaubLoomisCase::Wide).unwrap();
        let field = bench.compile().unwrap();
        let integrator = Integrator::default();
        let corners = bench.initial_box.corners().unwrap();
        assert_eq!(corners.len(), 128);
        for corner in corners.iter().step_by(17) {
            assert!(bench.initial_box.contains(corner));
            let traj = integrator
                .integrate(&field, corner, &TimeSpec::linspace(0.0, 5.0, 6))
                .unwrap();
            assert!(traj.states().iter().flatten().all(|v| v.is_finite() && v.abs() < 10.0));
        }
    }

    #[test]
    fn unsafe_thresholds_follow_case() {
        let narrow = laub_loomis(LaubLoomisCase::Narrow).unwrap().unsafe_check().unwrap().unwrap();
        let wide = laub_loomis(LaubLoomisCase::Wide).unwrap().unsafe_check().unwrap().unwrap();
        let mut state = NOMINAL_STATE;
        state[3] = 4.5;
        assert!(narrow.contains(&state).unwrap());
        assert!(!wide.contains(&state).unwrap());
        state[3] = 5.0;
        assert!(wide.contains(&state).unwrap());
        state[3] = 4.49;
        assert!(!narrow.contains(&state).unwrap());

        let medium = laub_loomis(LaubLoomisCase::Medium).unwrap();
        let iv = medium.initial_box.interval("x4").unwrap();
        assert_abs_diff_eq!(iv.lo, 2.35, epsilon = 1e-12);
        assert_abs_diff_eq!(iv.hi, 2.45, epsilon = 1e-12);
    }
}
