use crate::error::{DivergenceReason, IntegrationDivergence, IntegrationError};
use crate::solvers::{Tsit5, RK4};
use crate::traits::{DynamicalSystem, EmbeddedStep, Steppable};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

/// Which times a trajectory reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimeSpec {
    /// Integrate from `t0` to `tf`, reporting every accepted step.
    Span { t0: f64, tf: f64 },
    /// Report exactly these times; the first is the initial time.
    Grid(Vec<f64>),
}

impl TimeSpec {
    pub fn span(t0: f64, tf: f64) -> Self {
        TimeSpec::Span { t0, tf }
    }

    /// `samples` evenly spaced times from `t0` to `tf` inclusive.
    pub fn linspace(t0: f64, tf: f64, samples: usize) -> Self {
        let times = match samples {
            0 => Vec::new(),
            1 => vec![t0],
            n => (0..n)
                .map(|i| {
                    if i == n - 1 {
                        tf
                    } else {
                        t0 + (tf - t0) * i as f64 / (n - 1) as f64
                    }
                })
                .collect(),
        };
        TimeSpec::Grid(times)
    }

    pub fn start(&self) -> f64 {
        match self {
            TimeSpec::Span { t0, .. } => *t0,
            TimeSpec::Grid(times) => times.first().copied().unwrap_or(f64::NAN),
        }
    }

    pub fn end(&self) -> f64 {
        match self {
            TimeSpec::Span { tf, .. } => *tf,
            TimeSpec::Grid(times) => times.last().copied().unwrap_or(f64::NAN),
        }
    }

    fn validate(&self) -> Result<(), IntegrationError> {
        match self {
            TimeSpec::Span { t0, tf } => {
                if !t0.is_finite() || !tf.is_finite() {
                    return Err(IntegrationError::InvalidTimeSpec(
                        "span endpoints must be finite".into(),
                    ));
                }
                if tf <= t0 {
                    return Err(IntegrationError::InvalidTimeSpec(format!(
                        "final time {tf} must exceed initial time {t0}"
                    )));
                }
            }
            TimeSpec::Grid(times) => {
                if times.len() < 2 {
                    return Err(IntegrationError::InvalidTimeSpec(
                        "grid needs at least two times".into(),
                    ));
                }
                if times.iter().any(|t| !t.is_finite()) {
                    return Err(IntegrationError::InvalidTimeSpec(
                        "grid times must be finite".into(),
                    ));
                }
                if times.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(IntegrationError::InvalidTimeSpec(
                        "grid times must be strictly increasing".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Absolute and relative error tolerance for step-size control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub abs: f64,
    pub rel: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            abs: 1e-8,
            rel: 1e-6,
        }
    }
}

impl Tolerance {
    pub fn new(abs: f64, rel: f64) -> Self {
        Self { abs, rel }
    }

    /// RMS of `error` scaled by `abs + rel * max(|y0|, |y1|)`.
    fn error_norm(&self, error: &[f64], y0: &[f64], y1: &[f64]) -> f64 {
        if error.is_empty() {
            return 0.0;
        }
        let sum: f64 = error
            .iter()
            .zip(y0.iter().zip(y1))
            .map(|(e, (a, b))| {
                let scale = self.abs + self.rel * a.abs().max(b.abs());
                (e / scale).powi(2)
            })
            .sum();
        (sum / error.len() as f64).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Method {
    /// Adaptive Tsitouras 5(4).
    Tsit5,
    /// Classic fixed-step Runge-Kutta 4.
    Rk4 { dt: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegratorSettings {
    pub method: Method,
    pub tolerance: Tolerance,
    /// First trial step; chosen from the field when `None`.
    pub initial_step: Option<f64>,
    /// Rejections that would push the step below this are divergence.
    pub min_step: f64,
    pub max_step: Option<f64>,
    /// Step attempts, accepted or rejected, allowed before the run counts
    /// as divergent.
    pub max_steps: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            method: Method::Tsit5,
            tolerance: Tolerance::default(),
            initial_step: None,
            min_step: 1e-12,
            max_step: None,
            max_steps: 100_000,
        }
    }
}

impl IntegratorSettings {
    fn validate(&self) -> Result<(), IntegrationError> {
        let Tolerance { abs, rel } = self.tolerance;
        if !(abs >= 0.0 && rel >= 0.0) || abs + rel <= 0.0 {
            return Err(IntegrationError::InvalidSettings(
                "tolerances must be non-negative and not both zero".into(),
            ));
        }
        if !(self.min_step > 0.0) {
            return Err(IntegrationError::InvalidSettings(
                "min_step must be positive".into(),
            ));
        }
        if self.max_steps == 0 {
            return Err(IntegrationError::InvalidSettings(
                "max_steps must be greater than zero".into(),
            ));
        }
        if let Some(h) = self.initial_step {
            if !(h > 0.0) {
                return Err(IntegrationError::InvalidSettings(
                    "initial_step must be positive".into(),
                ));
            }
        }
        if let Some(h) = self.max_step {
            if !(h > 0.0) {
                return Err(IntegrationError::InvalidSettings(
                    "max_step must be positive".into(),
                ));
            }
        }
        if let Method::Rk4 { dt } = self.method {
            if !(dt > 0.0) || !dt.is_finite() {
                return Err(IntegrationError::InvalidSettings(
                    "Rk4 step dt must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

/// A single `(time, state)` sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub t: f64,
    pub state: Vec<f64>,
}

/// The point at which a lazy trajectory stopped early.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub reason: DivergenceReason,
    pub time: f64,
    pub state: Vec<f64>,
}

/// Time-ordered samples of one integration run, owned by the caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trajectory {
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.times.push(sample.t);
        self.states.push(sample.state);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[Vec<f64>] {
        &self.states
    }

    pub fn state_at(&self, index: usize) -> Option<&[f64]> {
        self.states.get(index).map(Vec::as_slice)
    }

    pub fn first(&self) -> Option<(f64, &[f64])> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<(f64, &[f64])> {
        self.iter().next_back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (f64, &[f64])> + '_ {
        self.times
            .iter()
            .copied()
            .zip(self.states.iter().map(Vec::as_slice))
    }

    pub fn into_parts(self) -> (Vec<f64>, Vec<Vec<f64>>) {
        (self.times, self.states)
    }
}

impl IntoIterator for Trajectory {
    type Item = (f64, Vec<f64>);
    type IntoIter = std::iter::Zip<std::vec::IntoIter<f64>, std::vec::IntoIter<Vec<f64>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.times.into_iter().zip(self.states)
    }
}

impl FromIterator<Sample> for Trajectory {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        let mut trajectory = Trajectory::new();
        for sample in iter {
            trajectory.push(sample);
        }
        trajectory
    }
}

enum Stepper {
    Tsit5(Tsit5<f64>),
    Rk4(RK4<f64>),
}

/// Drives a solver lazily. Each `next` advances the solver until the next
/// reportable time; after a failure or the final time it is exhausted.
pub struct TrajectoryIter<'a, F> {
    field: &'a F,
    settings: IntegratorSettings,
    stepper: Stepper,
    t: f64,
    state: Vec<f64>,
    candidate: Vec<f64>,
    error: Vec<f64>,
    dt: f64,
    targets: Vec<f64>,
    target_idx: usize,
    report_every_step: bool,
    steps: usize,
    rejected: usize,
    started: bool,
    finished: bool,
}

impl<'a, F: DynamicalSystem<f64>> TrajectoryIter<'a, F> {
    fn fail(&mut self, reason: DivergenceReason) -> Option<Result<Sample, StepFailure>> {
        self.finished = true;
        warn!(
            "integration stopped at t = {} after {} steps: {reason}",
            self.t, self.steps
        );
        Some(Err(StepFailure {
            reason,
            time: self.t,
            state: self.state.clone(),
        }))
    }

    fn sample(&self) -> Sample {
        Sample {
            t: self.t,
            state: self.state.clone(),
        }
    }

    /// Accepted-step count so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Advances one accepted step towards `target`, returning whether the
    /// target was reached.
    fn advance(&mut self, target: f64) -> Result<bool, DivergenceReason> {
        let remaining = target - self.t;
        loop {
            if self.steps + self.rejected >= self.settings.max_steps {
                return Err(DivergenceReason::StepLimit);
            }
            // stretch by 1% rather than leave a sliver before the target
            let clamped = self.dt * 1.01 >= remaining;
            let h = if clamped { remaining } else { self.dt };

            match &mut self.stepper {
                Stepper::Rk4(rk4) => {
                    let mut t = self.t;
                    rk4.step(self.field, &mut t, &mut self.state, h);
                    self.steps += 1;
                    self.t = if clamped { target } else { t };
                    if self.state.iter().any(|v| !v.is_finite()) {
                        return Err(DivergenceReason::NonFiniteState);
                    }
                    return Ok(clamped);
                }
                Stepper::Tsit5(tsit5) => {
                    tsit5.attempt(
                        self.field,
                        self.t,
                        &self.state,
                        h,
                        &mut self.candidate,
                        &mut self.error,
                    );
                    let finite = self.candidate.iter().all(|v| v.is_finite());
                    let err = if finite {
                        self.settings
                            .tolerance
                            .error_norm(&self.error, &self.state, &self.candidate)
                    } else {
                        f64::INFINITY
                    };
                    // a finite candidate can still carry a NaN error from its last stage
                    let err = if err.is_nan() { f64::INFINITY } else { err };
                    let exponent = -1.0 / (tsit5.error_order() + 1) as f64;
                    let factor = if err == 0.0 {
                        5.0
                    } else {
                        (0.9 * err.powf(exponent)).clamp(0.2, 5.0)
                    };

                    if err <= 1.0 {
                        if !clamped && self.t + h <= self.t {
                            return Err(DivergenceReason::StepSizeUnderflow);
                        }
                        tsit5.accept();
                        std::mem::swap(&mut self.state, &mut self.candidate);
                        self.t = if clamped { target } else { self.t + h };
                        self.steps += 1;
                        let proposed = h * factor;
                        self.dt = if clamped { self.dt.max(proposed) } else { proposed };
                        if let Some(max) = self.settings.max_step {
                            self.dt = self.dt.min(max);
                        }
                        trace!("accepted h = {h:e} at t = {}, err = {err:.3}", self.t);
                        return Ok(clamped);
                    }

                    self.rejected += 1;
                    self.dt = h * factor.min(1.0);
                    trace!("rejected h = {h:e} at t = {}, err = {err:.3}", self.t);
                    if self.dt < self.settings.min_step {
                        return Err(if finite {
                            DivergenceReason::StepSizeUnderflow
                        } else {
                            DivergenceReason::NonFiniteState
                        });
                    }
                }
            }
        }
    }
}

impl<'a, F: DynamicalSystem<f64>> Iterator for TrajectoryIter<'a, F> {
    type Item = Result<Sample, StepFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if !self.started {
            self.started = true;
            if self.state.iter().any(|v| !v.is_finite()) {
                return self.fail(DivergenceReason::NonFiniteState);
            }
            return Some(Ok(self.sample()));
        }
        loop {
            let Some(&target) = self.targets.get(self.target_idx) else {
                self.finished = true;
                debug!("integration finished after {} steps", self.steps);
                return None;
            };
            match self.advance(target) {
                Err(reason) => return self.fail(reason),
                Ok(true) => {
                    self.target_idx += 1;
                    return Some(Ok(self.sample()));
                }
                Ok(false) if self.report_every_step => return Some(Ok(self.sample())),
                Ok(false) => {}
            }
        }
    }
}

impl<'a, F> std::iter::FusedIterator for TrajectoryIter<'a, F> where F: DynamicalSystem<f64> {}

/// Hairer-Wanner starting step estimate for a method of order `order`.
fn initial_step(
    field: &impl DynamicalSystem<f64>,
    t0: f64,
    y0: &[f64],
    span: f64,
    tolerance: &Tolerance,
    order: i32,
) -> f64 {
    let n = y0.len();
    let scale = |y: f64| tolerance.abs + tolerance.rel * y.abs();
    let rms = |v: &[f64]| {
        if v.is_empty() {
            0.0
        } else {
            (v.iter()
                .zip(y0)
                .map(|(x, y)| (x / scale(*y)).powi(2))
                .sum::<f64>()
                / n as f64)
                .sqrt()
        }
    };

    let mut f0 = vec![0.0; n];
    field.apply(t0, y0, &mut f0);
    let d0 = rms(y0);
    let d1 = rms(&f0);
    let h0 = if d0 < 1e-5 || d1 < 1e-5 || !d1.is_finite() {
        1e-6
    } else {
        0.01 * d0 / d1
    };
    let h0 = h0.min(span);

    let y1: Vec<f64> = y0.iter().zip(&f0).map(|(y, f)| y + h0 * f).collect();
    let mut f1 = vec![0.0; n];
    field.apply(t0 + h0, &y1, &mut f1);
    let diff: Vec<f64> = f1.iter().zip(&f0).map(|(a, b)| (a - b) / h0).collect();
    let d2 = rms(&diff);

    let h1 = if d1.max(d2) <= 1e-15 || !d2.is_finite() {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(1.0 / (order + 1) as f64)
    };
    (100.0 * h0).min(h1).min(span)
}

/// Integrates compiled vector fields. Holds only configuration, so one
/// integrator can serve any number of concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct Integrator {
    settings: IntegratorSettings,
}

impl Integrator {
    pub fn new(settings: IntegratorSettings) -> Self {
        Self { settings }
    }

    pub fn with_tolerance(tolerance: Tolerance) -> Self {
        Self::new(IntegratorSettings {
            tolerance,
            ..IntegratorSettings::default()
        })
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    /// Starts a lazy trajectory. The first item is `(t0, initial_state)`.
    pub fn iter<'a, F: DynamicalSystem<f64>>(
        &self,
        field: &'a F,
        initial_state: &[f64],
        spec: &TimeSpec,
    ) -> Result<TrajectoryIter<'a, F>, IntegrationError> {
        self.settings.validate()?;
        spec.validate()?;
        let dim = field.dimension();
        if initial_state.len() != dim {
            return Err(IntegrationError::StateLength {
                expected: dim,
                got: initial_state.len(),
            });
        }

        let t0 = spec.start();
        let span = spec.end() - t0;
        let (targets, report_every_step) = match spec {
            TimeSpec::Span { tf, .. } => (vec![*tf], true),
            TimeSpec::Grid(times) => (times[1..].to_vec(), false),
        };

        let (stepper, dt) = match self.settings.method {
            Method::Rk4 { dt } => (Stepper::Rk4(RK4::new(dim)), dt),
            Method::Tsit5 => {
                let tsit5 = Tsit5::new(dim);
                let dt = self.settings.initial_step.unwrap_or_else(|| {
                    initial_step(
                        field,
                        t0,
                        initial_state,
                        span,
                        &self.settings.tolerance,
                        tsit5.error_order() + 1,
                    )
                });
                (Stepper::Tsit5(tsit5), dt)
            }
        };
        let dt = match self.settings.max_step {
            Some(max) => dt.min(max),
            None => dt,
        };
        debug!(
            "integrating {dim}-dimensional field over [{t0}, {}] with {:?}, initial step {dt:e}",
            spec.end(),
            self.settings.method
        );

        Ok(TrajectoryIter {
            field,
            settings: self.settings,
            stepper,
            t: t0,
            state: initial_state.to_vec(),
            candidate: vec![0.0; dim],
            error: vec![0.0; dim],
            dt,
            targets,
            target_idx: 0,
            report_every_step,
            steps: 0,
            rejected: 0,
            started: false,
            finished: false,
        })
    }

    /// Runs a trajectory to completion. On divergence the samples computed
    /// so far are returned inside the error.
    pub fn integrate<F: DynamicalSystem<f64>>(
        &self,
        field: &F,
        initial_state: &[f64],
        spec: &TimeSpec,
    ) -> Result<Trajectory, IntegrationError> {
        let mut trajectory = Trajectory::new();
        for item in self.iter(field, initial_state, spec)? {
            match item {
                Ok(sample) => trajectory.push(sample),
                Err(failure) => {
                    return Err(IntegrationError::Divergence(Box::new(
                        IntegrationDivergence {
                            reason: failure.reason,
                            time: failure.time,
                            state: failure.state,
                            partial: trajectory,
                        },
                    )))
                }
            }
        }
        Ok(trajectory)
    }
}

/// Integrates `field` from `initial_state` with default settings and the
/// given tolerance.
pub fn integrate<F: DynamicalSystem<f64>>(
    field: &F,
    initial_state: &[f64],
    spec: &TimeSpec,
    tolerance: Tolerance,
) -> Result<Trajectory, IntegrationError> {
    Integrator::with_tolerance(tolerance).integrate(field, initial_state, spec)
}
