use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use symflow_core::{compile_scalar, parse, CompiledScalar, SymbolicSystem, TimeSpec, Trajectory};

/// Closed interval `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lo: f64,
    pub hi: f64,
}

impl Interval {
    pub fn new(lo: f64, hi: f64) -> Result<Self> {
        ensure!(
            lo.is_finite() && hi.is_finite() && lo <= hi,
            "invalid interval [{lo}, {hi}]"
        );
        Ok(Self { lo, hi })
    }

    /// `[center - radius, center + radius]`.
    pub fn around(center: f64, radius: f64) -> Result<Self> {
        Self::new(center - radius, center + radius)
    }

    pub fn center(&self) -> f64 {
        0.5 * (self.lo + self.hi)
    }

    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lo <= value && value <= self.hi
    }

    /// Point at `fraction` of the way from `lo` to `hi`.
    pub fn lerp(&self, fraction: f64) -> f64 {
        self.lo + fraction * (self.hi - self.lo)
    }
}

/// Per-symbol box of admissible initial states, in state order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialBox {
    symbols: Vec<String>,
    intervals: Vec<Interval>,
}

impl InitialBox {
    pub fn new(entries: Vec<(String, Interval)>) -> Self {
        let (symbols, intervals) = entries.into_iter().unzip();
        Self { symbols, intervals }
    }

    /// Box of half-width `radius` around `center`.
    pub fn around(symbols: &[&str], center: &[f64], radius: f64) -> Result<Self> {
        ensure!(
            symbols.len() == center.len(),
            "{} symbols but {} center coordinates",
            symbols.len(),
            center.len()
        );
        let entries = symbols
            .iter()
            .zip(center)
            .map(|(name, c)| {
                let interval = Interval::around(*c, radius)
                    .with_context(|| format!("bad interval for `{name}`"))?;
                Ok((name.to_string(), interval))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(entries))
    }

    pub fn dimension(&self) -> usize {
        self.intervals.len()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn interval(&self, symbol: &str) -> Option<&Interval> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|i| &self.intervals[i])
    }

    pub fn center(&self) -> Vec<f64> {
        self.intervals.iter().map(Interval::center).collect()
    }

    pub fn contains(&self, state: &[f64]) -> bool {
        state.len() == self.dimension()
            && self.intervals.iter().zip(state).all(|(iv, x)| iv.contains(*x))
    }

    /// Maps per-axis fractions in `[0, 1]` to a point of the box.
    pub fn point_at(&self, fractions: &[f64]) -> Result<Vec<f64>> {
        ensure!(
            fractions.len() == self.dimension(),
            "expected {} fractions, got {}",
            self.dimension(),
            fractions.len()
        );
        if let Some(f) = fractions.iter().find(|f| !(0.0..=1.0).contains(*f)) {
            bail!("fraction {f} lies outside [0, 1]");
        }
        Ok(self
            .intervals
            .iter()
            .zip(fractions)
            .map(|(iv, f)| iv.lerp(*f))
            .collect())
    }

    /// All `2^n` vertices; bit `i` of the index selects the upper bound of axis `i`.
    pub fn corners(&self) -> Result<Vec<Vec<f64>>> {
        let n = self.dimension();
        let count = u32::try_from(n)
            .ok()
            .and_then(|bits| 1usize.checked_shl(bits))
            .with_context(|| format!("a {n}-dimensional box has too many corners to list"))?;
        Ok((0..count)
            .map(|mask| {
                self.intervals
                    .iter()
                    .enumerate()
                    .map(|(i, iv)| if mask & (1 << i) != 0 { iv.hi } else { iv.lo })
                    .collect()
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeHorizon {
    pub t0: f64,
    pub tf: f64,
}

impl TimeHorizon {
    pub fn new(t0: f64, tf: f64) -> Result<Self> {
        ensure!(
            t0.is_finite() && tf.is_finite() && tf > t0,
            "invalid time horizon [{t0}, {tf}]"
        );
        Ok(Self { t0, tf })
    }

    pub fn duration(&self) -> f64 {
        self.tf - self.t0
    }

    /// Every accepted solver step over the horizon.
    pub fn span(&self) -> TimeSpec {
        TimeSpec::span(self.t0, self.tf)
    }

    /// `samples` evenly spaced report times, endpoints included.
    pub fn grid(&self, samples: usize) -> TimeSpec {
        TimeSpec::linspace(self.t0, self.tf, samples)
    }
}

/// States where `observable >= threshold`. The observable is an infix
/// expression over the state symbols, e.g. `"x4"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsafeRegion {
    pub observable: String,
    pub threshold: f64,
}

impl UnsafeRegion {
    pub fn new(observable: impl Into<String>, threshold: f64) -> Self {
        Self {
            observable: observable.into(),
            threshold,
        }
    }

    pub fn compile(&self, system: &SymbolicSystem) -> Result<UnsafeCheck> {
        let expr = parse(&self.observable)
            .with_context(|| format!("failed to parse unsafe observable `{}`", self.observable))?;
        let observable = compile_scalar(system, &expr)
            .with_context(|| format!("failed to compile unsafe observable `{}`", self.observable))?;
        Ok(UnsafeCheck {
            observable,
            threshold: self.threshold,
            dimension: system.dimension(),
        })
    }
}

/// Compiled unsafe-region predicate.
#[derive(Debug, Clone)]
pub struct UnsafeCheck {
    observable: CompiledScalar<f64>,
    threshold: f64,
    dimension: usize,
}

impl UnsafeCheck {
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn value(&self, t: f64, state: &[f64]) -> Result<f64> {
        ensure!(
            state.len() == self.dimension,
            "state has {} components, expected {}",
            state.len(),
            self.dimension
        );
        Ok(self.observable.eval(t, state))
    }

    /// A NaN observable never counts as unsafe.
    pub fn contains(&self, state: &[f64]) -> Result<bool> {
        Ok(self.value(0.0, state)? >= self.threshold)
    }

    /// Index and time of the first unsafe sample.
    pub fn first_violation(&self, trajectory: &Trajectory) -> Result<Option<(usize, f64)>> {
        for (i, (t, state)) in trajectory.iter().enumerate() {
            if self.value(t, state)? >= self.threshold {
                return Ok(Some((i, t)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected an error");
        let message = format!("{err:#}");
        assert!(message.contains(needle), "`{message}` does not contain `{needle}`");
    }

    #[test]
    fn box_helpers_follow_interval_bounds() {
        let b = InitialBox::around(&["x", "y"], &[1.0, -2.0], 0.5).unwrap();
        assert_eq!(b.center(), vec![1.0, -2.0]);
        assert_eq!(b.interval("y"), Some(&Interval { lo: -2.5, hi: -1.5 }));
        assert!(b.contains(&[1.4, -1.6]));
        assert!(!b.contains(&[1.6, -2.0]));
        assert!(!b.contains(&[1.0]));
        assert_eq!(b.point_at(&[0.0, 1.0]).unwrap(), vec![0.5, -1.5]);
        assert_err_contains(b.point_at(&[0.5, 1.5]), "outside [0, 1]");
        assert_err_contains(b.point_at(&[0.5]), "expected 2 fractions");

        let corners = b.corners().unwrap();
        assert_eq!(corners.len(), 4);
        assert_eq!(corners[0], vec![0.5, -2.5]);
        assert_eq!(corners[3], vec![1.5, -1.5]);
        assert!(corners.iter().all(|c| b.contains(c)));
    }

    #[test]
    fn corners_of_huge_box_are_refused() {
        let names: Vec<String> = (0..64).map(|i| format!("x{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let b = InitialBox::around(&refs, &[0.0; 64], 1.0).unwrap();
        assert_err_contains(b.corners(), "64-dimensional box has too many corners");

        let empty = InitialBox::new(Vec::new());
        assert_eq!(empty.corners().unwrap(), vec![Vec::<f64>::new()]);
    }

    #[test]
    fn rejects_degenerate_metadata() {
        assert_err_contains(Interval::new(1.0, 0.0), "invalid interval");
        assert_err_contains(InitialBox::around(&["x"], &[0.0], -1.0), "bad interval for `x`");
        assert_err_contains(TimeHorizon::new(5.0, 5.0), "invalid time horizon");
    }

    #[test]
    fn horizon_builds_time_specs() {
        let horizon = TimeHorizon::new(0.0, 20.0).unwrap();
        assert_relative_eq!(horizon.duration(), 20.0);
        assert_eq!(horizon.span(), TimeSpec::span(0.0, 20.0));
        let TimeSpec::Grid(times) = horizon.grid(5) else {
            panic!("expected a grid");
        };
        assert_eq!(times, vec![0.0, 5.0, 10.0, 15.0, 20.0]);
    }

    #[test]
    fn unsafe_region_is_closed_at_threshold() {
        let system = SymbolicSystem::parse(&["x", "y"], &["y", "-x"]).unwrap();
        let check = UnsafeRegion::new("x + y", 1.0).compile(&system).unwrap();
        assert!(check.contains(&[0.5, 0.5]).unwrap());
        assert!(!check.contains(&[0.5, 0.49]).unwrap());
        assert!(!check.contains(&[f64::NAN, 2.0]).unwrap());
        assert_err_contains(check.contains(&[1.0]), "state has 1 components");

        let unknown = UnsafeRegion::new("z", 0.0).compile(&system);
        assert_err_contains(unknown, "unbound variable `z`");
    }
}
