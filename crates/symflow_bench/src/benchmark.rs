use crate::metadata::{InitialBox, TimeHorizon, UnsafeCheck, UnsafeRegion};
use anyhow::{ensure, Context, Result};
use log::debug;
use symflow_core::{compile, CompiledField, Expr, Integrator, Symbol, SymbolicSystem, Trajectory};

/// A benchmark is plain data: the vector field plus the metadata external
/// tooling needs. All behavior lives in `symflow_core`.
#[derive(Debug, Clone)]
pub struct Benchmark {
    pub name: String,
    pub symbols: Vec<Symbol>,
    pub equations: Vec<Expr>,
    pub initial_box: InitialBox,
    pub nominal_state: Vec<f64>,
    pub horizon: TimeHorizon,
    pub unsafe_region: Option<UnsafeRegion>,
}

impl Benchmark {
    /// Validates the equations and checks that the metadata agrees with them.
    pub fn system(&self) -> Result<SymbolicSystem> {
        let system = SymbolicSystem::new(self.symbols.clone(), self.equations.clone())
            .with_context(|| format!("benchmark `{}` has an invalid vector field", self.name))?;

        let names: Vec<&str> = self.symbols.iter().map(Symbol::name).collect();
        ensure!(
            self.initial_box.symbols().iter().map(String::as_str).eq(names.iter().copied()),
            "benchmark `{}`: initial box symbols {:?} do not match state symbols {:?}",
            self.name,
            self.initial_box.symbols(),
            names
        );
        ensure!(
            self.nominal_state.len() == system.dimension(),
            "benchmark `{}`: nominal state has {} components, system has {}",
            self.name,
            self.nominal_state.len(),
            system.dimension()
        );
        debug!("benchmark `{}`: {}-dimensional system", self.name, system.dimension());
        Ok(system)
    }

    pub fn compile(&self) -> Result<CompiledField> {
        let system = self.system()?;
        compile(&system).with_context(|| format!("failed to compile benchmark `{}`", self.name))
    }

    /// Integrates from `initial_state` over the benchmark horizon, reporting
    /// `samples` evenly spaced points, or every solver step when `None`.
    pub fn simulate(
        &self,
        integrator: &Integrator,
        initial_state: &[f64],
        samples: Option<usize>,
    ) -> Result<Trajectory> {
        let field = self.compile()?;
        let spec = match samples {
            Some(n) => self.horizon.grid(n),
            None => self.horizon.span(),
        };
        integrator
            .integrate(&field, initial_state, &spec)
            .with_context(|| format!("benchmark `{}` failed to integrate", self.name))
    }

    pub fn simulate_nominal(&self, integrator: &Integrator) -> Result<Trajectory> {
        self.simulate(integrator, &self.nominal_state, None)
    }

    pub fn unsafe_check(&self) -> Result<Option<UnsafeCheck>> {
        let Some(region) = &self.unsafe_region else {
            return Ok(None);
        };
        let system = self.system()?;
        region.compile(&system).map(Some)
    }
}
