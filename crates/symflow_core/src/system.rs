use crate::derivative::differentiate;
use crate::error::{EvaluationError, SystemError};
use crate::expr::{Expr, Symbol};
use crate::parser::parse;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// How `evaluate` treats components with no finite value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvaluationMode {
    /// Non-representable components become NaN.
    #[default]
    Lenient,
    /// The first non-representable component fails the call.
    Strict,
}

/// A named non-state constant with its nominal value.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub symbol: Symbol,
    pub value: f64,
}

impl Parameter {
    pub fn new(name: impl AsRef<str>, value: f64) -> Self {
        Self {
            symbol: Symbol::new(name),
            value,
        }
    }
}

/// Where a symbol's value comes from when the system is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    State(usize),
    Param(usize),
    Time,
}

/// Symbolic `n × n` Jacobian, row-major: entry `(i, j)` is
/// `∂ equations[i] / ∂ symbols[j]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Jacobian {
    dim: usize,
    entries: Vec<Expr>,
}

impl Jacobian {
    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn get(&self, row: usize, col: usize) -> &Expr {
        &self.entries[row * self.dim + col]
    }

    pub fn row(&self, row: usize) -> &[Expr] {
        &self.entries[row * self.dim..(row + 1) * self.dim]
    }

    pub fn entries(&self) -> &[Expr] {
        &self.entries
    }
}

/// A validated, immutable continuous-time system `d symbols[i]/dt = equations[i]`.
#[derive(Debug, Clone)]
pub struct SymbolicSystem {
    symbols: Vec<Symbol>,
    equations: Vec<Expr>,
    parameters: Vec<Parameter>,
    time: Option<Symbol>,
    slots: HashMap<Symbol, Slot>,
    jacobian: OnceLock<Jacobian>,
}

impl SymbolicSystem {
    /// Builds an autonomous system without parameters.
    pub fn new(symbols: Vec<Symbol>, equations: Vec<Expr>) -> Result<Self, SystemError> {
        Self::build(symbols, equations, Vec::new(), None)
    }

    /// Builds a system whose equations may also reference `parameters` and,
    /// if given, the `time` symbol.
    pub fn build(
        symbols: Vec<Symbol>,
        equations: Vec<Expr>,
        parameters: Vec<Parameter>,
        time: Option<Symbol>,
    ) -> Result<Self, SystemError> {
        if symbols.len() != equations.len() {
            return Err(SystemError::DimensionMismatch {
                symbols: symbols.len(),
                equations: equations.len(),
            });
        }

        let mut slots = HashMap::with_capacity(symbols.len() + parameters.len() + 1);
        for (i, symbol) in symbols.iter().enumerate() {
            if slots.insert(symbol.clone(), Slot::State(i)).is_some() {
                return Err(SystemError::DuplicateSymbol(symbol.name().to_string()));
            }
        }
        for (i, parameter) in parameters.iter().enumerate() {
            match slots.insert(parameter.symbol.clone(), Slot::Param(i)) {
                None => {}
                Some(Slot::State(_)) => {
                    return Err(SystemError::ParameterShadowsState(
                        parameter.symbol.name().to_string(),
                    ))
                }
                Some(_) => {
                    return Err(SystemError::DuplicateSymbol(
                        parameter.symbol.name().to_string(),
                    ))
                }
            }
        }
        if let Some(time) = &time {
            if slots.insert(time.clone(), Slot::Time).is_some() {
                return Err(SystemError::DuplicateSymbol(time.name().to_string()));
            }
        }

        for (i, equation) in equations.iter().enumerate() {
            let mut unbound = None;
            equation.visit_symbols(&mut |s| {
                if unbound.is_none() && !slots.contains_key(s) {
                    unbound = Some(s.clone());
                }
            });
            if let Some(name) = unbound {
                return Err(SystemError::UnboundVariable {
                    name: name.name().to_string(),
                    context: format!("equation {i} (d{}/dt)", symbols[i]),
                });
            }
            if let Some(op) = equation.first_uninterpreted() {
                return Err(SystemError::UnsupportedOperator {
                    operator: op.name().to_string(),
                    context: format!("equation {i} (d{}/dt)", symbols[i]),
                });
            }
        }

        debug!(
            "built symbolic system: {} states, {} parameters, {} nodes",
            symbols.len(),
            parameters.len(),
            equations.iter().map(Expr::size).sum::<usize>()
        );

        Ok(Self {
            symbols,
            equations,
            parameters,
            time,
            slots,
            jacobian: OnceLock::new(),
        })
    }

    /// Builds an autonomous system from symbol names and infix equations.
    pub fn parse(symbols: &[&str], equations: &[&str]) -> Result<Self, SystemError> {
        let exprs = equations
            .iter()
            .enumerate()
            .map(|(equation, source)| {
                parse(source).map_err(|source| SystemError::Parse { equation, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(symbols.iter().map(Symbol::new).collect(), exprs)
    }

    pub fn dimension(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn equations(&self) -> &[Expr] {
        &self.equations
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn time_symbol(&self) -> Option<&Symbol> {
        self.time.as_ref()
    }

    /// Position of a state symbol in the state vector.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        match self.slots.get(&Symbol::new(name)) {
            Some(Slot::State(i)) => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn slot(&self, symbol: &Symbol) -> Option<Slot> {
        self.slots.get(symbol).copied()
    }

    pub(crate) fn parameter_values(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }

    fn check_state(&self, state: &[f64]) -> Result<(), EvaluationError> {
        if state.len() != self.dimension() {
            return Err(EvaluationError::StateLength {
                expected: self.dimension(),
                got: state.len(),
            });
        }
        Ok(())
    }

    /// Evaluates `exprs`; every `stride` consecutive entries belong to one
    /// equation (1 for the field itself, n for Jacobian rows).
    fn eval_with(
        &self,
        exprs: &[Expr],
        stride: usize,
        state: &[f64],
        t: f64,
        mode: EvaluationMode,
    ) -> Result<Vec<f64>, EvaluationError> {
        self.check_state(state)?;
        let env = |s: &Symbol| match self.slots.get(s) {
            Some(Slot::State(i)) => state[*i],
            Some(Slot::Param(i)) => self.parameters[*i].value,
            Some(Slot::Time) => t,
            None => f64::NAN,
        };

        let mut out = Vec::with_capacity(exprs.len());
        for (idx, expr) in exprs.iter().enumerate() {
            match expr.eval(&env) {
                Ok(value) => out.push(value),
                Err(cause) => {
                    let equation = idx / stride;
                    if mode == EvaluationMode::Strict {
                        return Err(EvaluationError::NumericDomain {
                            equation,
                            symbol: self.symbols[equation].name().to_string(),
                            cause,
                        });
                    }
                    debug!("component {idx} evaluated to NaN at t = {t}: {cause}");
                    out.push(f64::NAN);
                }
            }
        }
        Ok(out)
    }

    /// Evaluates the vector field at `(state, t)` by walking the trees.
    pub fn evaluate(
        &self,
        state: &[f64],
        t: f64,
        mode: EvaluationMode,
    ) -> Result<Vec<f64>, EvaluationError> {
        self.eval_with(&self.equations, 1, state, t, mode)
    }

    /// Symbolic Jacobian, computed on first use and cached.
    pub fn jacobian(&self) -> &Jacobian {
        self.jacobian.get_or_init(|| {
            let dim = self.dimension();
            let mut entries = Vec::with_capacity(dim * dim);
            for equation in &self.equations {
                for symbol in &self.symbols {
                    // operators were validated at construction
                    entries.push(differentiate(equation, symbol).simplify());
                }
            }
            debug!("computed {dim}x{dim} symbolic jacobian");
            Jacobian { dim, entries }
        })
    }

    /// Numeric Jacobian at `(state, t)`, row-major.
    pub fn jacobian_at(
        &self,
        state: &[f64],
        t: f64,
        mode: EvaluationMode,
    ) -> Result<Vec<f64>, EvaluationError> {
        self.check_state(state)?;
        let jacobian = self.jacobian();
        self.eval_with(jacobian.entries(), jacobian.dimension(), state, t, mode)
    }

    /// Returns a new system with the named parameters replaced by constants.
    /// `self` is left untouched.
    pub fn substitute<I, K>(&self, bindings: I) -> Result<SymbolicSystem, SystemError>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let mut replacements = HashMap::new();
        for (name, value) in bindings {
            let symbol = Symbol::new(name);
            match self.slots.get(&symbol) {
                Some(Slot::Param(_)) => {
                    replacements.insert(symbol, Expr::Constant(value));
                }
                _ => return Err(SystemError::UnknownParameter(symbol.name().to_string())),
            }
        }

        let parameters = self
            .parameters
            .iter()
            .filter(|p| !replacements.contains_key(&p.symbol))
            .cloned()
            .collect();
        let equations = self
            .equations
            .iter()
            .map(|e| e.substitute(&replacements))
            .collect();

        SymbolicSystem::build(self.symbols.clone(), equations, parameters, self.time.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::symbols;
    use approx::assert_relative_eq;

    fn assert_err_contains<T: std::fmt::Debug, E: std::fmt::Display>(
        result: Result<T, E>,
        needle: &str,
    ) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn damped_oscillator() -> SymbolicSystem {
        let syms = symbols("x v");
        let x = syms[0].expr();
        let v = syms[1].expr();
        let k = Expr::symbol("k");
        let c = Expr::symbol("c");
        SymbolicSystem::build(
            syms,
            vec![v.clone(), -(&k * &x) - &c * &v],
            vec![Parameter::new("k", 4.0), Parameter::new("c", 0.5)],
            None,
        )
        .expect("valid system")
    }

    #[test]
    fn dimension_matches_symbols_and_equations() {
        let system = SymbolicSystem::parse(&["a", "b", "c"], &["b", "c", "-a"]).expect("valid");
        assert_eq!(system.dimension(), 3);
        assert_eq!(system.symbols().len(), 3);
        assert_eq!(system.equations().len(), 3);
        assert_eq!(system.index_of("c"), Some(2));
        assert_eq!(system.index_of("z"), None);
    }

    #[test]
    fn construction_rejects_structural_errors() {
        let result = SymbolicSystem::parse(&["x", "y"], &["y"]);
        assert_eq!(
            result.unwrap_err(),
            SystemError::DimensionMismatch {
                symbols: 2,
                equations: 1
            }
        );
        assert_eq!(
            SymbolicSystem::parse(&["x", "x"], &["1", "2"]).unwrap_err(),
            SystemError::DuplicateSymbol("x".to_string())
        );
        assert_err_contains(SymbolicSystem::parse(&["x"], &["x + q"]), "unbound variable `q`");
        assert_err_contains(SymbolicSystem::parse(&["x"], &["f(x)"]), "unsupported operator `f`");
        assert!(matches!(
            SymbolicSystem::parse(&["x"], &["x +"]),
            Err(SystemError::Parse { equation: 0, .. })
        ));
    }

    #[test]
    fn construction_rejects_parameter_collisions() {
        let x = Symbol::new("x");
        let result = SymbolicSystem::build(
            vec![x.clone()],
            vec![x.expr()],
            vec![Parameter::new("x", 1.0)],
            None,
        );
        assert_eq!(
            result.unwrap_err(),
            SystemError::ParameterShadowsState("x".to_string())
        );
        let result = SymbolicSystem::build(
            vec![x.clone()],
            vec![x.expr()],
            vec![Parameter::new("t", 1.0)],
            Some(Symbol::new("t")),
        );
        assert_eq!(result.unwrap_err(), SystemError::DuplicateSymbol("t".to_string()));
    }

    #[test]
    fn evaluate_substitutes_state_parameters_and_time() {
        let system = damped_oscillator();
        let out = system
            .evaluate(&[1.0, 2.0], 0.0, EvaluationMode::Strict)
            .expect("finite");
        assert_eq!(out, vec![2.0, -4.0 - 1.0]);

        let syms = symbols("x");
        let forced = SymbolicSystem::build(
            syms.clone(),
            vec![Expr::symbol("t").sin() - syms[0].expr()],
            Vec::new(),
            Some(Symbol::new("t")),
        )
        .expect("valid");
        let out = forced
            .evaluate(&[0.25], 1.0, EvaluationMode::Strict)
            .expect("finite");
        assert_relative_eq!(out[0], 1.0_f64.sin() - 0.25);
    }

    #[test]
    fn evaluate_checks_state_length() {
        let system = damped_oscillator();
        assert_eq!(
            system.evaluate(&[1.0], 0.0, EvaluationMode::Lenient),
            Err(EvaluationError::StateLength {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn lenient_mode_returns_nan_sentinels_and_strict_mode_fails() {
        let system = SymbolicSystem::parse(&["x", "y"], &["1 / x", "y + 1"]).expect("valid");
        let out = system
            .evaluate(&[0.0, 2.0], 0.0, EvaluationMode::Lenient)
            .expect("lenient never fails on domain errors");
        assert!(out[0].is_nan());
        assert_eq!(out[1], 3.0);

        let err = system
            .evaluate(&[0.0, 2.0], 0.0, EvaluationMode::Strict)
            .unwrap_err();
        assert_eq!(
            err,
            EvaluationError::NumericDomain {
                equation: 0,
                symbol: "x".to_string(),
                cause: crate::error::DomainError::DivisionByZero,
            }
        );
    }

    #[test]
    fn jacobian_is_cached_and_symbolic() {
        let system = SymbolicSystem::parse(&["x", "y"], &["x*y", "sin(x) - y^2"]).expect("valid");
        let first = system.jacobian() as *const Jacobian;
        let second = system.jacobian() as *const Jacobian;
        assert_eq!(first, second);

        let jac = system.jacobian();
        assert_eq!(jac.dimension(), 2);
        assert_eq!(jac.get(0, 0).to_string(), "y");
        assert_eq!(jac.get(0, 1).to_string(), "x");
        assert_eq!(jac.get(1, 0).to_string(), "cos(x)");
        assert_eq!(jac.row(1)[1].to_string(), "-(2*y)");
    }

    #[test]
    fn jacobian_at_matches_finite_differences() {
        let system = SymbolicSystem::parse(
            &["x", "y", "z"],
            &["x*y - z", "exp(-x) * cos(y)", "z^3 / (1 + x^2)"],
        )
        .expect("valid");
        let state = [0.4, -1.1, 0.7];
        let jac = system
            .jacobian_at(&state, 0.0, EvaluationMode::Strict)
            .expect("finite");
        let h = 1e-6;
        for j in 0..3 {
            let mut plus = state;
            let mut minus = state;
            plus[j] += h;
            minus[j] -= h;
            let fp = system.evaluate(&plus, 0.0, EvaluationMode::Strict).unwrap();
            let fm = system.evaluate(&minus, 0.0, EvaluationMode::Strict).unwrap();
            for i in 0..3 {
                let numeric = (fp[i] - fm[i]) / (2.0 * h);
                assert_relative_eq!(jac[i * 3 + j], numeric, epsilon = 1e-7, max_relative = 1e-6);
            }
        }
    }

    #[test]
    fn substitute_inlines_parameters_without_mutating_original() {
        let system = damped_oscillator();
        let stiff = system.substitute([("k", 100.0)]).expect("k is a parameter");
        assert_eq!(stiff.parameters().len(), 1);
        assert_eq!(system.parameters().len(), 2);
        assert_eq!(stiff.equations()[1].to_string(), "-(100*x) - c*v");
        assert_eq!(system.equations()[1].to_string(), "-(k*x) - c*v");

        let out = stiff
            .evaluate(&[1.0, 0.0], 0.0, EvaluationMode::Strict)
            .expect("finite");
        assert_eq!(out, vec![0.0, -100.0]);

        assert_eq!(
            system.substitute([("x", 1.0)]).unwrap_err(),
            SystemError::UnknownParameter("x".to_string())
        );
        assert_eq!(
            system.substitute([("nope", 1.0)]).unwrap_err(),
            SystemError::UnknownParameter("nope".to_string())
        );
    }
}
