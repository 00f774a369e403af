use crate::error::SystemError;
use crate::expr::{BinaryOp, Expr, Symbol, UnaryOp};

impl Expr {
    /// Symbolic partial derivative with respect to `wrt`, simplified.
    ///
    /// Fails with `UnsupportedOperator` if the tree contains an uninterpreted
    /// function; every other operator has a closed-form rule.
    pub fn derivative(&self, wrt: &Symbol) -> Result<Expr, SystemError> {
        if let Some(op) = self.first_uninterpreted() {
            return Err(SystemError::UnsupportedOperator {
                operator: op.name().to_string(),
                context: format!("derivative with respect to `{wrt}`"),
            });
        }
        Ok(differentiate(self, wrt).simplify())
    }
}

/// Total over the interpreted operator set. Callers must reject
/// uninterpreted functions first.
pub(crate) fn differentiate(expr: &Expr, wrt: &Symbol) -> Expr {
    if !expr.depends_on(wrt) {
        return Expr::Constant(0.0);
    }
    match expr {
        Expr::Constant(_) => Expr::Constant(0.0),
        Expr::Symbol(s) => Expr::Constant(if s == wrt { 1.0 } else { 0.0 }),
        Expr::Binary(op, left, right) => {
            let a: &Expr = left;
            let b: &Expr = right;
            let da = differentiate(a, wrt);
            let db = differentiate(b, wrt);
            match op {
                BinaryOp::Add => da + db,
                BinaryOp::Sub => da - db,
                // product rule
                BinaryOp::Mul => da * b + a * db,
                // quotient rule
                BinaryOp::Div => (da * b - a * db) / b.clone().pow(2.0),
                BinaryOp::Pow => {
                    if !b.depends_on(wrt) {
                        b * a.clone().pow(b - 1.0) * da
                    } else if !a.depends_on(wrt) {
                        expr * a.clone().ln() * db
                    } else {
                        // d(a^b) = a^b * (b' ln a + b a' / a)
                        expr * (db * a.clone().ln() + b * da / a)
                    }
                }
            }
        }
        Expr::Unary(op, operand) => {
            let u: &Expr = operand;
            let du = differentiate(u, wrt);
            match op {
                UnaryOp::Neg => -du,
                UnaryOp::Sin => u.clone().cos() * du,
                UnaryOp::Cos => -(u.clone().sin()) * du,
                UnaryOp::Tan => (1.0 + u.clone().tan().pow(2.0)) * du,
                UnaryOp::Exp => expr * du,
                UnaryOp::Ln => du / u,
                UnaryOp::Sqrt => du / (2.0 * expr),
                UnaryOp::Abs => u / expr * du,
                UnaryOp::Tanh => (1.0 - u.clone().tanh().pow(2.0)) * du,
                UnaryOp::Function(_) => Expr::Constant(f64::NAN),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn at(expr: &Expr, x: f64, y: f64) -> f64 {
        expr.eval(&|s: &Symbol| if s.name() == "x" { x } else { y })
            .expect("finite")
    }

    fn central_difference(expr: &Expr, x: f64, y: f64) -> f64 {
        let h = 1e-6;
        (at(expr, x + h, y) - at(expr, x - h, y)) / (2.0 * h)
    }

    #[test]
    fn polynomial_derivative_is_simplified() {
        let x = Expr::symbol("x");
        let e = 3.0 * x.clone().pow(2.0) + 2.0 * &x + 1.0;
        let d = e.derivative(&Symbol::new("x")).expect("differentiable");
        assert_eq!(d.to_string(), "3*2*x + 2");
        assert_relative_eq!(at(&d, 1.5, 0.0), 11.0);
    }

    #[test]
    fn independent_terms_vanish() {
        let x = Expr::symbol("x");
        let y = Expr::symbol("y");
        let e = y.clone().sin() * y.exp() + 4.0;
        assert_eq!(e.derivative(&Symbol::new("x")), Ok(Expr::Constant(0.0)));
        let d = (&x * 7.0).derivative(&Symbol::new("x")).expect("differentiable");
        assert_eq!(d, Expr::Constant(7.0));
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let x = Expr::symbol("x");
        let y = Expr::symbol("y");
        let cases = vec![
            &x * &y / (1.0 + &x * &x),
            x.clone().sin().exp() - x.clone().cos() * &y,
            x.clone().tan() + x.clone().tanh(),
            (&x * &x + 1.0).sqrt().ln(),
            x.clone().pow(y.clone()),
            Expr::constant(2.0).pow(x.clone()),
            (&x - 3.0).abs() * &y,
        ];
        let wrt = Symbol::new("x");
        for e in cases {
            let d = e.derivative(&wrt).expect("differentiable");
            for &(px, py) in &[(0.3, 1.2), (1.7, -0.4), (0.9, 2.5)] {
                let symbolic = at(&d, px, py);
                let numeric = central_difference(&e, px, py);
                assert_relative_eq!(symbolic, numeric, epsilon = 1e-6, max_relative = 1e-6);
            }
        }
    }

    #[test]
    fn uninterpreted_function_is_rejected() {
        let e = Expr::symbol("x").apply_function("f") + 1.0;
        let err = e.derivative(&Symbol::new("x")).expect_err("not differentiable");
        assert!(matches!(
            err,
            SystemError::UnsupportedOperator { ref operator, .. } if operator == "f"
        ));
    }
}
