use crate::error::DomainError;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

/// A named coordinate of a state vector (or a parameter / time name).
/// Cheap to clone; compares by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn expr(&self) -> Expr {
        Expr::Symbol(self.clone())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

/// Builds symbols from a whitespace separated list: `symbols("x1 x2 x3")`.
pub fn symbols(names: &str) -> Vec<Symbol> {
    names.split_whitespace().map(Symbol::new).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    /// Applies the operator, rejecting results with no finite value.
    pub fn apply_checked(self, a: f64, b: f64) -> Result<f64, DomainError> {
        let value = match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    return Err(DomainError::DivisionByZero);
                }
                a / b
            }
            BinaryOp::Pow => {
                if a == 0.0 && b < 0.0 {
                    return Err(DomainError::DivisionByZero);
                }
                let value = a.powf(b);
                if value.is_nan() {
                    return Err(DomainError::InvalidPower);
                }
                value
            }
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(DomainError::Overflow)
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
            BinaryOp::Pow => 4,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => " + ",
            BinaryOp::Sub => " - ",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
    Abs,
    Tanh,
    /// An uninterpreted function symbol `f(x)`. It can be printed and
    /// substituted into, but has no derivative and no numeric lowering.
    Function(Arc<str>),
}

impl UnaryOp {
    /// Looks up an elementary function by name; unknown names become
    /// uninterpreted functions.
    pub fn from_name(name: &str) -> Self {
        match name {
            "sin" => UnaryOp::Sin,
            "cos" => UnaryOp::Cos,
            "tan" => UnaryOp::Tan,
            "exp" => UnaryOp::Exp,
            "ln" | "log" => UnaryOp::Ln,
            "sqrt" => UnaryOp::Sqrt,
            "abs" => UnaryOp::Abs,
            "tanh" => UnaryOp::Tanh,
            other => UnaryOp::Function(Arc::from(other)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Exp => "exp",
            UnaryOp::Ln => "ln",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Abs => "abs",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Function(name) => name,
        }
    }

    pub fn is_interpreted(&self) -> bool {
        !matches!(self, UnaryOp::Function(_))
    }

    pub fn apply_checked(&self, x: f64) -> Result<f64, DomainError> {
        let value = match self {
            UnaryOp::Neg => -x,
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tan => x.tan(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Ln => {
                if x <= 0.0 {
                    return Err(DomainError::LogOfNonPositive);
                }
                x.ln()
            }
            UnaryOp::Sqrt => {
                if x < 0.0 {
                    return Err(DomainError::SqrtOfNegative);
                }
                x.sqrt()
            }
            UnaryOp::Abs => x.abs(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Function(_) => return Err(DomainError::Uninterpreted),
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(DomainError::Overflow)
        }
    }
}

/// Immutable expression tree. Children are shared, so cloning is O(1).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(f64),
    Symbol(Symbol),
    Binary(BinaryOp, Arc<Expr>, Arc<Expr>),
    Unary(UnaryOp, Arc<Expr>),
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        Expr::Constant(value)
    }

    pub fn symbol(name: impl AsRef<str>) -> Self {
        Expr::Symbol(Symbol::new(name))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary(op, Arc::new(left), Arc::new(right))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary(op, Arc::new(operand))
    }

    pub fn pow(self, exponent: impl Into<Expr>) -> Self {
        Expr::binary(BinaryOp::Pow, self, exponent.into())
    }

    pub fn sin(self) -> Self {
        Expr::unary(UnaryOp::Sin, self)
    }

    pub fn cos(self) -> Self {
        Expr::unary(UnaryOp::Cos, self)
    }

    pub fn tan(self) -> Self {
        Expr::unary(UnaryOp::Tan, self)
    }

    pub fn exp(self) -> Self {
        Expr::unary(UnaryOp::Exp, self)
    }

    pub fn ln(self) -> Self {
        Expr::unary(UnaryOp::Ln, self)
    }

    pub fn sqrt(self) -> Self {
        Expr::unary(UnaryOp::Sqrt, self)
    }

    pub fn abs(self) -> Self {
        Expr::unary(UnaryOp::Abs, self)
    }

    pub fn tanh(self) -> Self {
        Expr::unary(UnaryOp::Tanh, self)
    }

    /// Applies an uninterpreted function `name(self)`.
    pub fn apply_function(self, name: &str) -> Self {
        Expr::unary(UnaryOp::Function(Arc::from(name)), self)
    }

    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Expr::Constant(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_constant(&self, value: f64) -> bool {
        self.as_constant() == Some(value)
    }

    /// Calls `visit` on every symbol occurrence, left to right.
    pub fn visit_symbols<'a>(&'a self, visit: &mut impl FnMut(&'a Symbol)) {
        match self {
            Expr::Constant(_) => {}
            Expr::Symbol(symbol) => visit(symbol),
            Expr::Binary(_, left, right) => {
                left.visit_symbols(visit);
                right.visit_symbols(visit);
            }
            Expr::Unary(_, operand) => operand.visit_symbols(visit),
        }
    }

    pub fn free_symbols(&self) -> BTreeSet<&Symbol> {
        let mut found = BTreeSet::new();
        self.visit_symbols(&mut |s| {
            found.insert(s);
        });
        found
    }

    pub fn depends_on(&self, symbol: &Symbol) -> bool {
        match self {
            Expr::Constant(_) => false,
            Expr::Symbol(s) => s == symbol,
            Expr::Binary(_, left, right) => left.depends_on(symbol) || right.depends_on(symbol),
            Expr::Unary(_, operand) => operand.depends_on(symbol),
        }
    }

    /// First uninterpreted function in the tree, if any.
    pub fn first_uninterpreted(&self) -> Option<&UnaryOp> {
        match self {
            Expr::Constant(_) | Expr::Symbol(_) => None,
            Expr::Binary(_, left, right) => left
                .first_uninterpreted()
                .or_else(|| right.first_uninterpreted()),
            Expr::Unary(op, operand) => {
                if op.is_interpreted() {
                    operand.first_uninterpreted()
                } else {
                    Some(op)
                }
            }
        }
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        match self {
            Expr::Constant(_) | Expr::Symbol(_) => 1,
            Expr::Binary(_, left, right) => 1 + left.size() + right.size(),
            Expr::Unary(_, operand) => 1 + operand.size(),
        }
    }

    /// Evaluates the tree with symbol values supplied by `env`.
    ///
    /// Fails on the first node whose value is not a finite real number, so
    /// a division by zero is reported instead of propagating `inf`.
    pub fn eval(&self, env: &impl Fn(&Symbol) -> f64) -> Result<f64, DomainError> {
        match self {
            Expr::Constant(value) => Ok(*value),
            Expr::Symbol(symbol) => {
                let value = env(symbol);
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(DomainError::NonFiniteInput)
                }
            }
            Expr::Binary(op, left, right) => {
                let a = left.eval(env)?;
                let b = right.eval(env)?;
                op.apply_checked(a, b)
            }
            Expr::Unary(op, operand) => op.apply_checked(operand.eval(env)?),
        }
    }

    /// Replaces symbols found in `bindings`. Untouched subtrees are shared
    /// with `self`.
    pub fn substitute(&self, bindings: &HashMap<Symbol, Expr>) -> Expr {
        match self {
            Expr::Constant(_) => self.clone(),
            Expr::Symbol(symbol) => bindings.get(symbol).cloned().unwrap_or_else(|| self.clone()),
            Expr::Binary(op, left, right) => {
                let new_left = left.substitute(bindings);
                let new_right = right.substitute(bindings);
                if new_left == **left && new_right == **right {
                    self.clone()
                } else {
                    Expr::binary(*op, new_left, new_right)
                }
            }
            Expr::Unary(op, operand) => {
                let new_operand = operand.substitute(bindings);
                if new_operand == **operand {
                    self.clone()
                } else {
                    Expr::unary(op.clone(), new_operand)
                }
            }
        }
    }

    /// Folds constant subtrees and removes additive/multiplicative
    /// identities. Folding only happens when the result is finite.
    pub fn simplify(&self) -> Expr {
        match self {
            Expr::Constant(_) | Expr::Symbol(_) => self.clone(),
            Expr::Unary(op, operand) => {
                let inner = operand.simplify();
                if let Some(c) = inner.as_constant() {
                    if let Ok(value) = op.apply_checked(c) {
                        return Expr::Constant(value);
                    }
                }
                if *op == UnaryOp::Neg {
                    if let Expr::Unary(UnaryOp::Neg, nested) = &inner {
                        return (**nested).clone();
                    }
                }
                Expr::unary(op.clone(), inner)
            }
            Expr::Binary(op, left, right) => {
                simplify_binary(*op, left.simplify(), right.simplify())
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Constant(value) if *value < 0.0 => 3,
            Expr::Constant(_) | Expr::Symbol(_) => 5,
            Expr::Binary(op, _, _) => op.precedence(),
            Expr::Unary(UnaryOp::Neg, _) => 3,
            Expr::Unary(_, _) => 5,
        }
    }
}

fn simplify_binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    if let (Some(a), Some(b)) = (left.as_constant(), right.as_constant()) {
        if let Ok(value) = op.apply_checked(a, b) {
            return Expr::Constant(value);
        }
    }
    match op {
        BinaryOp::Add if left.is_constant(0.0) => right,
        BinaryOp::Add | BinaryOp::Sub if right.is_constant(0.0) => left,
        BinaryOp::Sub if left.is_constant(0.0) => Expr::unary(UnaryOp::Neg, right).simplify(),
        BinaryOp::Mul if left.is_constant(0.0) || right.is_constant(0.0) => Expr::Constant(0.0),
        BinaryOp::Mul if left.is_constant(1.0) => right,
        BinaryOp::Mul | BinaryOp::Div if right.is_constant(1.0) => left,
        BinaryOp::Mul if left.is_constant(-1.0) => Expr::unary(UnaryOp::Neg, right).simplify(),
        BinaryOp::Div if left.is_constant(0.0) => Expr::Constant(0.0),
        BinaryOp::Pow if right.is_constant(0.0) || left.is_constant(1.0) => Expr::Constant(1.0),
        BinaryOp::Pow if right.is_constant(1.0) => left,
        _ => Expr::binary(op, left, right),
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Constant(value)
    }
}

impl From<Symbol> for Expr {
    fn from(symbol: Symbol) -> Self {
        Expr::Symbol(symbol)
    }
}

impl From<&Symbol> for Expr {
    fn from(symbol: &Symbol) -> Self {
        Expr::Symbol(symbol.clone())
    }
}

macro_rules! impl_binary_ops {
    ($($trait:ident, $method:ident, $op:expr);* $(;)?) => {$(
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }

        impl $trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, self, rhs.clone())
            }
        }

        impl $trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self.clone(), rhs)
            }
        }

        impl $trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, self.clone(), rhs.clone())
            }
        }

        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::binary($op, self, Expr::Constant(rhs))
            }
        }

        impl $trait<f64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::binary($op, self.clone(), Expr::Constant(rhs))
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, Expr::Constant(self), rhs)
            }
        }

        impl $trait<&Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, Expr::Constant(self), rhs.clone())
            }
        }
    )*};
}

impl_binary_ops!(
    Add, add, BinaryOp::Add;
    Sub, sub, BinaryOp::Sub;
    Mul, mul, BinaryOp::Mul;
    Div, div, BinaryOp::Div;
);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self.clone())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(value) => write!(f, "{value}"),
            Expr::Symbol(symbol) => write!(f, "{symbol}"),
            Expr::Unary(UnaryOp::Neg, operand) => {
                f.write_str("-")?;
                write_operand(f, operand, operand.precedence() < 4)
            }
            Expr::Unary(op, operand) => write!(f, "{}({operand})", op.name()),
            Expr::Binary(op, left, right) => {
                let prec = op.precedence();
                // ^ is right associative, the others left associative
                let (left_parens, right_parens) = match op {
                    BinaryOp::Pow => (left.precedence() <= prec, right.precedence() < prec),
                    BinaryOp::Sub | BinaryOp::Div => {
                        (left.precedence() < prec, right.precedence() <= prec)
                    }
                    BinaryOp::Add | BinaryOp::Mul => {
                        (left.precedence() < prec, right.precedence() < prec)
                    }
                };
                write_operand(f, left, left_parens)?;
                f.write_str(op.symbol())?;
                write_operand(f, right, right_parens)
            }
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({expr})")
    } else {
        write!(f, "{expr}")
    }
}
