use crate::error::{EvaluationError, SystemError};
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::system::{Slot, SymbolicSystem};
use crate::traits::{DynamicalSystem, Scalar};
use log::debug;

/// OpCodes for the stack-based virtual machine.
/// The VM operates on a stack of `Scalar` values (f64 or f32).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant onto the stack.
    LoadConst(f64),
    /// Pushes the value of a state variable (by index) onto the stack.
    LoadVar(usize),
    /// Pushes the value of a parameter (by index) onto the stack.
    LoadParam(usize),
    /// Pushes the current time onto the stack.
    LoadTime,
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    Sub,
    Mul,
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes -a.
    Neg,
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
    Abs,
    Tanh,
}

/// A compiled sequence of operations computing one scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    ops: Vec<OpCode>,
    max_stack: usize,
}

impl Bytecode {
    pub fn ops(&self) -> &[OpCode] {
        &self.ops
    }

    /// Deepest stack the program reaches.
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }
}

/// Stack-based virtual machine.
///
/// Every intermediate with no finite value becomes NaN, matching the lenient
/// tree evaluator: `1/0` yields NaN rather than `inf`.
///
/// The VM is stateless; `execute` takes all necessary context and a scratch
/// stack owned by the caller, so a compiled program can run on many threads
/// at once.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        vars: &[T],
        params: &[T],
        t: T,
        stack: &mut Vec<T>,
    ) -> T {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(finite_or_nan(T::lit(val))),
                OpCode::LoadVar(idx) => stack.push(finite_or_nan(vars[idx])),
                OpCode::LoadParam(idx) => stack.push(finite_or_nan(params[idx])),
                OpCode::LoadTime => stack.push(finite_or_nan(t)),
                OpCode::Add => binary(stack, |a, b| a + b),
                OpCode::Sub => binary(stack, |a, b| a - b),
                OpCode::Mul => binary(stack, |a, b| a * b),
                OpCode::Div => binary(stack, |a, b| a / b),
                OpCode::Pow => binary(stack, |a, b| a.powf(b)),
                OpCode::Neg => unary(stack, |a| -a),
                OpCode::Sin => unary(stack, T::sin),
                OpCode::Cos => unary(stack, T::cos),
                OpCode::Tan => unary(stack, T::tan),
                OpCode::Exp => unary(stack, T::exp),
                OpCode::Ln => unary(stack, T::ln),
                OpCode::Sqrt => unary(stack, T::sqrt),
                OpCode::Abs => unary(stack, T::abs),
                OpCode::Tanh => unary(stack, T::tanh),
            }
        }

        // Compilation guarantees exactly one value remains.
        stack.pop().unwrap_or_else(T::nan)
    }
}

fn finite_or_nan<T: Scalar>(value: T) -> T {
    if value.is_finite() {
        value
    } else {
        T::nan()
    }
}

fn pop<T: Scalar>(stack: &mut Vec<T>) -> T {
    stack.pop().unwrap_or_else(T::nan)
}

fn binary<T: Scalar>(stack: &mut Vec<T>, f: impl Fn(T, T) -> T) {
    let b = pop(stack);
    let a = pop(stack);
    stack.push(finite_or_nan(f(a, b)));
}

fn unary<T: Scalar>(stack: &mut Vec<T>, f: impl Fn(T) -> T) {
    let a = pop(stack);
    stack.push(finite_or_nan(f(a)));
}

/// Lowers expression trees over a system's symbols into `Bytecode`.
pub struct Compiler<'a> {
    system: &'a SymbolicSystem,
}

impl<'a> Compiler<'a> {
    pub fn new(system: &'a SymbolicSystem) -> Self {
        Self { system }
    }

    /// Compiles `expr`; `context` names it in error messages.
    pub fn compile(&self, expr: &Expr, context: &str) -> Result<Bytecode, SystemError> {
        let mut ops = Vec::with_capacity(expr.size());
        let mut depth = 0;
        let mut max_stack = 0;
        self.compile_recursive(expr, context, &mut ops, &mut depth, &mut max_stack)?;
        Ok(Bytecode { ops, max_stack })
    }

    fn compile_recursive(
        &self,
        expr: &Expr,
        context: &str,
        ops: &mut Vec<OpCode>,
        depth: &mut usize,
        max_stack: &mut usize,
    ) -> Result<(), SystemError> {
        match expr {
            Expr::Constant(value) => {
                ops.push(OpCode::LoadConst(*value));
                *depth += 1;
            }
            Expr::Symbol(symbol) => {
                let op = match self.system.slot(symbol) {
                    Some(Slot::State(idx)) => OpCode::LoadVar(idx),
                    Some(Slot::Param(idx)) => OpCode::LoadParam(idx),
                    Some(Slot::Time) => OpCode::LoadTime,
                    None => {
                        return Err(SystemError::UnboundVariable {
                            name: symbol.name().to_string(),
                            context: context.to_string(),
                        })
                    }
                };
                ops.push(op);
                *depth += 1;
            }
            Expr::Binary(op, left, right) => {
                self.compile_recursive(left, context, ops, depth, max_stack)?;
                self.compile_recursive(right, context, ops, depth, max_stack)?;
                ops.push(match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                    BinaryOp::Pow => OpCode::Pow,
                });
                *depth -= 1;
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, context, ops, depth, max_stack)?;
                ops.push(match op {
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::Sin => OpCode::Sin,
                    UnaryOp::Cos => OpCode::Cos,
                    UnaryOp::Tan => OpCode::Tan,
                    UnaryOp::Exp => OpCode::Exp,
                    UnaryOp::Ln => OpCode::Ln,
                    UnaryOp::Sqrt => OpCode::Sqrt,
                    UnaryOp::Abs => OpCode::Abs,
                    UnaryOp::Tanh => OpCode::Tanh,
                    UnaryOp::Function(name) => {
                        return Err(SystemError::UnsupportedOperator {
                            operator: name.to_string(),
                            context: context.to_string(),
                        })
                    }
                });
            }
        }
        *max_stack = (*max_stack).max(*depth);
        Ok(())
    }
}

fn convert_params<T: Scalar>(system: &SymbolicSystem) -> Vec<T> {
    system.parameter_values().into_iter().map(T::lit).collect()
}

fn rebind<T: Scalar>(current: &[T], values: &[T]) -> Result<Vec<T>, SystemError> {
    if values.len() != current.len() {
        return Err(SystemError::ParameterCount {
            expected: current.len(),
            got: values.len(),
        });
    }
    Ok(values.to_vec())
}

/// The vector field of a system lowered to bytecode: one program per
/// equation. Holds no mutable state and is `Send + Sync`.
#[derive(Debug, Clone)]
pub struct CompiledField<T: Scalar = f64> {
    equations: Vec<Bytecode>,
    params: Vec<T>,
    max_stack: usize,
}

impl<T: Scalar> CompiledField<T> {
    pub fn params(&self) -> &[T] {
        &self.params
    }

    /// Returns a copy evaluating with different parameter values, in the
    /// order of `SymbolicSystem::parameters`.
    pub fn with_params(&self, values: &[T]) -> Result<Self, SystemError> {
        Ok(Self {
            equations: self.equations.clone(),
            params: rebind(&self.params, values)?,
            max_stack: self.max_stack,
        })
    }

    pub fn bytecode(&self) -> &[Bytecode] {
        &self.equations
    }

    /// Evaluates the field into a freshly allocated vector.
    pub fn call(&self, t: T, x: &[T]) -> Result<Vec<T>, EvaluationError> {
        if x.len() != self.equations.len() {
            return Err(EvaluationError::StateLength {
                expected: self.equations.len(),
                got: x.len(),
            });
        }
        let mut out = vec![T::zero(); x.len()];
        self.apply(t, x, &mut out);
        Ok(out)
    }
}

impl<T: Scalar> DynamicalSystem<T> for CompiledField<T> {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn apply(&self, t: T, x: &[T], out: &mut [T]) {
        let mut stack = Vec::with_capacity(self.max_stack);
        for (i, eq) in self.equations.iter().enumerate() {
            out[i] = VM::execute(eq, x, &self.params, t, &mut stack);
        }
    }
}

/// A single scalar observable over a system's symbols.
#[derive(Debug, Clone)]
pub struct CompiledScalar<T: Scalar = f64> {
    code: Bytecode,
    params: Vec<T>,
}

impl<T: Scalar> CompiledScalar<T> {
    pub fn eval(&self, t: T, x: &[T]) -> T {
        let mut stack = Vec::with_capacity(self.code.max_stack);
        VM::execute(&self.code, x, &self.params, t, &mut stack)
    }

    pub fn with_params(&self, values: &[T]) -> Result<Self, SystemError> {
        Ok(Self {
            code: self.code.clone(),
            params: rebind(&self.params, values)?,
        })
    }
}

/// The cached symbolic Jacobian lowered to bytecode, row-major.
#[derive(Debug, Clone)]
pub struct CompiledJacobian<T: Scalar = f64> {
    dim: usize,
    entries: Vec<Bytecode>,
    params: Vec<T>,
    max_stack: usize,
}

impl<T: Scalar> CompiledJacobian<T> {
    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn eval_into(&self, t: T, x: &[T], out: &mut [T]) {
        let mut stack = Vec::with_capacity(self.max_stack);
        for (i, entry) in self.entries.iter().enumerate() {
            out[i] = VM::execute(entry, x, &self.params, t, &mut stack);
        }
    }

    pub fn eval(&self, t: T, x: &[T]) -> Result<Vec<T>, EvaluationError> {
        if x.len() != self.dim {
            return Err(EvaluationError::StateLength {
                expected: self.dim,
                got: x.len(),
            });
        }
        let mut out = vec![T::zero(); self.dim * self.dim];
        self.eval_into(t, x, &mut out);
        Ok(out)
    }
}

fn equation_context(system: &SymbolicSystem, i: usize) -> String {
    format!("equation {i} (d{}/dt)", system.symbols()[i])
}

/// Lowers every equation of `system`. Unsupported operators are reported
/// here rather than at first evaluation.
pub fn compile<T: Scalar>(system: &SymbolicSystem) -> Result<CompiledField<T>, SystemError> {
    let compiler = Compiler::new(system);
    let equations = system
        .equations()
        .iter()
        .enumerate()
        .map(|(i, eq)| compiler.compile(eq, &equation_context(system, i)))
        .collect::<Result<Vec<_>, _>>()?;
    let max_stack = equations.iter().map(Bytecode::max_stack).max().unwrap_or(0);
    debug!(
        "compiled {} equations into {} ops (max stack {})",
        equations.len(),
        equations.iter().map(|b| b.ops.len()).sum::<usize>(),
        max_stack
    );
    Ok(CompiledField {
        equations,
        params: convert_params(system),
        max_stack,
    })
}

/// Lowers a standalone expression over the symbols of `system`.
pub fn compile_scalar<T: Scalar>(
    system: &SymbolicSystem,
    expr: &Expr,
) -> Result<CompiledScalar<T>, SystemError> {
    let code = Compiler::new(system).compile(expr, &format!("observable `{expr}`"))?;
    Ok(CompiledScalar {
        code,
        params: convert_params(system),
    })
}

pub fn compile_jacobian<T: Scalar>(
    system: &SymbolicSystem,
) -> Result<CompiledJacobian<T>, SystemError> {
    let jacobian = system.jacobian();
    let dim = jacobian.dimension();
    let compiler = Compiler::new(system);
    let entries = jacobian
        .entries()
        .iter()
        .enumerate()
        .map(|(k, entry)| {
            compiler.compile(entry, &format!("jacobian entry ({}, {})", k / dim, k % dim))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let max_stack = entries.iter().map(Bytecode::max_stack).max().unwrap_or(0);
    Ok(CompiledJacobian {
        dim,
        entries,
        params: convert_params(system),
        max_stack,
    })
}
