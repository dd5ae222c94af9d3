// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Side-effect free evaluation of formulas and programs against an
//! environment of named values.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, Line, NaryOp, Program, UnaryOp};
use crate::builtins::{BuiltinFn, Loc};
use crate::common::{EquationResult, Ident};
use crate::eqn_err;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Value {
    Real(f64),
    Bool(bool),
}

impl Value {
    fn as_real(&self, loc: Loc) -> EquationResult<f64> {
        match self {
            Value::Real(n) => Ok(*n),
            Value::Bool(_) => eqn_err!(TypeMismatch, loc.start, loc.end),
        }
    }

    fn as_bool(&self, loc: Loc) -> EquationResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Real(_) => eqn_err!(TypeMismatch, loc.start, loc.end),
        }
    }
}

/// A function callable from formulas: ordered input names and a body
/// program that must return a value.
#[derive(Clone, Debug, Default)]
pub struct FuncDef {
    pub inputs: Vec<Ident>,
    pub body: Program,
}

/// Name bindings for evaluation.  Functions are shared down into
/// nested call scopes; values are not -- a function body sees only
/// its own inputs and locals.
#[derive(Clone, Debug, Default)]
pub struct Env {
    pub values: HashMap<Ident, Value>,
    pub functions: HashMap<Ident, FuncDef>,
}

impl Env {
    pub fn with_values(values: HashMap<Ident, Value>) -> Self {
        Env {
            values,
            functions: HashMap::new(),
        }
    }
}

/// Evaluate a formula in the given environment.  Evaluation is pure
/// and deterministic.
pub fn eval(expr: &Expr, env: &Env) -> EquationResult<Value> {
    let result = match expr {
        Expr::Const(_, n, _) => Value::Real(*n),
        Expr::ConstBool(b, _) => Value::Bool(*b),
        Expr::Var(id, loc) => match env.values.get(id) {
            Some(value) => *value,
            None => {
                return eqn_err!(UnresolvedName, loc.start, loc.end);
            }
        },
        Expr::App(builtin, loc) => {
            use BuiltinFn::*;
            let loc = *loc;
            let n = match builtin {
                Abs(a) => eval(a, env)?.as_real(loc)?.abs(),
                Ceil(a) => eval(a, env)?.as_real(loc)?.ceil(),
                Cos(a) => eval(a, env)?.as_real(loc)?.cos(),
                Exp(a) => eval(a, env)?.as_real(loc)?.exp(),
                Floor(a) => eval(a, env)?.as_real(loc)?.floor(),
                Ln(a) => eval(a, env)?.as_real(loc)?.ln(),
                Pow(a, b) => {
                    let a = eval(a, env)?.as_real(loc)?;
                    let b = eval(b, env)?.as_real(loc)?;
                    a.powf(b)
                }
                Sin(a) => eval(a, env)?.as_real(loc)?.sin(),
                Sqrt(a) => eval(a, env)?.as_real(loc)?.sqrt(),
                Tan(a) => eval(a, env)?.as_real(loc)?.tan(),
            };
            Value::Real(n)
        }
        Expr::Call(func, args, loc) => {
            let def = match env.functions.get(func) {
                Some(def) => def,
                None => {
                    return eqn_err!(UnresolvedName, loc.start, loc.end);
                }
            };
            if args.len() != def.inputs.len() {
                return eqn_err!(ArityMismatch, loc.start, loc.end);
            }

            let mut values = HashMap::with_capacity(args.len());
            for (input, arg) in def.inputs.iter().zip(args.iter()) {
                values.insert(input.clone(), eval(arg, env)?);
            }
            let call_env = Env {
                values,
                functions: env.functions.clone(),
            };
            match exec_program(&def.body, call_env)? {
                Some(value) => value,
                None => {
                    return eqn_err!(MissingReturn, loc.start, loc.end);
                }
            }
        }
        Expr::Op1(op, l, loc) => {
            let l = eval(l, env)?;
            match op {
                UnaryOp::Negative => Value::Real(-l.as_real(*loc)?),
                UnaryOp::Not => Value::Bool(!l.as_bool(*loc)?),
            }
        }
        Expr::Op2(op, l, r, loc) => {
            let loc = *loc;
            let lval = eval(l, env)?;
            let rval = eval(r, env)?;
            match op {
                BinaryOp::Add => Value::Real(lval.as_real(loc)? + rval.as_real(loc)?),
                BinaryOp::Sub => Value::Real(lval.as_real(loc)? - rval.as_real(loc)?),
                BinaryOp::Mul => Value::Real(lval.as_real(loc)? * rval.as_real(loc)?),
                BinaryOp::Div => {
                    let denom = rval.as_real(loc)?;
                    if denom == 0.0 {
                        return eqn_err!(DivisionByZero, loc.start, loc.end);
                    }
                    Value::Real(lval.as_real(loc)? / denom)
                }
                BinaryOp::Exp => Value::Real(lval.as_real(loc)?.powf(rval.as_real(loc)?)),
                BinaryOp::Lt => Value::Bool(lval.as_real(loc)? < rval.as_real(loc)?),
                BinaryOp::Lte => Value::Bool(lval.as_real(loc)? <= rval.as_real(loc)?),
                BinaryOp::Gt => Value::Bool(lval.as_real(loc)? > rval.as_real(loc)?),
                BinaryOp::Gte => Value::Bool(lval.as_real(loc)? >= rval.as_real(loc)?),
                BinaryOp::Eq => Value::Bool(values_equal(lval, rval, loc)?),
                BinaryOp::Neq => Value::Bool(!values_equal(lval, rval, loc)?),
                BinaryOp::And => Value::Bool(lval.as_bool(loc)? && rval.as_bool(loc)?),
                BinaryOp::Or => Value::Bool(lval.as_bool(loc)? || rval.as_bool(loc)?),
            }
        }
        Expr::Nary(op, args, loc) => {
            let mut acc = match op {
                NaryOp::And => true,
                NaryOp::Or => false,
            };
            for arg in args.iter() {
                let b = eval(arg, env)?.as_bool(*loc)?;
                acc = match op {
                    NaryOp::And => acc && b,
                    NaryOp::Or => acc || b,
                };
            }
            Value::Bool(acc)
        }
    };

    Ok(result)
}

fn values_equal(l: Value, r: Value, loc: Loc) -> EquationResult<bool> {
    match (l, r) {
        (Value::Real(l), Value::Real(r)) => Ok(l == r),
        (Value::Bool(l), Value::Bool(r)) => Ok(l == r),
        _ => eqn_err!(TypeMismatch, loc.start, loc.end),
    }
}

/// Execute a program, returning the value of the first `return`
/// reached, if any.  Assignments made inside conditional bodies are
/// visible afterwards; declarations hoist to the program's scope.
pub fn exec_program(prog: &Program, mut env: Env) -> EquationResult<Option<Value>> {
    exec_lines(prog, &mut env)
}

fn exec_lines(prog: &Program, env: &mut Env) -> EquationResult<Option<Value>> {
    // tracks whether any branch of the current if/else-if chain fired
    let mut chain_taken: Option<bool> = None;

    for line in prog.lines.iter() {
        match line {
            Line::Stmt(e) => {
                chain_taken = None;
                eval(e, env)?;
            }
            Line::Assign(target, e) => {
                chain_taken = None;
                let value = eval(e, env)?;
                env.values.insert(target.clone(), value);
            }
            Line::Return(e) => {
                return Ok(Some(eval(e, env)?));
            }
            Line::If(cond, body) => {
                let taken = eval(cond, env)?.as_bool(cond.get_loc())?;
                if taken {
                    if let Some(value) = exec_lines(body, env)? {
                        return Ok(Some(value));
                    }
                }
                chain_taken = Some(taken);
            }
            Line::ElseIf(cond, body) => {
                let prior = match chain_taken {
                    Some(prior) => prior,
                    None => {
                        let loc = cond.get_loc();
                        return eqn_err!(Generic, loc.start, loc.end);
                    }
                };
                if !prior {
                    let taken = eval(cond, env)?.as_bool(cond.get_loc())?;
                    if taken {
                        if let Some(value) = exec_lines(body, env)? {
                            return Ok(Some(value));
                        }
                    }
                    chain_taken = Some(taken);
                }
            }
            Line::Else(body) => {
                let prior = match chain_taken {
                    Some(prior) => prior,
                    None => {
                        return eqn_err!(Generic, 0, 0);
                    }
                };
                if !prior {
                    if let Some(value) = exec_lines(body, env)? {
                        return Ok(Some(value));
                    }
                }
                chain_taken = None;
            }
        }
    }

    Ok(None)
}
