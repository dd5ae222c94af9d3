// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Result-type inference for formulas and variable discovery for
//! programs.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, Line, Program, UnaryOp};
use crate::builtins::walk_builtin_expr;
use crate::common::{EquationResult, Ident};
use crate::datamodel::VarType;
use crate::eqn_err;

/// Compute the result type of a formula given the types of its free
/// variables and the return types of callable functions.
pub fn result_type(
    expr: &Expr,
    vars: &HashMap<Ident, VarType>,
    funcs: &HashMap<Ident, VarType>,
) -> EquationResult<VarType> {
    let ty = match expr {
        Expr::Const(_, _, _) => VarType::Real,
        Expr::ConstBool(_, _) => VarType::Boolean,
        Expr::Var(id, loc) => match vars.get(id) {
            Some(ty) => *ty,
            None => {
                return eqn_err!(UnresolvedName, loc.start, loc.end);
            }
        },
        Expr::App(builtin, loc) => {
            // builtins are numeric on numeric arguments
            let mut args: Vec<&Expr> = vec![];
            walk_builtin_expr(builtin, |arg| args.push(arg));
            for arg in args {
                if result_type(arg, vars, funcs)? != VarType::Real {
                    return eqn_err!(TypeMismatch, loc.start, loc.end);
                }
            }
            VarType::Real
        }
        Expr::Call(func, args, loc) => {
            let ret = match funcs.get(func) {
                Some(ret) => *ret,
                None => {
                    return eqn_err!(UnresolvedName, loc.start, loc.end);
                }
            };
            for arg in args.iter() {
                result_type(arg, vars, funcs)?;
            }
            ret
        }
        Expr::Op1(op, l, loc) => {
            let l = result_type(l, vars, funcs)?;
            match (op, l) {
                (UnaryOp::Negative, VarType::Real) => VarType::Real,
                (UnaryOp::Not, VarType::Boolean) => VarType::Boolean,
                _ => {
                    return eqn_err!(TypeMismatch, loc.start, loc.end);
                }
            }
        }
        Expr::Op2(op, l, r, loc) => {
            let l = result_type(l, vars, funcs)?;
            let r = result_type(r, vars, funcs)?;
            match op {
                BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::Exp => {
                    if l != VarType::Real || r != VarType::Real {
                        return eqn_err!(TypeMismatch, loc.start, loc.end);
                    }
                    VarType::Real
                }
                BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
                    if l != VarType::Real || r != VarType::Real {
                        return eqn_err!(TypeMismatch, loc.start, loc.end);
                    }
                    VarType::Boolean
                }
                BinaryOp::Eq | BinaryOp::Neq => {
                    if l != r {
                        return eqn_err!(TypeMismatch, loc.start, loc.end);
                    }
                    VarType::Boolean
                }
                BinaryOp::And | BinaryOp::Or => {
                    if l != VarType::Boolean || r != VarType::Boolean {
                        return eqn_err!(TypeMismatch, loc.start, loc.end);
                    }
                    VarType::Boolean
                }
            }
        }
        Expr::Nary(_, args, loc) => {
            for arg in args.iter() {
                if result_type(arg, vars, funcs)? != VarType::Boolean {
                    return eqn_err!(TypeMismatch, loc.start, loc.end);
                }
            }
            VarType::Boolean
        }
    };

    Ok(ty)
}

/// Discover the variables of a program.  Externals are seeded with
/// their declared types; each assignment registers its target with
/// the type inferred from the right-hand side.  Names are collected
/// level by level: everything at the current nesting level is
/// registered before conditional bodies are descended into, so a
/// variable first assigned inside an `if` is still recorded at the
/// outermost enclosing scope.
pub fn collect_variables(
    prog: &Program,
    externals: &HashMap<Ident, VarType>,
    funcs: &HashMap<Ident, VarType>,
) -> EquationResult<HashMap<Ident, VarType>> {
    let mut vars = externals.clone();
    collect_level(prog, &mut vars, funcs)?;
    Ok(vars)
}

fn collect_level(
    prog: &Program,
    vars: &mut HashMap<Ident, VarType>,
    funcs: &HashMap<Ident, VarType>,
) -> EquationResult<()> {
    // first pass: this level's statements
    for line in prog.lines.iter() {
        match line {
            Line::Assign(target, e) => {
                let inferred = result_type(e, vars, funcs)?;
                match vars.get(target) {
                    None => {
                        vars.insert(target.clone(), inferred);
                    }
                    Some(existing) => {
                        if *existing != inferred {
                            let loc = e.get_loc();
                            return eqn_err!(TypeConflict, loc.start, loc.end);
                        }
                    }
                }
            }
            Line::Stmt(e) | Line::Return(e) => {
                result_type(e, vars, funcs)?;
            }
            Line::If(cond, _) | Line::ElseIf(cond, _) => {
                if result_type(cond, vars, funcs)? != VarType::Boolean {
                    let loc = cond.get_loc();
                    return eqn_err!(TypeMismatch, loc.start, loc.end);
                }
            }
            Line::Else(_) => {}
        }
    }

    // second pass: descend into conditional bodies
    for line in prog.lines.iter() {
        match line {
            Line::If(_, body) | Line::ElseIf(_, body) | Line::Else(body) => {
                collect_level(body, vars, funcs)?;
            }
            _ => {}
        }
    }

    Ok(())
}

/// Combine the types of two return sites: absent types are dominated,
/// equal types agree, unequal types conflict.
fn combine(a: Option<VarType>, b: Option<VarType>) -> EquationResult<Option<VarType>> {
    match (a, b) {
        (None, b) => Ok(b),
        (a, None) => Ok(a),
        (Some(a), Some(b)) => {
            if a == b {
                Ok(Some(a))
            } else {
                eqn_err!(ReturnTypeConflict, 0, 0)
            }
        }
    }
}

/// The unified return type of a program, scanning every `return` site
/// including those in nested conditional bodies.  `None` means the
/// program never returns a value.  A program with any `return` is
/// expected to return on every path; path coverage itself is not
/// proven here.
pub fn return_type(
    prog: &Program,
    vars: &HashMap<Ident, VarType>,
    funcs: &HashMap<Ident, VarType>,
) -> EquationResult<Option<VarType>> {
    let mut unified: Option<VarType> = None;

    for line in prog.lines.iter() {
        match line {
            Line::Return(e) => {
                let ty = result_type(e, vars, funcs)?;
                unified = combine(unified, Some(ty))?;
            }
            Line::If(_, body) | Line::ElseIf(_, body) | Line::Else(body) => {
                let ty = return_type(body, vars, funcs)?;
                unified = combine(unified, ty)?;
            }
            _ => {}
        }
    }

    Ok(unified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorCode;
    use crate::parser::{parse, parse_program};

    fn no_funcs() -> HashMap<Ident, VarType> {
        HashMap::new()
    }

    fn reals(names: &[&str]) -> HashMap<Ident, VarType> {
        names
            .iter()
            .map(|n| (n.to_string(), VarType::Real))
            .collect()
    }

    #[test]
    fn test_result_type() {
        let vars = reals(&["x", "y"]);
        let funcs = no_funcs();

        let ty = |input: &str| result_type(&parse(input).unwrap(), &vars, &funcs);

        assert_eq!(Ok(VarType::Real), ty("x + y * 2"));
        assert_eq!(Ok(VarType::Real), ty("sqrt(x)"));
        assert_eq!(Ok(VarType::Boolean), ty("x < y"));
        assert_eq!(Ok(VarType::Boolean), ty("x < y && y < 2"));
        assert_eq!(Ok(VarType::Boolean), ty("true"));
        assert_eq!(Ok(VarType::Boolean), ty("x == y"));

        assert_eq!(ErrorCode::TypeMismatch, ty("x + true").unwrap_err().code);
        assert_eq!(ErrorCode::TypeMismatch, ty("!x").unwrap_err().code);
        assert_eq!(ErrorCode::TypeMismatch, ty("x == true").unwrap_err().code);
        assert_eq!(ErrorCode::UnresolvedName, ty("z + 1").unwrap_err().code);
        assert_eq!(ErrorCode::UnresolvedName, ty("f(x)").unwrap_err().code);
    }

    #[test]
    fn test_soundness_spot_check() {
        // if result_type succeeds, eval returns a value of that type
        use crate::eval::{eval, Env, Value};

        let vars = reals(&["x"]);
        let funcs = no_funcs();
        let env = Env::with_values(
            [("x".to_string(), Value::Real(2.0))].into_iter().collect(),
        );

        for input in ["x * 3 - 1", "x > 1", "sqrt(x) <= x", "-x / 2"] {
            let e = parse(input).unwrap();
            let ty = result_type(&e, &vars, &funcs).unwrap();
            let value = eval(&e, &env).unwrap();
            match (ty, value) {
                (VarType::Real, Value::Real(_)) => {}
                (VarType::Boolean, Value::Bool(_)) => {}
                (ty, value) => panic!("{}: inferred {:?} but evaluated to {:?}", input, ty, value),
            }
        }
    }

    #[test]
    fn test_collect_variables() {
        let prog = parse_program("y = x + 1\ndone = y > 2\n").unwrap();
        let vars = collect_variables(&prog, &reals(&["x"]), &no_funcs()).unwrap();
        assert_eq!(Some(&VarType::Real), vars.get("y"));
        assert_eq!(Some(&VarType::Boolean), vars.get("done"));
        assert_eq!(Some(&VarType::Real), vars.get("x"));
    }

    #[test]
    fn test_collect_hoists_nested_names() {
        let prog =
            parse_program("if (x > 0) {\n    y = x\n}\nelse {\n    y = 0\n}\n").unwrap();
        let vars = collect_variables(&prog, &reals(&["x"]), &no_funcs()).unwrap();
        assert_eq!(Some(&VarType::Real), vars.get("y"));
    }

    #[test]
    fn test_type_conflict() {
        let prog = parse_program("x = 1\nx = true\n").unwrap();
        let err = collect_variables(&prog, &no_funcs(), &no_funcs()).unwrap_err();
        assert_eq!(ErrorCode::TypeConflict, err.code);
    }

    #[test]
    fn test_return_type_unification() {
        let vars = reals(&["x"]);
        let funcs = no_funcs();

        let prog = parse_program(
            "if (x > 0) {\n    return x\n}\nelse {\n    return 0\n}\n",
        )
        .unwrap();
        assert_eq!(
            Ok(Some(VarType::Real)),
            return_type(&prog, &vars, &funcs)
        );

        let prog = parse_program("x = 1\n").unwrap();
        assert_eq!(Ok(None), return_type(&prog, &vars, &funcs));

        let prog = parse_program(
            "if (x > 0) {\n    return x\n}\nreturn x > 1\n",
        )
        .unwrap();
        let err = return_type(&prog, &vars, &funcs).unwrap_err();
        assert_eq!(ErrorCode::ReturnTypeConflict, err.code);
    }
}
