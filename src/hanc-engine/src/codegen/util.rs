// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Shared code-generation utilities: identifier mangling, indentation,
//! and formula lowering with a rename context.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, NaryOp, UnaryOp};
use crate::builtins::BuiltinFn;
use crate::common::Ident;
use crate::datamodel::VarType;

/// `TrainGate` / `train.gate` -> `train_gate` (file names)
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '.' || c == '-' || c == ' ' {
            out.push('_');
            prev_lower = false;
        } else if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// `TrainGate` -> `TRAIN_GATE` (macro names)
pub fn macro_case(name: &str) -> String {
    snake_case(name).to_uppercase()
}

/// Dots fold to underscores so dotted instance paths become legal
/// C/VHDL identifiers.
pub fn mangle_ident(name: &str) -> String {
    name.replace('.', "_")
}

/// One indentation unit per the codegen config: `indent_size` spaces,
/// or a tab when negative.
pub fn indent_unit(indent_size: i32) -> String {
    if indent_size < 0 {
        "\t".to_string()
    } else {
        " ".repeat(indent_size as usize)
    }
}

pub fn c_type(var_type: VarType) -> &'static str {
    match var_type {
        VarType::Boolean => "bool",
        VarType::Real => "double",
    }
}

/// Rename context for formula lowering: a scope prefix applied to
/// unmapped variables, plus per-name substitutions (delayed-variable
/// buffer reads, parameter macros, instance field paths).
#[derive(Clone, Debug, Default)]
pub struct PrefixData {
    pub prefix: String,
    pub substitutions: HashMap<Ident, String>,
    /// prepended to user-defined function call names
    pub call_prefix: String,
}

impl PrefixData {
    pub fn scoped(prefix: &str, call_prefix: &str) -> Self {
        PrefixData {
            prefix: prefix.to_string(),
            substitutions: HashMap::new(),
            call_prefix: call_prefix.to_string(),
        }
    }

    fn rendered_var(&self, name: &str) -> String {
        match self.substitutions.get(name) {
            Some(text) => text.clone(),
            None => format!("{}{}", self.prefix, mangle_ident(name)),
        }
    }
}

const C_ATOM: u8 = 10;

fn c_paren(parent_prec: u8, child_prec: u8, is_right: bool, text: String) -> String {
    if child_prec < parent_prec || (child_prec == parent_prec && is_right) {
        format!("({})", text)
    } else {
        text
    }
}

fn lower_c(expr: &Expr, pd: &PrefixData) -> (String, u8) {
    match expr {
        Expr::Const(s, n, _) => {
            // keep the source spelling where it is already a valid C
            // floating literal; integers gain a point so expressions
            // stay in double arithmetic
            if s.contains('.') || s.contains('e') || s.contains('E') {
                (s.clone(), C_ATOM)
            } else {
                (format!("{:?}", n), C_ATOM)
            }
        }
        Expr::ConstBool(true, _) => ("true".to_string(), C_ATOM),
        Expr::ConstBool(false, _) => ("false".to_string(), C_ATOM),
        Expr::Var(id, _) => (pd.rendered_var(id), C_ATOM),
        Expr::App(builtin, _) => {
            use BuiltinFn::*;
            let one = |f: &str, a: &Expr| format!("{}({})", f, lower_c(a, pd).0);
            let text = match builtin {
                Abs(a) => one("fabs", a),
                Ceil(a) => one("ceil", a),
                Cos(a) => one("cos", a),
                Exp(a) => one("exp", a),
                Floor(a) => one("floor", a),
                Ln(a) => one("log", a),
                Pow(a, b) => format!("pow({}, {})", lower_c(a, pd).0, lower_c(b, pd).0),
                Sin(a) => one("sin", a),
                Sqrt(a) => one("sqrt", a),
                Tan(a) => one("tan", a),
            };
            (text, C_ATOM)
        }
        Expr::Call(func, args, _) => {
            let args: Vec<String> = args.iter().map(|a| lower_c(a, pd).0).collect();
            (
                format!("{}{}({})", pd.call_prefix, snake_case(func), args.join(", ")),
                C_ATOM,
            )
        }
        Expr::Op1(op, l, _) => {
            let (text, prec) = lower_c(l, pd);
            let text = c_paren(7, prec, false, text);
            let op = match op {
                UnaryOp::Negative => "-",
                UnaryOp::Not => "!",
            };
            (format!("{}{}", op, text), 7)
        }
        Expr::Op2(BinaryOp::Exp, l, r, _) => {
            // C has no exponentiation operator
            (
                format!("pow({}, {})", lower_c(l, pd).0, lower_c(r, pd).0),
                C_ATOM,
            )
        }
        Expr::Op2(op, l, r, _) => {
            let prec = op.precedence();
            let (ltext, lprec) = lower_c(l, pd);
            let (rtext, rprec) = lower_c(r, pd);
            let ltext = c_paren(prec, lprec, false, ltext);
            let rtext = c_paren(prec, rprec, true, rtext);
            let op = match op {
                BinaryOp::Add => "+",
                BinaryOp::Sub => "-",
                BinaryOp::Mul => "*",
                BinaryOp::Div => "/",
                BinaryOp::Gt => ">",
                BinaryOp::Lt => "<",
                BinaryOp::Gte => ">=",
                BinaryOp::Lte => "<=",
                BinaryOp::Eq => "==",
                BinaryOp::Neq => "!=",
                BinaryOp::And => "&&",
                BinaryOp::Or => "||",
                BinaryOp::Exp => unreachable!(),
            };
            (format!("{} {} {}", ltext, op, rtext), prec)
        }
        Expr::Nary(op, args, _) => {
            let prec = op.precedence();
            let parts: Vec<String> = args
                .iter()
                .map(|a| {
                    let (text, child_prec) = lower_c(a, pd);
                    if child_prec <= prec {
                        format!("({})", text)
                    } else {
                        text
                    }
                })
                .collect();
            let op = match op {
                NaryOp::And => " && ",
                NaryOp::Or => " || ",
            };
            (parts.join(op), prec)
        }
    }
}

/// Lower a formula to C expression text under the given rename
/// context.
pub fn lower_expr_c(expr: &Expr, pd: &PrefixData) -> String {
    lower_c(expr, pd).0
}


/// Q16.16 fixed-point conversion used by the RTL back-end.
pub fn to_fixed(x: f64) -> i32 {
    (x * 65536.0).round() as i32
}
