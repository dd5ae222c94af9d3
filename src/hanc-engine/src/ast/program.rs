// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use crate::ast::{print_eqn, Expr};
use crate::common::Ident;

/// A single line of a program.  Chaining order of `If`/`ElseIf`/`Else`
/// is significant and preserved by the `lines` ordering.
#[derive(PartialEq, Clone, Debug)]
pub enum Line {
    /// a bare formula evaluated for its effect
    Stmt(Expr),
    Assign(Ident, Expr),
    Return(Expr),
    If(Expr, Program),
    ElseIf(Expr, Program),
    Else(Program),
}

/// A program is an ordered sequence of lines; conditional bodies are
/// nested programs.
#[derive(PartialEq, Clone, Debug, Default)]
pub struct Program {
    pub lines: Vec<Line>,
}

impl Program {
    /// Walk every formula in this program, including those in nested
    /// conditional bodies, in source order.
    pub fn walk_exprs(&self, cb: &mut impl FnMut(&Expr)) {
        for line in self.lines.iter() {
            match line {
                Line::Stmt(e) | Line::Assign(_, e) | Line::Return(e) => cb(e),
                Line::If(cond, body) | Line::ElseIf(cond, body) => {
                    cb(cond);
                    body.walk_exprs(cb);
                }
                Line::Else(body) => body.walk_exprs(cb),
            }
        }
    }

    /// Replace every occurrence of the named variable in every formula.
    /// Assignment targets are left untouched; they name locals, which
    /// can never shadow a substituted parameter.
    pub fn substitute(self, name: &str, value: &Expr) -> Program {
        let lines = self
            .lines
            .into_iter()
            .map(|line| match line {
                Line::Stmt(e) => Line::Stmt(e.substitute(name, value)),
                Line::Assign(target, e) => Line::Assign(target, e.substitute(name, value)),
                Line::Return(e) => Line::Return(e.substitute(name, value)),
                Line::If(cond, body) => Line::If(
                    cond.substitute(name, value),
                    body.substitute(name, value),
                ),
                Line::ElseIf(cond, body) => Line::ElseIf(
                    cond.substitute(name, value),
                    body.substitute(name, value),
                ),
                Line::Else(body) => Line::Else(body.substitute(name, value)),
            })
            .collect();
        Program { lines }
    }
}

fn print_into(prog: &Program, unit: &str, depth: usize, out: &mut String) {
    let indent = unit.repeat(depth);
    for line in prog.lines.iter() {
        match line {
            Line::Stmt(e) => {
                out.push_str(&indent);
                out.push_str(&print_eqn(e));
                out.push('\n');
            }
            Line::Assign(target, e) => {
                out.push_str(&indent);
                out.push_str(&format!("{} = {}\n", target, print_eqn(e)));
            }
            Line::Return(e) => {
                out.push_str(&indent);
                out.push_str(&format!("return {}\n", print_eqn(e)));
            }
            Line::If(cond, body) => {
                out.push_str(&indent);
                out.push_str(&format!("if ({}) {{\n", print_eqn(cond)));
                print_into(body, unit, depth + 1, out);
                out.push_str(&indent);
                out.push_str("}\n");
            }
            Line::ElseIf(cond, body) => {
                out.push_str(&indent);
                out.push_str(&format!("else if ({}) {{\n", print_eqn(cond)));
                print_into(body, unit, depth + 1, out);
                out.push_str(&indent);
                out.push_str("}\n");
            }
            Line::Else(body) => {
                out.push_str(&indent);
                out.push_str("else {\n");
                print_into(body, unit, depth + 1, out);
                out.push_str(&indent);
                out.push_str("}\n");
            }
        }
    }
}

/// Serialize a program back to its line-oriented source form.
pub fn print_program(prog: &Program) -> String {
    let mut out = String::new();
    print_into(prog, "    ", 0, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Loc};

    fn var(id: &str) -> Expr {
        Expr::Var(id.to_string(), Loc::default())
    }

    fn num(s: &str, n: f64) -> Expr {
        Expr::Const(s.to_string(), n, Loc::default())
    }

    #[test]
    fn test_print_program() {
        let prog = Program {
            lines: vec![
                Line::Assign("x".to_string(), num("1", 1.0)),
                Line::If(
                    Expr::Op2(
                        BinaryOp::Gt,
                        Box::new(var("x")),
                        Box::new(num("0", 0.0)),
                        Loc::default(),
                    ),
                    Program {
                        lines: vec![Line::Return(var("x"))],
                    },
                ),
                Line::Else(Program {
                    lines: vec![Line::Return(num("0", 0.0))],
                }),
            ],
        };
        let expected = "x = 1\nif (x > 0) {\n    return x\n}\nelse {\n    return 0\n}\n";
        assert_eq!(expected, print_program(&prog));
    }

    #[test]
    fn test_substitute_into_branches() {
        let prog = Program {
            lines: vec![Line::If(
                Expr::Op2(
                    BinaryOp::Lt,
                    Box::new(var("x")),
                    Box::new(var("limit")),
                    Loc::default(),
                ),
                Program {
                    lines: vec![Line::Return(var("limit"))],
                },
            )],
        };
        let prog = prog.substitute("limit", &num("25", 25.0));
        assert_eq!("if (x < 25) {\n    return 25\n}\n", print_program(&prog));
    }
}
