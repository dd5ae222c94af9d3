// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

pub use crate::builtins::Loc;

use crate::builtins::{walk_builtin_expr, BuiltinFn};
use crate::common::Ident;

mod program;
pub use program::{print_program, Line, Program};

/// BinaryOp enumerates the different operators supported in formulas.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Exp,
    Mul,
    Div,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
    And,
    Or,
}

impl BinaryOp {
    /// higher the precedence, the tighter the binding.
    /// e.g. Mul.precedence() > Add.precedence()
    pub(crate) fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq => 3,
            BinaryOp::Neq => 3,
            BinaryOp::Gt => 4,
            BinaryOp::Lt => 4,
            BinaryOp::Gte => 4,
            BinaryOp::Lte => 4,
            BinaryOp::Add => 5,
            BinaryOp::Sub => 5,
            BinaryOp::Mul => 6,
            BinaryOp::Div => 6,
            BinaryOp::Exp => 8,
        }
    }
}

/// Chained `&&` or `||` over three or more operands collapse into a
/// single node; two-operand uses stay `Op2`.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum NaryOp {
    And,
    Or,
}

impl NaryOp {
    pub(crate) fn precedence(&self) -> u8 {
        match self {
            NaryOp::Or => 1,
            NaryOp::And => 2,
        }
    }
}

#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum UnaryOp {
    Negative,
    Not,
}

const UNARY_PRECEDENCE: u8 = 7;
const ATOM_PRECEDENCE: u8 = 10;

/// Expr is a parsed formula: a finite tagged tree with typed leaves.
#[derive(PartialEq, Clone, Debug)]
pub enum Expr {
    /// numeric literal; the source text is kept so serialization is faithful
    Const(String, f64, Loc),
    ConstBool(bool, Loc),
    /// possibly dot-qualified reference like `train.pos`
    Var(Ident, Loc),
    /// builtin call, arity-checked at parse time
    App(BuiltinFn<Expr>, Loc),
    /// user-defined function call, resolved against declared functions later
    Call(Ident, Vec<Expr>, Loc),
    Op1(UnaryOp, Box<Expr>, Loc),
    Op2(BinaryOp, Box<Expr>, Box<Expr>, Loc),
    Nary(NaryOp, Vec<Expr>, Loc),
}

impl Default for Expr {
    fn default() -> Self {
        Expr::Const("0.0".to_string(), 0.0, Loc::default())
    }
}

impl Expr {
    pub fn get_loc(&self) -> Loc {
        match self {
            Expr::Const(_, _, loc) => *loc,
            Expr::ConstBool(_, loc) => *loc,
            Expr::Var(_, loc) => *loc,
            Expr::App(_, loc) => *loc,
            Expr::Call(_, _, loc) => *loc,
            Expr::Op1(_, _, loc) => *loc,
            Expr::Op2(_, _, _, loc) => *loc,
            Expr::Nary(_, _, loc) => *loc,
        }
    }

    pub(crate) fn precedence(&self) -> u8 {
        match self {
            Expr::Const(_, _, _)
            | Expr::ConstBool(_, _)
            | Expr::Var(_, _)
            | Expr::App(_, _)
            | Expr::Call(_, _, _) => ATOM_PRECEDENCE,
            Expr::Op1(_, _, _) => UNARY_PRECEDENCE,
            Expr::Op2(op, _, _, _) => op.precedence(),
            Expr::Nary(op, _, _) => op.precedence(),
        }
    }

    /// Preorder walk over this expression and all subexpressions.
    pub fn walk(&self, cb: &mut impl FnMut(&Expr)) {
        cb(self);
        match self {
            Expr::Const(_, _, _) | Expr::ConstBool(_, _) | Expr::Var(_, _) => {}
            Expr::App(builtin, _) => {
                walk_builtin_expr(builtin, |arg| arg.walk(cb));
            }
            Expr::Call(_, args, _) => {
                for arg in args.iter() {
                    arg.walk(cb);
                }
            }
            Expr::Op1(_, l, _) => l.walk(cb),
            Expr::Op2(_, l, r, _) => {
                l.walk(cb);
                r.walk(cb);
            }
            Expr::Nary(_, args, _) => {
                for arg in args.iter() {
                    arg.walk(cb);
                }
            }
        }
    }

    /// Every variable referenced by this expression, with its location.
    pub fn walk_idents(&self, cb: &mut impl FnMut(&str, Loc)) {
        self.walk(&mut |e| {
            if let Expr::Var(id, loc) = e {
                cb(id, *loc);
            }
        });
    }

    /// Replace every occurrence of the named variable with the given
    /// subtree (by structural equality of the name).
    pub fn substitute(self, name: &str, value: &Expr) -> Expr {
        match self {
            Expr::Var(id, loc) => {
                if id == name {
                    value.clone()
                } else {
                    Expr::Var(id, loc)
                }
            }
            Expr::Const(_, _, _) | Expr::ConstBool(_, _) => self,
            Expr::App(builtin, loc) => {
                use BuiltinFn::*;
                let sub = |e: Box<Expr>| Box::new(e.substitute(name, value));
                let builtin = match builtin {
                    Abs(a) => Abs(sub(a)),
                    Ceil(a) => Ceil(sub(a)),
                    Cos(a) => Cos(sub(a)),
                    Exp(a) => Exp(sub(a)),
                    Floor(a) => Floor(sub(a)),
                    Ln(a) => Ln(sub(a)),
                    Pow(a, b) => Pow(sub(a), sub(b)),
                    Sin(a) => Sin(sub(a)),
                    Sqrt(a) => Sqrt(sub(a)),
                    Tan(a) => Tan(sub(a)),
                };
                Expr::App(builtin, loc)
            }
            Expr::Call(func, args, loc) => Expr::Call(
                func,
                args.into_iter().map(|a| a.substitute(name, value)).collect(),
                loc,
            ),
            Expr::Op1(op, l, loc) => Expr::Op1(op, Box::new(l.substitute(name, value)), loc),
            Expr::Op2(op, l, r, loc) => Expr::Op2(
                op,
                Box::new(l.substitute(name, value)),
                Box::new(r.substitute(name, value)),
                loc,
            ),
            Expr::Nary(op, args, loc) => Expr::Nary(
                op,
                args.into_iter().map(|a| a.substitute(name, value)).collect(),
                loc,
            ),
        }
    }
}

/// Visitors walk Expr ASTs.
pub trait Visitor<T> {
    fn walk(&mut self, e: &Expr) -> T;
}

fn child_needs_parens(parent_prec: u8, child: &Expr, is_right_operand: bool) -> bool {
    let child_prec = child.precedence();
    // equal precedence on the right would re-associate on reparse,
    // e.g. `a - (b - c)`
    child_prec < parent_prec || (child_prec == parent_prec && is_right_operand)
}

fn paren_if_necessary(parent_prec: u8, child: &Expr, is_right_operand: bool, eqn: String) -> String {
    if child_needs_parens(parent_prec, child, is_right_operand) {
        format!("({})", eqn)
    } else {
        eqn
    }
}

struct PrintVisitor {}

impl Visitor<String> for PrintVisitor {
    fn walk(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Const(s, _, _) => s.clone(),
            Expr::ConstBool(true, _) => "true".to_string(),
            Expr::ConstBool(false, _) => "false".to_string(),
            Expr::Var(id, _) => id.clone(),
            Expr::App(builtin, _) => {
                let mut args: Vec<String> = vec![];
                walk_builtin_expr(builtin, |arg| args.push(self.walk(arg)));
                format!("{}({})", builtin.name(), args.join(", "))
            }
            Expr::Call(func, call_args, _) => {
                let args: Vec<String> = call_args.iter().map(|e| self.walk(e)).collect();
                format!("{}({})", func, args.join(", "))
            }
            Expr::Op1(op, l, _) => {
                let operand = self.walk(l);
                // unary binds looser than `^`: `-a ^ b` is -(a ^ b)
                let operand = paren_if_necessary(UNARY_PRECEDENCE, l, false, operand);
                let op: &str = match op {
                    UnaryOp::Negative => "-",
                    UnaryOp::Not => "!",
                };
                format!("{}{}", op, operand)
            }
            Expr::Op2(op, l, r, _) => {
                let prec = op.precedence();
                let l = paren_if_necessary(prec, l, false, self.walk(l));
                let r = paren_if_necessary(prec, r, true, self.walk(r));
                let op: &str = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Exp => "^",
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
                };
                format!("{} {} {}", l, op, r)
            }
            Expr::Nary(op, args, _) => {
                let prec = op.precedence();
                let args: Vec<String> = args
                    .iter()
                    .map(|e| {
                        let text = self.walk(e);
                        // any same-or-looser child regroups on reparse
                        if e.precedence() <= prec {
                            format!("({})", text)
                        } else {
                            text
                        }
                    })
                    .collect();
                let op: &str = match op {
                    NaryOp::And => "&&",
                    NaryOp::Or => "||",
                };
                args.join(&format!(" {} ", op))
            }
        }
    }
}

/// Serialize a formula to canonical infix text with just enough
/// parentheses that reparsing yields a structurally equal tree.
pub fn print_eqn(expr: &Expr) -> String {
    let mut visitor = PrintVisitor {};
    visitor.walk(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(id: &str) -> Expr {
        Expr::Var(id.to_string(), Loc::default())
    }

    fn num(s: &str, n: f64) -> Expr {
        Expr::Const(s.to_string(), n, Loc::default())
    }

    #[test]
    fn test_print_eqn() {
        assert_eq!(
            "a + b",
            print_eqn(&Expr::Op2(
                BinaryOp::Add,
                Box::new(var("a")),
                Box::new(var("b")),
                Loc::new(0, 5),
            ))
        );
        assert_eq!(
            "a + b * c",
            print_eqn(&Expr::Op2(
                BinaryOp::Add,
                Box::new(var("a")),
                Box::new(Expr::Op2(
                    BinaryOp::Mul,
                    Box::new(var("b")),
                    Box::new(var("c")),
                    Loc::default(),
                )),
                Loc::default(),
            ))
        );
        assert_eq!(
            "a * (b + c)",
            print_eqn(&Expr::Op2(
                BinaryOp::Mul,
                Box::new(var("a")),
                Box::new(Expr::Op2(
                    BinaryOp::Add,
                    Box::new(var("b")),
                    Box::new(var("c")),
                    Loc::default(),
                )),
                Loc::default(),
            ))
        );
        assert_eq!(
            "a - (b - c)",
            print_eqn(&Expr::Op2(
                BinaryOp::Sub,
                Box::new(var("a")),
                Box::new(Expr::Op2(
                    BinaryOp::Sub,
                    Box::new(var("b")),
                    Box::new(var("c")),
                    Loc::default(),
                )),
                Loc::default(),
            ))
        );
        assert_eq!(
            "-(a + b)",
            print_eqn(&Expr::Op1(
                UnaryOp::Negative,
                Box::new(Expr::Op2(
                    BinaryOp::Add,
                    Box::new(var("a")),
                    Box::new(var("b")),
                    Loc::default(),
                )),
                Loc::default(),
            ))
        );
        assert_eq!(
            "!done",
            print_eqn(&Expr::Op1(
                UnaryOp::Not,
                Box::new(var("done")),
                Loc::default(),
            ))
        );
        assert_eq!("4.7", print_eqn(&num("4.7", 4.7)));
        assert_eq!("true", print_eqn(&Expr::ConstBool(true, Loc::default())));
        assert_eq!(
            "pow(a, 2)",
            print_eqn(&Expr::App(
                BuiltinFn::Pow(Box::new(var("a")), Box::new(num("2", 2.0))),
                Loc::default(),
            ))
        );
        assert_eq!(
            "f(a, 1.0)",
            print_eqn(&Expr::Call(
                "f".to_string(),
                vec![var("a"), num("1.0", 1.0)],
                Loc::default(),
            ))
        );
    }

    #[test]
    fn test_print_nary() {
        assert_eq!(
            "a && b && c",
            print_eqn(&Expr::Nary(
                NaryOp::And,
                vec![var("a"), var("b"), var("c")],
                Loc::default(),
            ))
        );
        // a nested same-op chain must keep its grouping
        assert_eq!(
            "(a && b) && c && d",
            print_eqn(&Expr::Nary(
                NaryOp::And,
                vec![
                    Expr::Op2(
                        BinaryOp::And,
                        Box::new(var("a")),
                        Box::new(var("b")),
                        Loc::default(),
                    ),
                    var("c"),
                    var("d"),
                ],
                Loc::default(),
            ))
        );
        assert_eq!(
            "x > 1 || y < 2 || z == 3",
            print_eqn(&Expr::Nary(
                NaryOp::Or,
                vec![
                    Expr::Op2(
                        BinaryOp::Gt,
                        Box::new(var("x")),
                        Box::new(num("1", 1.0)),
                        Loc::default(),
                    ),
                    Expr::Op2(
                        BinaryOp::Lt,
                        Box::new(var("y")),
                        Box::new(num("2", 2.0)),
                        Loc::default(),
                    ),
                    Expr::Op2(
                        BinaryOp::Eq,
                        Box::new(var("z")),
                        Box::new(num("3", 3.0)),
                        Loc::default(),
                    ),
                ],
                Loc::default(),
            ))
        );
    }

    #[test]
    fn test_substitute() {
        let f = Expr::Op2(
            BinaryOp::Mul,
            Box::new(var("speed")),
            Box::new(Expr::Op2(
                BinaryOp::Add,
                Box::new(var("t")),
                Box::new(var("speed")),
                Loc::default(),
            )),
            Loc::default(),
        );
        let subst = f.substitute("speed", &num("5", 5.0));
        assert_eq!("5 * (t + 5)", print_eqn(&subst));
    }

    #[test]
    fn test_walk_idents() {
        let f = Expr::Call(
            "f".to_string(),
            vec![
                var("a"),
                Expr::App(BuiltinFn::Sqrt(Box::new(var("b.c"))), Loc::default()),
            ],
            Loc::default(),
        );
        let mut seen: Vec<String> = vec![];
        f.walk_idents(&mut |id, _loc| seen.push(id.to_string()));
        assert_eq!(vec!["a".to_string(), "b.c".to_string()], seen);
    }
}
