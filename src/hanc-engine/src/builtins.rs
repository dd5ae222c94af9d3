// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;

/// Loc describes a location in a formula by the starting point and ending point.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Hash)]
pub struct Loc {
    pub start: u16,
    pub end: u16,
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl Loc {
    pub fn new(start: usize, end: usize) -> Self {
        Loc {
            start: start as u16,
            end: end as u16,
        }
    }

    /// union takes a second Loc and returns the inclusive range from the
    /// start of the earlier token to the end of the later token.
    pub fn union(&self, rhs: &Self) -> Self {
        Loc {
            start: self.start.min(rhs.start),
            end: self.end.max(rhs.end),
        }
    }
}

#[test]
fn test_loc_basics() {
    let a = Loc { start: 3, end: 7 };
    assert_eq!(a, Loc::new(3, 7));

    let b = Loc { start: 4, end: 11 };
    assert_eq!(Loc::new(3, 11), a.union(&b));

    let c = Loc { start: 1, end: 5 };
    assert_eq!(Loc::new(1, 7), a.union(&c));
}

/// The numeric builtins available in formulas, with arity encoded in
/// the variant shape so that later stages never see a malformed call.
#[derive(PartialEq, Clone, Debug)]
pub enum BuiltinFn<Expr> {
    Abs(Box<Expr>),
    Ceil(Box<Expr>),
    Cos(Box<Expr>),
    Exp(Box<Expr>),
    Floor(Box<Expr>),
    Ln(Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Sin(Box<Expr>),
    Sqrt(Box<Expr>),
    Tan(Box<Expr>),
}

impl<Expr> BuiltinFn<Expr> {
    pub fn name(&self) -> &'static str {
        use BuiltinFn::*;
        match self {
            Abs(_) => "abs",
            Ceil(_) => "ceil",
            Cos(_) => "cos",
            Exp(_) => "exp",
            Floor(_) => "floor",
            Ln(_) => "ln",
            Pow(_, _) => "pow",
            Sin(_) => "sin",
            Sqrt(_) => "sqrt",
            Tan(_) => "tan",
        }
    }
}

pub fn is_builtin_fn(name: &str) -> bool {
    matches!(
        name,
        "abs" | "ceil" | "cos" | "exp" | "floor" | "ln" | "pow" | "sin" | "sqrt" | "tan"
    )
}

pub(crate) fn walk_builtin_expr<'a, Expr, F>(builtin: &'a BuiltinFn<Expr>, mut cb: F)
where
    F: FnMut(&'a Expr),
{
    use BuiltinFn::*;
    match builtin {
        Abs(a) | Ceil(a) | Cos(a) | Exp(a) | Floor(a) | Ln(a) | Sin(a) | Sqrt(a) | Tan(a) => {
            cb(a)
        }
        Pow(a, b) => {
            cb(a);
            cb(b);
        }
    }
}

#[test]
fn test_is_builtin_fn() {
    assert!(is_builtin_fn("sqrt"));
    assert!(is_builtin_fn("pow"));
    assert!(is_builtin_fn("ceil"));
    assert!(!is_builtin_fn("sqrtz"));
    assert!(!is_builtin_fn("lookup"));
}

#[test]
fn test_name() {
    assert_eq!("abs", BuiltinFn::<u8>::Abs(Box::new(0)).name());
    assert_eq!("pow", BuiltinFn::<u8>::Pow(Box::new(0), Box::new(1)).name());
}
