// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use super::ErrorCode::*;
use super::Token::*;
use super::{EquationError, ErrorCode, Lexer, Token};

fn test(input: &str, expected: Vec<(&str, Token)>) {
    let tokenizer = Lexer::new(input);
    let len = expected.len();
    for (token, (expected_span, expected_tok)) in tokenizer.zip(expected.into_iter()) {
        let expected_start = expected_span.find('~').unwrap();
        let expected_end = expected_span.rfind('~').unwrap() + 1;
        assert_eq!(Ok((expected_start, expected_tok, expected_end)), token);
    }

    let tokenizer = Lexer::new(input);
    assert_eq!(None, tokenizer.skip(len).next());
}

fn test_err(input: &str, expected: (&str, ErrorCode)) {
    let mut tokenizer = Lexer::new(input);
    let token = tokenizer.find(|t| t.is_err()).unwrap();
    let (expected_span, expected_code) = expected;
    let expected_start = expected_span.find('~').unwrap();
    let expected_end = expected_span.rfind('~').unwrap() + 1;
    let expected_err = EquationError {
        start: expected_start as u16,
        end: expected_end as u16,
        code: expected_code,
    };
    assert_eq!(Err(expected_err), token);
}

#[test]
fn lte() {
    test("<=", vec![("~~", Lte)]);
}

#[test]
fn gte() {
    test(">=", vec![("~~", Gte)]);
}

#[test]
fn double_eq() {
    test(
        "a == b",
        vec![
            ("~     ", Ident("a")),
            ("  ~~  ", Eq),
            ("     ~", Ident("b")),
        ],
    );
}

#[test]
fn neq() {
    test("!=", vec![("~~", Neq)]);
}

#[test]
fn bang_is_not() {
    test("!a", vec![("~ ", Not), (" ~", Ident("a"))]);
}

#[test]
fn negative_num() {
    test("-3", vec![("~ ", Minus), (" ~", Num("3"))]);
}

#[test]
fn exponent_num() {
    test("3.2e-5", vec![("~~~~~~", Num("3.2e-5"))]);
}

#[test]
fn keywords() {
    test(
        "a and b or not true",
        vec![
            ("~                  ", Ident("a")),
            ("  ~~~              ", And),
            ("      ~            ", Ident("b")),
            ("        ~~         ", Or),
            ("           ~~~     ", Not),
            ("               ~~~~", True),
        ],
    );
    test("false", vec![("~~~~~", False)]);
}

#[test]
fn symbolic_logic() {
    test(
        "a && b || c",
        vec![
            ("~          ", Ident("a")),
            ("  ~~       ", And),
            ("     ~     ", Ident("b")),
            ("       ~~  ", Or),
            ("          ~", Ident("c")),
        ],
    );
}

#[test]
fn dotted_ident() {
    test("train.pos", vec![("~~~~~~~~~", Ident("train.pos"))]);
}

#[test]
fn call_tokens() {
    test(
        "sqrt(x, 2)",
        vec![
            ("~~~~      ", Ident("sqrt")),
            ("    ~     ", LParen),
            ("     ~    ", Ident("x")),
            ("      ~   ", Comma),
            ("        ~ ", Num("2")),
            ("         ~", RParen),
        ],
    );
}

#[test]
fn arithmetic() {
    test(
        "x + y * 2 ^ z",
        vec![
            ("~            ", Ident("x")),
            ("  ~          ", Plus),
            ("    ~        ", Ident("y")),
            ("      ~      ", Mul),
            ("        ~    ", Num("2")),
            ("          ~  ", Exp),
            ("            ~", Ident("z")),
        ],
    );
}

#[test]
fn single_eq_is_error() {
    test_err("a = b", ("  ~  ", InvalidToken));
}

#[test]
fn lone_ampersand_is_error() {
    test_err("a & b", ("  ~~ ", InvalidToken));
}

#[test]
fn unknown_char_is_error() {
    test_err("a $ b", ("  ~  ", InvalidToken));
}
