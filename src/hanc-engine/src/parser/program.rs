// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Line-oriented parser for the statement language.
//!
//! Conditional bodies are brace-delimited and extracted by scanning
//! forward counting brace depth; the body text is then parsed
//! recursively as a program of its own.

use crate::ast::{Line, Program};
use crate::common::{EquationResult, ErrorCode};
use crate::eqn_err;
use crate::parser::parse;

enum Header {
    If(String),
    ElseIf(String),
    Else,
}

/// Returns the header kind and condition text if this line opens a
/// conditional block.  A conditional keyword without a trailing `{`
/// is an unbalanced-braces error, not a formula.
fn conditional_header(line: &str) -> EquationResult<Option<Header>> {
    fn after_keyword(line: &str, kw: &str) -> Option<usize> {
        if !line.starts_with(kw) {
            return None;
        }
        let rest = &line[kw.len()..];
        match rest.chars().next() {
            None => Some(kw.len()),
            Some(c) if !c.is_alphanumeric() && c != '_' => Some(kw.len()),
            Some(_) => None,
        }
    }

    if let Some(off) = after_keyword(line, "else") {
        let rest = line[off..].trim();
        if rest == "{" {
            return Ok(Some(Header::Else));
        }
        if let Some(inner_off) = after_keyword(rest, "if") {
            let cond = rest[inner_off..].trim();
            if let Some(cond) = cond.strip_suffix('{') {
                return Ok(Some(Header::ElseIf(cond.trim().to_string())));
            }
        }
        return eqn_err!(UnbalancedBraces, 0, line.len());
    }

    if let Some(off) = after_keyword(line, "if") {
        let cond = line[off..].trim();
        if let Some(cond) = cond.strip_suffix('{') {
            return Ok(Some(Header::If(cond.trim().to_string())));
        }
        return eqn_err!(UnbalancedBraces, 0, line.len());
    }

    Ok(None)
}

/// Extract the body of a conditional that opened on the previous line.
/// Scans forward counting brace depth (opens increment, closes
/// decrement) until depth returns to zero; reaching end-of-text first
/// is an unbalanced-braces error.
fn extract_body(lines: &[&str], start: usize) -> EquationResult<(Vec<String>, usize)> {
    let mut depth = 1i32;
    let mut body: Vec<String> = Vec::new();

    let mut i = start;
    while i < lines.len() {
        let line = lines[i];
        let mut close_pos = None;
        for (k, ch) in line.char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close_pos = Some(k);
                        break;
                    }
                }
                _ => {}
            }
        }

        if let Some(k) = close_pos {
            let before = line[..k].trim();
            if !before.is_empty() {
                body.push(before.to_string());
            }
            let after = line[k + 1..].trim();
            if !after.is_empty() {
                return eqn_err!(ExtraToken, k + 1, line.len());
            }
            return Ok((body, i + 1));
        }

        body.push(line.to_string());
        i += 1;
    }

    eqn_err!(UnbalancedBraces, 0, 0)
}

/// Returns the assignment target and right-hand side if this line is
/// an assignment: a single `=` that is not part of `==`, `!=`, `<=`,
/// or `>=`, with a plain identifier on the left.
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let bytes = line.as_bytes();
    for (k, &b) in bytes.iter().enumerate() {
        if b != b'=' {
            continue;
        }
        if k > 0 && matches!(bytes[k - 1], b'=' | b'!' | b'<' | b'>') {
            continue;
        }
        if k + 1 < bytes.len() && bytes[k + 1] == b'=' {
            continue;
        }

        let target = line[..k].trim();
        let is_ident = !target.is_empty()
            && target
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_')
            && !target.chars().next().unwrap().is_ascii_digit();
        if is_ident {
            return Some((target, &line[k + 1..]));
        }
        return None;
    }
    None
}

fn parse_lines(lines: &[&str]) -> EquationResult<Program> {
    let mut out: Vec<Line> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if line.is_empty() {
            i += 1;
            continue;
        }

        if let Some(header) = conditional_header(line)? {
            let (body_lines, next_i) = extract_body(lines, i + 1)?;
            let body_refs: Vec<&str> = body_lines.iter().map(|s| s.as_str()).collect();
            let body = parse_lines(&body_refs)?;
            let line = match header {
                Header::If(cond) => Line::If(parse(&cond)?, body),
                Header::ElseIf(cond) => Line::ElseIf(parse(&cond)?, body),
                Header::Else => Line::Else(body),
            };
            out.push(line);
            i = next_i;
            continue;
        }

        if line == "return" || line.starts_with("return ") || line.starts_with("return\t") {
            let rest = &line["return".len()..];
            out.push(Line::Return(parse(rest)?));
        } else if let Some((target, rhs)) = split_assignment(line) {
            out.push(Line::Assign(target.to_string(), parse(rhs)?));
        } else {
            out.push(Line::Stmt(parse(line)?));
        }

        i += 1;
    }

    Ok(Program { lines: out })
}

/// Parse the line-oriented statement language into a program.
pub fn parse_program(text: &str) -> EquationResult<Program> {
    let lines: Vec<&str> = text.lines().collect();
    parse_lines(&lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::print_program;

    #[test]
    fn test_simple_lines() {
        let prog = parse_program("x = 1\nreturn x + 2\n").unwrap();
        assert_eq!(2, prog.lines.len());
        assert!(matches!(prog.lines[0], Line::Assign(ref t, _) if t == "x"));
        assert!(matches!(prog.lines[1], Line::Return(_)));
    }

    #[test]
    fn test_blank_lines_ignored() {
        let prog = parse_program("\n\nx = 1\n\n").unwrap();
        assert_eq!(1, prog.lines.len());
    }

    #[test]
    fn test_conditional_chain() {
        let src = "if (x > 1) {\n    y = 1\n}\nelse if (x > 0) {\n    y = 2\n}\nelse {\n    y = 3\n}\n";
        let prog = parse_program(src).unwrap();
        assert_eq!(3, prog.lines.len());
        assert!(matches!(prog.lines[0], Line::If(_, _)));
        assert!(matches!(prog.lines[1], Line::ElseIf(_, _)));
        assert!(matches!(prog.lines[2], Line::Else(_)));
    }

    #[test]
    fn test_nested_conditionals() {
        let src = "if (a) {\n    if (b) {\n        x = 1\n    }\n}\n";
        let prog = parse_program(src).unwrap();
        assert_eq!(1, prog.lines.len());
        if let Line::If(_, body) = &prog.lines[0] {
            assert_eq!(1, body.lines.len());
            assert!(matches!(body.lines[0], Line::If(_, _)));
        } else {
            panic!("expected if line");
        }
    }

    #[test]
    fn test_unbalanced_braces() {
        let err = parse_program("if (a) {\n    x = 1\n").unwrap_err();
        assert_eq!(ErrorCode::UnbalancedBraces, err.code);

        let err = parse_program("if (a)\n").unwrap_err();
        assert_eq!(ErrorCode::UnbalancedBraces, err.code);
    }

    #[test]
    fn test_bare_statement() {
        let prog = parse_program("f(x, 2)\n").unwrap();
        assert!(matches!(prog.lines[0], Line::Stmt(_)));
    }

    #[test]
    fn test_comparison_is_not_assignment() {
        let prog = parse_program("x == 1\n").unwrap();
        assert!(matches!(prog.lines[0], Line::Stmt(_)));
        let prog = parse_program("x <= 1\n").unwrap();
        assert!(matches!(prog.lines[0], Line::Stmt(_)));
    }

    #[test]
    fn test_round_trip() {
        let src = "x = 1\nif (x > 0) {\n    return x\n}\nelse {\n    return 0\n}\n";
        let prog = parse_program(src).unwrap();
        let printed = print_program(&prog);
        assert_eq!(prog, parse_program(&printed).unwrap());
    }
}
