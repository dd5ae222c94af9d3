// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;
use std::{error, result};

pub type Ident = String;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError, // will never be produced
    DoesNotExist,
    InvalidToken,
    UnrecognizedEof,
    UnrecognizedToken,
    ExtraToken,
    ExpectedNumber,
    UnknownBuiltin,
    BadBuiltinArgs,
    EmptyEquation,
    UnbalancedBraces,
    UnknownField,
    UnresolvedName,
    UnresolvedMapping,
    TypeMismatch,
    TypeConflict,
    ReturnTypeConflict,
    ArityMismatch,
    MissingReturn,
    DivisionByZero,
    IncludeCycle,
    DelayUnsupported,
    UnsupportedInTarget,
    DuplicateName,
    NoFlowOrUpdate,
    BadConfig,
    XmlDeserialization,
    YamlDeserialization,
    Io,
    Generic,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            DoesNotExist => "does_not_exist",
            InvalidToken => "invalid_token",
            UnrecognizedEof => "unrecognized_eof",
            UnrecognizedToken => "unrecognized_token",
            ExtraToken => "extra_token",
            ExpectedNumber => "expected_number",
            UnknownBuiltin => "unknown_builtin",
            BadBuiltinArgs => "bad_builtin_args",
            EmptyEquation => "empty_equation",
            UnbalancedBraces => "unbalanced_braces",
            UnknownField => "unknown_field",
            UnresolvedName => "unresolved_name",
            UnresolvedMapping => "unresolved_mapping",
            TypeMismatch => "type_mismatch",
            TypeConflict => "type_conflict",
            ReturnTypeConflict => "return_type_conflict",
            ArityMismatch => "arity_mismatch",
            MissingReturn => "missing_return",
            DivisionByZero => "division_by_zero",
            IncludeCycle => "include_cycle",
            DelayUnsupported => "delay_unsupported",
            UnsupportedInTarget => "unsupported_in_target",
            DuplicateName => "duplicate_name",
            NoFlowOrUpdate => "no_flow_or_update",
            BadConfig => "bad_config",
            XmlDeserialization => "xml_deserialization",
            YamlDeserialization => "yaml_deserialization",
            Io => "io",
            Generic => "generic",
        };

        write!(f, "{}", name)
    }
}

/// An error scoped to a single formula or program, located by the
/// byte offsets of the offending token.  Formulas are strings typed
/// by humans for a single variable -- u16 is long enough.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EquationError {
    pub start: u16,
    pub end: u16,
    pub code: ErrorCode,
}

impl fmt::Display for EquationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.end, self.code)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Import,
    Model,
    Transform,
    Codegen,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
        }
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Import => "ImportError",
            ErrorKind::Model => "ModelError",
            ErrorKind::Transform => "TransformError",
            ErrorKind::Codegen => "CodegenError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Import,
            code: ErrorCode::Io,
            details: Some(err.to_string()),
        }
    }
}

impl From<(Ident, EquationError)> for Error {
    fn from(err: (Ident, EquationError)) -> Self {
        Error {
            kind: ErrorKind::Model,
            code: err.1.code,
            details: Some(err.0),
        }
    }
}

#[macro_export]
macro_rules! eqn_err(
    ($code:tt, $start:expr, $end:expr) => {{
        use $crate::common::{EquationError, ErrorCode};
        Err(EquationError{ start: $start as u16, end: $end as u16, code: ErrorCode::$code})
    }}
);

#[macro_export]
macro_rules! import_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error{
            kind: ErrorKind::Import,
            code: ErrorCode::$code,
            details: Some($str),
        })
    }}
);

#[macro_export]
macro_rules! model_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error{
            kind: ErrorKind::Model,
            code: ErrorCode::$code,
            details: Some($str),
        })
    }}
);

#[macro_export]
macro_rules! transform_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error{
            kind: ErrorKind::Transform,
            code: ErrorCode::$code,
            details: Some($str),
        })
    }}
);

#[macro_export]
macro_rules! codegen_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error{
            kind: ErrorKind::Codegen,
            code: ErrorCode::$code,
            details: Some($str),
        })
    }}
);

pub type Result<T> = result::Result<T, Error>;
pub type EquationResult<T> = result::Result<T, EquationError>;

/// The base name of a dot-qualified identifier: `train.pos` -> `pos`.
pub fn base_name(ident: &str) -> &str {
    match ident.rfind('.') {
        Some(off) => &ident[off + 1..],
        None => ident,
    }
}

/// The qualifier of a dot-qualified identifier: `train.pos` -> `Some("train")`.
pub fn qualifier(ident: &str) -> Option<&str> {
    ident.rfind('.').map(|off| &ident[..off])
}

#[test]
fn test_qualified_names() {
    assert_eq!("pos", base_name("train.pos"));
    assert_eq!("pos", base_name("pos"));
    assert_eq!(Some("train"), qualifier("train.pos"));
    assert_eq!(Some("heart.cell1"), qualifier("heart.cell1.v"));
    assert_eq!(None, qualifier("pos"));
}
