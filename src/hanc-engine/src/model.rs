// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The checked automaton stage: formulas parsed, names resolved,
//! types inferred, with problems accumulated per automaton so a
//! single run can report many of them.

use std::collections::HashMap;

use crate::ast::{Expr, Program};
use crate::common::{Error, ErrorCode, ErrorKind, Ident};
use crate::datamodel::{self, Locality, VarType};
use crate::parser;
use crate::typing;

#[derive(Clone, PartialEq, Debug)]
pub struct HVariable {
    pub name: Ident,
    pub var_type: VarType,
    pub locality: Locality,
    pub default: Option<Expr>,
    pub delayable_by: Option<Expr>,
    /// ring buffer length, filled in by the delay transformation
    pub delay_len: Option<usize>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct HTransition {
    pub target: Ident,
    pub guard: Expr,
    pub updates: Vec<(Ident, Expr)>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct HLocation {
    pub name: Ident,
    pub invariant: Option<Expr>,
    pub flows: Vec<(Ident, Expr)>,
    pub updates: Vec<(Ident, Expr)>,
    pub transitions: Vec<HTransition>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct HFunction {
    pub name: Ident,
    pub inputs: Vec<(Ident, VarType)>,
    pub body: Program,
    pub locals: HashMap<Ident, VarType>,
    pub returns: Option<VarType>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct HAutomaton {
    pub name: Ident,
    pub variables: Vec<HVariable>,
    pub locations: Vec<HLocation>,
    pub functions: Vec<HFunction>,
    pub initial_location: Ident,
    pub initial_valuations: Vec<(Ident, Expr)>,
    pub errors: Vec<Error>,
    pub warnings: Vec<Error>,
}

struct Ctx {
    errors: Vec<Error>,
    warnings: Vec<Error>,
}

impl Ctx {
    fn error(&mut self, code: ErrorCode, site: String) {
        self.errors.push(Error::new(ErrorKind::Model, code, Some(site)));
    }

    fn warn(&mut self, code: ErrorCode, site: String) {
        self.warnings
            .push(Error::new(ErrorKind::Model, code, Some(site)));
    }

    /// Parse a formula, recording failures against the named site.
    fn parse(&mut self, site: &str, text: &str) -> Option<Expr> {
        match parser::parse(text) {
            Ok(expr) => Some(expr),
            Err(err) => {
                self.error(err.code, format!("{}: {}", site, text));
                None
            }
        }
    }
}

impl HAutomaton {
    pub fn new(x: &datamodel::Automaton) -> Self {
        let mut ctx = Ctx {
            errors: vec![],
            warnings: vec![],
        };

        let mut variables: Vec<HVariable> = Vec::with_capacity(x.variables.len());
        for var in x.variables.iter() {
            if variables.iter().any(|v| v.name == var.name) {
                ctx.error(
                    ErrorCode::DuplicateName,
                    format!("{}.{}", x.name, var.name),
                );
                continue;
            }
            let default = var
                .default
                .as_ref()
                .and_then(|text| ctx.parse(&format!("{} default", var.name), text));
            let delayable_by = var
                .delayable_by
                .as_ref()
                .and_then(|text| ctx.parse(&format!("{} delayableBy", var.name), text));
            variables.push(HVariable {
                name: var.name.clone(),
                var_type: var.var_type,
                locality: var.locality,
                default,
                delayable_by,
                delay_len: None,
            });
        }

        let var_types: HashMap<Ident, VarType> = variables
            .iter()
            .map(|v| (v.name.clone(), v.var_type))
            .collect();

        let mut functions: Vec<HFunction> = Vec::with_capacity(x.functions.len());
        for func in x.functions.iter() {
            let site = format!("function {}", func.name);
            let body = match parser::parse_program(&func.body) {
                Ok(body) => body,
                Err(err) => {
                    ctx.error(err.code, site);
                    continue;
                }
            };
            functions.push(HFunction {
                name: func.name.clone(),
                inputs: func.inputs.clone(),
                body,
                locals: HashMap::new(),
                returns: None,
            });
        }

        // function return types come from unifying each body's return
        // sites; only value-returning functions are callable from
        // formulas
        let mut func_types: HashMap<Ident, VarType> = HashMap::new();
        for func in functions.iter_mut() {
            let externals: HashMap<Ident, VarType> = func.inputs.iter().cloned().collect();
            let site = format!("function {}", func.name);
            match typing::collect_variables(&func.body, &externals, &func_types) {
                Ok(locals) => match typing::return_type(&func.body, &locals, &func_types) {
                    Ok(returns) => {
                        func.locals = locals;
                        func.returns = returns;
                        if let Some(ty) = returns {
                            func_types.insert(func.name.clone(), ty);
                        }
                    }
                    Err(err) => ctx.error(err.code, site),
                },
                Err(err) => ctx.error(err.code, site),
            }
        }

        let mut locations: Vec<HLocation> = Vec::with_capacity(x.locations.len());
        for loc in x.locations.iter() {
            if locations.iter().any(|l| l.name == loc.name) {
                ctx.error(
                    ErrorCode::DuplicateName,
                    format!("{}.{}", x.name, loc.name),
                );
                continue;
            }

            let invariant = loc
                .invariant
                .as_ref()
                .and_then(|text| ctx.parse(&format!("{} invariant", loc.name), text));

            let mut flows = Vec::with_capacity(loc.flows.len());
            for (target, text) in loc.flows.iter() {
                if let Some(expr) = ctx.parse(&format!("{} flow {}", loc.name, target), text) {
                    flows.push((target.clone(), expr));
                }
            }

            let mut updates = Vec::with_capacity(loc.updates.len());
            for (target, text) in loc.updates.iter() {
                if let Some(expr) = ctx.parse(&format!("{} update {}", loc.name, target), text)
                {
                    updates.push((target.clone(), expr));
                }
            }

            let mut transitions = Vec::with_capacity(loc.transitions.len());
            for t in loc.transitions.iter() {
                let site = format!("{} -> {}", loc.name, t.target);
                let guard = match t.guard.as_ref() {
                    Some(text) => match ctx.parse(&format!("{} guard", site), text) {
                        Some(expr) => expr,
                        None => continue,
                    },
                    None => Expr::ConstBool(true, Default::default()),
                };
                let mut t_updates = Vec::with_capacity(t.updates.len());
                for (target, text) in t.updates.iter() {
                    if let Some(expr) = ctx.parse(&format!("{} update {}", site, target), text)
                    {
                        t_updates.push((target.clone(), expr));
                    }
                }
                transitions.push(HTransition {
                    target: t.target.clone(),
                    guard,
                    updates: t_updates,
                });
            }

            locations.push(HLocation {
                name: loc.name.clone(),
                invariant,
                flows,
                updates,
                transitions,
            });
        }

        let mut initial_valuations = Vec::with_capacity(x.initial.valuations.len());
        for (target, text) in x.initial.valuations.iter() {
            if let Some(expr) = ctx.parse(&format!("initial {}", target), text) {
                initial_valuations.push((target.clone(), expr));
            }
        }

        let mut automaton = HAutomaton {
            name: x.name.clone(),
            variables,
            locations,
            functions,
            initial_location: x.initial.location.clone(),
            initial_valuations,
            errors: vec![],
            warnings: vec![],
        };
        automaton.check(&mut ctx, &var_types, &func_types);
        automaton.errors = ctx.errors;
        automaton.warnings = ctx.warnings;
        automaton
    }

    fn check(
        &self,
        ctx: &mut Ctx,
        var_types: &HashMap<Ident, VarType>,
        func_types: &HashMap<Ident, VarType>,
    ) {
        let name = &self.name;

        fn expect(
            ctx: &mut Ctx,
            var_types: &HashMap<Ident, VarType>,
            func_types: &HashMap<Ident, VarType>,
            site: String,
            expr: &Expr,
            expected: Option<VarType>,
        ) {
            match typing::result_type(expr, var_types, func_types) {
                Ok(ty) => {
                    if let Some(expected) = expected {
                        if ty != expected {
                            ctx.error(ErrorCode::TypeMismatch, site);
                        }
                    }
                }
                Err(err) => ctx.error(err.code, site),
            }
        }

        if self.get_location(&self.initial_location).is_none() {
            ctx.error(
                ErrorCode::UnresolvedName,
                format!("{}: initial location {}", name, self.initial_location),
            );
        }

        for var in self.variables.iter() {
            if let Some(default) = &var.default {
                expect(
                    ctx,
                    var_types,
                    func_types,
                    format!("{}.{} default", name, var.name),
                    default,
                    Some(var.var_type),
                );
            }
            if let Some(delay) = &var.delayable_by {
                expect(
                    ctx,
                    var_types,
                    func_types,
                    format!("{}.{} delayableBy", name, var.name),
                    delay,
                    Some(VarType::Real),
                );
            }
        }

        for (target, expr) in self.initial_valuations.iter() {
            match self.get_variable(target) {
                Some(var) => expect(
                    ctx,
                    var_types,
                    func_types,
                    format!("{}: initial {}", name, target),
                    expr,
                    Some(var.var_type),
                ),
                None => ctx.error(
                    ErrorCode::UnresolvedName,
                    format!("{}: initial {}", name, target),
                ),
            }
        }

        for loc in self.locations.iter() {
            if let Some(invariant) = &loc.invariant {
                expect(
                    ctx,
                    var_types,
                    func_types,
                    format!("{}.{} invariant", name, loc.name),
                    invariant,
                    Some(VarType::Boolean),
                );
            }

            for (target, expr) in loc.flows.iter() {
                let site = format!("{}.{} flow {}", name, loc.name, target);
                match self.get_variable(target) {
                    Some(var) => {
                        if var.var_type != VarType::Real
                            || matches!(var.locality, Locality::Parameter | Locality::Input)
                        {
                            // a parameter may not have flow, and inputs
                            // are driven by the enclosing network
                            ctx.error(ErrorCode::TypeMismatch, site.clone());
                        }
                        expect(ctx, var_types, func_types, site, expr, Some(VarType::Real));
                    }
                    None => ctx.error(ErrorCode::UnresolvedName, site),
                }
            }

            let check_updates =
                |ctx: &mut Ctx, updates: &[(Ident, Expr)], where_: &str| {
                    for (target, expr) in updates.iter() {
                        let site = format!("{} update {}", where_, target);
                        match self.get_variable(target) {
                            Some(var) => {
                                if matches!(var.locality, Locality::Parameter | Locality::Input)
                                {
                                    ctx.error(ErrorCode::TypeMismatch, site.clone());
                                }
                                expect(
                                    ctx,
                                    var_types,
                                    func_types,
                                    site,
                                    expr,
                                    Some(var.var_type),
                                );
                            }
                            None => ctx.error(ErrorCode::UnresolvedName, site),
                        }
                    }
                };

            check_updates(ctx, &loc.updates, &format!("{}.{}", name, loc.name));

            for t in loc.transitions.iter() {
                let site = format!("{}.{} -> {}", name, loc.name, t.target);
                if self.get_location(&t.target).is_none() {
                    ctx.error(ErrorCode::UnresolvedName, site.clone());
                }
                expect(
                    ctx,
                    var_types,
                    func_types,
                    format!("{} guard", site),
                    &t.guard,
                    Some(VarType::Boolean),
                );
                check_updates(ctx, &t.updates, &site);
            }
        }

        // an internal variable that is neither flowed nor updated in
        // some location can go stale there
        for var in self.variables.iter() {
            if var.locality != Locality::Internal {
                continue;
            }
            for loc in self.locations.iter() {
                let touched = loc.flows.iter().any(|(t, _)| t == &var.name)
                    || loc.updates.iter().any(|(t, _)| t == &var.name)
                    || loc
                        .transitions
                        .iter()
                        .any(|t| t.updates.iter().any(|(u, _)| u == &var.name));
                if !touched {
                    ctx.warn(
                        ErrorCode::NoFlowOrUpdate,
                        format!("{}.{} in {}", name, var.name, loc.name),
                    );
                }
            }
        }
    }

    pub fn get_variable(&self, name: &str) -> Option<&HVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn get_location(&self, name: &str) -> Option<&HLocation> {
        self.locations.iter().find(|l| l.name == name)
    }

    pub fn get_function(&self, name: &str) -> Option<&HFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn variables_of(&self, locality: Locality) -> impl Iterator<Item = &HVariable> {
        self.variables.iter().filter(move |v| v.locality == locality)
    }

    pub fn var_types(&self) -> HashMap<Ident, VarType> {
        self.variables
            .iter()
            .map(|v| (v.name.clone(), v.var_type))
            .collect()
    }
}
