// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Network flattening.
//!
//! A recursive network collapses into a single one: inner instances
//! are lifted with dotted names, inner automaton definitions with
//! dotted keys, and mappings are composed transitively so every
//! surviving mapping connects automaton ports (or the root's own
//! inputs and outputs).  External variables and observable mapping
//! paths are preserved.

use std::collections::HashMap;

use crate::ast::{print_eqn, Expr, Loc};
use crate::common::{Ident, Result};
use crate::datamodel::{Definition, Instance, Mapping, Network, Port};
use crate::parser;
use crate::project::Project;
use crate::transform_err;

pub fn flatten_project(project: &mut Project) -> Result<()> {
    let flattened = flatten_network(&project.datamodel)?;
    project.datamodel = flattened;
    project.recompile();
    Ok(())
}

fn parse_src(network: &Network, text: &str) -> Result<Expr> {
    match parser::parse(text) {
        Ok(expr) => Ok(expr),
        Err(err) => transform_err!(Generic, format!("{}: {}: {}", network.name, text, err)),
    }
}

/// Flatten one network, recursively collapsing any nested network
/// definitions it instantiates.
pub fn flatten_network(network: &Network) -> Result<Network> {
    // nested network definitions flatten first; their automaton
    // definitions lift out with dotted keys
    let mut definitions: Vec<(Ident, Definition)> = vec![];
    let mut inner_networks: HashMap<Ident, Network> = HashMap::new();

    for (key, def) in network.definitions.iter() {
        match def {
            Definition::Automaton(automaton) => {
                definitions.push((key.clone(), Definition::Automaton(automaton.clone())));
            }
            Definition::Network(inner) => {
                let inner_flat = flatten_network(inner)?;
                for (inner_key, inner_def) in inner_flat.definitions.iter() {
                    if let Definition::Automaton(automaton) = inner_def {
                        let lifted_key = format!("{}.{}", key, inner_key);
                        let mut automaton = automaton.clone();
                        automaton.name = lifted_key.clone();
                        definitions.push((lifted_key, Definition::Automaton(automaton)));
                    }
                }
                inner_networks.insert(key.clone(), inner_flat);
            }
        }
    }

    let mut instances: Vec<Instance> = vec![];
    let mut mappings: Vec<(Port, Expr)> = vec![];
    // lifted `instance.output` -> composed source expression
    let mut out_map: HashMap<Ident, Expr> = HashMap::new();

    for instance in network.instances.iter() {
        match network.get_definition(&instance.of) {
            Some(Definition::Automaton(_)) => instances.push(instance.clone()),
            Some(Definition::Network(_)) => {
                let inner = &inner_networks[&instance.of];

                // the outer formulas driving this inner network's inputs
                let mut outer_in: HashMap<Ident, Expr> = HashMap::new();
                for m in network.mappings.iter() {
                    if m.dst.instance.as_deref() == Some(instance.name.as_str()) {
                        outer_in.insert(m.dst.variable.clone(), parse_src(network, &m.src)?);
                    }
                }

                for ii in inner.instances.iter() {
                    instances.push(Instance {
                        name: format!("{}.{}", instance.name, ii.name),
                        of: format!("{}.{}", instance.of, ii.of),
                        parameters: ii.parameters.clone(),
                    });
                }

                for m in inner.mappings.iter() {
                    let src = parse_src(inner, &m.src)?;
                    let src = rewrite_lifted_src(src, &instance.name, inner, &outer_in);
                    match &m.dst.instance {
                        Some(inner_instance) => mappings.push((
                            Port {
                                instance: Some(format!("{}.{}", instance.name, inner_instance)),
                                variable: m.dst.variable.clone(),
                            },
                            src,
                        )),
                        None => {
                            // an inner network output; remembered so
                            // outer references compose through it
                            out_map
                                .insert(format!("{}.{}", instance.name, m.dst.variable), src);
                        }
                    }
                }
            }
            None => {}
        }
    }

    // outer mappings survive unless they fed a nested network's
    // input (those were consumed into the lifted mappings above)
    for m in network.mappings.iter() {
        let feeds_inner_network = m
            .dst
            .instance
            .as_ref()
            .and_then(|name| network.get_instance(name))
            .and_then(|instance| network.get_definition(&instance.of))
            .map(|def| matches!(def, Definition::Network(_)))
            .unwrap_or(false);
        if feeds_inner_network {
            continue;
        }
        mappings.push((m.dst.clone(), parse_src(network, &m.src)?));
    }

    // compose references to lifted network outputs; one pass per
    // nesting step bounds chains through sibling networks
    for _ in 0..network.instances.len().max(1) {
        let snapshot = out_map.clone();
        for (_, src) in mappings.iter_mut() {
            for (name, expr) in snapshot.iter() {
                *src = src.clone().substitute(name, expr);
            }
        }
        for src in out_map.values_mut() {
            for (name, expr) in snapshot.iter() {
                if !matches!(src, Expr::Var(v, _) if v == name) {
                    *src = src.clone().substitute(name, expr);
                }
            }
        }
    }

    Ok(Network {
        name: network.name.clone(),
        inputs: network.inputs.clone(),
        outputs: network.outputs.clone(),
        definitions,
        instances,
        mappings: mappings
            .into_iter()
            .map(|(dst, src)| Mapping {
                dst,
                src: print_eqn(&src),
            })
            .collect(),
        codegen: network.codegen.clone(),
    })
}

/// Rewrite a lifted mapping source: inner instance references gain
/// the lifting instance's prefix, and references to the inner
/// network's own inputs are replaced by the outer formulas that
/// drove them.
fn rewrite_lifted_src(
    src: Expr,
    instance_name: &str,
    inner: &Network,
    outer_in: &HashMap<Ident, Expr>,
) -> Expr {
    let mut idents: Vec<Ident> = vec![];
    src.walk_idents(&mut |id, _loc| {
        if !idents.iter().any(|seen| seen == id) {
            idents.push(id.to_string());
        }
    });

    let mut src = src;
    for id in idents {
        match id.rsplit_once('.') {
            Some((qualifier, _)) if inner.get_instance(qualifier).is_some() => {
                let lifted = format!("{}.{}", instance_name, id);
                src = src.substitute(&id, &Expr::Var(lifted, Loc::default()));
            }
            None => {
                if let Some(driver) = outer_in.get(&id) {
                    src = src.substitute(&id, driver);
                }
            }
            _ => {}
        }
    }
    src
}
