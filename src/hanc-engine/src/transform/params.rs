// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Parameter propagation.
//!
//! Each instance's parameter bindings are evaluated in the enclosing
//! scope and the results recorded per instance path.  Under
//! compile-time parametrisation the C back-end inlines these values
//! as `#define`s in per-instance sources; under run-time
//! parametrisation they are written into struct fields at init.

use std::collections::HashMap;

use crate::common::{Ident, Result};
use crate::datamodel::{Definition, Locality, Network};
use crate::eval::{eval, Env, Value};
use crate::model::HAutomaton;
use crate::parser;
use crate::project::{join_path, Project};
use crate::transform_err;

pub fn propagate_parameters(project: &mut Project) -> Result<()> {
    let mut resolved: HashMap<Ident, Vec<(Ident, Value)>> = HashMap::new();
    resolve_network("", &project.datamodel, &project.automata, &mut resolved)?;
    project.resolved_params = resolved;
    Ok(())
}

// instances are keyed by the enclosing network definition's path plus
// the instance name; bindings are constant formulas, so instances of
// a nested network resolve identically however often it is
// instantiated
fn resolve_network(
    def_path: &str,
    network: &Network,
    automata: &HashMap<Ident, HAutomaton>,
    resolved: &mut HashMap<Ident, Vec<(Ident, Value)>>,
) -> Result<()> {
    for (key, def) in network.definitions.iter() {
        if let Definition::Network(inner) = def {
            resolve_network(&join_path(def_path, key), inner, automata, resolved)?;
        }
    }

    for instance in network.instances.iter() {
        if let Some(Definition::Automaton(_)) = network.get_definition(&instance.of) {
            let automaton = match automata.get(&join_path(def_path, &instance.of)) {
                Some(automaton) => automaton,
                None => continue,
            };
            let instance_path = join_path(def_path, &instance.name);
            let values = resolve_instance(&instance_path, automaton, &instance.parameters)?;
            resolved.insert(instance_path, values);
        }
    }
    Ok(())
}

fn resolve_instance(
    instance_path: &str,
    automaton: &HAutomaton,
    bindings: &[(Ident, String)],
) -> Result<Vec<(Ident, Value)>> {
    let env = Env::default();
    let mut values = vec![];

    for param in automaton.variables_of(Locality::Parameter) {
        let bound = bindings.iter().find(|(name, _)| name == &param.name);
        let expr = match bound {
            Some((_, text)) => match parser::parse(text) {
                Ok(expr) => Some(expr),
                Err(err) => {
                    return transform_err!(
                        Generic,
                        format!("{}.{}: {}", instance_path, param.name, err)
                    );
                }
            },
            None => param.default.clone(),
        };

        let expr = match expr {
            Some(expr) => expr,
            None => {
                return transform_err!(
                    BadConfig,
                    format!("{}.{}: parameter has no value", instance_path, param.name)
                );
            }
        };

        match eval(&expr, &env) {
            Ok(value) => values.push((param.name.clone(), value)),
            Err(err) => {
                return transform_err!(
                    Generic,
                    format!("{}.{}: {}", instance_path, param.name, err)
                );
            }
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{
        Automaton, CodegenConfig, Initial, Instance, Location, VarType, Variable,
    };

    fn network_with_params() -> Network {
        Network {
            name: "main".to_string(),
            inputs: vec![],
            outputs: vec![],
            definitions: vec![(
                "Train".to_string(),
                Definition::Automaton(Automaton {
                    name: "Train".to_string(),
                    variables: vec![
                        {
                            let mut v =
                                Variable::new("pos", VarType::Real, Locality::Output);
                            v.default = Some("0".to_string());
                            v
                        },
                        {
                            let mut v = Variable::new(
                                "trainSpeed",
                                VarType::Real,
                                Locality::Parameter,
                            );
                            v.default = Some("5".to_string());
                            v
                        },
                    ],
                    locations: vec![Location {
                        name: "moving".to_string(),
                        invariant: None,
                        flows: vec![("pos".to_string(), "trainSpeed".to_string())],
                        updates: vec![],
                        transitions: vec![],
                    }],
                    functions: vec![],
                    initial: Initial {
                        location: "moving".to_string(),
                        valuations: vec![],
                    },
                }),
            )],
            instances: vec![
                Instance {
                    name: "fast".to_string(),
                    of: "Train".to_string(),
                    parameters: vec![("trainSpeed".to_string(), "2 * 5".to_string())],
                },
                Instance {
                    name: "slow".to_string(),
                    of: "Train".to_string(),
                    parameters: vec![],
                },
            ],
            mappings: vec![],
            codegen: CodegenConfig::default(),
        }
    }

    #[test]
    fn test_bindings_and_defaults() {
        let mut project = Project::new(network_with_params());
        assert!(!project.has_errors(), "{:?}", project.all_errors());

        propagate_parameters(&mut project).unwrap();

        assert_eq!(
            vec![("trainSpeed".to_string(), Value::Real(10.0))],
            project.resolved_params["fast"]
        );
        assert_eq!(
            vec![("trainSpeed".to_string(), Value::Real(5.0))],
            project.resolved_params["slow"]
        );
    }

    #[test]
    fn test_missing_value_is_an_error() {
        let mut network = network_with_params();
        if let Definition::Automaton(a) = &mut network.definitions[0].1 {
            a.variables[1].default = None;
        }
        network.instances[0].parameters.clear();

        let mut project = Project::new(network);
        let err = propagate_parameters(&mut project).unwrap_err();
        assert_eq!(crate::common::ErrorCode::BadConfig, err.code);
    }
}
