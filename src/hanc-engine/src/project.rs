// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! A project owns the imported network tree plus the checked automata
//! for every definition in it, keyed by dotted definition path.

use std::collections::HashMap;

use crate::ast::Expr;
use crate::common::{Error, ErrorCode, ErrorKind, Ident};
use crate::datamodel::{self, CodegenConfig, Definition, Locality, Network, VarType};
use crate::model::HAutomaton;
use crate::parser;
use crate::typing;

#[derive(Clone, Debug)]
pub struct Project {
    pub datamodel: Network,
    /// checked automata for every automaton definition, keyed by
    /// dotted path from the root (`Cell`, `heart.Cell`, ...)
    pub automata: HashMap<Ident, HAutomaton>,
    /// parameter values per instance path, filled in by the parameter
    /// propagation transformation
    pub resolved_params: HashMap<Ident, Vec<(Ident, crate::eval::Value)>>,
    pub errors: Vec<Error>,
}

impl Project {
    pub fn new(network: Network) -> Self {
        let mut automata = HashMap::new();
        let mut errors = vec![];

        compile_network("", &network, &mut automata, &mut errors);
        validate_logging_fields(&network, &mut errors);

        Project {
            datamodel: network,
            automata,
            resolved_params: HashMap::new(),
            errors,
        }
    }

    pub fn name(&self) -> &str {
        &self.datamodel.name
    }

    pub fn config(&self) -> &CodegenConfig {
        &self.datamodel.codegen
    }

    /// Re-run compilation after a transformation rewrote the datamodel.
    pub(crate) fn recompile(&mut self) {
        let mut automata = HashMap::new();
        let mut errors = vec![];
        compile_network("", &self.datamodel, &mut automata, &mut errors);
        validate_logging_fields(&self.datamodel, &mut errors);
        self.automata = automata;
        self.errors = errors;
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.automata.values().any(|a| !a.errors.is_empty())
    }

    /// Every accumulated problem, project-level first, then per
    /// automaton in path order.
    pub fn all_errors(&self) -> Vec<Error> {
        let mut out = self.errors.clone();
        let mut paths: Vec<&Ident> = self.automata.keys().collect();
        paths.sort();
        for path in paths {
            out.extend(self.automata[path].errors.iter().cloned());
        }
        out
    }

    pub fn all_warnings(&self) -> Vec<Error> {
        let mut out = vec![];
        let mut paths: Vec<&Ident> = self.automata.keys().collect();
        paths.sort();
        for path in paths {
            out.extend(self.automata[path].warnings.iter().cloned());
        }
        out
    }

    /// The checked automaton behind an instance of the given network.
    pub fn automaton_for(&self, network_path: &str, definition: &str) -> Option<&HAutomaton> {
        let path = join_path(network_path, definition);
        self.automata.get(&path)
    }
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn compile_network(
    path: &str,
    network: &Network,
    automata: &mut HashMap<Ident, HAutomaton>,
    errors: &mut Vec<Error>,
) {
    let mut seen_defs: Vec<&str> = vec![];
    for (def_name, def) in network.definitions.iter() {
        if seen_defs.contains(&def_name.as_str()) {
            errors.push(Error::new(
                ErrorKind::Model,
                ErrorCode::DuplicateName,
                Some(join_path(path, def_name)),
            ));
            continue;
        }
        seen_defs.push(def_name);

        match def {
            Definition::Automaton(automaton) => {
                automata.insert(join_path(path, def_name), HAutomaton::new(automaton));
            }
            Definition::Network(inner) => {
                compile_network(&join_path(path, def_name), inner, automata, errors);
            }
        }
    }

    validate_instances(path, network, automata, errors);
    validate_mappings(path, network, automata, errors);
}

fn validate_instances(
    path: &str,
    network: &Network,
    automata: &HashMap<Ident, HAutomaton>,
    errors: &mut Vec<Error>,
) {
    let mut seen: Vec<&str> = vec![];
    for instance in network.instances.iter() {
        let site = join_path(path, &instance.name);
        if seen.contains(&instance.name.as_str()) {
            errors.push(Error::new(
                ErrorKind::Model,
                ErrorCode::DuplicateName,
                Some(site.clone()),
            ));
        }
        seen.push(&instance.name);

        let def = match network.get_definition(&instance.of) {
            Some(def) => def,
            None => {
                errors.push(Error::new(
                    ErrorKind::Model,
                    ErrorCode::UnresolvedName,
                    Some(format!("{}: definition {}", site, instance.of)),
                ));
                continue;
            }
        };

        for (param, text) in instance.parameters.iter() {
            let known = match def {
                Definition::Automaton(_) => automata
                    .get(&join_path(path, &instance.of))
                    .map(|a| {
                        a.get_variable(param)
                            .map(|v| v.locality == Locality::Parameter)
                            .unwrap_or(false)
                    })
                    .unwrap_or(false),
                // networks take no parameters
                Definition::Network(_) => false,
            };
            if !known {
                errors.push(Error::new(
                    ErrorKind::Model,
                    ErrorCode::UnresolvedName,
                    Some(format!("{}: parameter {}", site, param)),
                ));
            }
            if let Err(err) = parser::parse(text) {
                errors.push(Error::new(
                    ErrorKind::Model,
                    err.code,
                    Some(format!("{}: parameter {}", site, param)),
                ));
            }
        }
    }
}

/// The inputs of a definition, as seen from the enclosing network.
fn definition_inputs<'a>(
    path: &str,
    def: &'a Definition,
    automata: &'a HashMap<Ident, HAutomaton>,
) -> Vec<(&'a str, VarType)> {
    match def {
        Definition::Automaton(automaton) => automata
            .get(&join_path(path, &automaton.name))
            .map(|a| {
                a.variables_of(Locality::Input)
                    .map(|v| (v.name.as_str(), v.var_type))
                    .collect()
            })
            .unwrap_or_default(),
        Definition::Network(network) => network
            .inputs
            .iter()
            .map(|v| (v.name.as_str(), v.var_type))
            .collect(),
    }
}

fn definition_outputs<'a>(
    path: &str,
    def: &'a Definition,
    automata: &'a HashMap<Ident, HAutomaton>,
) -> Vec<(&'a str, VarType)> {
    match def {
        Definition::Automaton(automaton) => automata
            .get(&join_path(path, &automaton.name))
            .map(|a| {
                a.variables_of(Locality::Output)
                    .map(|v| (v.name.as_str(), v.var_type))
                    .collect()
            })
            .unwrap_or_default(),
        Definition::Network(network) => network
            .outputs
            .iter()
            .map(|v| (v.name.as_str(), v.var_type))
            .collect(),
    }
}

fn validate_mappings(
    path: &str,
    network: &Network,
    automata: &HashMap<Ident, HAutomaton>,
    errors: &mut Vec<Error>,
) {
    // names visible on the source side of a mapping: network inputs
    // (undotted) and instance outputs (dotted)
    let mut src_types: HashMap<Ident, VarType> = network
        .inputs
        .iter()
        .map(|v| (v.name.clone(), v.var_type))
        .collect();
    for instance in network.instances.iter() {
        if let Some(def) = network.get_definition(&instance.of) {
            for (out, ty) in definition_outputs(path, def, automata) {
                src_types.insert(format!("{}.{}", instance.name, out), ty);
            }
        }
    }
    let no_funcs: HashMap<Ident, VarType> = HashMap::new();

    for mapping in network.mappings.iter() {
        let site = format!("{}: {} <- {}", join_path(path, &network.name), mapping.dst, mapping.src);

        // destination must be an instance input or a network output
        let dst_type = match &mapping.dst.instance {
            Some(instance_name) => match network.get_instance(instance_name) {
                Some(instance) => match network.get_definition(&instance.of) {
                    Some(def) => definition_inputs(path, def, automata)
                        .into_iter()
                        .find(|(name, _)| *name == mapping.dst.variable)
                        .map(|(_, ty)| ty),
                    None => None,
                },
                None => None,
            },
            None => network
                .outputs
                .iter()
                .find(|v| v.name == mapping.dst.variable)
                .map(|v| v.var_type),
        };

        let dst_type = match dst_type {
            Some(ty) => ty,
            None => {
                errors.push(Error::new(
                    ErrorKind::Model,
                    ErrorCode::UnresolvedMapping,
                    Some(site),
                ));
                continue;
            }
        };

        let src = match parser::parse(&mapping.src) {
            Ok(expr) => expr,
            Err(err) => {
                errors.push(Error::new(ErrorKind::Model, err.code, Some(site)));
                continue;
            }
        };

        if !mapping_sources_resolve(&src, &src_types) {
            errors.push(Error::new(
                ErrorKind::Model,
                ErrorCode::UnresolvedMapping,
                Some(site),
            ));
            continue;
        }

        match typing::result_type(&src, &src_types, &no_funcs) {
            Ok(ty) => {
                if ty != dst_type {
                    errors.push(Error::new(
                        ErrorKind::Model,
                        ErrorCode::TypeMismatch,
                        Some(site),
                    ));
                }
            }
            Err(err) => {
                errors.push(Error::new(ErrorKind::Model, err.code, Some(site)));
            }
        }
    }
}

fn mapping_sources_resolve(src: &Expr, src_types: &HashMap<Ident, VarType>) -> bool {
    let mut ok = true;
    src.walk_idents(&mut |id, _loc| {
        if !src_types.contains_key(id) {
            ok = false;
        }
    });
    ok
}

fn validate_logging_fields(network: &Network, errors: &mut Vec<Error>) {
    for field in network.codegen.logging.fields.iter() {
        let port = datamodel::Port::parse(field);
        let resolved = match &port.instance {
            Some(instance_name) => network
                .get_instance(instance_name)
                .and_then(|instance| network.get_definition(&instance.of))
                .map(|def| match def {
                    Definition::Automaton(automaton) => automaton
                        .variables_of(Locality::Output)
                        .any(|v| v.name == port.variable),
                    Definition::Network(inner) => {
                        inner.outputs.iter().any(|v| v.name == port.variable)
                    }
                })
                .unwrap_or(false),
            None => false,
        };
        if !resolved {
            errors.push(Error::new(
                ErrorKind::Model,
                ErrorCode::BadConfig,
                Some(format!("logging field {}", field)),
            ));
        }
    }
}

/// The ordered list of logged fields: the configured list, or every
/// output of every instance in declaration order.
pub fn logging_fields(network: &Network) -> Vec<String> {
    if !network.codegen.logging.fields.is_empty() {
        return network.codegen.logging.fields.clone();
    }

    let mut fields = vec![];
    for instance in network.instances.iter() {
        if let Some(def) = network.get_definition(&instance.of) {
            match def {
                Definition::Automaton(automaton) => {
                    for v in automaton.variables_of(Locality::Output) {
                        fields.push(format!("{}.{}", instance.name, v.name));
                    }
                }
                Definition::Network(inner) => {
                    for v in inner.outputs.iter() {
                        fields.push(format!("{}.{}", instance.name, v.name));
                    }
                }
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{
        Automaton, Initial, Instance, Location, Mapping, Port, Variable,
    };

    fn gate() -> Automaton {
        Automaton {
            name: "Gate".to_string(),
            variables: vec![
                Variable::new("trigger", VarType::Boolean, Locality::Input),
                {
                    let mut v = Variable::new("pos", VarType::Real, Locality::Output);
                    v.default = Some("0".to_string());
                    v
                },
            ],
            locations: vec![
                Location {
                    name: "open".to_string(),
                    invariant: None,
                    flows: vec![],
                    updates: vec![],
                    transitions: vec![crate::datamodel::Transition {
                        target: "closing".to_string(),
                        guard: Some("trigger".to_string()),
                        updates: vec![],
                    }],
                },
                Location {
                    name: "closing".to_string(),
                    invariant: Some("pos <= 90".to_string()),
                    flows: vec![("pos".to_string(), "5".to_string())],
                    updates: vec![],
                    transitions: vec![],
                },
            ],
            functions: vec![],
            initial: Initial {
                location: "open".to_string(),
                valuations: vec![],
            },
        }
    }

    fn sensor() -> Automaton {
        Automaton {
            name: "Sensor".to_string(),
            variables: vec![{
                let mut v = Variable::new("detected", VarType::Boolean, Locality::Output);
                v.default = Some("false".to_string());
                v
            }],
            locations: vec![Location {
                name: "idle".to_string(),
                invariant: None,
                flows: vec![],
                updates: vec![("detected".to_string(), "true".to_string())],
                transitions: vec![],
            }],
            functions: vec![],
            initial: Initial {
                location: "idle".to_string(),
                valuations: vec![],
            },
        }
    }

    fn x_network() -> Network {
        Network {
            name: "crossing".to_string(),
            inputs: vec![],
            outputs: vec![],
            definitions: vec![
                ("Gate".to_string(), Definition::Automaton(gate())),
                ("Sensor".to_string(), Definition::Automaton(sensor())),
            ],
            instances: vec![
                Instance {
                    name: "gate".to_string(),
                    of: "Gate".to_string(),
                    parameters: vec![],
                },
                Instance {
                    name: "sensor".to_string(),
                    of: "Sensor".to_string(),
                    parameters: vec![],
                },
            ],
            mappings: vec![Mapping {
                dst: Port::parse("gate.trigger"),
                src: "sensor.detected".to_string(),
            }],
            codegen: CodegenConfig::default(),
        }
    }

    #[test]
    fn test_clean_project() {
        let project = Project::new(x_network());
        assert!(!project.has_errors(), "{:?}", project.all_errors());
        assert_eq!(2, project.automata.len());
        assert!(project.automata.contains_key("Gate"));
    }

    #[test]
    fn test_unresolved_mapping() {
        let mut network = x_network();
        network.mappings.push(Mapping {
            dst: Port::parse("gate.nonexistent"),
            src: "sensor.detected".to_string(),
        });
        let project = Project::new(network);
        let errors = project.all_errors();
        assert_eq!(1, errors.len());
        assert_eq!(ErrorCode::UnresolvedMapping, errors[0].code);
        assert!(errors[0].details.as_ref().unwrap().contains("gate.nonexistent"));
    }

    #[test]
    fn test_unresolved_mapping_source() {
        let mut network = x_network();
        network.mappings[0].src = "sensor.gone".to_string();
        let project = Project::new(network);
        assert!(
            project
                .all_errors()
                .iter()
                .any(|e| e.code == ErrorCode::UnresolvedMapping)
        );
    }

    #[test]
    fn test_mapping_type_mismatch() {
        let mut network = x_network();
        // boolean input driven by a real-valued formula
        network.mappings[0].src = "1 + 2".to_string();
        let project = Project::new(network);
        assert!(
            project
                .all_errors()
                .iter()
                .any(|e| e.code == ErrorCode::TypeMismatch)
        );
    }

    #[test]
    fn test_default_logging_fields() {
        let network = x_network();
        assert_eq!(
            vec!["gate.pos".to_string(), "sensor.detected".to_string()],
            logging_fields(&network)
        );
    }

    #[test]
    fn test_bad_logging_field() {
        let mut network = x_network();
        network.codegen.logging.fields = vec!["gate.nope".to_string()];
        let project = Project::new(network);
        assert!(
            project
                .all_errors()
                .iter()
                .any(|e| e.code == ErrorCode::BadConfig)
        );
    }

    #[test]
    fn test_unknown_instance_definition() {
        let mut network = x_network();
        network.instances.push(Instance {
            name: "ghost".to_string(),
            of: "Missing".to_string(),
            parameters: vec![],
        });
        let project = Project::new(network);
        assert!(
            project
                .all_errors()
                .iter()
                .any(|e| e.code == ErrorCode::UnresolvedName)
        );
    }
}
