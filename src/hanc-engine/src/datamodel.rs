// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The raw intermediate representation built by importers.
//!
//! Formulas are kept as source strings at this stage; parsing and
//! checking happen when a `model::HAutomaton` is built.  Ordered
//! `Vec`s of named entries are used instead of maps so that document
//! order is preserved and code generation is deterministic.

use crate::common::Ident;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum VarType {
    Boolean,
    Real,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Locality {
    Input,
    Output,
    Internal,
    Parameter,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Variable {
    pub name: Ident,
    pub var_type: VarType,
    pub locality: Locality,
    pub default: Option<String>,
    pub delayable_by: Option<String>,
}

impl Variable {
    pub fn new(name: &str, var_type: VarType, locality: Locality) -> Self {
        Variable {
            name: name.to_string(),
            var_type,
            locality,
            default: None,
            delayable_by: None,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Transition {
    pub target: Ident,
    /// absent means `true`
    pub guard: Option<String>,
    /// ordered update map
    pub updates: Vec<(Ident, String)>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Location {
    pub name: Ident,
    /// absent means `true`
    pub invariant: Option<String>,
    /// variable -> ODE giving its derivative
    pub flows: Vec<(Ident, String)>,
    pub updates: Vec<(Ident, String)>,
    pub transitions: Vec<Transition>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Function {
    pub name: Ident,
    pub inputs: Vec<(Ident, VarType)>,
    pub body: String,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct Initial {
    pub location: Ident,
    pub valuations: Vec<(Ident, String)>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Automaton {
    pub name: Ident,
    pub variables: Vec<Variable>,
    pub locations: Vec<Location>,
    pub functions: Vec<Function>,
    pub initial: Initial,
}

impl Automaton {
    pub fn get_variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn get_location(&self, name: &str) -> Option<&Location> {
        self.locations.iter().find(|l| l.name == name)
    }

    pub fn variables_of(&self, locality: Locality) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(move |v| v.locality == locality)
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum Definition {
    Automaton(Automaton),
    Network(Network),
}

impl Definition {
    pub fn get_name(&self) -> &str {
        match self {
            Definition::Automaton(automaton) => automaton.name.as_str(),
            Definition::Network(network) => network.name.as_str(),
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Instance {
    pub name: Ident,
    /// key into the enclosing network's definitions table
    pub of: Ident,
    pub parameters: Vec<(Ident, String)>,
}

/// A port reference: `instance.variable`, or a top-level network
/// variable when `instance` is absent.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct Port {
    pub instance: Option<Ident>,
    pub variable: Ident,
}

impl Port {
    /// Splits at the last dot so dotted instance paths produced by
    /// flattening (`heart.cell1.v`) keep the full instance qualifier.
    pub fn parse(text: &str) -> Self {
        match text.rsplit_once('.') {
            Some((instance, variable)) => Port {
                instance: Some(instance.to_string()),
                variable: variable.to_string(),
            },
            None => Port {
                instance: None,
                variable: text.to_string(),
            },
        }
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}.{}", instance, self.variable),
            None => write!(f, "{}", self.variable),
        }
    }
}

/// destination port <- source formula
#[derive(Clone, PartialEq, Debug)]
pub struct Mapping {
    pub dst: Port,
    pub src: String,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Network {
    pub name: Ident,
    pub inputs: Vec<Variable>,
    pub outputs: Vec<Variable>,
    pub definitions: Vec<(Ident, Definition)>,
    pub instances: Vec<Instance>,
    pub mappings: Vec<Mapping>,
    pub codegen: CodegenConfig,
}

impl Network {
    pub fn get_definition(&self, name: &str) -> Option<&Definition> {
        self.definitions
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, def)| def)
    }

    pub fn get_instance(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.name == name)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ParametrisationMethod {
    CompileTime,
    RunTime,
}

impl Default for ParametrisationMethod {
    fn default() -> Self {
        ParametrisationMethod::CompileTime
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// absent means one log row per step
    pub interval: Option<f64>,
    pub file: String,
    /// dotted `instance.variable` names, in column order; empty means
    /// every output of every instance in declaration order
    pub fields: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            enabled: true,
            interval: None,
            file: "out.csv".to_string(),
            fields: vec![],
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct CodegenConfig {
    /// negative means tabs
    pub indent_size: i32,
    pub step_size: f64,
    pub simulation_time: f64,
    pub logging: LoggingConfig,
    pub parametrisation: ParametrisationMethod,
    pub max_inter_transitions: u32,
    pub require_one_intra_transition: bool,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        CodegenConfig {
            indent_size: 4,
            step_size: 0.001,
            simulation_time: 10.0,
            logging: LoggingConfig::default(),
            parametrisation: ParametrisationMethod::default(),
            max_inter_transitions: 1,
            require_one_intra_transition: false,
        }
    }
}

impl CodegenConfig {
    pub fn logging_interval(&self) -> f64 {
        self.logging.interval.unwrap_or(self.step_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_parse() {
        assert_eq!(
            Port {
                instance: Some("gate".to_string()),
                variable: "pos".to_string(),
            },
            Port::parse("gate.pos")
        );
        assert_eq!(
            Port {
                instance: None,
                variable: "clock".to_string(),
            },
            Port::parse("clock")
        );
        assert_eq!("gate.pos", Port::parse("gate.pos").to_string());
    }

    #[test]
    fn test_config_defaults() {
        let config = CodegenConfig::default();
        assert_eq!(4, config.indent_size);
        assert!(config.logging.enabled);
        assert_eq!("out.csv", config.logging.file);
        assert_eq!(ParametrisationMethod::CompileTime, config.parametrisation);
        assert_eq!(1, config.max_inter_transitions);
        assert!(!config.require_one_intra_transition);
        assert_eq!(config.step_size, config.logging_interval());
    }
}
