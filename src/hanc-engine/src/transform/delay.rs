// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Delayed-variable expansion.
//!
//! A variable with `delayableBy = d` under step size `s` is backed by
//! a ring buffer of `ceil(d / s) + 1` slots: reads observe the value
//! written `ceil(d / s)` ticks ago, writes advance the head.  The
//! buffer length is computed here and attached to the checked
//! variable; back-ends lower the reads and writes (or reject the
//! model if they cannot).

use crate::common::Result;
use crate::eval::{eval, Env, Value};
use crate::project::Project;
use crate::transform_err;

pub fn expand_delays(project: &mut Project) -> Result<()> {
    let step_size = project.config().step_size;
    if step_size <= 0.0 {
        return transform_err!(BadConfig, format!("step size {}", step_size));
    }

    let env = Env::default();
    for (path, automaton) in project.automata.iter_mut() {
        for var in automaton.variables.iter_mut() {
            let expr = match &var.delayable_by {
                Some(expr) => expr,
                None => continue,
            };
            let delay = match eval(expr, &env) {
                Ok(Value::Real(delay)) => delay,
                Ok(Value::Bool(_)) | Err(_) => {
                    return transform_err!(
                        BadConfig,
                        format!("{}.{}: delayableBy", path, var.name)
                    );
                }
            };
            if delay < 0.0 {
                return transform_err!(
                    BadConfig,
                    format!("{}.{}: delayableBy is negative", path, var.name)
                );
            }
            if delay == 0.0 {
                continue;
            }
            let slots = (delay / step_size).ceil() as usize + 1;
            var.delay_len = Some(slots);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{
        Automaton, CodegenConfig, Definition, Initial, Instance, Locality, Location, Network,
        VarType, Variable,
    };

    fn delayed_network(delayable_by: &str, step_size: f64) -> Network {
        let mut v = Variable::new("v", VarType::Real, Locality::Output);
        v.default = Some("0".to_string());
        v.delayable_by = Some(delayable_by.to_string());

        let mut codegen = CodegenConfig::default();
        codegen.step_size = step_size;

        Network {
            name: "main".to_string(),
            inputs: vec![],
            outputs: vec![],
            definitions: vec![(
                "Cell".to_string(),
                Definition::Automaton(Automaton {
                    name: "Cell".to_string(),
                    variables: vec![v],
                    locations: vec![Location {
                        name: "beat".to_string(),
                        invariant: None,
                        flows: vec![("v".to_string(), "1".to_string())],
                        updates: vec![],
                        transitions: vec![],
                    }],
                    functions: vec![],
                    initial: Initial {
                        location: "beat".to_string(),
                        valuations: vec![],
                    },
                }),
            )],
            instances: vec![Instance {
                name: "cell".to_string(),
                of: "Cell".to_string(),
                parameters: vec![],
            }],
            mappings: vec![],
            codegen,
        }
    }

    #[test]
    fn test_buffer_length() {
        let mut project = Project::new(delayed_network("0.005", 0.001));
        expand_delays(&mut project).unwrap();
        let var = project.automata["Cell"].get_variable("v").unwrap();
        assert_eq!(Some(6), var.delay_len);
    }

    #[test]
    fn test_zero_delay_is_plain() {
        let mut project = Project::new(delayed_network("0", 0.001));
        expand_delays(&mut project).unwrap();
        let var = project.automata["Cell"].get_variable("v").unwrap();
        assert_eq!(None, var.delay_len);
    }

    #[test]
    fn test_partial_step_rounds_up() {
        let mut project = Project::new(delayed_network("0.0045", 0.001));
        expand_delays(&mut project).unwrap();
        let var = project.automata["Cell"].get_variable("v").unwrap();
        assert_eq!(Some(6), var.delay_len);
    }
}
