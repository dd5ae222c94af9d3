// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Semantic transformations over a checked project, applied in a
//! fixed order between import and code generation.
//!
//! Flattening runs first (when requested) so that parameter
//! resolution and delay expansion see the final instance set and run
//! exactly once; the observable result is the same as interleaving
//! them the other way around.

use crate::common::Result;
use crate::datamodel::{Locality, VarType};
use crate::project::Project;

mod delay;
mod flatten;
mod params;

pub use flatten::flatten_network;

#[derive(Clone, Copy, Debug, Default)]
pub struct TransformOptions {
    pub flatten: bool,
}

pub fn transform(project: &mut Project, options: &TransformOptions) -> Result<()> {
    if options.flatten {
        flatten::flatten_project(project)?;
    }
    params::propagate_parameters(project)?;
    delay::expand_delays(project)?;
    saturation_pass(project);
    Ok(())
}

/// Where an invariant bounds a continuously flowed variable, a
/// post-flow clamp could be inserted here.  The hook exists but
/// deliberately rewrites nothing.
// TODO: saturation -- pick a clamping policy and record a `saturated`
// side output before enabling this.
fn saturation_pass(project: &mut Project) {
    let mut candidates = 0usize;
    for automaton in project.automata.values() {
        for location in automaton.locations.iter() {
            if location.invariant.is_none() {
                continue;
            }
            for (target, _) in location.flows.iter() {
                let bounded = automaton
                    .get_variable(target)
                    .map(|v| {
                        v.var_type == VarType::Real && v.locality != Locality::Parameter
                    })
                    .unwrap_or(false);
                if bounded {
                    candidates += 1;
                }
            }
        }
    }
    let _ = candidates;
}
