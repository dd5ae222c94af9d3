// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::path::{Path, PathBuf};
use std::result::Result as StdResult;

use pico_args::Arguments;

use hanc_compat::engine::codegen::{self, Language};
use hanc_compat::engine::{transform, Project, TransformOptions};
use hanc_compat::{open_cellml, open_haml};

const VERSION: &str = "0.1.0";
const EXIT_FAILURE: i32 = 1;

macro_rules! die(
    ($($arg:tt)*) => { {
        eprintln!($($arg)*);
        std::process::exit(EXIT_FAILURE)
    } }
);

fn usage() -> ! {
    let argv0 = std::env::args()
        .next()
        .unwrap_or_else(|| "<hanc>".to_string());
    die!(
        concat!(
            "hanc {}: Compile hybrid automata networks to simulation code.\n\
         \n\
         USAGE:\n",
            "    {} [OPTION...] SOURCE\n",
            "\n\
         OPTIONS:\n",
            "    -h, --help           show this message\n",
            "    -l, --language LANG  target language: c or vhdl (default c)\n",
            "    -o, --output DIR     output directory (default output)\n",
            "    -f, --flatten        flatten the network hierarchy first\n",
            "    -v, --validate-only  report problems, generate nothing\n",
            "    --cellml             input is a CellML-style model\n",
        ),
        VERSION,
        argv0
    );
}

#[derive(Clone, Default, Debug)]
struct Args {
    path: Option<String>,
    language: Option<String>,
    output: Option<String>,
    is_flatten: bool,
    is_validate_only: bool,
    is_cellml: bool,
}

fn parse_args() -> StdResult<Args, Box<dyn std::error::Error>> {
    let mut parsed = Arguments::from_env();
    if parsed.contains(["-h", "--help"]) {
        usage();
    }

    let mut args: Args = Default::default();
    args.language = parsed.opt_value_from_str(["-l", "--language"])?;
    args.output = parsed.opt_value_from_str(["-o", "--output"])?;
    args.is_flatten = parsed.contains(["-f", "--flatten"]);
    args.is_validate_only = parsed.contains(["-v", "--validate-only"]);
    args.is_cellml = parsed.contains("--cellml");

    let free_arguments = parsed.finish();
    if free_arguments.is_empty() {
        eprintln!("error: input path required");
        usage();
    }
    args.path = free_arguments[0].to_str().map(|s| s.to_owned());

    Ok(args)
}

fn language_for(args: &Args) -> Language {
    match args.language.as_deref() {
        None | Some("c") => Language::C,
        Some("vhdl") => Language::Vhdl,
        Some(other) => {
            die!("error: unknown language {}; expected c or vhdl", other);
        }
    }
}

fn is_cellml_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("cellml") | Some("xml")
    )
}

fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {}", err);
            usage();
        }
    };

    let language = language_for(&args);
    let path = PathBuf::from(args.path.as_deref().unwrap_or_default());
    let output = PathBuf::from(args.output.as_deref().unwrap_or("output"));

    let network = if args.is_cellml || is_cellml_path(&path) {
        open_cellml(&path)
    } else {
        open_haml(&path)
    };
    let network = match network {
        Ok(network) => network,
        Err(err) => {
            die!("error: {}", err);
        }
    };

    let mut project = Project::new(network);

    if !project.has_errors() {
        let options = TransformOptions {
            flatten: args.is_flatten,
        };
        if let Err(err) = transform(&mut project, &options) {
            die!("error: {}", err);
        }
    }

    for warning in project.all_warnings() {
        eprintln!("warning: {}", warning);
    }

    if project.has_errors() {
        for err in project.all_errors() {
            eprintln!("error: {}", err);
        }
        std::process::exit(EXIT_FAILURE);
    }

    if args.is_validate_only {
        return;
    }

    if let Err(err) = codegen::generate(&project, language, &output) {
        die!("error: {}", err);
    }
}
