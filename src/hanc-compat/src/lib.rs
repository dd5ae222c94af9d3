// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

#![forbid(unsafe_code)]

use std::path::Path;

pub use hanc_engine::{self as engine, Result};

use hanc_engine::datamodel::Network;

pub mod cellml;
pub mod haml;

/// Load a HAML document, splicing `!include` directives before the
/// YAML is parsed.
pub fn open_haml(path: &Path) -> Result<Network> {
    haml::open_haml(path)
}

/// Load a CellML-style biomedical model.
pub fn open_cellml(path: &Path) -> Result<Network> {
    cellml::open_cellml(path)
}
