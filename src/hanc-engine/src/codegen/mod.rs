// Copyright 2025 The Hanc Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Target-neutral code generation orchestration.
//!
//! Back-ends render the whole output tree into an in-memory
//! [`FileSet`] first; `generate` then writes it below the output
//! directory.  Rendering is a pure function of the project and the
//! configuration, so two runs produce byte-identical trees.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::Result;
use crate::project::Project;

pub mod c;
pub mod util;
pub mod vhdl;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Language {
    C,
    Vhdl,
}

/// The rendered output tree, keyed by path relative to the output
/// directory.  A sorted map keeps emission order deterministic.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct FileSet {
    files: BTreeMap<PathBuf, String>,
}

impl FileSet {
    pub fn push(&mut self, path: impl Into<PathBuf>, content: String) {
        self.files.insert(path.into(), content);
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.files.get(path.as_ref()).map(|s| s.as_str())
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(|p| p.as_path())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write every file below `out_dir`, overwriting existing files
    /// and creating folders as needed.
    pub fn write_to(&self, out_dir: &Path) -> Result<()> {
        for (rel, content) in self.files.iter() {
            let path = out_dir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, content)?;
        }
        Ok(())
    }
}

/// Render the project for the chosen target language.
pub fn render(project: &Project, language: Language) -> Result<FileSet> {
    let mut files = FileSet::default();
    match language {
        Language::C => c::render(project, &mut files)?,
        Language::Vhdl => vhdl::render(project, &mut files)?,
    }
    Ok(files)
}

/// Render and write the output tree below `out_dir`.
pub fn generate(project: &Project, language: Language, out_dir: &Path) -> Result<()> {
    let files = render(project, language)?;
    files.write_to(out_dir)
}
