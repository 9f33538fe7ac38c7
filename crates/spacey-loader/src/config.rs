// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader configuration
//!
//! The JSON form mirrors the classic AMD configuration object:
//!
//! ```json
//! {
//!   "baseUrl": "/app/",
//!   "map": { "*": { "jquery": "vendor/jquery" } },
//!   "packages": ["dojo", { "name": "lib", "location": "/libs/lib", "main": "index" }],
//!   "paths": { "templates": "/static/tpl" }
//! }
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Configuration applied with [`Loader::configure`](crate::Loader::configure).
///
/// Every field is optional; an absent field leaves the corresponding
/// setting untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Base location prepended to relative fetch locations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Nested alias table: referrer prefix (or `*`) to id prefix to replacement.
    /// Merged shallowly into the existing table.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub map: BTreeMap<String, BTreeMap<String, String>>,

    /// Package declarations
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageConfig>,

    /// Location alias table. Replaces the previous table wholesale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<BTreeMap<String, String>>,
}

impl Config {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Set the base location
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add one alias under a referrer scope (`*` for every referrer)
    pub fn map(
        mut self,
        scope: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.map
            .entry(scope.into())
            .or_default()
            .insert(from.into(), to.into());
        self
    }

    /// Declare a package
    pub fn package(mut self, package: impl Into<PackageConfig>) -> Self {
        self.packages.push(package.into());
        self
    }

    /// Add one location alias
    pub fn path(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.paths
            .get_or_insert_with(BTreeMap::new)
            .insert(from.into(), to.into());
        self
    }
}

/// A package declaration: either a bare name or a full descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageConfig {
    /// Shorthand: the package lives at a location equal to its name
    Name(String),
    /// Full descriptor
    Full {
        /// Package name (first segment of its module ids)
        name: String,
        /// Root location; defaults to the name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
        /// Main module; defaults to `main`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        main: Option<String>,
    },
}

impl PackageConfig {
    /// Full descriptor with a location and main module
    pub fn new(name: impl Into<String>, location: impl Into<String>, main: impl Into<String>) -> Self {
        Self::Full {
            name: name.into(),
            location: Some(location.into()),
            main: Some(main.into()),
        }
    }

    /// Package name
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Full { name, .. } => name,
        }
    }

    /// Root location (falls back to the name)
    pub fn location(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Full { name, location, .. } => location.as_deref().unwrap_or(name),
        }
    }

    /// Main module, if declared
    pub fn main(&self) -> Option<&str> {
        match self {
            Self::Name(_) => None,
            Self::Full { main, .. } => main.as_deref(),
        }
    }
}

impl From<&str> for PackageConfig {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for PackageConfig {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}
