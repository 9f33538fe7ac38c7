// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module loader

use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while resolving, fetching or executing modules
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A single-id require named a module that is neither evaluated nor
    /// loadable synchronously
    #[error("Attempt to require unloaded module '{0}'")]
    UnloadedModule(String),

    /// The transport could not retrieve a module and no fallback existed
    #[error("Failed to load module '{mid}' from '{url}'{}: {reason}", parent_suffix(.parent))]
    FetchFailed {
        /// Canonical module id
        mid: String,
        /// Computed fetch location
        url: String,
        /// Id of the module that requested it
        parent: Option<String>,
        /// Transport-specific failure description
        reason: String,
    },

    /// No fetch transport was supplied
    #[error("Unsupported platform: no fetch transport available")]
    UnsupportedHost,

    /// Source text arrived but the transport cannot evaluate it
    #[error("No source evaluator available for '{0}'")]
    NoEvaluator(String),

    /// A module with queued resources turned out not to be a loader plugin
    #[error("Module '{0}' was used as a loader plugin but did not produce one")]
    NotAPlugin(String),

    /// A fetch completion arrived for a ticket the loader never issued
    #[error("Unknown fetch ticket {0}")]
    UnknownFetch(u64),

    /// A requester or completion handle outlived its loader
    #[error("Loader has been dropped")]
    Detached,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A mapping prefix could not be compiled into a matcher
    #[error("Invalid mapping prefix '{prefix}': {source}")]
    Pattern {
        /// Offending prefix
        prefix: String,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },

    /// File system error
    #[error("File system error: {0}")]
    Fs(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

impl LoaderError {
    /// Create a generic error
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create an unloaded module error
    pub fn unloaded(mid: impl Into<String>) -> Self {
        Self::UnloadedModule(mid.into())
    }
}

fn parent_suffix(parent: &Option<String>) -> String {
    parent
        .as_ref()
        .map(|p| format!(" (parent: {})", p))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failed_names_parent() {
        let err = LoaderError::FetchFailed {
            mid: "app/main".into(),
            url: "/app/main.js".into(),
            parent: Some("app/boot".into()),
            reason: "not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to load module 'app/main' from '/app/main.js' (parent: app/boot): not found"
        );

        let err = LoaderError::FetchFailed {
            mid: "x".into(),
            url: "x.js".into(),
            parent: None,
            reason: "gone".into(),
        };
        assert_eq!(err.to_string(), "Failed to load module 'x' from 'x.js': gone");
    }
}
