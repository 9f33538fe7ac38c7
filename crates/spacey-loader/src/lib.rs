// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # spacey-loader
//!
//! A dynamic AMD module loader for the Spacey runtime.
//!
//! Modules are named, lazily declared units of code. The loader resolves
//! each id to a canonical identity, fetches the module on demand through a
//! host [`Transport`], runs every factory at most once after its
//! dependencies, and hands the result to each dependent. It covers:
//!
//! - Relative ids, alias maps, packages and location paths
//! - `require(id)`, `require([ids], callback)` and `define(...)`
//! - Circular dependencies (dependents see the pre-created exports object)
//! - Loader plugins (`plugin!resource`)
//! - Pre-fetched module caches
//!
//! ## Quick Start
//!
//! ```rust
//! use spacey_loader::{Config, Definition, Factory, Loader, MemoryTransport, Value};
//!
//! # fn main() -> spacey_loader::Result<()> {
//! let transport = MemoryTransport::new()
//!     .script("/app/greeting.js", |loader| {
//!         loader.define(Definition::value("hello"))
//!     });
//!
//! let loader = Loader::builder()
//!     .config(Config::new().base_url("/app/"))
//!     .transport(transport)
//!     .build()?;
//!
//! loader.request(&["greeting"], Some(Factory::function(|args| {
//!     assert_eq!(args[0], Value::from("hello"));
//!     Ok(Value::Undefined)
//! })))?;
//! assert_eq!(loader.require("greeting")?, Value::from("hello"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Asynchronous fetching
//!
//! ```rust,ignore
//! let (transport, mut fetches) = spacey_loader::fetch_loop("./www", evaluate);
//! let loader = Loader::builder().transport(transport).build()?;
//! loader.request(&["app/main"], None)?;
//! fetches.run(&loader).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod module_system;
pub mod runtime;
pub mod value;

// Re-exports
pub use config::{Config, PackageConfig};
pub use error::{LoaderError, Result};
pub use module_system::{
    CacheEntry, CacheTable, Definition, Factory, LoadCompletion, Loader, LoaderBuilder, LoaderOptions,
    LoaderPlugin, ModuleInfo, ModuleState, Plugin, Require, compact_path,
};
pub use runtime::{
    AsyncFileTransport, Fetch, FetchLoop, FetchOutcome, FetchRequest, FetchTicket, FileTransport,
    MemoryTransport, Transport, fetch_loop,
};
pub use value::{Function, ModuleMeta, Object, Value};

/// Version of the spacey-loader crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
