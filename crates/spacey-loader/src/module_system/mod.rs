// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! AMD module system implementation
//!
//! - Identity resolution: relative ids, aliases, packages, locations
//! - Registry of module records and their lifecycle
//! - Dependency resolution and the execution queue
//! - `plugin!resource` loading
//! - Pre-fetched module cache

mod cache;
mod define;
mod loader;
mod plugin;
mod registry;
mod require;
pub mod resolver;

pub use cache::{CacheEntry, CacheTable};
pub use define::{COMMONJS_DEPS, Definition, Factory};
pub use loader::{Loader, LoaderBuilder, LoaderOptions};
pub use plugin::{LoadCompletion, LoaderPlugin, Plugin};
pub use registry::{ModuleId, ModuleState};
pub use require::Require;
pub use resolver::{DEFAULT_BASE_URL, ModuleInfo, ModuleResolver, Package, compact_path};
