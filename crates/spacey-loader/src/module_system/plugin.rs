// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader plugins
//!
//! A module whose result is [`Value::Plugin`] can load `plugin!resource`
//! ids. Resources requested before the plugin has evaluated get a unique
//! placeholder id; once the plugin is available each placeholder is
//! replaced by the record for the normalized resource id.

use super::loader::{Loader, LoaderInner};
use super::registry::ModuleId;
use super::require::Require;
use crate::error::{LoaderError, Result};
use crate::value::Value;
use std::fmt;
use std::rc::{Rc, Weak};

/// Capabilities of a loader plugin
pub trait LoaderPlugin {
    /// Load `resource` and call [`LoadCompletion::resolve`] with its value,
    /// either before returning or later.
    fn load(&self, resource: &str, require: &Require, done: LoadCompletion) -> Result<()>;

    /// Canonical form of a resource id. Defaults to absolute-id mapping
    /// relative to the requesting module.
    fn normalize(&self, resource: &str, to_abs_mid: &dyn Fn(&str) -> String) -> String {
        to_abs_mid(resource)
    }

    /// Dynamic plugins give every request its own record
    fn is_dynamic(&self) -> bool {
        false
    }
}

/// A shared plugin declaration
#[derive(Clone)]
pub struct Plugin(Rc<dyn LoaderPlugin>);

impl Plugin {
    /// Wrap a plugin implementation
    pub fn new(plugin: impl LoaderPlugin + 'static) -> Self {
        Self(Rc::new(plugin))
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Plugin) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn load(&self, resource: &str, require: &Require, done: LoadCompletion) -> Result<()> {
        self.0.load(resource, require, done)
    }

    pub(crate) fn normalize(&self, resource: &str, to_abs_mid: &dyn Fn(&str) -> String) -> String {
        self.0.normalize(resource, to_abs_mid)
    }

    pub(crate) fn is_dynamic(&self) -> bool {
        self.0.is_dynamic()
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("dynamic", &self.0.is_dynamic())
            .finish()
    }
}

/// Hands a loaded resource back to the loader
pub struct LoadCompletion {
    loader: Weak<LoaderInner>,
    module: ModuleId,
}

impl LoadCompletion {
    pub(crate) fn new(loader: &Rc<LoaderInner>, module: ModuleId) -> Self {
        Self {
            loader: Rc::downgrade(loader),
            module,
        }
    }

    /// Record the resource value and drain the execution queue
    pub fn resolve(self, value: impl Into<Value>) -> Result<()> {
        let inner = self.loader.upgrade().ok_or(LoaderError::Detached)?;
        Loader::from_inner(inner).finish_resource(self.module, value.into())
    }
}

impl fmt::Debug for LoadCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCompletion")
            .field("module", &self.module)
            .finish()
    }
}
