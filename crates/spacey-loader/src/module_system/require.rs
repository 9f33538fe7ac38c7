// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Contextual `require` bound to a module

use super::define::Factory;
use super::loader::{Loader, LoaderInner};
use super::registry::ModuleId;
use crate::error::{LoaderError, Result};
use crate::value::Value;
use std::fmt;
use std::rc::{Rc, Weak};

/// Requester handed to factories depending on `"require"`.
///
/// Relative ids resolve against the module it is bound to. It holds the
/// loader weakly, so a stored requester never keeps the loader alive.
#[derive(Clone)]
pub struct Require {
    loader: Weak<LoaderInner>,
    referrer: Option<ModuleId>,
}

impl Require {
    pub(crate) fn new(loader: &Rc<LoaderInner>, referrer: Option<ModuleId>) -> Self {
        Self {
            loader: Rc::downgrade(loader),
            referrer,
        }
    }

    fn loader(&self) -> Result<Loader> {
        self.loader
            .upgrade()
            .map(Loader::from_inner)
            .ok_or(LoaderError::Detached)
    }

    /// `require(id)`: the result of an already available module
    pub fn sync(&self, id: &str) -> Result<Value> {
        self.loader()?.require_from(id, self.referrer)
    }

    /// `require([ids], callback)`
    pub fn request(&self, ids: &[&str], callback: Option<Factory>) -> Result<()> {
        self.loader()?.request_from(ids, callback, self.referrer)
    }

    /// Canonical id of `id`
    pub fn to_abs_mid(&self, id: &str) -> Result<String> {
        Ok(self.loader()?.to_abs_mid_from(id, self.referrer))
    }

    /// Location of a non-module resource
    pub fn to_url(&self, path: &str) -> Result<String> {
        Ok(self.loader()?.to_url_from(path, self.referrer))
    }

    /// Id of the module this requester is bound to
    pub fn module_id(&self) -> Option<String> {
        let loader = self.loader().ok()?;
        loader.mid_of(self.referrer)
    }
}

impl PartialEq for Require {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.loader, &other.loader) && self.referrer == other.referrer
    }
}

impl fmt::Debug for Require {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Require")
            .field("referrer", &self.referrer)
            .finish()
    }
}
