// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module registry and record lifecycle

use super::define::Factory;
use super::plugin::Plugin;
use super::resolver::ModuleInfo;
use crate::value::{ModuleMeta, Value};
use std::collections::HashMap;
use std::fmt;

/// Internal handle of a module record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The `require` pseudo-module
pub(crate) const REQUIRE: ModuleId = ModuleId(0);
/// The `exports` pseudo-module
pub(crate) const EXPORTS: ModuleId = ModuleId(1);
/// The `module` pseudo-module
pub(crate) const MODULE: ModuleId = ModuleId(2);

/// Lifecycle of a module record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModuleState {
    /// Known by id only
    Unrequested,
    /// A fetch (or plugin load) has been started
    Injected,
    /// Dependencies and factory are known
    Defined,
    /// The factory or its dependencies are being evaluated
    Executing,
    /// The result is final
    Evaluated,
}

impl ModuleState {
    /// Whether the module has been defined (or gone further)
    pub fn is_defined(self) -> bool {
        self >= ModuleState::Defined
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::Unrequested => "unrequested",
            ModuleState::Injected => "injected",
            ModuleState::Defined => "defined",
            ModuleState::Executing => "executing",
            ModuleState::Evaluated => "evaluated",
        };
        f.write_str(name)
    }
}

/// One entry of a resolved dependency list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DepSlot {
    /// The dependency's real record
    Resolved(ModuleId),
    /// A plugin-resource placeholder awaiting its plugin
    Pending(ModuleId),
}

impl DepSlot {
    pub(crate) fn id(self) -> ModuleId {
        match self {
            DepSlot::Resolved(id) | DepSlot::Pending(id) => id,
        }
    }
}

/// A module record
#[derive(Debug)]
pub(crate) struct ModuleRecord {
    pub id: ModuleId,
    pub mid: String,
    pub pid: String,
    pub url: String,
    pub state: ModuleState,
    /// Set once the module is defined; length never changes afterwards
    pub deps: Option<Vec<DepSlot>>,
    pub factory: Option<Factory>,
    pub result: Value,
    pub meta: Option<ModuleMeta>,
    /// Batch records created by list requests; removed once executed
    pub synthetic: bool,
    /// Plugin module, for `plugin!resource` records
    pub plugin: Option<ModuleId>,
    /// Plugin resource id (raw for placeholders)
    pub resource: String,
    /// Module whose requester resolves the resource
    pub referrer: Option<ModuleId>,
    /// Placeholder created before its plugin was available
    pub placeholder: bool,
    /// Dependency slot to rewrite once a placeholder is resolved
    pub retarget: Option<(ModuleId, usize)>,
    /// Resources waiting for this plugin to evaluate
    pub load_queue: Option<Vec<ModuleId>>,
    /// Plugin capabilities, once this module evaluated to a plugin
    pub capabilities: Option<Plugin>,
}

impl ModuleRecord {
    pub fn new(id: ModuleId, info: ModuleInfo) -> Self {
        Self {
            id,
            mid: info.mid,
            pid: info.pid,
            url: info.url,
            state: ModuleState::Unrequested,
            deps: None,
            factory: None,
            result: Value::Undefined,
            meta: None,
            synthetic: false,
            plugin: None,
            resource: String::new(),
            referrer: None,
            placeholder: false,
            retarget: None,
            load_queue: None,
            capabilities: None,
        }
    }

    /// Record for a `plugin!resource` id
    pub fn resource(
        id: ModuleId,
        mid: String,
        plugin: ModuleId,
        resource: String,
        referrer: Option<ModuleId>,
        placeholder: bool,
    ) -> Self {
        let mut record = Self::new(
            id,
            ModuleInfo {
                mid,
                pid: String::new(),
                url: String::new(),
            },
        );
        record.plugin = Some(plugin);
        record.resource = resource;
        record.referrer = referrer;
        record.placeholder = placeholder;
        record
    }

    fn pseudo(id: ModuleId, mid: &str) -> Self {
        let mut record = Self::new(
            id,
            ModuleInfo {
                mid: mid.to_string(),
                pid: String::new(),
                url: String::new(),
            },
        );
        record.state = ModuleState::Evaluated;
        record.deps = Some(Vec::new());
        record
    }

    /// Whether `exports` is among the dependencies
    pub fn uses_exports(&self) -> bool {
        self.deps
            .as_ref()
            .is_some_and(|deps| deps.iter().any(|slot| slot.id() == EXPORTS))
    }
}

/// Canonical id to record store
#[derive(Debug)]
pub(crate) struct Registry {
    records: HashMap<ModuleId, ModuleRecord>,
    by_mid: HashMap<String, ModuleId>,
    next_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Self {
            records: HashMap::new(),
            by_mid: HashMap::new(),
            next_id: 3,
        };
        for (id, mid) in [(REQUIRE, "require"), (EXPORTS, "exports"), (MODULE, "module")] {
            registry.records.insert(id, ModuleRecord::pseudo(id, mid));
            registry.by_mid.insert(mid.to_string(), id);
        }
        registry
    }

    /// Record registered under `mid`
    pub fn lookup(&self, mid: &str) -> Option<ModuleId> {
        self.by_mid.get(mid).copied()
    }

    pub fn get(&self, id: ModuleId) -> Option<&ModuleRecord> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut ModuleRecord> {
        self.records.get_mut(&id)
    }

    /// Return the record for `mid`, creating it with `make` if absent.
    /// The flag is true when a record was created.
    pub fn get_or_insert_with(
        &mut self,
        mid: &str,
        make: impl FnOnce(ModuleId) -> ModuleRecord,
    ) -> (ModuleId, bool) {
        if let Some(id) = self.lookup(mid) {
            return (id, false);
        }
        let id = ModuleId(self.next_id);
        self.next_id += 1;
        let record = make(id);
        self.by_mid.insert(record.mid.clone(), id);
        self.records.insert(id, record);
        (id, true)
    }

    /// Unregister `mid` and return the handle it mapped to. The record
    /// stays reachable through that handle; the next request for `mid`
    /// creates a fresh record.
    pub fn forget(&mut self, mid: &str) -> Option<ModuleId> {
        let id = self.lookup(mid).filter(|id| !is_pseudo(*id))?;
        self.by_mid.remove(mid);
        Some(id)
    }

    /// Whether any other record depends on `id`, waits on it as a plugin,
    /// or is a resource of it
    pub fn is_referenced(&self, id: ModuleId) -> bool {
        self.records.values().filter(|record| record.id != id).any(|record| {
            record.plugin == Some(id)
                || record
                    .deps
                    .as_ref()
                    .is_some_and(|deps| deps.iter().any(|slot| slot.id() == id))
                || record
                    .load_queue
                    .as_ref()
                    .is_some_and(|queue| queue.contains(&id))
        })
    }

    /// Drop a record entirely
    pub fn remove(&mut self, id: ModuleId) -> Option<ModuleRecord> {
        if is_pseudo(id) {
            return None;
        }
        let record = self.records.remove(&id)?;
        if self.by_mid.get(&record.mid) == Some(&id) {
            self.by_mid.remove(&record.mid);
        }
        Some(record)
    }

    /// Registered records that were injected but not yet defined
    pub fn pending_count(&self) -> usize {
        self.by_mid
            .values()
            .filter_map(|id| self.records.get(id))
            .filter(|record| record.state == ModuleState::Injected)
            .count()
    }

    /// Registered ids, sorted
    pub fn mids(&self) -> Vec<String> {
        let mut mids: Vec<String> = self.by_mid.keys().cloned().collect();
        mids.sort();
        mids
    }
}

fn is_pseudo(id: ModuleId) -> bool {
    matches!(id, REQUIRE | EXPORTS | MODULE)
}
