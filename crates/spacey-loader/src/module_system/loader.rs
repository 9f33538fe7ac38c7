// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The module loader: dependency resolution, fetch orchestration and the
//! execution queue.
//!
//! All state lives behind one `RefCell`. A borrow is never held across a
//! call out of the loader (factories, scripts, plugins, the transport), so
//! any of those may re-enter the loader freely.

use super::cache::{CacheEntry, CacheTable, ModuleCache};
use super::define::{Definition, Factory};
use super::plugin::{LoadCompletion, Plugin};
use super::registry::{DepSlot, EXPORTS, MODULE, ModuleId, ModuleRecord, ModuleState, REQUIRE, Registry};
use super::require::Require;
use super::resolver::{ModuleInfo, ModuleResolver};
use crate::config::Config;
use crate::error::{LoaderError, Result};
use crate::runtime::{Fetch, FetchOutcome, FetchRequest, FetchTicket, Transport};
use crate::value::{Function, ModuleMeta, Object, Value};
use std::cell::{Cell, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Loader behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Log the id chain when a circular dependency is entered
    pub trace_circular: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            trace_circular: true,
        }
    }
}

/// Arguments of the most recent `define` during a load
struct PendingDefine {
    deps: Vec<String>,
    factory: Factory,
    /// Module named by an explicit-id define
    alias_of: Option<ModuleId>,
}

/// A fetch handed to the transport
struct InFlight {
    module: ModuleId,
    parent: Option<ModuleId>,
}

/// Outcome of executing one module
enum Exec {
    Done(Value),
    /// The module or one of its dependencies is not defined yet
    Abort,
}

struct LoaderState {
    resolver: ModuleResolver,
    registry: Registry,
    exec_queue: Vec<ModuleId>,
    cache: ModuleCache,
    pending_define: Option<PendingDefine>,
    fetches: HashMap<FetchTicket, InFlight>,
    next_uid: u64,
    next_ticket: u64,
    circular_trace: Vec<String>,
}

impl LoaderState {
    fn new(resolver: ModuleResolver) -> Self {
        Self {
            resolver,
            registry: Registry::new(),
            exec_queue: Vec::new(),
            cache: ModuleCache::new(),
            pending_define: None,
            fetches: HashMap::new(),
            next_uid: 0,
            next_ticket: 0,
            circular_trace: Vec::new(),
        }
    }

    fn next_uid(&mut self) -> u64 {
        self.next_uid += 1;
        self.next_uid
    }

    fn mid(&self, id: Option<ModuleId>) -> Option<String> {
        id.and_then(|id| self.registry.get(id)).map(|record| record.mid.clone())
    }

    fn record(&mut self, id: ModuleId) -> Result<&mut ModuleRecord> {
        self.registry
            .get_mut(id)
            .ok_or_else(|| LoaderError::generic(format!("module record {} is gone", id)))
    }
}

pub(crate) struct LoaderInner {
    state: RefCell<LoaderState>,
    transport: Rc<dyn Transport>,
    options: LoaderOptions,
    guard: Cell<usize>,
    executed_something: Cell<bool>,
}

impl LoaderInner {
    fn new(resolver: ModuleResolver, transport: Rc<dyn Transport>, options: LoaderOptions) -> Self {
        Self {
            state: RefCell::new(LoaderState::new(resolver)),
            transport,
            options,
            guard: Cell::new(0),
            executed_something: Cell::new(false),
        }
    }
}

/// Nested drains are no-ops while one of these is alive
struct DrainGuard<'a>(&'a Cell<usize>);

impl<'a> DrainGuard<'a> {
    fn new(counter: &'a Cell<usize>) -> Self {
        counter.set(counter.get() + 1);
        Self(counter)
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Builder for [`Loader`]
#[derive(Default)]
pub struct LoaderBuilder {
    config: Option<Config>,
    transport: Option<Rc<dyn Transport>>,
    options: LoaderOptions,
}

impl LoaderBuilder {
    /// Initial configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Fetch transport (required)
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Rc::new(transport));
        self
    }

    /// Log circular dependency chains (default on)
    pub fn trace_circular(mut self, enabled: bool) -> Self {
        self.options.trace_circular = enabled;
        self
    }

    /// Build the loader; fails without a transport
    pub fn build(self) -> Result<Loader> {
        let transport = self.transport.ok_or(LoaderError::UnsupportedHost)?;
        let mut resolver = ModuleResolver::new();
        if let Some(config) = &self.config {
            resolver.configure(config)?;
        }
        Ok(Loader::from_inner(Rc::new(LoaderInner::new(
            resolver,
            transport,
            self.options,
        ))))
    }
}

/// Handle to a module loader instance.
///
/// Cloning is cheap; all clones share the same registry. The loader is
/// single-threaded and must stay on the thread that created it.
#[derive(Clone)]
pub struct Loader {
    inner: Rc<LoaderInner>,
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Loader")
            .field("base_url", &state.resolver.base_url())
            .field("modules", &state.registry.mids().len())
            .field("queued", &state.exec_queue.len())
            .field("in_flight", &state.fetches.len())
            .finish()
    }
}

impl Loader {
    /// Start building a loader
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::default()
    }

    /// Loader with default configuration over `transport`
    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self::from_inner(Rc::new(LoaderInner::new(
            ModuleResolver::new(),
            Rc::new(transport),
            LoaderOptions::default(),
        )))
    }

    pub(crate) fn from_inner(inner: Rc<LoaderInner>) -> Self {
        Self { inner }
    }

    fn state(&self) -> RefMut<'_, LoaderState> {
        self.inner.state.borrow_mut()
    }

    /// Apply a configuration
    pub fn configure(&self, config: &Config) -> Result<()> {
        self.state().resolver.configure(config)
    }

    /// Current base location
    pub fn base_url(&self) -> String {
        self.state().resolver.base_url().to_string()
    }

    /// Requester not bound to any module
    pub fn root_require(&self) -> Require {
        Require::new(&self.inner, None)
    }

    /// `require(id)`: result of a module that is available synchronously
    pub fn require(&self, id: &str) -> Result<Value> {
        self.require_from(id, None)
    }

    /// `require([ids], callback)`: load `ids`, then call `callback` with
    /// their results in order
    pub fn request(&self, ids: &[&str], callback: Option<Factory>) -> Result<()> {
        self.request_from(ids, callback, None)
    }

    /// `define(...)`
    pub fn define(&self, definition: Definition) -> Result<()> {
        let deps = definition.dependencies();
        let Definition { id, factory, .. } = definition;

        let Some(id) = id else {
            self.state().pending_define = Some(PendingDefine {
                deps,
                factory,
                alias_of: None,
            });
            return Ok(());
        };

        let module = self.get_module(&id, None)?;
        let already = self
            .inner
            .state
            .borrow()
            .registry
            .get(module)
            .is_some_and(|record| record.state.is_defined());
        if already {
            warn!(mid = %id, "module already defined; ignoring definition");
        } else {
            debug!(mid = %id, "defining module with explicit id");
            self.define_module(module, &deps, factory.clone())?;
            self.inject_deps(module)?;
            self.state().exec_queue.push(module);
        }
        self.state().pending_define = Some(PendingDefine {
            deps,
            factory,
            alias_of: Some(module),
        });
        self.check_complete()
    }

    /// Register a pre-fetched module table. Entries are merged lazily,
    /// relative to the module whose load triggers the merge.
    pub fn cache(&self, table: CacheTable) {
        self.consume_pending_cache(None);
        self.state().cache.stage(table);
    }

    /// Unregister a module so the next request creates a fresh record.
    ///
    /// The record itself is dropped unless another record still depends
    /// on it; dependents keep the instance they were given.
    pub fn forget(&self, mid: &str) -> bool {
        let mut state = self.state();
        let Some(module) = state.registry.forget(mid) else {
            return false;
        };
        state.exec_queue.retain(|id| *id != module);
        let referenced = state.registry.is_referenced(module);
        if !referenced {
            state.registry.remove(module);
        }
        debug!(mid, referenced, "forgot module");
        true
    }

    /// Canonical id of `id`
    pub fn to_abs_mid(&self, id: &str) -> String {
        self.to_abs_mid_from(id, None)
    }

    /// Location of a non-module resource
    pub fn to_url(&self, path: &str) -> String {
        self.to_url_from(path, None)
    }

    /// Resolved identity of `id`, without registering it
    pub fn resolve(&self, id: &str, referrer: Option<&str>) -> ModuleInfo {
        self.state().resolver.resolve(id, referrer)
    }

    /// Lifecycle state of a registered module
    pub fn module_state(&self, mid: &str) -> Option<ModuleState> {
        let state = self.inner.state.borrow();
        let id = state.registry.lookup(mid)?;
        state.registry.get(id).map(|record| record.state)
    }

    /// Whether `mid` is registered
    pub fn is_registered(&self, mid: &str) -> bool {
        self.inner.state.borrow().registry.lookup(mid).is_some()
    }

    /// Result of an evaluated module
    pub fn module_result(&self, mid: &str) -> Option<Value> {
        let state = self.inner.state.borrow();
        let id = state.registry.lookup(mid)?;
        state
            .registry
            .get(id)
            .filter(|record| record.state == ModuleState::Evaluated)
            .map(|record| record.result.clone())
    }

    /// Registered module ids, sorted
    pub fn module_ids(&self) -> Vec<String> {
        self.inner.state.borrow().registry.mids()
    }

    /// Modules injected but not yet defined
    pub fn pending_count(&self) -> usize {
        self.inner.state.borrow().registry.pending_count()
    }

    /// Fetches handed to the transport and not yet completed
    pub fn in_flight(&self) -> usize {
        self.inner.state.borrow().fetches.len()
    }

    /// Deliver the outcome of a fetch the transport answered with
    /// [`Fetch::Pending`]
    pub fn complete_fetch(&self, ticket: FetchTicket, outcome: FetchOutcome) -> Result<()> {
        let (flight, mid, url, parent) = {
            let mut state = self.state();
            let flight = state
                .fetches
                .remove(&ticket)
                .ok_or(LoaderError::UnknownFetch(ticket.0))?;
            let Some(record) = state.registry.get(flight.module) else {
                return Ok(());
            };
            let (mid, url) = (record.mid.clone(), record.url.clone());
            let parent = state.mid(flight.parent);
            (flight, mid, url, parent)
        };
        trace!(%ticket, mid = %mid, "fetch completed");

        let pending = match outcome {
            FetchOutcome::Script(script) => self.capture_define(|| script(self))?,
            FetchOutcome::Source(text) => {
                self.capture_define(|| self.inner.transport.evaluate(self, &url, &text))?
            }
            FetchOutcome::Failed(reason) => {
                match self.inner.transport.load_native(&mid, parent.as_deref()) {
                    Some(value) => {
                        debug!(mid = %mid, "using native module after failed fetch");
                        Some(PendingDefine {
                            deps: Vec::new(),
                            factory: Factory::Value(value),
                            alias_of: None,
                        })
                    }
                    None => {
                        return Err(LoaderError::FetchFailed {
                            mid,
                            url,
                            parent,
                            reason,
                        });
                    }
                }
            }
        };
        self.on_loaded(flight.module, pending)
    }

    pub(crate) fn require_from(&self, id: &str, referrer: Option<ModuleId>) -> Result<Value> {
        let mut module = self.get_module(id, referrer)?;

        // a resource is named by its plugin, so the plugin comes first
        let waiting_on = {
            let state = self.inner.state.borrow();
            state
                .registry
                .get(module)
                .filter(|record| record.placeholder)
                .and_then(|record| record.plugin)
        };
        if let Some(plugin) = waiting_on {
            self.state().registry.remove(module);
            self.require_module(plugin, referrer).map_err(|err| match err {
                LoaderError::UnloadedModule(_) => LoaderError::unloaded(id),
                other => other,
            })?;
            module = self.get_module(id, referrer)?;
        }
        self.require_module(module, referrer)
    }

    /// Evaluate `module` now if everything it needs is at hand
    fn require_module(&self, module: ModuleId, referrer: Option<ModuleId>) -> Result<Value> {
        if let Some(value) = self.available_result(module) {
            return Ok(value);
        }

        self.inject_module(referrer, module)?;
        if let Exec::Done(value) = self.exec_module(module)? {
            return Ok(value);
        }

        let (mid, parent) = {
            let state = self.inner.state.borrow();
            let mid = state
                .mid(Some(module))
                .ok_or_else(|| LoaderError::generic(format!("module record {} is gone", module)))?;
            (mid, state.mid(referrer))
        };
        match self.inner.transport.load_native(&mid, parent.as_deref()) {
            Some(value) => {
                debug!(mid = %mid, "loaded native module");
                let mut state = self.state();
                let record = state.record(module)?;
                record.deps = Some(Vec::new());
                record.meta = Some(ModuleMeta::new(&record.mid, &record.url, value.clone()));
                record.capabilities = value.as_plugin().cloned();
                record.result = value.clone();
                record.state = ModuleState::Evaluated;
                Ok(value)
            }
            None => Err(LoaderError::unloaded(mid)),
        }
    }

    pub(crate) fn request_from(
        &self,
        ids: &[&str],
        callback: Option<Factory>,
        referrer: Option<ModuleId>,
    ) -> Result<()> {
        let module = {
            let mut state = self.state();
            let mid = format!("*{}", state.next_uid());
            let info = state.resolver.resolve(&mid, None);
            let (module, _) = state
                .registry
                .get_or_insert_with(&mid, |id| ModuleRecord::new(id, info));
            module
        };
        let deps: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let slots = self.resolve_deps(&deps, module, referrer)?;
        {
            let mut state = self.state();
            let record = state.record(module)?;
            record.synthetic = true;
            record.meta = Some(ModuleMeta::new(&record.mid, &record.url, Value::Object(Object::new())));
            record.deps = Some(slots);
            record.factory = Some(callback.unwrap_or_else(|| Factory::Value(Value::Object(Object::new()))));
            record.state = ModuleState::Defined;
        }
        debug!(deps = ?ids, "requested modules");

        if let Err(err) = self.inject_deps(module) {
            self.state().registry.remove(module);
            return Err(err);
        }
        self.state().exec_queue.push(module);
        self.check_complete()
    }

    pub(crate) fn to_abs_mid_from(&self, id: &str, referrer: Option<ModuleId>) -> String {
        let state = self.inner.state.borrow();
        let parent = state.mid(referrer);
        state.resolver.to_abs_mid(id, parent.as_deref())
    }

    pub(crate) fn to_url_from(&self, path: &str, referrer: Option<ModuleId>) -> String {
        let state = self.inner.state.borrow();
        let parent = state.mid(referrer);
        state.resolver.to_url(path, parent.as_deref())
    }

    pub(crate) fn mid_of(&self, id: Option<ModuleId>) -> Option<String> {
        self.inner.state.borrow().mid(id)
    }

    /// Store a plugin resource's value and drain the queue
    pub(crate) fn finish_resource(&self, module: ModuleId, value: Value) -> Result<()> {
        {
            let mut state = self.state();
            let record = state.record(module)?;
            if record.state == ModuleState::Evaluated {
                warn!(mid = %record.mid, "plugin resource completed twice");
                return Ok(());
            }
            debug!(mid = %record.mid, "plugin resource loaded");
            record.result = value;
            record.state = ModuleState::Evaluated;
        }
        self.inner.executed_something.set(true);
        self.check_complete()
    }

    fn available_result(&self, module: ModuleId) -> Option<Value> {
        let state = self.inner.state.borrow();
        state
            .registry
            .get(module)
            .filter(|record| matches!(record.state, ModuleState::Evaluated | ModuleState::Executing))
            .map(|record| record.result.clone())
    }

    /// Find or create the record `raw` names from the point of view of
    /// `referrer`.
    fn get_module(&self, raw: &str, referrer: Option<ModuleId>) -> Result<ModuleId> {
        let bang = raw.char_indices().skip(1).find(|(_, c)| *c == '!').map(|(i, _)| i);
        let Some(bang) = bang else {
            let mut state = self.state();
            let parent = state.mid(referrer);
            let info = state.resolver.resolve(raw, parent.as_deref());
            let mid = info.mid.clone();
            let (id, _) = state
                .registry
                .get_or_insert_with(&mid, |id| ModuleRecord::new(id, info));
            return Ok(id);
        };

        let (plugin_raw, resource_raw) = (&raw[..bang], &raw[bang + 1..]);
        let plugin = self.get_module(plugin_raw, referrer)?;
        let (plugin_mid, capabilities) = {
            let state = self.inner.state.borrow();
            let record = state
                .registry
                .get(plugin)
                .ok_or_else(|| LoaderError::generic(format!("module record {} is gone", plugin)))?;
            (record.mid.clone(), record.capabilities.clone())
        };

        let (mid, resource, placeholder) = match capabilities {
            Some(capabilities) => {
                let resource = capabilities.normalize(resource_raw, &|id: &str| self.to_abs_mid_from(id, referrer));
                let mid = if capabilities.is_dynamic() {
                    let uid = self.state().next_uid();
                    format!("{}!{}!{}", plugin_mid, uid, resource)
                } else {
                    format!("{}!{}", plugin_mid, resource)
                };
                (mid, resource, false)
            }
            None => {
                let uid = self.state().next_uid();
                (format!("{}!{}!*", plugin_mid, uid), resource_raw.to_string(), true)
            }
        };

        let mut state = self.state();
        let (id, _) = state.registry.get_or_insert_with(&mid, |id| {
            ModuleRecord::resource(id, mid.clone(), plugin, resource, referrer, placeholder)
        });
        Ok(id)
    }

    /// Resolve a dependency list for `module`, relative to `referrer`
    fn resolve_deps(&self, deps: &[String], module: ModuleId, referrer: Option<ModuleId>) -> Result<Vec<DepSlot>> {
        let mut slots = Vec::with_capacity(deps.len());
        for (index, dep) in deps.iter().enumerate() {
            let id = self.get_module(dep, referrer)?;
            let mut state = self.state();
            let record = state.record(id)?;
            if record.placeholder {
                record.retarget = Some((module, index));
                slots.push(DepSlot::Pending(id));
            } else {
                slots.push(DepSlot::Resolved(id));
            }
        }
        Ok(slots)
    }

    /// Give `module` its dependencies and factory
    fn define_module(&self, module: ModuleId, deps: &[String], factory: Factory) -> Result<()> {
        let slots = self.resolve_deps(deps, module, Some(module))?;
        self.install_definition(module, slots, factory)
    }

    fn install_definition(&self, module: ModuleId, slots: Vec<DepSlot>, factory: Factory) -> Result<()> {
        let mut state = self.state();
        let record = state.record(module)?;
        let meta = ModuleMeta::new(&record.mid, &record.url, Value::Object(Object::new()));
        record.result = meta.exports();
        record.meta = Some(meta);
        record.deps = Some(slots);
        record.factory = Some(factory);
        record.state = ModuleState::Defined;
        debug!(mid = %record.mid, "defined module");
        Ok(())
    }

    /// Inject every dependency of `module` with draining suspended
    fn inject_deps(&self, module: ModuleId) -> Result<()> {
        let slots = {
            let state = self.inner.state.borrow();
            state
                .registry
                .get(module)
                .and_then(|record| record.deps.clone())
                .unwrap_or_default()
        };
        let _guard = DrainGuard::new(&self.inner.guard);
        for slot in slots {
            self.inject_module(Some(module), slot.id())?;
        }
        Ok(())
    }

    /// Run `load` and return the `define` it issued, keeping any define
    /// pending from an enclosing load intact
    fn capture_define(&self, load: impl FnOnce() -> Result<()>) -> Result<Option<PendingDefine>> {
        let outer = self.state().pending_define.take();
        let loaded = load();
        let mut state = self.state();
        let captured = std::mem::replace(&mut state.pending_define, outer);
        loaded.map(|()| captured)
    }

    /// Start loading `module` unless that already happened
    fn inject_module(&self, parent: Option<ModuleId>, module: ModuleId) -> Result<()> {
        let (is_resource, unrequested, mid, url) = {
            let state = self.inner.state.borrow();
            let Some(record) = state.registry.get(module) else {
                return Ok(());
            };
            (
                record.plugin.is_some(),
                record.state == ModuleState::Unrequested,
                record.mid.clone(),
                record.url.clone(),
            )
        };
        if is_resource {
            return self.inject_plugin(module);
        }
        if !unrequested {
            return Ok(());
        }

        self.state().record(module)?.state = ModuleState::Injected;
        debug!(mid = %mid, url = %url, "injecting module");
        self.consume_pending_cache(parent);

        let (script, source) = {
            let state = self.inner.state.borrow();
            (state.cache.script(&mid), state.cache.source(&url))
        };
        if let Some(script) = script {
            match self.capture_define(|| script(self)) {
                Ok(pending) => return self.on_loaded(module, pending),
                Err(err) => warn!(mid = %mid, error = %err, "cached module failed; fetching instead"),
            }
        }
        if let Some(source) = source {
            match self.capture_define(|| self.inner.transport.evaluate(self, &url, &source)) {
                Ok(pending) => return self.on_loaded(module, pending),
                Err(err) => warn!(mid = %mid, error = %err, "cached source failed; fetching instead"),
            }
        }

        let request = {
            let mut state = self.state();
            state.next_ticket += 1;
            let ticket = FetchTicket(state.next_ticket);
            state.fetches.insert(ticket, InFlight { module, parent });
            FetchRequest {
                ticket,
                mid,
                url,
                parent: state.mid(parent),
            }
        };
        match self.inner.transport.fetch(&request) {
            Fetch::Ready(outcome) => self.complete_fetch(request.ticket, outcome),
            Fetch::Pending => Ok(()),
        }
    }

    /// Route a `plugin!resource` record to its plugin
    fn inject_plugin(&self, resource: ModuleId) -> Result<()> {
        let (plugin, resource_state, placeholder, name, referrer) = {
            let state = self.inner.state.borrow();
            let Some(record) = state.registry.get(resource) else {
                return Ok(());
            };
            let Some(plugin) = record.plugin else {
                return Ok(());
            };
            (
                plugin,
                record.state,
                record.placeholder,
                record.resource.clone(),
                record.referrer,
            )
        };
        let (plugin_mid, plugin_state, capabilities, queued) = {
            let state = self.inner.state.borrow();
            let record = state
                .registry
                .get(plugin)
                .ok_or_else(|| LoaderError::generic(format!("module record {} is gone", plugin)))?;
            (
                record.mid.clone(),
                record.state,
                record.capabilities.clone(),
                record.load_queue.is_some(),
            )
        };

        if let Some(capabilities) = capabilities {
            if placeholder {
                return self.resolve_load_queue(plugin, &capabilities, vec![resource]);
            }
            if resource_state != ModuleState::Unrequested {
                return Ok(());
            }
            self.state().record(resource)?.state = ModuleState::Injected;
            debug!(plugin = %plugin_mid, resource = %name, "loading plugin resource");
            let require = Require::new(&self.inner, referrer);
            let done = LoadCompletion::new(&self.inner, resource);
            return capabilities.load(&name, &require, done);
        }

        if resource_state == ModuleState::Unrequested {
            self.state().record(resource)?.state = ModuleState::Injected;
        }
        if queued {
            let mut state = self.state();
            if let Some(queue) = state.record(plugin)?.load_queue.as_mut() {
                if !queue.contains(&resource) {
                    queue.push(resource);
                }
            }
            return Ok(());
        }
        if plugin_state == ModuleState::Evaluated {
            return Err(LoaderError::NotAPlugin(plugin_mid));
        }

        debug!(plugin = %plugin_mid, "waiting for plugin");
        {
            let mut state = self.state();
            state.record(plugin)?.load_queue = Some(vec![resource]);
            state.exec_queue.insert(0, plugin);
        }
        self.inject_module(Some(resource), plugin)
    }

    /// Replace queued placeholders with the records they stand for
    fn resolve_load_queue(&self, plugin: ModuleId, capabilities: &Plugin, queue: Vec<ModuleId>) -> Result<()> {
        let plugin_mid = self
            .mid_of(Some(plugin))
            .ok_or_else(|| LoaderError::generic(format!("module record {} is gone", plugin)))?;

        for placeholder in queue {
            let (placeholder_mid, raw, referrer, retarget) = {
                let state = self.inner.state.borrow();
                let Some(record) = state.registry.get(placeholder) else {
                    continue;
                };
                (
                    record.mid.clone(),
                    record.resource.clone(),
                    record.referrer,
                    record.retarget,
                )
            };

            let resource = capabilities.normalize(&raw, &|id: &str| self.to_abs_mid_from(id, referrer));
            let mid = if capabilities.is_dynamic() {
                let stem = placeholder_mid.strip_suffix('*').unwrap_or(&placeholder_mid);
                format!("{}{}", stem, resource)
            } else {
                format!("{}!{}", plugin_mid, resource)
            };

            let (real, created) = self.state().registry.get_or_insert_with(&mid, |id| {
                ModuleRecord::resource(id, mid.clone(), plugin, resource, referrer, false)
            });
            trace!(placeholder = %placeholder_mid, mid = %mid, created, "resolved plugin placeholder");
            self.inject_plugin(real)?;

            let mut state = self.state();
            if let Some((owner, index)) = retarget {
                if let Some(slot) = state
                    .registry
                    .get_mut(owner)
                    .and_then(|record| record.deps.as_mut())
                    .and_then(|deps| deps.get_mut(index))
                {
                    *slot = DepSlot::Resolved(real);
                }
            }
            state.registry.remove(placeholder);
        }
        Ok(())
    }

    /// A module's source has run; define it from what it declared
    fn on_loaded(&self, module: ModuleId, pending: Option<PendingDefine>) -> Result<()> {
        self.consume_pending_cache(Some(module));

        let defined = {
            let state = self.inner.state.borrow();
            state
                .registry
                .get(module)
                .is_some_and(|record| record.state.is_defined())
        };
        if !defined {
            match pending {
                Some(PendingDefine {
                    alias_of: Some(target),
                    ..
                }) if target != module => {
                    let identity = Function::named("alias", |args| Ok(args.first().cloned().unwrap_or_default()));
                    self.install_definition(module, vec![DepSlot::Resolved(target)], Factory::Function(identity))?;
                }
                Some(pending) => self.define_module(module, &pending.deps, pending.factory)?,
                None => self.install_definition(module, Vec::new(), Factory::Value(Value::Undefined))?,
            }
        }

        self.inject_deps(module)?;
        self.check_complete()
    }

    /// Merge the staged cache table, resolving its keys against `referrer`
    fn consume_pending_cache(&self, referrer: Option<ModuleId>) {
        let mut state = self.state();
        if !state.cache.has_pending() {
            return;
        }
        let parent = state.mid(referrer);
        let table = state.cache.take_pending();
        for (key, entry) in table {
            match entry {
                CacheEntry::Script(script) => {
                    let mid = state.resolver.to_abs_mid(&key, parent.as_deref());
                    state.cache.insert_script(mid, script);
                }
                CacheEntry::Source(text) => {
                    let url = state.resolver.resolve(&key, parent.as_deref()).url;
                    state.cache.insert_source(url, text);
                }
            }
        }
    }

    /// Drain the execution queue
    fn check_complete(&self) -> Result<()> {
        if self.inner.guard.get() > 0 {
            return Ok(());
        }
        let _guard = DrainGuard::new(&self.inner.guard);

        let mut index = 0;
        loop {
            let next = {
                let state = self.inner.state.borrow();
                state.exec_queue.get(index).map(|id| {
                    let done = state
                        .registry
                        .get(*id)
                        .is_none_or(|record| record.state == ModuleState::Evaluated);
                    (*id, done)
                })
            };
            let Some((module, done)) = next else {
                break;
            };
            if done {
                self.state().exec_queue.remove(index);
                continue;
            }

            self.inner.executed_something.set(false);
            if let Err(err) = self.exec_module(module) {
                // a failed entry must not block later drains
                let mut state = self.state();
                state.exec_queue.retain(|id| *id != module);
                if state.registry.get(module).is_some_and(|record| record.synthetic) {
                    state.registry.remove(module);
                }
                return Err(err);
            }
            if self.inner.executed_something.get() {
                index = 0;
            } else {
                index += 1;
            }
        }
        trace!(queued = self.inner.state.borrow().exec_queue.len(), "drain finished");
        Ok(())
    }

    /// Evaluate `module` after its dependencies
    fn exec_module(&self, module: ModuleId) -> Result<Exec> {
        let (state, mid, result, uses_exports) = {
            let state = self.inner.state.borrow();
            let Some(record) = state.registry.get(module) else {
                return Ok(Exec::Abort);
            };
            (record.state, record.mid.clone(), record.result.clone(), record.uses_exports())
        };

        match state {
            ModuleState::Evaluated => return Ok(Exec::Done(result)),
            ModuleState::Executing => {
                if self.inner.options.trace_circular && !uses_exports {
                    let chain = {
                        let state = self.inner.state.borrow();
                        let mut chain = state.circular_trace.clone();
                        chain.push(mid);
                        chain.join(" -> ")
                    };
                    warn!("Circular dependency: {}", chain);
                }
                return Ok(Exec::Done(result));
            }
            ModuleState::Unrequested | ModuleState::Injected => return Ok(Exec::Abort),
            ModuleState::Defined => {}
        }

        {
            let mut state = self.state();
            state.record(module)?.state = ModuleState::Executing;
            if self.inner.options.trace_circular {
                state.circular_trace.push(mid.clone());
            }
        }

        let outcome = self.run_factory(module, &mid);

        if self.inner.options.trace_circular {
            self.state().circular_trace.pop();
        }
        match outcome {
            Ok(Exec::Done(value)) => Ok(Exec::Done(value)),
            other => {
                let mut state = self.state();
                if let Some(record) = state.registry.get_mut(module) {
                    if record.state == ModuleState::Executing {
                        record.state = ModuleState::Defined;
                    }
                }
                other
            }
        }
    }

    fn run_factory(&self, module: ModuleId, mid: &str) -> Result<Exec> {
        let mut args = Vec::new();
        let mut index = 0;
        loop {
            // read live: a plugin may retarget a slot while earlier ones run
            let (slot, meta) = {
                let state = self.inner.state.borrow();
                let record = state
                    .registry
                    .get(module)
                    .ok_or_else(|| LoaderError::generic(format!("module record {} is gone", module)))?;
                let slot = record.deps.as_ref().and_then(|deps| deps.get(index).copied());
                (slot, record.meta.clone())
            };
            let Some(slot) = slot else {
                break;
            };
            let value = match slot.id() {
                REQUIRE => Value::Require(Require::new(&self.inner, Some(module))),
                EXPORTS => meta.as_ref().map(ModuleMeta::exports).unwrap_or_default(),
                MODULE => meta.clone().map(Value::Module).unwrap_or_default(),
                dep => match self.exec_module(dep)? {
                    Exec::Done(value) => value,
                    Exec::Abort => return Ok(Exec::Abort),
                },
            };
            args.push(value);
            index += 1;
        }

        let (factory, meta) = {
            let state = self.inner.state.borrow();
            let record = state
                .registry
                .get(module)
                .ok_or_else(|| LoaderError::generic(format!("module record {} is gone", module)))?;
            (record.factory.clone(), record.meta.clone())
        };
        debug!(mid, "executing module");
        let produced = match factory {
            Some(factory) => factory.produce(&args)?,
            None => Value::Undefined,
        };
        let result = match meta {
            Some(meta) if produced.is_undefined() => meta.exports(),
            _ => produced,
        };

        let (queue, capabilities) = {
            let mut state = self.state();
            let record = state.record(module)?;
            record.result = result.clone();
            record.state = ModuleState::Evaluated;
            let capabilities = result.as_plugin().cloned();
            if capabilities.is_some() {
                record.capabilities = capabilities.clone();
            }
            let queue = record.load_queue.take();
            if record.synthetic {
                state.registry.remove(module);
            }
            (queue, capabilities)
        };
        self.inner.executed_something.set(true);

        if let Some(queue) = queue {
            match capabilities {
                Some(capabilities) => self.resolve_load_queue(module, &capabilities, queue)?,
                None => return Err(LoaderError::NotAPlugin(mid.to_string())),
            }
        }
        Ok(Exec::Done(result))
    }
}
