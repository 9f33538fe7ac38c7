// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Pre-fetched module cache

use crate::runtime::Script;
use std::collections::HashMap;
use std::fmt;

/// One entry of a cache table passed to [`Loader::cache`](crate::Loader::cache)
#[derive(Clone)]
pub enum CacheEntry {
    /// Keyed by module id; runs instead of fetching the module
    Script(Script),
    /// Keyed by location; evaluated instead of fetching
    Source(String),
}

impl CacheEntry {
    /// Wrap a defining closure
    pub fn script(f: impl Fn(&crate::Loader) -> crate::Result<()> + 'static) -> Self {
        Self::Script(std::rc::Rc::new(f))
    }

    /// Wrap source text
    pub fn source(text: impl Into<String>) -> Self {
        Self::Source(text.into())
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(_) => f.write_str("Script(..)"),
            Self::Source(text) => f.debug_tuple("Source").field(&text.len()).finish(),
        }
    }
}

/// A cache table, keyed by module id (scripts) or location (sources)
pub type CacheTable = HashMap<String, CacheEntry>;

/// Consumed cache entries plus the table waiting to be merged
#[derive(Default)]
pub(crate) struct ModuleCache {
    scripts: HashMap<String, Script>,
    sources: HashMap<String, String>,
    pending: CacheTable,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a table; it is merged on the next consume
    pub fn stage(&mut self, table: CacheTable) {
        self.pending = table;
    }

    /// Take the staged table
    pub fn take_pending(&mut self) -> CacheTable {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn insert_script(&mut self, mid: String, script: Script) {
        self.scripts.insert(mid, script);
    }

    pub fn insert_source(&mut self, url: String, source: String) {
        self.sources.insert(url, source);
    }

    /// Cached thunk for a module id
    pub fn script(&self, mid: &str) -> Option<Script> {
        self.scripts.get(mid).cloned()
    }

    /// Cached source for a location
    pub fn source(&self, url: &str) -> Option<String> {
        self.sources.get(url).cloned()
    }

    /// Number of consumed entries
    pub fn len(&self) -> usize {
        self.scripts.len() + self.sources.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_replaces_pending() {
        let mut cache = ModuleCache::new();
        let mut first = CacheTable::new();
        first.insert("a".into(), CacheEntry::source("1"));
        cache.stage(first);
        let mut second = CacheTable::new();
        second.insert("b".into(), CacheEntry::source("2"));
        cache.stage(second);

        let pending = cache.take_pending();
        assert_eq!(pending.len(), 1);
        assert!(pending.contains_key("b"));
        assert!(!cache.has_pending());
    }

    #[test]
    fn test_lookup_consumed_entries() {
        let mut cache = ModuleCache::new();
        cache.insert_source("a.js".into(), "text".into());
        cache.insert_script("b".into(), std::rc::Rc::new(|_: &crate::Loader| -> crate::Result<()> { Ok(()) }));
        assert_eq!(cache.source("a.js").as_deref(), Some("text"));
        assert!(cache.script("b").is_some());
        assert!(cache.script("a").is_none());
        assert_eq!(cache.len(), 2);
    }
}
