// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Fetch transports
//!
//! The loader never reads sources itself. A [`Transport`] turns a fetch
//! location into either a defining script or source text, synchronously
//! or later through [`Loader::complete_fetch`](crate::Loader::complete_fetch).

use crate::error::{LoaderError, Result};
use crate::module_system::Loader;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// A unit of already compiled code: running it calls `define`
pub type Script = Rc<dyn Fn(&Loader) -> Result<()>>;

/// Runs source text against a loader
pub type Evaluator = Rc<dyn Fn(&Loader, &str, &str) -> Result<()>>;

/// Identifies one outstanding fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchTicket(pub(crate) u64);

impl fmt::Display for FetchTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the loader asks a transport for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Ticket to complete the fetch with
    pub ticket: FetchTicket,
    /// Canonical module id
    pub mid: String,
    /// Fetch location
    pub url: String,
    /// Id of the module that needed it
    pub parent: Option<String>,
}

/// Result of a fetch
#[derive(Clone)]
pub enum FetchOutcome {
    /// Compiled code to run
    Script(Script),
    /// Source text for [`Transport::evaluate`]
    Source(String),
    /// The location could not be read
    Failed(String),
}

impl FetchOutcome {
    /// Wrap a defining closure
    pub fn script(f: impl Fn(&Loader) -> Result<()> + 'static) -> Self {
        Self::Script(Rc::new(f))
    }
}

impl fmt::Debug for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(_) => f.write_str("Script(..)"),
            Self::Source(text) => f.debug_tuple("Source").field(&text.len()).finish(),
            Self::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
        }
    }
}

/// Synchronous answer of [`Transport::fetch`]
#[derive(Debug, Clone)]
pub enum Fetch {
    /// Available now
    Ready(FetchOutcome),
    /// Will be delivered through [`Loader::complete_fetch`](crate::Loader::complete_fetch)
    Pending,
}

/// Host side of module fetching
pub trait Transport {
    /// Start fetching `request.url`
    fn fetch(&self, request: &FetchRequest) -> Fetch;

    /// Run source text so that it calls [`Loader::define`](crate::Loader::define)
    fn evaluate(&self, _loader: &Loader, url: &str, _source: &str) -> Result<()> {
        Err(LoaderError::NoEvaluator(url.to_string()))
    }

    /// Host-native fallback for modules the transport cannot fetch
    fn load_native(&self, _mid: &str, _parent: Option<&str>) -> Option<Value> {
        None
    }
}

impl<T: Transport + ?Sized> Transport for Rc<T> {
    fn fetch(&self, request: &FetchRequest) -> Fetch {
        (**self).fetch(request)
    }

    fn evaluate(&self, loader: &Loader, url: &str, source: &str) -> Result<()> {
        (**self).evaluate(loader, url, source)
    }

    fn load_native(&self, mid: &str, parent: Option<&str>) -> Option<Value> {
        (**self).load_native(mid, parent)
    }
}

/// In-memory transport: a location to outcome table plus native modules.
///
/// In deferred mode every fetch is recorded and answered with
/// [`Fetch::Pending`]; tests complete them by hand.
#[derive(Default)]
pub struct MemoryTransport {
    outcomes: HashMap<String, FetchOutcome>,
    natives: HashMap<String, Value>,
    evaluator: Option<Evaluator>,
    deferred: bool,
    requests: RefCell<Vec<FetchRequest>>,
}

impl MemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a defining closure at `url`
    pub fn script(mut self, url: impl Into<String>, f: impl Fn(&Loader) -> Result<()> + 'static) -> Self {
        self.outcomes.insert(url.into(), FetchOutcome::script(f));
        self
    }

    /// Serve source text at `url`
    pub fn source(mut self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.outcomes.insert(url.into(), FetchOutcome::Source(text.into()));
        self
    }

    /// Provide a native module for the fallback path
    pub fn native(mut self, mid: impl Into<String>, value: impl Into<Value>) -> Self {
        self.natives.insert(mid.into(), value.into());
        self
    }

    /// Evaluate source text with `f`
    pub fn evaluator(mut self, f: impl Fn(&Loader, &str, &str) -> Result<()> + 'static) -> Self {
        self.evaluator = Some(Rc::new(f));
        self
    }

    /// Answer every fetch with [`Fetch::Pending`]
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Requests seen so far, oldest first; clears the log
    pub fn take_requests(&self) -> Vec<FetchRequest> {
        std::mem::take(&mut *self.requests.borrow_mut())
    }

    /// What a fetch of `url` produces
    pub fn outcome_for(&self, url: &str) -> FetchOutcome {
        self.outcomes
            .get(url)
            .cloned()
            .unwrap_or_else(|| FetchOutcome::Failed(format!("no entry for {}", url)))
    }
}

impl Transport for MemoryTransport {
    fn fetch(&self, request: &FetchRequest) -> Fetch {
        self.requests.borrow_mut().push(request.clone());
        if self.deferred {
            Fetch::Pending
        } else {
            Fetch::Ready(self.outcome_for(&request.url))
        }
    }

    fn evaluate(&self, loader: &Loader, url: &str, source: &str) -> Result<()> {
        match &self.evaluator {
            Some(evaluate) => evaluate(loader, url, source),
            None => Err(LoaderError::NoEvaluator(url.to_string())),
        }
    }

    fn load_native(&self, mid: &str, _parent: Option<&str>) -> Option<Value> {
        self.natives.get(mid).cloned()
    }
}

/// Reads sources from disk synchronously and evaluates them with a
/// host-supplied evaluator
pub struct FileTransport {
    root: PathBuf,
    evaluator: Evaluator,
}

impl FileTransport {
    /// Resolve relative locations against `root`
    pub fn new(root: impl Into<PathBuf>, evaluator: impl Fn(&Loader, &str, &str) -> Result<()> + 'static) -> Self {
        Self {
            root: root.into(),
            evaluator: Rc::new(evaluator),
        }
    }

    /// File a location refers to
    pub fn path_for(&self, url: &str) -> PathBuf {
        location_path(&self.root, url)
    }
}

impl Transport for FileTransport {
    fn fetch(&self, request: &FetchRequest) -> Fetch {
        let path = self.path_for(&request.url);
        match std::fs::read_to_string(&path) {
            Ok(text) => Fetch::Ready(FetchOutcome::Source(text)),
            Err(err) => Fetch::Ready(FetchOutcome::Failed(format!("{}: {}", path.display(), err))),
        }
    }

    fn evaluate(&self, loader: &Loader, url: &str, source: &str) -> Result<()> {
        (self.evaluator)(loader, url, source)
    }
}

/// Map a fetch location onto the file system, dropping any query string
pub(crate) fn location_path(root: &Path, url: &str) -> PathBuf {
    let url = url.split_once('?').map_or(url, |(path, _)| path);
    let url = url.strip_prefix("file://").unwrap_or(url);
    let path = Path::new(url);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> FetchRequest {
        FetchRequest {
            ticket: FetchTicket(1),
            mid: "m".into(),
            url: url.into(),
            parent: None,
        }
    }

    #[test]
    fn test_location_path() {
        let root = Path::new("/srv/app");
        assert_eq!(location_path(root, "lib/a.js"), PathBuf::from("/srv/app/lib/a.js"));
        assert_eq!(location_path(root, "lib/a.js?v=3"), PathBuf::from("/srv/app/lib/a.js"));
        assert_eq!(location_path(root, "/abs/b.js"), PathBuf::from("/abs/b.js"));
        assert_eq!(location_path(root, "file:///abs/c.js"), PathBuf::from("/abs/c.js"));
    }

    #[test]
    fn test_memory_transport_records_requests() {
        let transport = MemoryTransport::new().source("a.js", "text").deferred();
        assert!(matches!(transport.fetch(&request("a.js")), Fetch::Pending));
        let requests = transport.take_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "a.js");
        assert!(transport.take_requests().is_empty());
        assert!(matches!(transport.outcome_for("a.js"), FetchOutcome::Source(ref s) if s == "text"));
        assert!(matches!(transport.outcome_for("b.js"), FetchOutcome::Failed(_)));
    }

    #[test]
    fn test_file_transport_reads_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.js"), "define(1)").unwrap();
        let transport = FileTransport::new(dir.path(), |_, _, _| Ok(()));

        match transport.fetch(&request("a.js")) {
            Fetch::Ready(FetchOutcome::Source(text)) => assert_eq!(text, "define(1)"),
            other => panic!("unexpected fetch result: {:?}", other),
        }
        assert!(matches!(
            transport.fetch(&request("missing.js")),
            Fetch::Ready(FetchOutcome::Failed(_))
        ));
    }

    #[test]
    fn test_native_lookup() {
        let transport = MemoryTransport::new().native("fs", "native fs");
        assert_eq!(transport.load_native("fs", None), Some(Value::from("native fs")));
        assert_eq!(transport.load_native("path", Some("app")), None);
    }
}
