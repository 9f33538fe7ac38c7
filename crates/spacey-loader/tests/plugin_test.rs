//! Loader plugin integration tests
//!
//! `plugin!resource` ids: placeholders while the plugin loads, canonical
//! records afterwards, dynamic plugins and deferred completions.

use spacey_loader::{
    Definition, Factory, LoadCompletion, Loader, LoaderError, LoaderPlugin, MemoryTransport,
    Plugin, Require, Result, Value,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Resolves every resource to its upper-cased name
struct Upper {
    loads: Rc<Cell<usize>>,
    dynamic: bool,
}

impl LoaderPlugin for Upper {
    fn load(&self, resource: &str, _require: &Require, done: LoadCompletion) -> Result<()> {
        self.loads.set(self.loads.get() + 1);
        done.resolve(resource.to_uppercase())
    }

    fn is_dynamic(&self) -> bool {
        self.dynamic
    }
}

/// Holds completions until the test releases them
struct Held {
    pending: Rc<RefCell<Vec<(String, LoadCompletion)>>>,
}

impl LoaderPlugin for Held {
    fn load(&self, resource: &str, _require: &Require, done: LoadCompletion) -> Result<()> {
        self.pending.borrow_mut().push((resource.to_string(), done));
        Ok(())
    }

    fn normalize(&self, resource: &str, _to_abs_mid: &dyn Fn(&str) -> String) -> String {
        resource.to_lowercase()
    }
}

/// Loads the resource as a module through the contextual require
struct Wrap;

impl LoaderPlugin for Wrap {
    fn load(&self, resource: &str, require: &Require, done: LoadCompletion) -> Result<()> {
        let inner = require.sync(resource)?;
        done.resolve(format!("[{}]", inner))
    }
}

fn upper_transport(loads: &Rc<Cell<usize>>, dynamic: bool) -> MemoryTransport {
    let loads = loads.clone();
    MemoryTransport::new().script("upper.js", move |loader| {
        let plugin = Plugin::new(Upper {
            loads: loads.clone(),
            dynamic,
        });
        loader.define(Definition::value(plugin))
    })
}

fn recorder() -> (Rc<RefCell<Vec<Value>>>, Factory) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let callback = Factory::function(move |args| {
        sink.borrow_mut().extend(args.iter().cloned());
        Ok(Value::Undefined)
    });
    (seen, callback)
}

#[test]
fn test_plugin_resource_loads_once() {
    let loads = Rc::new(Cell::new(0));
    let loader = Loader::with_transport(upper_transport(&loads, false));

    let (seen, callback) = recorder();
    loader.request(&["upper!hello", "upper!hello"], Some(callback)).unwrap();
    assert_eq!(*seen.borrow(), vec![Value::from("HELLO"), Value::from("HELLO")]);
    assert_eq!(loads.get(), 1);

    assert_eq!(loader.require("upper!hello").unwrap(), Value::from("HELLO"));
    assert!(loader.is_registered("upper!hello"));
    assert_eq!(loads.get(), 1);
}

#[test]
fn test_placeholders_collapse_onto_one_record() {
    let loads = Rc::new(Cell::new(0));
    let transport = Rc::new(upper_transport(&loads, false).deferred());
    let loader = Loader::builder().transport(transport.clone()).build().unwrap();

    let (first, first_callback) = recorder();
    let (second, second_callback) = recorder();
    loader.request(&["upper!file.txt"], Some(first_callback)).unwrap();
    loader.request(&["upper!file.txt"], Some(second_callback)).unwrap();

    let placeholders: Vec<String> = loader
        .module_ids()
        .into_iter()
        .filter(|mid| mid.starts_with("upper!") && mid.ends_with("!*"))
        .collect();
    assert_eq!(placeholders.len(), 2);
    assert_ne!(placeholders[0], placeholders[1]);

    // only the plugin itself is fetched
    let requests = transport.take_requests();
    assert_eq!(requests.len(), 1);
    for request in requests {
        loader.complete_fetch(request.ticket, transport.outcome_for(&request.url)).unwrap();
    }

    assert_eq!(*first.borrow(), vec![Value::from("FILE.TXT")]);
    assert_eq!(*second.borrow(), vec![Value::from("FILE.TXT")]);
    assert_eq!(loads.get(), 1);

    let resources: Vec<String> = loader
        .module_ids()
        .into_iter()
        .filter(|mid| mid.starts_with("upper!"))
        .collect();
    assert_eq!(resources, vec!["upper!file.txt".to_string()]);
}

#[test]
fn test_sync_require_loads_plugin_first() {
    let loads = Rc::new(Cell::new(0));
    let loader = Loader::with_transport(upper_transport(&loads, false));

    assert_eq!(loader.require("upper!x").unwrap(), Value::from("X"));
    assert_eq!(loads.get(), 1);
    assert!(loader.is_registered("upper!x"));
    assert!(loader.module_ids().iter().all(|mid| !mid.ends_with("!*")));
}

#[test]
fn test_sync_require_of_resource_with_pending_plugin() {
    let loads = Rc::new(Cell::new(0));
    let transport = Rc::new(upper_transport(&loads, false).deferred());
    let loader = Loader::builder().transport(transport.clone()).build().unwrap();

    let err = loader.require("upper!x").unwrap_err();
    assert!(matches!(err, LoaderError::UnloadedModule(ref mid) if mid == "upper!x"));
    assert!(loader.module_ids().iter().all(|mid| !mid.ends_with("!*")));
    assert_eq!(loads.get(), 0);

    for request in transport.take_requests() {
        loader.complete_fetch(request.ticket, transport.outcome_for(&request.url)).unwrap();
    }
    assert_eq!(loader.require("upper!x").unwrap(), Value::from("X"));
    assert_eq!(loads.get(), 1);
}

#[test]
fn test_dynamic_plugin_loads_every_request() {
    let loads = Rc::new(Cell::new(0));
    let loader = Loader::with_transport(upper_transport(&loads, true));
    loader.request(&["upper"], None).unwrap();

    let (seen, callback) = recorder();
    loader.request(&["upper!x", "upper!x"], Some(callback)).unwrap();
    assert_eq!(*seen.borrow(), vec![Value::from("X"), Value::from("X")]);
    assert_eq!(loads.get(), 2);

    let records = loader
        .module_ids()
        .into_iter()
        .filter(|mid| mid.starts_with("upper!") && mid.ends_with("!x"))
        .count();
    assert_eq!(records, 2);
}

#[test]
fn test_deferred_completion_and_normalize() {
    let pending = Rc::new(RefCell::new(Vec::new()));
    let shared = pending.clone();
    let transport = MemoryTransport::new().script("held.js", move |loader| {
        let plugin = Plugin::new(Held {
            pending: shared.clone(),
        });
        loader.define(Definition::value(plugin))
    });
    let loader = Loader::with_transport(transport);
    loader.request(&["held"], None).unwrap();

    let (seen, callback) = recorder();
    loader.request(&["held!Data", "held!DATA"], Some(callback)).unwrap();
    assert!(seen.borrow().is_empty());
    assert!(loader.is_registered("held!data"));
    assert_eq!(pending.borrow().len(), 1);

    let (resource, done) = pending.borrow_mut().remove(0);
    assert_eq!(resource, "data");
    done.resolve(Value::Number(42.0)).unwrap();
    assert_eq!(*seen.borrow(), vec![Value::Number(42.0), Value::Number(42.0)]);
}

#[test]
fn test_plugin_loads_through_contextual_require() {
    let transport = MemoryTransport::new()
        .script("lib/wrap.js", |loader| loader.define(Definition::value(Plugin::new(Wrap))))
        .script("lib/inner.js", |loader| loader.define(Definition::value("inner")))
        .script("lib/main.js", |loader| {
            loader.define(
                Definition::function(|args| Ok(args[0].clone())).deps(&["./wrap!./inner"]),
            )
        });
    let loader = Loader::with_transport(transport);
    loader.request(&["lib/inner", "lib/wrap"], None).unwrap();
    loader.request(&["lib/main"], None).unwrap();
    assert_eq!(loader.module_result("lib/main"), Some(Value::from("[inner]")));
    assert!(loader.is_registered("lib/wrap!lib/inner"));
}

#[test]
fn test_plugin_prefix_must_be_a_plugin() {
    let transport = MemoryTransport::new().script("plain.js", |loader| {
        loader.define(Definition::value(1.0))
    });
    let loader = Loader::with_transport(transport);

    let err = loader.request(&["plain!resource"], None).unwrap_err();
    assert!(matches!(err, LoaderError::NotAPlugin(ref mid) if mid == "plain"));
}
