// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Values exchanged between module factories.
//!
//! Objects are shared by reference: the exports object handed to a module
//! that is still executing is the same object its dependents hold, so
//! properties assigned later are visible to everyone.

use crate::error::Result;
use crate::module_system::{Plugin, Require};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A module value.
#[derive(Clone, Default)]
pub enum Value {
    /// undefined
    #[default]
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Shared, mutable object
    Object(Object),
    /// Native function
    Function(Function),
    /// Contextual requester bound to a module
    Require(Require),
    /// The `module` metadata object of a module
    Module(ModuleMeta),
    /// A loader plugin declaration
    Plugin(Plugin),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                // Handle NaN comparisons
                if a.is_nan() && b.is_nan() {
                    false
                } else {
                    a == b
                }
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Require(a), Value::Require(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a.ptr_eq(b),
            (Value::Plugin(a), Value::Plugin(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Value {
    /// Returns true if this value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Returns the object if this value is one.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Returns the string slice if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the requester if this value is one.
    pub fn as_require(&self) -> Option<&Require> {
        match self {
            Value::Require(req) => Some(req),
            _ => None,
        }
    }

    /// Returns the module metadata if this value is one.
    pub fn as_module(&self) -> Option<&ModuleMeta> {
        match self {
            Value::Module(meta) => Some(meta),
            _ => None,
        }
    }

    /// Returns the plugin declaration if this value is one.
    pub fn as_plugin(&self) -> Option<&Plugin> {
        match self {
            Value::Plugin(plugin) => Some(plugin),
            _ => None,
        }
    }

    /// Returns the type of this value as a string.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) | Value::Object(_) | Value::Module(_) | Value::Plugin(_) => "object",
            Value::Function(_) | Value::Require(_) => "function",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(obj) => fmt::Debug::fmt(obj, f),
            Value::Require(req) => fmt::Debug::fmt(req, f),
            Value::Module(meta) => fmt::Debug::fmt(meta, f),
            other => write!(f, "{}", other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function(func) => match func.name() {
                Some(name) => write!(f, "[Function: {}]", name),
                None => write!(f, "[Function (anonymous)]"),
            },
            Value::Require(_) => write!(f, "[Function: require]"),
            Value::Module(meta) => write!(f, "[module {}]", meta.id()),
            Value::Plugin(_) => write!(f, "[object LoaderPlugin]"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Value::Object(obj)
    }
}

impl From<Function> for Value {
    fn from(func: Function) -> Self {
        Value::Function(func)
    }
}

impl From<Plugin> for Value {
    fn from(plugin: Plugin) -> Self {
        Value::Plugin(plugin)
    }
}

/// A shared, mutable property bag.
#[derive(Clone, Default)]
pub struct Object(Rc<RefCell<HashMap<String, Value>>>);

impl Object {
    /// Create an empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a property
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    /// Set a property
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.borrow_mut().insert(key.into(), value.into());
    }

    /// Check whether a property exists
    pub fn has(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    /// Property names, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.0.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Whether the object has no properties
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys only: module graphs are routinely cyclic.
        f.debug_struct("Object").field("keys", &self.keys()).finish()
    }
}

type NativeFn = dyn Fn(&[Value]) -> Result<Value>;

/// A native function value.
#[derive(Clone)]
pub struct Function {
    name: Option<String>,
    call: Rc<NativeFn>,
}

impl Function {
    /// Wrap an anonymous closure
    pub fn new(f: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        Self {
            name: None,
            call: Rc::new(f),
        }
    }

    /// Wrap a named closure
    pub fn named(name: impl Into<String>, f: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        Self {
            name: Some(name.into()),
            call: Rc::new(f),
        }
    }

    /// The function name (if any)
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Invoke the function
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.call)(args)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.call, &other.call)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("name", &self.name).finish()
    }
}

/// The `module` object passed to factories that depend on `"module"`.
#[derive(Clone)]
pub struct ModuleMeta(Rc<MetaInner>);

struct MetaInner {
    id: String,
    uri: String,
    exports: RefCell<Value>,
}

impl ModuleMeta {
    pub(crate) fn new(id: &str, uri: &str, exports: Value) -> Self {
        Self(Rc::new(MetaInner {
            id: id.to_string(),
            uri: uri.to_string(),
            exports: RefCell::new(exports),
        }))
    }

    /// Canonical module id
    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Fetch location of the module
    pub fn uri(&self) -> &str {
        &self.0.uri
    }

    /// The current exports value
    pub fn exports(&self) -> Value {
        self.0.exports.borrow().clone()
    }

    /// Replace the exports value; used as the module result when the
    /// factory returns undefined
    pub fn set_exports(&self, exports: impl Into<Value>) {
        *self.0.exports.borrow_mut() = exports.into();
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ModuleMeta) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ModuleMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleMeta")
            .field("id", &self.0.id)
            .field("uri", &self.0.uri)
            .finish()
    }
}
