// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module definitions handed to [`Loader::define`](crate::Loader::define)

use crate::error::Result;
use crate::value::{Function, Value};

/// Dependencies given to callable factories declared without a list
pub const COMMONJS_DEPS: [&str; 3] = ["require", "exports", "module"];

/// What a module evaluates to
#[derive(Debug, Clone)]
pub enum Factory {
    /// Used verbatim as the module result
    Value(Value),
    /// Called with the dependency results
    Function(Function),
}

impl Factory {
    /// Callable factory
    pub fn function(f: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        Self::Function(Function::new(f))
    }

    /// Value factory
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    /// Whether the factory is invoked with arguments
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    pub(crate) fn produce(&self, args: &[Value]) -> Result<Value> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Function(func) => func.call(args),
        }
    }
}

impl From<Function> for Factory {
    fn from(func: Function) -> Self {
        Self::Function(func)
    }
}

/// Arguments of a `define` call.
///
/// ```
/// use spacey_loader::{Definition, Factory, Value};
///
/// let def = Definition::new(Factory::function(|args| Ok(args[0].clone())))
///     .id("app/config")
///     .deps(&["app/defaults"]);
/// assert_eq!(def.dependencies(), vec!["app/defaults".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct Definition {
    pub(crate) id: Option<String>,
    deps: Option<Vec<String>>,
    pub(crate) factory: Factory,
}

impl Definition {
    /// Anonymous definition; its id is taken from the load that evaluates it
    pub fn new(factory: Factory) -> Self {
        Self {
            id: None,
            deps: None,
            factory,
        }
    }

    /// Shorthand for `define(value)`
    pub fn value(value: impl Into<Value>) -> Self {
        Self::new(Factory::value(value))
    }

    /// Shorthand for a CommonJS-style `define(function (require, exports, module) {...})`
    pub fn function(f: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        Self::new(Factory::function(f))
    }

    /// Give the definition an explicit module id
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Declare the dependency list
    pub fn deps(mut self, deps: &[&str]) -> Self {
        self.deps = Some(deps.iter().map(|dep| dep.to_string()).collect());
        self
    }

    /// Explicit module id, if any
    pub fn module_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Effective dependency list
    pub fn dependencies(&self) -> Vec<String> {
        match (&self.deps, &self.factory) {
            (Some(deps), _) => deps.clone(),
            (None, Factory::Function(_)) => COMMONJS_DEPS.iter().map(|dep| dep.to_string()).collect(),
            (None, Factory::Value(_)) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commonjs_default_deps() {
        let def = Definition::function(|_| Ok(Value::Undefined));
        assert_eq!(def.dependencies(), vec!["require", "exports", "module"]);
    }

    #[test]
    fn test_value_definition_has_no_deps() {
        let def = Definition::value(42.0);
        assert!(def.dependencies().is_empty());
        assert_eq!(def.factory.produce(&[]).unwrap(), Value::Number(42.0));
    }

    #[test]
    fn test_explicit_deps_kept() {
        let def = Definition::function(|_| Ok(Value::Null)).deps(&[]);
        assert!(def.dependencies().is_empty());
        let def = def.id("named");
        assert_eq!(def.module_id(), Some("named"));
    }

    #[test]
    fn test_function_factory_receives_args() {
        let factory = Factory::function(|args| Ok(Value::Number(args.len() as f64)));
        assert!(factory.is_callable());
        assert_eq!(
            factory.produce(&[Value::Null, Value::Null]).unwrap(),
            Value::Number(2.0)
        );
    }
}
