// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module identity resolution
//!
//! Turns a raw module id (possibly relative, aliased or package-qualified)
//! into its canonical id, owning package and fetch location. Everything in
//! here is pure apart from the compiled mapping tables.

use crate::config::Config;
use crate::error::{LoaderError, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

/// Default base location
pub const DEFAULT_BASE_URL: &str = "./";

/// Collapse `.` and `..` segments and normalize backslashes.
///
/// A `..` pops the segment before it unless nothing precedes it or the
/// preceding kept segment is itself `..`; such leading `..` segments are kept.
pub fn compact_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let mut result: Vec<&str> = Vec::new();

    for segment in normalized.split('/') {
        match segment {
            ".." if result.last().is_some_and(|last| *last != "..") => {
                result.pop();
            }
            "." => {}
            _ => result.push(segment),
        }
    }

    result.join("/")
}

/// A declared package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Package name
    pub name: String,
    /// Root location, always ending in `/`
    pub location: String,
    /// Main module name
    pub main: Option<String>,
}

/// One compiled mapping entry
#[derive(Debug, Clone)]
pub struct MapEntry<T> {
    prefix: String,
    value: T,
    matcher: Regex,
}

impl<T> MapEntry<T> {
    /// Source prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Replacement (or nested program)
    pub fn value(&self) -> &T {
        &self.value
    }

    fn matches(&self, id: &str) -> bool {
        self.matcher.is_match(id)
    }
}

impl MapEntry<String> {
    /// Substitute the matched prefix of `id` with the replacement
    pub fn apply(&self, id: &str) -> String {
        format!("{}{}", self.value, &id[self.prefix.len()..])
    }
}

/// Mapping entries ordered by descending prefix length.
///
/// A prefix matches an id that equals it or continues with `/`. The
/// longest matching prefix wins regardless of declaration order.
#[derive(Debug, Clone)]
pub struct MapProgram<T> {
    entries: Vec<MapEntry<T>>,
}

impl<T> Default for MapProgram<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> MapProgram<T> {
    /// Compile a program from `(prefix, value)` pairs
    pub fn compile(table: impl IntoIterator<Item = (String, T)>) -> Result<Self> {
        let mut entries = Vec::new();
        for (prefix, value) in table {
            let pattern = format!("^{}(?:/|$)", regex::escape(&prefix));
            let matcher = Regex::new(&pattern).map_err(|source| LoaderError::Pattern {
                prefix: prefix.clone(),
                source,
            })?;
            entries.push(MapEntry {
                prefix,
                value,
                matcher,
            });
        }
        // stable: equal lengths keep declaration order
        entries.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { entries })
    }

    /// Find the longest entry matching `id`
    pub fn lookup(&self, id: &str) -> Option<&MapEntry<T>> {
        self.entries.iter().find(|entry| entry.matches(id))
    }

    /// Entries in match order
    pub fn entries(&self) -> &[MapEntry<T>] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the program has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compiled nested alias table.
#[derive(Debug, Clone, Default)]
pub struct AliasProgram {
    scopes: MapProgram<MapProgram<String>>,
    star: Option<MapProgram<String>>,
}

impl AliasProgram {
    /// Compile a nested alias table
    pub fn compile(map: &BTreeMap<String, BTreeMap<String, String>>) -> Result<Self> {
        let mut scoped = Vec::with_capacity(map.len());
        let mut star = None;
        for (scope, aliases) in map {
            let program = MapProgram::compile(aliases.iter().map(|(k, v)| (k.clone(), v.clone())))?;
            if scope == "*" {
                star = Some(program.clone());
            }
            scoped.push((scope.clone(), program));
        }
        Ok(Self {
            scopes: MapProgram::compile(scoped)?,
            star,
        })
    }

    /// The alias program that applies to ids requested by `referrer`
    pub fn for_referrer(&self, referrer: Option<&str>) -> Option<&MapProgram<String>> {
        referrer
            .and_then(|mid| self.scopes.lookup(mid))
            .map(|entry| entry.value())
            .or(self.star.as_ref())
    }
}

/// Resolved identity of a module id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Canonical module id
    pub mid: String,
    /// Owning package id; empty for the default package
    pub pid: String,
    /// Fetch location
    pub url: String,
}

/// Module id resolver holding the compiled mapping tables
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    base_url: String,
    packages: HashMap<String, Package>,
    map: BTreeMap<String, BTreeMap<String, String>>,
    aliases: AliasProgram,
    paths: MapProgram<String>,
}

impl Default for ModuleResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleResolver {
    /// Create a resolver with the default base location and no mappings
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            packages: HashMap::new(),
            map: BTreeMap::new(),
            aliases: AliasProgram::default(),
            paths: MapProgram::default(),
        }
    }

    /// Apply a configuration.
    ///
    /// Nothing changes if any mapping prefix fails to compile.
    pub fn configure(&mut self, config: &Config) -> Result<()> {
        let base_url = match config.base_url.as_deref() {
            Some(url) if !url.is_empty() => with_trailing_slash(url),
            _ => self.base_url.clone(),
        };

        let mut packages = self.packages.clone();
        for package in &config.packages {
            if package.name().is_empty() {
                return Err(LoaderError::Config("package name must not be empty".into()));
            }
            packages.insert(
                package.name().to_string(),
                Package {
                    name: package.name().to_string(),
                    location: with_trailing_slash(package.location()),
                    main: package.main().map(str::to_string),
                },
            );
        }

        let mut map = self.map.clone();
        map.extend(config.map.clone());
        let aliases = AliasProgram::compile(&map)?;

        let paths = match &config.paths {
            Some(paths) => MapProgram::compile(paths.clone())?,
            None => self.paths.clone(),
        };

        self.base_url = base_url;
        self.packages = packages;
        self.map = map;
        self.aliases = aliases;
        self.paths = paths;
        Ok(())
    }

    /// Current base location
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Look up a declared package
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Names of all declared packages, in no particular order
    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    /// Canonical id plus the owning package and in-package path
    fn canonical_id(&self, id: &str, referrer: Option<&str>) -> (String, Option<(&Package, String)>) {
        let id = match referrer {
            Some(parent) if id.starts_with('.') => compact_path(&format!("{}/../{}", parent, id)),
            _ => compact_path(id),
        };

        let id = match self
            .aliases
            .for_referrer(referrer)
            .and_then(|program| program.lookup(&id))
        {
            Some(entry) => entry.apply(&id),
            None => id,
        };

        match split_package(&id).and_then(|(pid, rest)| self.packages.get(pid).map(|p| (p, rest))) {
            Some((package, rest)) => {
                let in_package = rest
                    .map(str::to_string)
                    .or_else(|| package.main.clone())
                    .unwrap_or_else(|| "main".to_string());
                (format!("{}/{}", package.name, in_package), Some((package, in_package)))
            }
            None => (id, None),
        }
    }

    /// Resolve `id` relative to the module `referrer`
    pub fn resolve(&self, id: &str, referrer: Option<&str>) -> ModuleInfo {
        let (mid, package) = self.canonical_id(id, referrer);

        let location = match self.paths.lookup(&mid) {
            Some(entry) => entry.apply(&mid),
            None => match &package {
                Some((package, in_package)) => format!("{}{}", package.location, in_package),
                None => mid.clone(),
            },
        };

        let prefix = if is_absolute_url(&location) {
            ""
        } else {
            self.base_url.as_str()
        };
        let suffix = if has_js_extension(&location) { "" } else { ".js" };
        let url = compact_path(&format!("{}{}{}", prefix, location, suffix));

        ModuleInfo {
            pid: package.map(|(p, _)| p.name.clone()).unwrap_or_default(),
            mid,
            url,
        }
    }

    /// Canonical id of `id` relative to `referrer`
    pub fn to_abs_mid(&self, id: &str, referrer: Option<&str>) -> String {
        self.canonical_id(id, referrer).0
    }

    /// Fetch location for a resource path relative to `referrer`,
    /// without the `.js` suffix
    pub fn to_url(&self, path: &str, referrer: Option<&str>) -> String {
        let url = self.resolve(&format!("{}/x", path), referrer).url;
        match url.strip_suffix("/x.js").or_else(|| url.strip_suffix("x.js")) {
            Some(stripped) => stripped.to_string(),
            None => url,
        }
    }
}

fn with_trailing_slash(location: &str) -> String {
    format!("{}/", location.trim_end_matches('/'))
}

/// Split an id into its leading segment and the remainder.
fn split_package(id: &str) -> Option<(&str, Option<&str>)> {
    if id.is_empty() || id.starts_with('/') {
        return None;
    }
    match id.split_once('/') {
        None => Some((id, None)),
        Some((_, "")) => None,
        Some((head, rest)) => Some((head, Some(rest))),
    }
}

/// `/…` or `scheme:…`
fn is_absolute_url(url: &str) -> bool {
    if url.starts_with('/') {
        return true;
    }
    match url.find(':') {
        Some(pos) if pos > 0 => url[..pos]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

/// Ends in `.js`, optionally followed by a query string
fn has_js_extension(url: &str) -> bool {
    if url.ends_with(".js") {
        return true;
    }
    match url.rfind('?') {
        Some(pos) => url[..pos].ends_with(".js"),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PackageConfig;

    fn configured(config: Config) -> ModuleResolver {
        let mut resolver = ModuleResolver::new();
        resolver.configure(&config).unwrap();
        resolver
    }

    #[test]
    fn test_compact_path() {
        assert_eq!(compact_path("a/b/../c"), "a/c");
        assert_eq!(compact_path("a/./b"), "a/b");
        assert_eq!(compact_path("../a"), "../a");
        assert_eq!(compact_path("../../a"), "../../a");
        assert_eq!(compact_path("a/../../b"), "../b");
        assert_eq!(compact_path("a\\b\\..\\c"), "a/c");
        assert_eq!(compact_path("/app/./lib/../main.js"), "/app/main.js");
        assert_eq!(compact_path("./a"), "a");
    }

    #[test]
    fn test_compact_path_idempotent() {
        for path in ["a/b/../c", "../x/./y", "./../a/b/..", "/abs/../p", "a//b"] {
            let once = compact_path(path);
            assert_eq!(compact_path(&once), once, "path: {}", path);
        }
    }

    #[test]
    fn test_relative_to_referrer() {
        let resolver = ModuleResolver::new();
        assert_eq!(resolver.to_abs_mid("./b", Some("app/a")), "app/b");
        assert_eq!(resolver.to_abs_mid("../lib/c", Some("app/sub/a")), "app/lib/c");
        // no referrer: leading dots are compacted away
        assert_eq!(resolver.to_abs_mid("./b", None), "b");
    }

    #[test]
    fn test_default_url() {
        let resolver = ModuleResolver::new();
        let info = resolver.resolve("app/main", None);
        assert_eq!(info.mid, "app/main");
        assert_eq!(info.pid, "");
        assert_eq!(info.url, "app/main.js");
    }

    #[test]
    fn test_package_resolution() {
        let resolver = configured(
            Config::new()
                .base_url("/app/")
                .package(PackageConfig::new("lib", "/libs/lib", "index")),
        );
        let info = resolver.resolve("lib", None);
        assert_eq!(info.mid, "lib/index");
        assert_eq!(info.pid, "lib");
        assert_eq!(info.url, "/libs/lib/index.js");

        let info = resolver.resolve("lib/util/str", None);
        assert_eq!(info.mid, "lib/util/str");
        assert_eq!(info.url, "/libs/lib/util/str.js");
    }

    #[test]
    fn test_package_shorthand_and_default_main() {
        let resolver = configured(Config::new().package("dojo"));
        let info = resolver.resolve("dojo", None);
        assert_eq!(info.mid, "dojo/main");
        assert_eq!(info.url, "dojo/main.js");
        assert_eq!(resolver.package_names().collect::<Vec<_>>(), vec!["dojo"]);
    }

    #[test]
    fn test_scoped_alias() {
        let resolver = configured(Config::new().map("old", "dep", "new/dep"));
        assert_eq!(resolver.to_abs_mid("dep", Some("old/mod")), "new/dep");
        assert_eq!(resolver.to_abs_mid("dep", Some("other/mod")), "dep");
        assert_eq!(resolver.to_abs_mid("dep/sub", Some("old")), "new/dep/sub");
        // a prefix only matches whole segments
        assert_eq!(resolver.to_abs_mid("depot", Some("old/mod")), "depot");
    }

    #[test]
    fn test_star_alias_applies_without_scope() {
        let resolver = configured(
            Config::new()
                .map("*", "jquery", "vendor/jquery")
                .map("legacy", "jquery", "vendor/jquery-1"),
        );
        assert_eq!(resolver.to_abs_mid("jquery", None), "vendor/jquery");
        assert_eq!(resolver.to_abs_mid("jquery", Some("app/a")), "vendor/jquery");
        assert_eq!(resolver.to_abs_mid("jquery", Some("legacy/a")), "vendor/jquery-1");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let forward = configured(Config::new().map("*", "a", "x").map("*", "a/b", "y"));
        assert_eq!(forward.to_abs_mid("a/b/c", None), "y/c");
        assert_eq!(forward.to_abs_mid("a/c", None), "x/c");

        let reverse = configured(Config::new().map("*", "a/b", "y").map("*", "a", "x"));
        assert_eq!(reverse.to_abs_mid("a/b/c", None), "y/c");
    }

    #[test]
    fn test_paths_and_absolute_urls() {
        let resolver = configured(
            Config::new()
                .base_url("/base")
                .path("tpl", "/static/tpl")
                .path("cdn", "https://cdn.example.com/lib"),
        );
        assert_eq!(resolver.base_url(), "/base/");
        assert_eq!(resolver.resolve("tpl/page", None).url, "/static/tpl/page.js");
        assert_eq!(
            resolver.resolve("cdn/x", None).url,
            "https://cdn.example.com/lib/x.js"
        );
        assert_eq!(resolver.resolve("app/x", None).url, "/base/app/x.js");
    }

    #[test]
    fn test_js_suffix_rule() {
        let resolver = ModuleResolver::new();
        assert_eq!(resolver.resolve("/a/b.js", None).url, "/a/b.js");
        assert_eq!(resolver.resolve("/a/b.js?v=2", None).url, "/a/b.js?v=2");
        assert_eq!(resolver.resolve("/a/b.json", None).url, "/a/b.json.js");
    }

    #[test]
    fn test_paths_replaced_wholesale() {
        let mut resolver = configured(Config::new().path("a", "/one"));
        resolver.configure(&Config::new().path("b", "/two")).unwrap();
        assert_eq!(resolver.resolve("a/x", None).url, "a/x.js");
        assert_eq!(resolver.resolve("b/x", None).url, "/two/x.js");

        // absent paths leave the table alone
        resolver.configure(&Config::new()).unwrap();
        assert_eq!(resolver.resolve("b/x", None).url, "/two/x.js");
    }

    #[test]
    fn test_map_merges_shallowly() {
        let mut resolver = configured(Config::new().map("*", "a", "x").map("s", "b", "y"));
        resolver.configure(&Config::new().map("*", "c", "z")).unwrap();
        // the "*" scope was replaced, "s" survived
        assert_eq!(resolver.to_abs_mid("a", None), "a");
        assert_eq!(resolver.to_abs_mid("c", None), "z");
        assert_eq!(resolver.to_abs_mid("b", Some("s/m")), "y");
    }

    #[test]
    fn test_to_url() {
        let resolver = configured(Config::new().base_url("/app/"));
        assert_eq!(resolver.to_url("templates/page.html", None), "/app/templates/page.html");
        assert_eq!(resolver.to_url("./style.css", Some("ui/button")), "/app/ui/style.css");
    }

    #[test]
    fn test_base_url_normalized() {
        let resolver = configured(Config::new().base_url("lib///"));
        assert_eq!(resolver.base_url(), "lib/");
        let resolver = ModuleResolver::new();
        assert_eq!(resolver.base_url(), "./");
    }
}
