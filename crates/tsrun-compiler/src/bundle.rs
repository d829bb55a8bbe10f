//! Single-script bundle emission.
//!
//! Layout: interop helpers, then a loader IIFE that receives a registry of
//! module factories keyed by absolute path. Each record carries a link table
//! mapping the module's specifiers to another registry entry or to something
//! the runtime loads itself (builtins and package files).

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use crate::rewrite::js_string;

/// Where a specifier points at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// Another module in this bundle.
    Local(PathBuf),
    /// Loaded by the runtime's own `require`.
    External(String),
}

#[derive(Debug, Clone)]
pub struct BundleModule {
    pub code: String,
    pub links: BTreeMap<String, Link>,
}

/// Bridges the static and dynamic module conventions: a CommonJS value
/// imported as a default is the value itself, an ES module's default is its
/// `default` export.
const PRELUDE: &str = r#"var __tsrun_isEsm = function (m) { return !!m && (m.__esModule === true || m[Symbol.toStringTag] === "Module"); };
var __tsrun_default = function (m) { return __tsrun_isEsm(m) ? m.default : m; };
var __tsrun_namespace = function (m) { return __tsrun_isEsm(m) ? m : Object.assign({ default: m }, m); };
var __tsrun_export = function (target, getters) {
  for (var name in getters) Object.defineProperty(target, name, { enumerable: true, configurable: true, get: getters[name] });
};
var __tsrun_reexport = function (target, m, names) {
  Object.keys(names).forEach(function (name) {
    var from = names[name];
    Object.defineProperty(target, name, { enumerable: true, configurable: true, get: function () { return from === "default" ? __tsrun_default(m) : m[from]; } });
  });
};
var __tsrun_export_star = function (target, m) {
  Object.keys(m || {}).forEach(function (name) {
    if (name === "default" || Object.prototype.hasOwnProperty.call(target, name)) return;
    Object.defineProperty(target, name, { enumerable: true, configurable: true, get: function () { return m[name]; } });
  });
};
var __tsrun_file_url = function (file) { return require("url").pathToFileURL(file).href; };
"#;

const LOADER: &str = r#"(function (modules, entry) {
  var cache = Object.create(null);
  var main;
  function load(id) {
    var cached = cache[id];
    if (cached !== undefined) return cached.exports;
    var record = modules[id];
    var module = { id: id, filename: record.filename, loaded: false, exports: {} };
    cache[id] = module;
    if (id === entry) main = module;
    var localRequire = function (specifier) {
      var link = record.links[specifier];
      if (link === undefined) return require(specifier);
      return link.local !== undefined ? load(link.local) : require(link.external);
    };
    localRequire.resolve = function (specifier) {
      var link = record.links[specifier];
      if (link === undefined) return require.resolve(specifier);
      return link.local !== undefined ? link.local : require.resolve(link.external);
    };
    localRequire.main = main;
    localRequire.cache = cache;
    record.factory.call(module.exports, module, module.exports, localRequire, record.filename, record.dirname);
    module.loaded = true;
    return module.exports;
  }
  load(entry);
})({
"#;

/// Emit the bundle. Modules are written in path order.
pub fn emit(entry: &Path, modules: &BTreeMap<PathBuf, BundleModule>) -> String {
    let mut out = String::from(PRELUDE);
    out.push_str(LOADER);

    for (path, module) in modules {
        let id = js_string(&path.to_string_lossy());
        let dirname = path.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();

        let links = module
            .links
            .iter()
            .map(|(specifier, link)| match link {
                Link::Local(target) => format!("{}: {{ local: {} }}", js_string(specifier), js_string(&target.to_string_lossy())),
                Link::External(target) => format!("{}: {{ external: {} }}", js_string(specifier), js_string(target)),
            })
            .collect::<Vec<_>>()
            .join(", ");

        // writing to a String cannot fail
        let _ = write!(
            out,
            "{id}: {{\n  filename: {id},\n  dirname: {},\n  links: {{ {links} }},\n  factory: function (module, exports, require, __filename, __dirname) {{\n{}\n}}\n}},\n",
            js_string(&dirname),
            module.code,
        );
    }

    let _ = writeln!(out, "}}, {});", js_string(&entry.to_string_lossy()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_registry_and_links() {
        let mut modules = BTreeMap::new();
        modules.insert(
            PathBuf::from("/p/main.ts"),
            BundleModule {
                code: "const b = require(\"./b\");".to_string(),
                links: BTreeMap::from([
                    ("./b".to_string(), Link::Local(PathBuf::from("/p/b.ts"))),
                    ("fs".to_string(), Link::External("fs".to_string())),
                ]),
            },
        );
        modules.insert(
            PathBuf::from("/p/b.ts"),
            BundleModule {
                code: "module.exports = 1;".to_string(),
                links: BTreeMap::new(),
            },
        );

        let out = emit(Path::new("/p/main.ts"), &modules);
        assert!(out.starts_with("var __tsrun_isEsm"));
        assert!(out.contains(r#"links: { "./b": { local: "/p/b.ts" }, "fs": { external: "fs" } }"#));
        assert!(out.contains("dirname: \"/p\""));
        assert!(out.trim_end().ends_with(r#"}, "/p/main.ts");"#));
        assert!(out.contains("localRequire.main = main;"));
        assert!(out.contains("localRequire.resolve = function (specifier)"));
        // path order: b.ts before main.ts
        assert!(out.find("\"/p/b.ts\": {").unwrap() < out.find("\"/p/main.ts\": {").unwrap());
    }
}
