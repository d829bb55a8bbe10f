//! Module formats and the package entry lookup table.
//!
//! A file is either a statically linked ES module or a dynamically linked
//! CommonJS module. The importing file's format decides which `package.json`
//! fields are consulted first, so an ES module consumer picks the ESM build of
//! a dual package and a CommonJS consumer picks the CommonJS build, while each
//! still falls back to the other convention's field.

use std::fs;
use std::path::Path;

use crate::package_json::PackageJson;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleFormat {
    /// `import`/`export` syntax, statically linked.
    Esm,
    /// `require`/`module.exports`, dynamically linked.
    CommonJs,
}

/// A `package.json` field that can name a package entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryField {
    Exports,
    Module,
    Main,
}

impl ModuleFormat {
    /// Entry fields in lookup order for a consumer of this format.
    pub fn entry_fields(self) -> &'static [EntryField] {
        match self {
            ModuleFormat::Esm => &[EntryField::Exports, EntryField::Module, EntryField::Main],
            ModuleFormat::CommonJs => &[EntryField::Exports, EntryField::Main, EntryField::Module],
        }
    }

    /// Conditions matched against a conditional `exports` map.
    pub fn export_conditions(self) -> &'static [&'static str] {
        match self {
            ModuleFormat::Esm => &["import", "node", "default"],
            ModuleFormat::CommonJs => &["require", "node", "default"],
        }
    }

    /// Determine the format of a source file.
    ///
    /// Explicit extensions win, then the nearest `package.json` `"type"`,
    /// then the presence of top-level `import`/`export` statements.
    pub fn detect(path: &Path, source: Option<&str>) -> ModuleFormat {
        match path.extension().and_then(|e| e.to_str()) {
            Some("mts") | Some("mjs") => return ModuleFormat::Esm,
            Some("cts") | Some("cjs") | Some("json") => return ModuleFormat::CommonJs,
            _ => {}
        }

        if let Some(dir) = path.parent() {
            if let Some((_, pkg)) = PackageJson::find_nearest(dir) {
                if pkg.is_module() {
                    return ModuleFormat::Esm;
                }
            }
        }

        let owned;
        let source = match source {
            Some(s) => s,
            None => {
                owned = fs::read_to_string(path).unwrap_or_default();
                &owned
            }
        };

        if has_module_syntax(source) {
            ModuleFormat::Esm
        } else {
            ModuleFormat::CommonJs
        }
    }
}

fn has_module_syntax(source: &str) -> bool {
    source.lines().any(|line| {
        let line = line.trim_start();
        let rest = line
            .strip_prefix("import")
            .or_else(|| line.strip_prefix("export"));
        match rest.and_then(|r| r.chars().next()) {
            // `import(` is a dynamic import, valid in CommonJS too
            Some(c) => c.is_whitespace() || c == '{' || c == '*' || c == '"' || c == '\'',
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_table_orders_fields_by_consumer() {
        assert_eq!(
            ModuleFormat::Esm.entry_fields(),
            &[EntryField::Exports, EntryField::Module, EntryField::Main]
        );
        assert_eq!(
            ModuleFormat::CommonJs.entry_fields(),
            &[EntryField::Exports, EntryField::Main, EntryField::Module]
        );
        assert_eq!(ModuleFormat::Esm.export_conditions()[0], "import");
        assert_eq!(ModuleFormat::CommonJs.export_conditions()[0], "require");
    }

    #[test]
    fn test_detects_by_extension_before_syntax() {
        let source = "const x = require('x')";
        assert_eq!(ModuleFormat::detect(Path::new("/nowhere/a.mts"), Some(source)), ModuleFormat::Esm);
        assert_eq!(
            ModuleFormat::detect(Path::new("/nowhere/a.cjs"), Some("export default 1")),
            ModuleFormat::CommonJs
        );
    }

    #[test]
    fn test_detects_by_syntax() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("a.ts");
        assert_eq!(ModuleFormat::detect(&file, Some("export default 11\n")), ModuleFormat::Esm);
        assert_eq!(ModuleFormat::detect(&file, Some("import{ a } from './b'")), ModuleFormat::Esm);
        assert_eq!(
            ModuleFormat::detect(&file, Some("const m = await import('./b')\nmodule.exports = m")),
            ModuleFormat::CommonJs
        );
    }

    #[test]
    fn test_detects_package_type_module() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("package.json"), r#"{ "type": "module" }"#).unwrap();
        let file = temp.path().join("a.js");
        assert_eq!(ModuleFormat::detect(&file, Some("console.log(1)")), ModuleFormat::Esm);
    }
}
