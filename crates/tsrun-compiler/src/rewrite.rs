//! ES module syntax to bundle-registry form.
//!
//! Matching runs over the masked text from [`crate::scanner`], so nothing
//! inside comments or literals is touched; replacement text is assembled from
//! the original source. Every replacement keeps the line count of the text it
//! replaces.

use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static STATIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\b\s*(?P<clause>[\w$\s{},*]+?)\s*\bfrom\s*["'](?P<spec>[^"'\n]*)["'][ \t]*;?"#)
        .unwrap()
});

static BARE_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^[ \t]*import\s*["'](?P<spec>[^"'\n]*)["'][ \t]*;?"#).unwrap());

static EXPORT_STAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*export\s*(?P<ty>type\s+)?\*\s*(?:as\s+(?P<ns>[A-Za-z_$][\w$]*)\s+)?from\s*["'](?P<spec>[^"'\n]*)["'][ \t]*;?"#,
    )
    .unwrap()
});

static EXPORT_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*export\s*(?P<ty>type\s*)?\{(?P<list>[^}]*)\}(?:\s*from\s*["'](?P<spec>[^"'\n]*)["'])?[ \t]*;?"#,
    )
    .unwrap()
});

static EXPORT_DEFAULT_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?P<kw>export\s+default\s+)(?:(?:async\s+)?function\s*\*?\s*(?P<func>[A-Za-z_$][\w$]*)|(?:abstract\s+)?class\s+(?P<class>[A-Za-z_$][\w$]*))",
    )
    .unwrap()
});

static EXPORT_DEFAULT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?P<kw>export\s+default\b\s*)").unwrap());

static EXPORT_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?P<kw>export\s+)(?:(?:const|let|var)\s+(?P<var>[A-Za-z_$][\w$]*|\{[^}]*\}|\[[^\]]*\])|(?:async\s+)?function\s*\*?\s*(?P<func>[A-Za-z_$][\w$]*)|(?:abstract\s+)?class\s+(?P<class>[A-Za-z_$][\w$]*))",
    )
    .unwrap()
});

static DYNAMIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^\w$.])(?P<call>import\s*\(\s*["'](?P<spec>[^"'\n]*)["']\s*\))"#).unwrap()
});

static REQUIRE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^\w$.])(?P<call>require\s*\(\s*["'](?P<spec>[^"'\n]*)["']\s*\))"#).unwrap()
});

static IMPORT_META: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w$.])(?P<expr>import\.meta\.(?P<prop>url|filename|dirname))\b").unwrap()
});

/// A rewritten module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutput {
    pub code: String,
    /// Runtime dependencies in source order, without duplicates.
    pub specifiers: Vec<String>,
    /// Whether the module used static `import`/`export` syntax.
    pub is_esm: bool,
}

#[derive(Debug)]
struct Edit {
    range: Range<usize>,
    priority: u8,
    text: String,
    specifiers: Vec<String>,
    /// `(exported name, local expression)`
    getters: Vec<(String, String)>,
    esm: bool,
}

impl Edit {
    fn new(range: Range<usize>, priority: u8, text: impl Into<String>) -> Self {
        Self {
            range,
            priority,
            text: text.into(),
            specifiers: Vec::new(),
            getters: Vec::new(),
            esm: true,
        }
    }

    fn specifier(mut self, spec: &str) -> Self {
        self.specifiers.push(spec.to_string());
        self
    }

    fn getter(mut self, exported: &str, local: &str) -> Self {
        self.getters.push((exported.to_string(), local.to_string()));
        self
    }

    fn commonjs(mut self) -> Self {
        self.esm = false;
        self
    }
}

struct Ctx<'a> {
    source: &'a str,
    temps: usize,
}

impl Ctx<'_> {
    fn spec(&self, caps: &Captures<'_>) -> String {
        caps.name("spec")
            .map(|m| self.source[m.range()].to_string())
            .unwrap_or_default()
    }

    fn temp(&mut self) -> String {
        let name = format!("__tsrun_m{}", self.temps);
        self.temps += 1;
        name
    }
}

/// Rewrite one module. `masked` must come from [`crate::scanner::mask`] over
/// the same `source`.
pub fn rewrite(source: &str, masked: &str) -> RewriteOutput {
    debug_assert_eq!(source.len(), masked.len());
    let mut ctx = Ctx { source, temps: 0 };
    let mut edits = Vec::new();

    for caps in STATIC_IMPORT.captures_iter(masked) {
        let range = whole(&caps);
        let spec = ctx.spec(&caps);
        let clause = caps.name("clause").map(|m| m.as_str()).unwrap_or_default();
        let edit = match parse_import_clause(clause) {
            Some(clause) => Edit::new(range, 0, import_code(&clause, &spec, &mut ctx)).specifier(&spec),
            None => Edit::new(range, 0, ""),
        };
        edits.push(edit);
    }

    for caps in BARE_IMPORT.captures_iter(masked) {
        let spec = ctx.spec(&caps);
        edits.push(Edit::new(whole(&caps), 1, format!("require({});", js_string(&spec))).specifier(&spec));
    }

    for caps in EXPORT_STAR.captures_iter(masked) {
        let range = whole(&caps);
        if caps.name("ty").is_some() {
            edits.push(Edit::new(range, 2, ""));
            continue;
        }
        let spec = ctx.spec(&caps);
        let required = format!("require({})", js_string(&spec));
        let edit = match caps.name("ns") {
            Some(ns) => {
                let temp = ctx.temp();
                Edit::new(range, 2, format!("const {temp} = __tsrun_namespace({required});"))
                    .getter(ns.as_str(), &temp)
            }
            None => Edit::new(range, 2, format!("__tsrun_export_star(exports, {required});")),
        };
        edits.push(edit.specifier(&spec));
    }

    for caps in EXPORT_LIST.captures_iter(masked) {
        let range = whole(&caps);
        let items = if caps.name("ty").is_some() {
            Vec::new()
        } else {
            parse_specifier_list(&caps["list"])
        };

        match caps.name("spec") {
            Some(_) if items.is_empty() => edits.push(Edit::new(range, 3, "")),
            Some(_) => {
                let spec = ctx.spec(&caps);
                let mapping = items
                    .iter()
                    .map(|(imported, exported)| format!("{}: {}", js_string(exported), js_string(imported)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let text = format!(
                    "__tsrun_reexport(exports, require({}), {{ {mapping} }});",
                    js_string(&spec)
                );
                edits.push(Edit::new(range, 3, text).specifier(&spec));
            }
            None => {
                let mut edit = Edit::new(range, 3, "");
                for (local, exported) in &items {
                    edit = edit.getter(exported, local);
                }
                edits.push(edit);
            }
        }
    }

    for caps in EXPORT_DEFAULT_DECL.captures_iter(masked) {
        let name = caps.name("func").or_else(|| caps.name("class")).map(|m| m.as_str());
        let (Some(kw), Some(name)) = (caps.name("kw"), name) else {
            continue;
        };
        // `export default class extends Base {}` is anonymous
        if name == "extends" {
            continue;
        }
        edits.push(Edit::new(kw.range(), 4, "").getter("default", name));
    }

    for caps in EXPORT_DEFAULT.captures_iter(masked) {
        let kw = caps.name("kw").map(|m| m.range()).unwrap_or_default();
        edits.push(Edit::new(kw, 5, "exports.default = "));
    }

    for caps in EXPORT_DECL.captures_iter(masked) {
        let kw = caps.name("kw").map(|m| m.range()).unwrap_or_default();
        let mut edit = Edit::new(kw, 6, "");
        if let Some(var) = caps.name("var") {
            for name in binding_names(var.as_str()) {
                edit = edit.getter(&name, &name);
            }
        } else if let Some(name) = caps.name("func").or_else(|| caps.name("class")) {
            edit = edit.getter(name.as_str(), name.as_str());
        }
        edits.push(edit);
    }

    for caps in DYNAMIC_IMPORT.captures_iter(masked) {
        let range = caps.name("call").map(|m| m.range()).unwrap_or_default();
        let spec = ctx.spec(&caps);
        let text = format!("Promise.resolve().then(() => require({}))", js_string(&spec));
        edits.push(Edit::new(range, 7, text).specifier(&spec).commonjs());
    }

    for caps in REQUIRE_CALL.captures_iter(masked) {
        let range = caps.name("call").map(|m| m.range()).unwrap_or_default();
        let spec = ctx.spec(&caps);
        let original = source[range.clone()].to_string();
        edits.push(Edit::new(range, 8, original).specifier(&spec).commonjs());
    }

    for caps in IMPORT_META.captures_iter(masked) {
        let range = caps.name("expr").map(|m| m.range()).unwrap_or_default();
        let text = match &caps["prop"] {
            "url" => "__tsrun_file_url(__filename)",
            "filename" => "__filename",
            _ => "__dirname",
        };
        edits.push(Edit::new(range, 9, text).commonjs());
    }

    apply(ctx.source, edits)
}

fn apply(source: &str, mut edits: Vec<Edit>) -> RewriteOutput {
    edits.sort_by(|a, b| {
        a.range
            .start
            .cmp(&b.range.start)
            .then(a.priority.cmp(&b.priority))
    });

    let mut code = String::with_capacity(source.len() + 256);
    let mut specifiers: Vec<String> = Vec::new();
    let mut getters: Vec<(String, String)> = Vec::new();
    let mut is_esm = false;
    let mut cursor = 0;

    for edit in edits {
        if edit.range.start < cursor {
            continue;
        }
        code.push_str(&source[cursor..edit.range.start]);
        let replaced = &source[edit.range.clone()];
        code.push_str(&edit.text);
        let missing = replaced.matches('\n').count().saturating_sub(edit.text.matches('\n').count());
        code.extend(std::iter::repeat('\n').take(missing));
        cursor = edit.range.end;

        for spec in edit.specifiers {
            if !specifiers.contains(&spec) {
                specifiers.push(spec);
            }
        }
        getters.extend(edit.getters);
        is_esm |= edit.esm;
    }
    code.push_str(&source[cursor..]);

    if is_esm {
        let mut header = String::from("Object.defineProperty(exports, \"__esModule\", { value: true });");
        if !getters.is_empty() {
            let entries = getters
                .iter()
                .map(|(exported, local)| format!("{}: () => {local}", js_string(exported)))
                .collect::<Vec<_>>()
                .join(", ");
            header.push_str(&format!(" __tsrun_export(exports, {{ {entries} }});"));
        }
        header.push(' ');
        code.insert_str(0, &header);
    }

    RewriteOutput {
        code,
        specifiers,
        is_esm,
    }
}

fn whole(caps: &Captures<'_>) -> Range<usize> {
    caps.get(0).map(|m| m.range()).unwrap_or_default()
}

/// JavaScript string literal for `value`.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ImportClause {
    default: Option<String>,
    namespace: Option<String>,
    /// `(imported, local)`
    named: Vec<(String, String)>,
}

/// `None` when the import only brings in types and is erased.
fn parse_import_clause(clause: &str) -> Option<ImportClause> {
    let clause = clause.trim();
    if let Some(rest) = clause.strip_prefix("type") {
        if rest.starts_with(|c: char| c.is_whitespace() || c == '{') {
            return None;
        }
    }

    let (head, named_part) = match (clause.find('{'), clause.rfind('}')) {
        (Some(open), Some(close)) if open < close => (&clause[..open], Some(&clause[open + 1..close])),
        _ => (clause, None),
    };

    let mut parsed = ImportClause::default();
    for part in head.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.strip_prefix('*') {
            Some(ns) => {
                let ns = ns.trim_start();
                let ns = ns.strip_prefix("as").unwrap_or(ns).trim();
                parsed.namespace = Some(ns.to_string());
            }
            None => parsed.default = Some(part.to_string()),
        }
    }
    for (imported, local) in named_part.map(parse_specifier_list).unwrap_or_default() {
        if imported == "default" {
            parsed.default.get_or_insert(local);
        } else {
            parsed.named.push((imported, local));
        }
    }

    if parsed.default.is_none() && parsed.namespace.is_none() && parsed.named.is_empty() {
        return None;
    }
    Some(parsed)
}

/// `a, b as c, type T` into `[(a, a), (b, c)]`; type-only items are dropped.
fn parse_specifier_list(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .filter_map(|item| {
            let words: Vec<&str> = item.split_whitespace().collect();
            let words = match words.as_slice() {
                ["type", rest @ ..] if !rest.is_empty() && rest.first() != Some(&"as") => return None,
                other => other,
            };
            match words {
                [name] => Some((name.to_string(), name.to_string())),
                [from, "as", to] => Some((from.to_string(), to.to_string())),
                _ => None,
            }
        })
        .collect()
}

/// Names bound by `x`, `{ a, b: c, ...rest }` or `[a, , b = 1]`.
fn binding_names(pattern: &str) -> Vec<String> {
    let inner = pattern.trim();
    let is_object = inner.starts_with('{');
    let inner = inner.trim_start_matches(['{', '[']).trim_end_matches(['}', ']']);
    inner
        .split(',')
        .filter_map(|part| {
            let part = part.split('=').next().unwrap_or_default();
            let part = if is_object {
                part.rsplit(':').next().unwrap_or_default()
            } else {
                part
            };
            let name = part.trim().trim_start_matches("...").trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

fn import_code(clause: &ImportClause, spec: &str, ctx: &mut Ctx<'_>) -> String {
    let required = format!("require({})", js_string(spec));
    let bindings = usize::from(clause.default.is_some())
        + usize::from(clause.namespace.is_some())
        + usize::from(!clause.named.is_empty());

    let module = if bindings > 1 {
        ctx.temp()
    } else {
        required.clone()
    };
    let mut statements = Vec::new();
    if bindings > 1 {
        statements.push(format!("const {module} = {required};"));
    }
    if let Some(default) = &clause.default {
        statements.push(format!("const {default} = __tsrun_default({module});"));
    }
    if let Some(ns) = &clause.namespace {
        statements.push(format!("const {ns} = __tsrun_namespace({module});"));
    }
    if !clause.named.is_empty() {
        let names = clause
            .named
            .iter()
            .map(|(imported, local)| {
                if imported == local {
                    local.clone()
                } else {
                    format!("{imported}: {local}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        statements.push(format!("const {{ {names} }} = {module};"));
    }
    statements.join(" ")
}
