//! Function-specification catalog.
//!
//! Declarative data about built-in and framework functions: arity,
//! calling formats, aliases, return type, source/sink/sanitizer
//! classification per taint kind, persistent-storage channels, and
//! per-parameter flags. Loaded once at startup (JSON) and immutable
//! afterwards; `with_defaults` ships built-ins for the common
//! request/query/escape/option functions so the engine is useful with
//! no external data at all.
//!
//! Parameter positions in the data are 1-based; position `0` means
//! "every argument" (variadic sinks like `printf`).

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use seep_core::errors::CatalogError;
use seep_core::types::collections::FxHashMap;
use tracing::debug;

use crate::taint::types::TaintKind;

/// Parameter positions per taint kind (1-based, `0` = all).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindPositions {
    pub sql: Vec<usize>,
    pub xss: Vec<usize>,
}

impl KindPositions {
    pub fn get(&self, kind: TaintKind) -> &[usize] {
        match kind {
            TaintKind::Sql => &self.sql,
            TaintKind::Xss => &self.xss,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty() && self.xss.is_empty()
    }

    /// Does the 0-based argument index `arg` match the positions for
    /// `kind`?
    pub fn matches(&self, kind: TaintKind, arg: usize) -> bool {
        self.get(kind).iter().any(|&p| p == 0 || p == arg + 1)
    }
}

/// Per-parameter flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamSpec {
    pub optional: bool,
    pub variadic: bool,
    /// Tainted data in this parameter is what makes the call dangerous.
    pub sensitive: bool,
}

/// A call that writes a value into a named persistent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreWriteSpec {
    /// 1-based position of the channel-name argument.
    pub channel_param: usize,
    /// 1-based position of the stored value.
    pub value_param: usize,
}

/// A call that reads a value back from a named persistent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReadSpec {
    pub channel_param: usize,
}

/// Everything the catalog knows about one function or method.
///
/// Methods are named `class::method`, lowercased.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub param_count: usize,
    /// Human-readable calling conventions, straight from the data.
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub return_type: Option<String>,
    /// Kinds this call introduces taint for.
    #[serde(default)]
    pub sources: Vec<TaintKind>,
    /// Sink positions per kind.
    #[serde(default)]
    pub sink: KindPositions,
    /// Sanitized argument positions per kind; the result carries the
    /// argument taint with those kinds zeroed.
    #[serde(default)]
    pub sanitize: KindPositions,
    /// The sanitization is quoting-dependent (escape-string family):
    /// taint is capped at `PartiallyQuoted` instead of removed, so the
    /// value stays dangerous in unquoted contexts a merge can surface.
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
    #[serde(default)]
    pub store_write: Option<StoreWriteSpec>,
    #[serde(default)]
    pub store_read: Option<StoreReadSpec>,
}

impl FunctionSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            param_count: 0,
            formats: Vec::new(),
            aliases: Vec::new(),
            return_type: None,
            sources: Vec::new(),
            sink: KindPositions::default(),
            sanitize: KindPositions::default(),
            partial: false,
            parameters: Vec::new(),
            store_write: None,
            store_read: None,
        }
    }

    /// The result is a clean scalar regardless of inputs.
    pub fn returns_clean(&self) -> bool {
        matches!(self.return_type.as_deref(), Some("int" | "float" | "bool"))
    }

    pub fn is_sink(&self) -> bool {
        !self.sink.is_empty()
    }

    pub fn is_sanitizer(&self) -> bool {
        !self.sanitize.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    functions: Vec<FunctionSpec>,
}

/// Name-indexed lookup over [`FunctionSpec`]s.
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    by_name: FxHashMap<String, Arc<FunctionSpec>>,
}

impl FunctionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-loaded with the built-in defaults.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        catalog.add_default_sinks();
        catalog.add_default_sanitizers();
        catalog.add_default_sources();
        catalog.add_default_storage();
        catalog.add_default_passthrough();
        catalog
    }

    /// Register one spec under its name and all aliases
    /// (case-insensitive, like the analyzed language).
    pub fn add(&mut self, spec: FunctionSpec) {
        let spec = Arc::new(spec);
        self.by_name.insert(spec.name.to_lowercase(), Arc::clone(&spec));
        for alias in &spec.aliases {
            self.by_name.insert(alias.to_lowercase(), Arc::clone(&spec));
        }
    }

    /// Extend from a JSON document `{ "functions": [...] }`. Later
    /// entries win over earlier ones and over the defaults.
    pub fn load_json(&mut self, json: &str) -> Result<usize, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let count = file.functions.len();
        for spec in file.functions {
            self.add(spec);
        }
        debug!(count, "loaded function specifications");
        Ok(count)
    }

    /// Extend from a JSON file on disk.
    pub fn load_json_file(&mut self, path: &Path) -> Result<usize, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        self.load_json(&json)
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<FunctionSpec>> {
        self.by_name.get(&name.to_lowercase())
    }

    /// Method lookup by candidate receiver class.
    pub fn lookup_method(&self, class: &str, method: &str) -> Option<&Arc<FunctionSpec>> {
        self.by_name
            .get(&format!("{}::{}", class.to_lowercase(), method.to_lowercase()))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn add_default_sinks(&mut self) {
        let sql_sinks: &[(&str, &[&str], &[usize])] = &[
            ("mysql_query", &["mysql_unbuffered_query", "mysql_db_query"], &[1]),
            ("mysqli_query", &["mysqli_real_query", "mysqli_multi_query"], &[2]),
            ("pg_query", &["pg_send_query"], &[2]),
            ("sqlite_query", &["sqlite_exec"], &[2]),
            ("odbc_exec", &["odbc_prepare"], &[2]),
            ("wpdb::query", &[], &[1]),
            ("wpdb::get_results", &[], &[1]),
            ("wpdb::get_var", &[], &[1]),
            ("wpdb::get_row", &[], &[1]),
            ("wpdb::get_col", &[], &[1]),
        ];
        for &(name, aliases, positions) in sql_sinks {
            let mut spec = FunctionSpec::named(name);
            spec.aliases = aliases.iter().map(|a| a.to_string()).collect();
            spec.sink.sql = positions.to_vec();
            self.add(spec);
        }

        let xss_sinks: &[(&str, &[&str], &[usize])] = &[
            ("print", &[], &[1]),
            ("printf", &["vprintf"], &[0]),
            ("print_r", &[], &[1]),
            ("exit", &["die"], &[1]),
            ("trigger_error", &["user_error"], &[1]),
            ("wp_die", &[], &[1]),
        ];
        for &(name, aliases, positions) in xss_sinks {
            let mut spec = FunctionSpec::named(name);
            spec.aliases = aliases.iter().map(|a| a.to_string()).collect();
            spec.sink.xss = positions.to_vec();
            self.add(spec);
        }
    }

    fn add_default_sanitizers(&mut self) {
        let sql: &[(&str, &[&str], usize)] = &[
            ("mysql_real_escape_string", &["mysql_escape_string"], 1),
            ("mysqli_real_escape_string", &["mysqli_escape_string"], 2),
            ("pg_escape_string", &[], 2),
            ("esc_sql", &[], 1),
            ("addslashes", &[], 1),
        ];
        for &(name, aliases, pos) in sql {
            let mut spec = FunctionSpec::named(name);
            spec.aliases = aliases.iter().map(|a| a.to_string()).collect();
            spec.sanitize.sql = vec![pos];
            // Escaping only helps inside a quoted context.
            spec.partial = true;
            self.add(spec);
        }

        let xss: &[(&str, &[&str])] = &[
            ("htmlspecialchars", &["htmlentities"]),
            ("strip_tags", &[]),
            ("esc_html", &["esc_attr", "esc_textarea", "esc_js", "esc_url"]),
            ("sanitize_text_field", &["sanitize_key", "sanitize_title"]),
            ("urlencode", &["rawurlencode"]),
        ];
        for &(name, aliases) in xss {
            let mut spec = FunctionSpec::named(name);
            spec.aliases = aliases.iter().map(|a| a.to_string()).collect();
            spec.sanitize.xss = vec![1];
            self.add(spec);
        }

        // Numeric conversions neutralize every tracked kind.
        let both: &[(&str, &[&str], &str)] = &[
            ("intval", &["absint"], "int"),
            ("floatval", &["doubleval"], "float"),
            ("count", &["sizeof"], "int"),
            ("strlen", &[], "int"),
            ("md5", &["sha1", "crc32"], "string"),
        ];
        for &(name, aliases, ret) in both {
            let mut spec = FunctionSpec::named(name);
            spec.aliases = aliases.iter().map(|a| a.to_string()).collect();
            spec.sanitize.sql = vec![1];
            spec.sanitize.xss = vec![1];
            spec.return_type = Some(ret.to_string());
            self.add(spec);
        }
    }

    fn add_default_sources(&mut self) {
        let sources: &[(&str, &[&str])] = &[
            ("filter_input", &[]),
            ("getallheaders", &["apache_request_headers"]),
            ("getenv", &[]),
        ];
        for &(name, aliases) in sources {
            let mut spec = FunctionSpec::named(name);
            spec.aliases = aliases.iter().map(|a| a.to_string()).collect();
            spec.sources = vec![TaintKind::Sql, TaintKind::Xss];
            self.add(spec);
        }
    }

    fn add_default_storage(&mut self) {
        let writes: &[(&str, &[&str], usize, usize)] = &[
            ("update_option", &["add_option"], 1, 2),
            ("update_site_option", &["add_site_option"], 1, 2),
            ("set_transient", &["set_site_transient"], 1, 2),
            ("update_post_meta", &["add_post_meta"], 2, 3),
            ("update_user_meta", &["add_user_meta"], 2, 3),
        ];
        for &(name, aliases, channel, value) in writes {
            let mut spec = FunctionSpec::named(name);
            spec.aliases = aliases.iter().map(|a| a.to_string()).collect();
            spec.store_write = Some(StoreWriteSpec { channel_param: channel, value_param: value });
            self.add(spec);
        }

        let reads: &[(&str, &[&str], usize)] = &[
            ("get_option", &["get_site_option"], 1),
            ("get_transient", &["get_site_transient"], 1),
            ("get_post_meta", &[], 2),
            ("get_user_meta", &[], 2),
        ];
        for &(name, aliases, channel) in reads {
            let mut spec = FunctionSpec::named(name);
            spec.aliases = aliases.iter().map(|a| a.to_string()).collect();
            spec.store_read = Some(StoreReadSpec { channel_param: channel });
            self.add(spec);
        }
    }

    /// String builders that forward their input taint untouched. An
    /// entry here keeps them off the unknown-function conservative
    /// path.
    fn add_default_passthrough(&mut self) {
        let passthrough: &[(&str, &[&str])] = &[
            ("sprintf", &["vsprintf"]),
            ("substr", &["mb_substr"]),
            ("str_replace", &["str_ireplace", "preg_replace"]),
            ("trim", &["ltrim", "rtrim", "chop"]),
            ("strtolower", &["strtoupper", "ucfirst", "ucwords", "lcfirst"]),
            ("implode", &["join"]),
            ("nl2br", &["wordwrap", "str_pad", "str_repeat", "strrev"]),
            ("serialize", &["unserialize", "maybe_serialize", "maybe_unserialize"]),
            ("stripslashes", &["stripcslashes", "wp_unslash"]),
        ];
        for &(name, aliases) in passthrough {
            let mut spec = FunctionSpec::named(name);
            spec.aliases = aliases.iter().map(|a| a.to_string()).collect();
            self.add(spec);
        }

        // Type predicates return a clean bool; they matter to the
        // condition transfer, not to taint propagation.
        let predicates: &[&str] = &[
            "is_numeric", "is_int", "is_integer", "is_long", "is_float", "is_double",
            "is_bool", "is_string", "is_array", "is_object", "is_null", "ctype_digit",
            "ctype_alnum", "ctype_alpha", "defined", "function_exists", "in_array",
        ];
        for &name in predicates {
            let mut spec = FunctionSpec::named(name);
            spec.return_type = Some("bool".to_string());
            self.add(spec);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_classify_common_functions() {
        let catalog = FunctionCatalog::with_defaults();
        assert!(catalog.lookup("mysql_query").unwrap().is_sink());
        assert!(catalog.lookup("intval").unwrap().is_sanitizer());
        assert!(catalog.lookup("htmlspecialchars").unwrap().sanitize.matches(TaintKind::Xss, 0));
        assert!(catalog.lookup("update_option").unwrap().store_write.is_some());
        assert!(catalog.lookup("get_option").unwrap().store_read.is_some());
    }

    #[test]
    fn escape_string_family_is_quote_dependent() {
        let catalog = FunctionCatalog::with_defaults();
        assert!(catalog.lookup("mysql_real_escape_string").unwrap().partial);
        assert!(catalog.lookup("addslashes").unwrap().partial);
        // Full-conversion sanitizers remove taint outright.
        assert!(!catalog.lookup("intval").unwrap().partial);
        assert!(!catalog.lookup("htmlspecialchars").unwrap().partial);
    }

    #[test]
    fn aliases_and_case_fold_onto_one_spec() {
        let catalog = FunctionCatalog::with_defaults();
        let canonical = catalog.lookup("mysql_query").unwrap();
        let alias = catalog.lookup("MYSQL_UNBUFFERED_QUERY").unwrap();
        assert_eq!(canonical.name, alias.name);
    }

    #[test]
    fn method_lookup_uses_class_candidates() {
        let catalog = FunctionCatalog::with_defaults();
        let spec = catalog.lookup_method("wpdb", "query").unwrap();
        assert!(spec.sink.matches(TaintKind::Sql, 0));
        assert!(catalog.lookup_method("unrelated", "query").is_none());
    }

    #[test]
    fn variadic_position_zero_matches_any_argument() {
        let catalog = FunctionCatalog::with_defaults();
        let spec = catalog.lookup("printf").unwrap();
        assert!(spec.sink.matches(TaintKind::Xss, 0));
        assert!(spec.sink.matches(TaintKind::Xss, 5));
    }

    #[test]
    fn load_json_extends_and_overrides() {
        let mut catalog = FunctionCatalog::with_defaults();
        let count = catalog
            .load_json(
                r#"{ "functions": [
                    { "name": "custom_exec", "param_count": 1,
                      "formats": ["custom_exec(query)"],
                      "sink": { "sql": [1] } },
                    { "name": "intval", "sanitize": {} }
                ] }"#,
            )
            .unwrap();
        assert_eq!(count, 2);
        assert!(catalog.lookup("custom_exec").unwrap().is_sink());
        // Override removed intval's sanitizer classification.
        assert!(!catalog.lookup("intval").unwrap().is_sanitizer());
    }

    #[test]
    fn malformed_json_is_a_fatal_catalog_error() {
        let mut catalog = FunctionCatalog::new();
        let err = catalog.load_json("{ not json").unwrap_err();
        assert!(matches!(err, CatalogError::Malformed(_)));
    }

    #[test]
    fn load_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "functions": [ {{ "name": "plugin_sink", "sink": {{ "xss": [1] }} }} ] }}"#
        )
        .unwrap();
        let mut catalog = FunctionCatalog::new();
        catalog.load_json_file(file.path()).unwrap();
        assert!(catalog.lookup("plugin_sink").unwrap().is_sink());
    }
}
