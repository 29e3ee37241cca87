// Environment variable overlay

use serde_json::{Map, Value};
use std::env;

/// Separator between nesting levels in variable names.
pub const NESTING_SEPARATOR: &str = "__";

/// Environment variable loader
///
/// `TOLLGATE_EXCHANGE__TAX_RATE=0.002` becomes `{"exchange": {"tax_rate": "0.002"}}`.
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    /// Create a new environment loader for variables starting with `prefix_`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Overlay built from the process environment
    pub fn load(&self) -> Value {
        self.load_from(env::vars())
    }

    /// Overlay built from the given variables
    pub fn load_from<I>(&self, vars: I) -> Value
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let wanted = format!("{}_", self.prefix);
        let pairs = vars
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&wanted)
                    .map(|rest| (rest.to_string(), value))
            })
            .collect();

        nest(pairs, None)
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new("TOLLGATE")
    }
}

/// Build a nested object out of flat `A__B=value` pairs.
pub(crate) fn nest(pairs: Vec<(String, String)>, root: Option<Map<String, Value>>) -> Value {
    let mut root = root.unwrap_or_default();

    for (key, raw) in pairs {
        let path: Vec<String> = key
            .split(NESTING_SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .map(str::to_lowercase)
            .collect();

        if path.is_empty() {
            continue;
        }

        insert_path(&mut root, &path, scalar(&raw));
    }

    Value::Object(root)
}

fn insert_path(map: &mut Map<String, Value>, path: &[String], value: Value) {
    let (head, rest) = match path.split_first() {
        Some(split) => split,
        None => return,
    };

    if rest.is_empty() {
        map.insert(head.clone(), value);
        return;
    }

    let child = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));

    if !child.is_object() {
        *child = Value::Object(Map::new());
    }

    if let Value::Object(child_map) = child {
        insert_path(child_map, rest, value);
    }
}

/// Interpret a raw string: booleans, integers and JSON collections are typed,
/// everything else (including decimals) stays a string.
fn scalar(raw: &str) -> Value {
    let trimmed = raw.trim();

    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(n) = trimmed.parse::<u64>() {
        return Value::from(n);
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if (trimmed.starts_with('[') || trimmed.starts_with('{'))
        && let Ok(value) = serde_json::from_str(trimmed)
    {
        return value;
    }

    Value::String(trimmed.to_string())
}
