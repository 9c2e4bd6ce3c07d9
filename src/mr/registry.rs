//! Built-in mapper/reducer applications, resolved by name.
//!
//! `spec.md` §9 leaves the mechanism for "dynamic user-code loading" neutral
//! and lists three options for a typed/compiled target; this crate takes
//! option (b): `mapper_code` / `reducer_code` are UTF-8-encoded registry
//! keys rather than source text, and workers resolve them against this
//! table instead of `exec`-ing bytes. Only the `(line) -> seq<(k,v)>` and
//! `(k, seq<v>) -> seq<(k,v)>` contracts matter to the rest of the system.
//!
//! Applications are ported from the Python reference implementation's
//! `examples/{wordcount,grep,inverted_index}` to keep the same observable
//! behavior.

use crate::mr::error::{Error, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

pub type MapFn = fn(&str) -> Vec<(String, String)>;
pub type ReduceFn = fn(&str, Vec<&str>) -> Vec<(String, String)>;

pub struct Application {
    pub name: &'static str,
    pub map: MapFn,
    pub reduce: ReduceFn,
}

/// Looks up the mapper/reducer pair registered under `name`.
pub fn lookup(name: &str) -> Option<&'static Application> {
    applications().iter().find(|app| app.name == name)
}

/// Decodes a `mapper_code`/`reducer_code` byte blob into a registry key and
/// resolves it. Mirrors the reference worker's `_load_function`: an unknown
/// or malformed key is a user-code load failure, not a record-level error.
pub fn resolve(code: &[u8]) -> Result<&'static Application> {
    let name = std::str::from_utf8(code)
        .map_err(|e| Error::UserCodeLoad(format!("function key is not valid utf-8: {e}")))?
        .trim();
    lookup(name).ok_or_else(|| Error::UnknownFunction(name.to_string()))
}

fn applications() -> &'static [Application] {
    static APPS: OnceLock<Vec<Application>> = OnceLock::new();
    APPS.get_or_init(|| {
        vec![
            Application {
                name: "wordcount",
                map: wordcount::map,
                reduce: wordcount::reduce,
            },
            Application {
                name: "grep",
                map: grep::map,
                reduce: grep::reduce,
            },
            Application {
                name: "inverted_index",
                map: inverted_index::map,
                reduce: inverted_index::reduce,
            },
        ]
    })
}

fn word_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+\b").unwrap())
}

/// Emits `(word, 1)` for each word in the line; sums counts per key.
pub mod wordcount {
    use super::word_pattern;

    pub fn map(line: &str) -> Vec<(String, String)> {
        word_pattern()
            .find_iter(&line.to_lowercase())
            .map(|m| (m.as_str().to_string(), "1".to_string()))
            .collect()
    }

    pub fn reduce(key: &str, values: Vec<&str>) -> Vec<(String, String)> {
        let total: i64 = values.iter().filter_map(|v| v.parse::<i64>().ok()).sum();
        vec![(key.to_string(), total.to_string())]
    }
}

/// Emits the line itself as key whenever it matches `GREP_PATTERN` (default
/// `"error"`), counting occurrences of identical matching lines.
pub mod grep {
    use regex::RegexBuilder;

    fn pattern() -> String {
        std::env::var("GREP_PATTERN").unwrap_or_else(|_| "error".to_string())
    }

    pub fn map(line: &str) -> Vec<(String, String)> {
        let pattern = pattern();
        let re = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(_) => return Vec::new(),
        };
        if re.is_match(line) {
            vec![(line.trim().to_string(), "1".to_string())]
        } else {
            Vec::new()
        }
    }

    pub fn reduce(key: &str, values: Vec<&str>) -> Vec<(String, String)> {
        let count: i64 = values.iter().filter_map(|v| v.parse::<i64>().ok()).sum();
        vec![(key.to_string(), count.to_string())]
    }
}

/// Expects lines shaped `doc_id: content`; emits `(word, doc_id)` for each
/// distinct word (len > 2) in the document; reduces to a sorted, deduped,
/// comma-joined document list per word.
pub mod inverted_index {
    use super::word_pattern;
    use super::HashSet;

    pub fn map(line: &str) -> Vec<(String, String)> {
        let Some((doc_id, content)) = line.split_once(':') else {
            return Vec::new();
        };
        let doc_id = doc_id.trim().to_string();
        let content = content.trim().to_lowercase();

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for m in word_pattern().find_iter(&content) {
            let word = m.as_str();
            if word.len() > 2 && seen.insert(word.to_string()) {
                out.push((word.to_string(), doc_id.clone()));
            }
        }
        out
    }

    pub fn reduce(key: &str, values: Vec<&str>) -> Vec<(String, String)> {
        let mut unique: Vec<&str> = values.into_iter().collect::<HashSet<_>>().into_iter().collect();
        unique.sort_unstable();
        vec![(key.to_string(), unique.join(","))]
    }
}
