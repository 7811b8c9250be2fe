//! Header multimap and inbound header merging.

use indexmap::IndexMap;
use serde_json::Value;

/// Ordered, case-insensitive header multimap.
///
/// Names keep the spelling of their first insertion; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: IndexMap<String, Vec<String>>,
}

impl Headers {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    fn key_of(&self, name: &str) -> Option<&str> {
        self.entries
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// Every value of `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.key_of(name)
            .and_then(|key| self.entries.get(key))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// `true` when `name` has at least one value.
    pub fn contains(&self, name: &str) -> bool {
        self.key_of(name).is_some()
    }

    /// Replaces every value of `name` with `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.key_of(&name).map(str::to_string) {
            Some(key) => {
                self.entries.insert(key, vec![value]);
            },
            None => {
                self.entries.insert(name, vec![value]);
            },
        }
    }

    /// Adds `value` after any existing values of `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.key_of(&name).map(str::to_string) {
            Some(key) => self.entries.entry(key).or_default().push(value),
            None => {
                self.entries.insert(name, vec![value]);
            },
        }
    }

    /// Removes `name`, returning its values.
    pub fn remove(&mut self, name: &str) -> Vec<String> {
        match self.key_of(name).map(str::to_string) {
            Some(key) => self.entries.shift_remove(&key).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Header names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `(name, value)` pairs; names with several values repeat.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no header is present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Canonical header spelling: every letter that follows a non-letter is
/// upper-cased, every other letter lower-cased (`x-api-KEY` becomes
/// `X-Api-Key`).
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut previous_is_letter = false;
    for c in name.chars() {
        if c.is_alphabetic() {
            if previous_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            out.push(c);
            previous_is_letter = false;
        }
    }
    out
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Merges an event's `headers` and `multiValueHeaders` into one value per
/// title-cased name.
///
/// - Present in both: the multi-values joined with `", "`, followed by the
///   singular value. The gateway mirrors the last multi-value into
///   `headers`, so that value appears twice.
/// - Multi-value only: the values joined with `", "`.
/// - Singular only: unchanged.
///
/// When `use_multi_value` is off, `multiValueHeaders` is ignored.
pub fn merge_headers(event: &Value, use_multi_value: bool) -> Headers {
    let empty = serde_json::Map::new();
    let singular = event
        .get("headers")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let multi = if use_multi_value {
        event
            .get("multiValueHeaders")
            .and_then(Value::as_object)
            .unwrap_or(&empty)
    } else {
        &empty
    };

    let mut merged: IndexMap<String, Vec<String>> = IndexMap::new();
    for (name, values) in multi {
        let values: Vec<String> = match values {
            Value::Array(items) => items.iter().filter_map(value_text).collect(),
            other => value_text(other).into_iter().collect(),
        };
        merged.entry(title_case(name)).or_default().extend(values);
    }
    for (name, value) in singular {
        let Some(value) = value_text(value) else {
            continue;
        };
        merged.entry(title_case(name)).or_default().push(value);
    }

    merged
        .into_iter()
        .map(|(name, values)| (name, values.join(", ")))
        .collect()
}
