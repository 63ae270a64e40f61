//! Reference rendering for creation payloads and discovery filters.
//!
//! Desired attributes and filter values may contain `{{logical-name.attribute}}`
//! references to dependency handles. A string that consists of a single
//! reference is replaced by the attribute's raw JSON value (so arrays and
//! numbers keep their type); references embedded in longer strings are
//! interpolated as text.

use std::collections::BTreeMap;

use berth_provider::Filter;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::NodeFailure;
use crate::resource::ResourceHandle;

/// Renders `{{logical-name.attribute}}` references against resolved handles.
pub struct PayloadRenderer {
    reference_pattern: Regex,
}

impl Default for PayloadRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadRenderer {
    pub fn new() -> Self {
        Self {
            // {{logical-name.attribute}}, logical names may contain ':'
            reference_pattern: Regex::new(r"\{\{\s*([A-Za-z0-9_:\-]+)\.([A-Za-z0-9_:\-]+)\s*\}\}")
                .expect("reference pattern is a valid regex"),
        }
    }

    /// Logical names referenced anywhere in `value`, deduplicated and sorted.
    pub fn referenced_names(&self, value: &Value) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_names(value, &mut names);
        names.sort();
        names.dedup();
        names
    }

    /// Logical names referenced by filter values.
    pub fn referenced_names_in_filters(&self, filters: &[Filter]) -> Vec<String> {
        let mut names = Vec::new();
        for value in filters.iter().flat_map(|f| f.values.iter()) {
            for caps in self.reference_pattern.captures_iter(value) {
                names.push(caps[1].to_string());
            }
        }
        names.sort();
        names.dedup();
        names
    }

    fn collect_names(&self, value: &Value, names: &mut Vec<String>) {
        match value {
            Value::String(s) => {
                for caps in self.reference_pattern.captures_iter(s) {
                    names.push(caps[1].to_string());
                }
            }
            Value::Array(items) => items.iter().for_each(|v| self.collect_names(v, names)),
            Value::Object(map) => map.values().for_each(|v| self.collect_names(v, names)),
            _ => {}
        }
    }

    /// Render every reference in a JSON document.
    pub fn render_value(
        &self,
        value: &Value,
        handles: &BTreeMap<String, ResourceHandle>,
    ) -> Result<Value, NodeFailure> {
        match value {
            Value::String(s) => self.render_string_value(s, handles),
            Value::Array(items) => items
                .iter()
                .map(|v| self.render_value(v, handles))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, v) in map {
                    rendered.insert(key.clone(), self.render_value(v, handles)?);
                }
                Ok(Value::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    fn render_string_value(
        &self,
        s: &str,
        handles: &BTreeMap<String, ResourceHandle>,
    ) -> Result<Value, NodeFailure> {
        if let Some(caps) = self.whole_reference(s) {
            return lookup(handles, &caps[1], &caps[2]).cloned();
        }
        self.render_str(s, handles).map(Value::String)
    }

    fn whole_reference<'a>(&self, s: &'a str) -> Option<Captures<'a>> {
        let caps = self.reference_pattern.captures(s)?;
        let whole = caps.get(0)?;
        (whole.start() == 0 && whole.end() == s.len()).then_some(caps)
    }

    /// Interpolate references in a string. Non-scalar values are inserted as JSON.
    pub fn render_str(
        &self,
        s: &str,
        handles: &BTreeMap<String, ResourceHandle>,
    ) -> Result<String, NodeFailure> {
        let mut failure = None;
        let rendered = self
            .reference_pattern
            .replace_all(s, |caps: &Captures| match lookup(handles, &caps[1], &caps[2]) {
                Ok(value) => scalar_text(value),
                Err(e) => {
                    failure.get_or_insert(e);
                    String::new()
                }
            })
            .to_string();

        match failure {
            Some(e) => Err(e),
            None => Ok(rendered),
        }
    }

    /// Render filter values. A value that is a single reference to an array
    /// attribute expands into one filter value per element.
    pub fn render_filters(
        &self,
        filters: &[Filter],
        handles: &BTreeMap<String, ResourceHandle>,
    ) -> Result<Vec<Filter>, NodeFailure> {
        filters
            .iter()
            .map(|filter| {
                let mut values = Vec::with_capacity(filter.values.len());
                for value in &filter.values {
                    match self.render_string_value(value, handles)? {
                        Value::Array(items) => values.extend(items.iter().map(scalar_text)),
                        other => values.push(scalar_text(&other)),
                    }
                }
                Ok(Filter {
                    name: filter.name.clone(),
                    values,
                })
            })
            .collect()
    }
}

fn lookup<'a>(
    handles: &'a BTreeMap<String, ResourceHandle>,
    logical_name: &str,
    attribute: &str,
) -> Result<&'a Value, NodeFailure> {
    handles
        .get(logical_name)
        .and_then(|h| h.attribute(attribute))
        .ok_or_else(|| NodeFailure::UnresolvedReference {
            reference: format!("{}.{}", logical_name, attribute),
        })
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
