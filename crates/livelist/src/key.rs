// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Partial-match keys.
//!
//! Items on a live list are located by a subset of their fields rather than by
//! full equality: `{"ip": "a"}` matches both `{"ip": "a", "port": 1}` and
//! `{"ip": "a", "port": 2}`. Each item type declares which fields identify it
//! through a [`KeySchema`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Subset of an item's fields, used as a removal key, a search key, or a change set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Partial(Map<String, Value>);

impl Partial {
    /// Empty partial (matches everything).
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Field value, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Field names in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if every field of `self` is present in `item` with an equal value.
    pub fn matches(&self, item: &Value) -> bool {
        let Some(obj) = item.as_object() else {
            return self.is_empty();
        };
        self.0.iter().all(|(k, v)| obj.get(k) == Some(v))
    }

    /// [`matches`](Self::matches) against any serializable item.
    pub fn matches_item<T: Serialize + ?Sized>(&self, item: &T) -> bool {
        serde_json::to_value(item).is_ok_and(|value| self.matches(&value))
    }

    /// Merge fields into `item` in place. A `null` field removes it from the item.
    pub fn merge_into(&self, item: &mut Value) {
        let Some(obj) = item.as_object_mut() else {
            return;
        };
        for (k, v) in &self.0 {
            if v.is_null() {
                obj.remove(k);
            } else {
                obj.insert(k.clone(), v.clone());
            }
        }
    }

    /// Consume into the underlying JSON map.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Partial {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Named fields of an item type that are eligible for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySchema {
    fields: &'static [&'static str],
}

impl KeySchema {
    /// Schema for Add-only item types.
    pub const EMPTY: KeySchema = KeySchema { fields: &[] };

    pub const fn new(fields: &'static [&'static str]) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// True if `key` is non-empty and only uses schema fields.
    pub fn admits(&self, key: &Partial) -> bool {
        !key.is_empty() && key.fields().all(|f| self.fields.contains(&f))
    }

    /// Project `item` onto the schema fields it carries.
    pub fn project<T: Serialize + ?Sized>(&self, item: &T) -> Partial {
        let Ok(Value::Object(obj)) = serde_json::to_value(item) else {
            return Partial::new();
        };
        let mut key = Partial::new();
        for field in self.fields {
            if let Some(v) = obj.get(*field) {
                key.insert(*field, v.clone());
            }
        }
        key
    }
}

/// Item type with a declared key schema.
pub trait Keyed: Serialize {
    const KEY: KeySchema;

    /// Removal/search key of this item.
    fn key(&self) -> Partial {
        Self::KEY.project(self)
    }
}
