// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer-side reconstruction of a live list.
//!
//! [`ListMirror`] applies frames the way an administrative client does, so
//! the list it holds after the marker is the producer's collection, and stays
//! equal to it as diffs arrive.

use crate::diff::Frame;
use crate::key::Partial;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Local copy of a live list, rebuilt from frames.
#[derive(Debug, Clone)]
pub struct ListMirror<T> {
    items: Vec<Value>,
    ready: bool,
    error: Option<String>,
    _item: std::marker::PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> ListMirror<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            ready: false,
            error: None,
            _item: std::marker::PhantomData,
        }
    }

    /// Apply one frame. Frames after a terminal error are ignored.
    pub fn apply(&mut self, frame: Frame<T>) {
        if self.error.is_some() {
            return;
        }
        match frame {
            Frame::Add(item) => match serde_json::to_value(&item) {
                Ok(value) => self.items.push(value),
                Err(e) => tracing::debug!("[mirror] unserializable item dropped: {}", e),
            },
            Frame::Remove(keys) => {
                self.items
                    .retain(|item| !keys.iter().any(|key| key.matches(item)));
            }
            Frame::Update(specs) => {
                for spec in &specs {
                    for item in self.items.iter_mut().filter(|i| spec.search.matches(i)) {
                        spec.change.merge_into(item);
                    }
                }
            }
            Frame::Ready => self.ready = true,
            Frame::Error(message) => self.error = Some(message),
        }
    }

    /// Current items, in list order.
    pub fn items(&self) -> Vec<T> {
        self.items
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    /// Current items as JSON.
    pub fn values(&self) -> &[Value] {
        &self.items
    }

    /// Items matching `key`.
    pub fn find(&self, key: &Partial) -> Vec<T> {
        self.items
            .iter()
            .filter(|v| key.matches(v))
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True once the snapshot marker has been applied.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Terminal error, if the stream ended with one.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl<T: Serialize + DeserializeOwned> Default for ListMirror<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::UpdateSpec;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Conn {
        ip: String,
        port: u16,
        #[serde(default)]
        secure: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    }

    fn conn(ip: &str, port: u16) -> Conn {
        Conn {
            ip: ip.into(),
            port,
            secure: false,
            path: None,
        }
    }

    #[test]
    fn test_remove_by_partial_key() {
        let mut mirror = ListMirror::new();
        mirror.apply(Frame::Add(conn("a", 1)));
        mirror.apply(Frame::Add(conn("a", 2)));
        mirror.apply(Frame::Add(conn("b", 1)));
        mirror.apply(Frame::Ready);
        mirror.apply(Frame::Remove(vec![Partial::new().with("ip", "a")]));

        assert!(mirror.is_ready());
        assert_eq!(mirror.items(), vec![conn("b", 1)]);
    }

    #[test]
    fn test_update_merges_into_every_match() {
        let mut mirror = ListMirror::new();
        mirror.apply(Frame::Add(Conn {
            path: Some("/f".into()),
            ..conn("a", 1)
        }));
        mirror.apply(Frame::Add(conn("a", 2)));
        mirror.apply(Frame::Add(conn("b", 1)));
        mirror.apply(Frame::Ready);
        mirror.apply(Frame::Update(vec![UpdateSpec {
            search: Partial::new().with("ip", "a"),
            change: Partial::new().with("secure", true),
        }]));

        assert_eq!(
            mirror.items(),
            vec![
                Conn {
                    ip: "a".into(),
                    port: 1,
                    secure: true,
                    path: Some("/f".into()),
                },
                Conn {
                    ip: "a".into(),
                    port: 2,
                    secure: true,
                    path: None,
                },
                conn("b", 1),
            ]
        );
    }

    #[test]
    fn test_update_with_full_key_touches_one_item() {
        let mut mirror = ListMirror::new();
        mirror.apply(Frame::Add(conn("a", 1)));
        mirror.apply(Frame::Add(conn("a", 2)));
        mirror.apply(Frame::Update(vec![UpdateSpec {
            search: Partial::new().with("ip", "a").with("port", 2),
            change: Partial::new().with("path", "/f"),
        }]));

        let found = mirror.find(&Partial::new().with("port", 2));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path.as_deref(), Some("/f"));
        assert_eq!(mirror.items()[0].path, None);
    }

    #[test]
    fn test_error_is_terminal() {
        let mut mirror = ListMirror::<Conn>::new();
        mirror.apply(Frame::Ready);
        mirror.apply(Frame::Error("lagged".into()));
        mirror.apply(Frame::Add(conn("c", 3)));

        assert_eq!(mirror.error(), Some("lagged"));
        assert!(mirror.is_empty());
    }
}
