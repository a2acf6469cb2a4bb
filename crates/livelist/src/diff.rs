// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Diff operations and their JSON frames.
//!
//! ```json
//! {"add": {"ip": "10.0.0.2", "port": 51234}}
//! {"remove": [{"ip": "10.0.0.2", "port": 51234}]}
//! {"update": [{"search": {"id": "stats"}, "change": {"version": "1.2"}}]}
//! "ready"
//! {"error": "lagged"}
//! ```

use crate::key::Partial;
use serde::{Deserialize, Serialize};

/// Unit of incremental change on a live list.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOp<T> {
    /// Item enters the collection.
    Add(T),
    /// Every item matching the key leaves the collection.
    Remove(Partial),
    /// Every item matching `search` gets `change` merged in.
    Update { search: Partial, change: Partial },
}

/// Search/change pair carried by an `update` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSpec {
    pub search: Partial,
    pub change: Partial,
}

/// One element of the outbound sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame<T> {
    Add(T),
    Remove(Vec<Partial>),
    Update(Vec<UpdateSpec>),
    /// Snapshot complete marker.
    Ready,
    /// Terminal frame, nothing follows.
    Error(String),
}

impl<T> Frame<T> {
    /// True for the snapshot-complete marker.
    pub fn is_ready(&self) -> bool {
        matches!(self, Frame::Ready)
    }

    /// True for frames after which the stream ends.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Error(_))
    }
}

impl<T> From<DiffOp<T>> for Frame<T> {
    fn from(op: DiffOp<T>) -> Self {
        match op {
            DiffOp::Add(item) => Frame::Add(item),
            DiffOp::Remove(key) => Frame::Remove(vec![key]),
            DiffOp::Update { search, change } => Frame::Update(vec![UpdateSpec { search, change }]),
        }
    }
}
