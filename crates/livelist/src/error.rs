// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use thiserror::Error;

/// Errors raised by producers while capturing or streaming a snapshot.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("producer error: {0}")]
    Producer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LiveError>;
