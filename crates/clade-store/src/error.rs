// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store open failed: {0}")]
    Open(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("query failed: {0}")]
    Query(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

impl From<StoreError> for clade_core::OrchestrationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => clade_core::OrchestrationError::NotFound(m),
            StoreError::Conflict(m) => clade_core::OrchestrationError::Conflict(m),
            StoreError::Open(m) | StoreError::Query(m) => {
                clade_core::OrchestrationError::Store(m)
            }
        }
    }
}
