// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! One-shot client for the §4.8 Unix-domain-socket protocol: connect, write
//! one JSON line, read one JSON line back, disconnect. Used by
//! [`crate::bridge::ToolBridgeServer`] to turn each MCP tool call into a
//! round trip against the host process.
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Matches the server's own deadline (§5).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum IpcClientError {
    #[error("connecting to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("request to {path} timed out after {REQUEST_TIMEOUT:?}")]
    Timeout { path: PathBuf },
    #[error("writing request: {0}")]
    Write(std::io::Error),
    #[error("reading reply: {0}")]
    Read(std::io::Error),
    #[error("reply was not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends `request` (any `Serialize` value — callers pass the `serde_json`
    /// objects built in [`crate::bridge`]) and returns the decoded reply.
    pub async fn call(
        &self,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, IpcClientError> {
        tokio::time::timeout(REQUEST_TIMEOUT, self.call_inner(request))
            .await
            .map_err(|_| IpcClientError::Timeout {
                path: self.socket_path.clone(),
            })?
    }

    async fn call_inner(
        &self,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, IpcClientError> {
        let stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|source| IpcClientError::Connect {
                    path: self.socket_path.clone(),
                    source,
                })?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        write_half
            .write_all(&line)
            .await
            .map_err(IpcClientError::Write)?;
        write_half.flush().await.map_err(IpcClientError::Write)?;
        // Half-close the write side so the server's read_line sees EOF after
        // our one line even if we never send another.
        write_half.shutdown().await.map_err(IpcClientError::Write)?;

        let mut reader = BufReader::new(read_half);
        let mut reply = String::new();
        reader
            .read_line(&mut reply)
            .await
            .map_err(IpcClientError::Read)?;
        Ok(serde_json::from_str(reply.trim())?)
    }
}
