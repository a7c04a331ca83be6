// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! IPC Server (§4.8) and the §4.6 tool-bridge.
//!
//! Two halves of the same seam: [`IpcServer`] is the Unix-domain-socket side
//! the host process owns, speaking one-JSON-request/one-JSON-reply per
//! connection; [`bridge`] is the MCP-over-stdio side a re-invoked `clade
//! tool-bridge --server <name>` process speaks to the child CLI, translating
//! every MCP tool call into a short-lived [`IpcClient`] round trip against
//! the socket. Neither half keeps conversation state — all of it lives in
//! the Store behind the socket.
mod bridge;
mod client;
mod server;
mod wire;

pub use bridge::{serve_stdio, BridgeError, ToolBridgeServer};
pub use client::{IpcClient, IpcClientError};
pub use server::{IpcError, IpcServer};
pub use wire::Request;
