// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent Registry (§4.4): maps an agent id to its resolved on-disk document
//! bundle and owns the agent config map's single writer path.
mod layout;
mod registry;

pub use layout::AgentBundle;
pub use registry::{Registry, RegistryError, DEFAULT_MEMORY_TEMPLATE};
