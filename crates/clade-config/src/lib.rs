// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Config schema (§4.0) and layered loader for the `clade` host.
mod loader;
mod schema;

pub use loader::{default_home_dir, load, save, ConfigError};
pub use schema::{
    BrowserConfig, ChannelConfig, Config, GatewayConfig, RoutingConfig, RoutingRule,
    SkillsConfig, TaskQueueConfig, CONFIG_SCHEMA_VERSION,
};
