// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. `/etc/tether/tether.toml`
//! 3. `~/.config/tether/tether.toml`
//! 4. `./tether.toml`
//! 5. `TETHER_*` environment variables

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::TetherConfig;

/// Config sections, in the order env keys are matched against them.
const SECTIONS: &[&str] = &["daemon", "storage", "session", "webhook", "bus", "driver"];

/// Config files consulted by [`load_config`], lowest precedence first.
pub fn config_file_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/tether/tether.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("tether/tether.toml"));
    }
    paths.push(PathBuf::from("tether.toml"));
    paths
}

/// Build the full Figment before extraction.
pub fn build_figment() -> Figment {
    let figment = config_file_paths()
        .into_iter()
        .fold(defaults(), |figment, path| figment.merge(Toml::file(path)));
    figment.merge(env_provider())
}

/// Load configuration from the standard hierarchy with env var overrides.
pub fn load_config() -> Result<TetherConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no files, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<TetherConfig, figment::Error> {
    defaults().merge(Toml::string(toml_content)).extract()
}

/// Load configuration from one file with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<TetherConfig, figment::Error> {
    defaults()
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

fn defaults() -> Figment {
    Figment::new().merge(Serialized::defaults(TetherConfig::default()))
}

/// Env provider with explicit section mapping.
///
/// Keys contain underscores, so `Env::split("_")` would be ambiguous:
/// `TETHER_SESSION_AUTH_TIMEOUT_SECS` must become `session.auth_timeout_secs`.
fn env_provider() -> Env {
    Env::prefixed("TETHER_").map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}
