//! The TOML configuration file.
//!
//! `[core]` belongs to the runtime. Every other table is a plugin section named
//! after the plugin and is only ever read through [Config::conf_val].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Ctrl-A.
pub const DEFAULT_COMMAND_KEY: u32 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Key that introduces an extension key: `"^A"`, `"0x01"` or a single
    /// character.
    pub command_key: String,
    /// Plugins to load, in stack order.
    pub plugins: Vec<String>,
    pub color: bool,
    /// `TERM` for spawned children.
    pub term: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            command_key: "^A".to_owned(),
            plugins: Vec::new(),
            color: true,
            term: "xterm-256color".to_owned(),
        }
    }
}

/// Immutable once loaded; shared as `Arc<Config>`.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub core: CoreConfig,
    table: toml::Table,
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(text).context("parse config")?;
        let core = match table.get("core") {
            Some(core) => core.clone().try_into().context("parse [core]")?,
            None => CoreConfig::default(),
        };
        // Fail at load time rather than on the first keystroke.
        parse_key(&core.command_key)?;
        Ok(Self { core, table })
    }

    /// Read `path`, or fall back to the defaults when there is no path.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read {}", path.display()))?;
                Self::parse(&text)
            }
            None => Ok(Self::default()),
        }
    }

    /// `section:key` as a string. Strings come back as-is, anything else in
    /// its TOML rendering.
    pub fn conf_val(&self, section: &str, key: &str) -> Option<String> {
        let value = self.table.get(section)?.as_table()?.get(key)?;
        Some(match value {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn command_key(&self) -> u32 {
        parse_key(&self.core.command_key).unwrap_or(DEFAULT_COMMAND_KEY)
    }
}

/// Parse caret notation (`^A`, `^?`), a hex code (`0x1d`) or a single
/// character into a key code.
pub fn parse_key(text: &str) -> Result<u32> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).with_context(|| format!("bad key code {text:?}"));
    }

    let mut chars = text.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some('^'), Some('?'), None) => Ok(0x7f),
        (Some('^'), Some(c), None) => {
            let c = c.to_ascii_uppercase();
            if ('@'..='_').contains(&c) {
                Ok(u32::from(c) ^ 0x40)
            } else {
                bail!("bad control key {text:?}")
            }
        }
        (Some(c), None, None) => Ok(u32::from(c)),
        _ => bail!("bad key {text:?}"),
    }
}
