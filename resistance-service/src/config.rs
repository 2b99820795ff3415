// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::time::Duration;

use anyhow::Context;
use resistance_common::{RuleOptions, expand_env_vars};
use serde::Deserialize;
use tracing::info;

const DEFAULT_FANOUT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_DISPATCHER_QUEUE_CAPACITY: usize = 1_024;

/// Tunables read from the optional YAML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    pub max_consecutive_rejections: Option<u8>,
    pub fanout_poll_interval_ms: u64,
    pub dispatcher_queue_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_consecutive_rejections: None,
            fanout_poll_interval_ms: DEFAULT_FANOUT_POLL_INTERVAL_MS,
            dispatcher_queue_capacity: DEFAULT_DISPATCHER_QUEUE_CAPACITY,
        }
    }
}

impl ServiceConfig {
    /// Loads `RESISTANCE_CONFIG_PATH` when set, defaults otherwise. A file that
    /// is set but unreadable is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let Some(path) = std::env::var("RESISTANCE_CONFIG_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let config = Self::from_yaml(&raw).with_context(|| format!("invalid config file {path}"))?;
        info!(path = %path, ?config, "loaded service config");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(&expand_env_vars(raw))?;
        anyhow::ensure!(
            config.fanout_poll_interval_ms > 0,
            "fanout_poll_interval_ms must be positive"
        );
        anyhow::ensure!(
            config.dispatcher_queue_capacity > 0,
            "dispatcher_queue_capacity must be positive"
        );
        Ok(config)
    }

    pub fn rule_options(&self) -> RuleOptions {
        RuleOptions {
            max_consecutive_rejections: self.max_consecutive_rejections,
        }
    }

    pub fn fanout_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fanout_poll_interval_ms)
    }
}
