// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving the MAS instance settings.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::obex::constants::features;

const APP_DIR: &str = "map-mse";

/// Kind of message account behind a MAS instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    SmsMms,
    Email,
    Im,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::SmsMms => "sms_mms",
            AccountKind::Email => "email",
            AccountKind::Im => "im",
        }
    }

    /// Whether folders below `telecom/msg` come from the store.
    pub fn has_dynamic_folders(&self) -> bool {
        matches!(self, AccountKind::Email | AccountKind::Im)
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for the message store.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Notification client settings.
    #[serde(default)]
    pub mns: MnsConfig,

    /// One entry per published MAS instance.
    #[serde(default = "default_instances")]
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file name inside the data directory.
    pub database_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_file: "map_mse.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MnsConfig {
    /// Features advertised when connecting to a peer's MNS.
    pub supported_features: u32,
}

impl Default for MnsConfig {
    fn default() -> Self {
        Self {
            supported_features: features::ALL_SUPPORTED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// MASInstanceID, unique per device.
    pub mas_id: u8,

    /// Human readable instance name, returned by MASInstanceInformation.
    pub name: String,

    pub account: AccountKind,

    /// SDP MapSupportedMessageTypes bitmask.
    #[serde(default = "default_message_types")]
    pub supported_message_types: u8,

    /// Local MapSupportedFeatures.
    #[serde(default = "default_features")]
    pub supported_features: u32,

    /// Owner UCI for IM accounts.
    #[serde(default)]
    pub owner_uci: Option<String>,
}

impl InstanceConfig {
    pub fn new(mas_id: u8, name: &str, account: AccountKind) -> Self {
        Self {
            mas_id,
            name: name.to_string(),
            account,
            supported_message_types: default_message_types(),
            supported_features: default_features(),
            owner_uci: None,
        }
    }
}

fn default_message_types() -> u8 {
    // SMS_GSM | SMS_CDMA | MMS
    0x0E
}

fn default_features() -> u32 {
    features::ALL_SUPPORTED
}

fn default_instances() -> Vec<InstanceConfig> {
    vec![InstanceConfig::new(0, "SMS/MMS", AccountKind::SmsMms)]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR),
            store: StoreConfig::default(),
            mns: MnsConfig::default(),
            instances: default_instances(),
        }
    }
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml_str(&content)?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(&config_path, content)?;
            config
        };

        config.data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.data_dir = Self::default().data_dir;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for instance in &self.instances {
            if !seen.insert(instance.mas_id) {
                bail!("duplicate MAS instance id {}", instance.mas_id);
            }
        }
        Ok(())
    }

    /// Path of the SQLite message store.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.store.database_file)
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }
}
