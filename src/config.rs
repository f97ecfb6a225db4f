// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Configuration of the signing engine and its keyring.

use crate::errors::{EotsError, Result};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, path::PathBuf, str::FromStr};

/// Default scrypt cost (`N = 2^15`) for sealing keys at rest.
pub const DEFAULT_SCRYPT_LOG_N: u8 = 15;

/// How the keyring stores private keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyringBackend {
    /// Keys are stored unencrypted and usable without a passphrase. Meant for
    /// tests and development.
    Test,
    /// Keys are encrypted under a passphrase and must be unlocked before the
    /// engine can sign with them.
    File,
}

impl KeyringBackend {
    /// Whether keys in this backend are encrypted at rest.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, KeyringBackend::File)
    }
}

impl FromStr for KeyringBackend {
    type Err = EotsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "test" => Ok(KeyringBackend::Test),
            "file" => Ok(KeyringBackend::File),
            other => Err(EotsError::InvalidArgument(format!(
                "unsupported keyring backend `{other}`"
            ))),
        }
    }
}

impl Display for KeyringBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyringBackend::Test => write!(f, "test"),
            KeyringBackend::File => write!(f, "file"),
        }
    }
}

/// Where and how the keyring stores keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyringConfig {
    /// Directory of the keyring database.
    pub dir: PathBuf,
    /// Storage backend.
    pub backend: KeyringBackend,
    /// Scrypt cost exponent used when sealing new keys.
    pub scrypt_log_n: u8,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("keyring"),
            backend: KeyringBackend::Test,
            scrypt_log_n: DEFAULT_SCRYPT_LOG_N,
        }
    }
}

/// Configuration of a [`SigningEngine`](crate::SigningEngine).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory of the database holding key names and signing history.
    pub db_path: PathBuf,
    /// Keyring settings.
    pub keyring: KeyringConfig,
    /// Refuse [`unsafe_sign`](crate::SigningEngine::unsafe_sign) requests.
    pub disable_unsafe_endpoints: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data"),
            keyring: KeyringConfig::default(),
            disable_unsafe_endpoints: false,
        }
    }
}

impl EngineConfig {
    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            return arg_err!("db_path must not be empty");
        }
        if self.keyring.dir.as_os_str().is_empty() {
            return arg_err!("keyring dir must not be empty");
        }
        if !(1..=20).contains(&self.keyring.scrypt_log_n) {
            return arg_err!("scrypt_log_n must be between 1 and 20");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let config = EngineConfig::default();
        config.validate()?;
        assert_eq!(config.keyring.backend, KeyringBackend::Test);
        assert!(!config.disable_unsafe_endpoints);
        Ok(())
    }

    #[test]
    fn rejects_unusable_values() {
        let mut config = EngineConfig::default();
        config.db_path = PathBuf::new();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.keyring.scrypt_log_n = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backend_names() -> Result<()> {
        assert_eq!("file".parse::<KeyringBackend>()?, KeyringBackend::File);
        assert_eq!("test".parse::<KeyringBackend>()?, KeyringBackend::Test);
        assert!("os".parse::<KeyringBackend>().is_err());
        assert_eq!(KeyringBackend::File.to_string(), "file");
        assert!(KeyringBackend::File.is_encrypted());
        Ok(())
    }
}
