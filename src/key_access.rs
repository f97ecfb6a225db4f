// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Resolution of private keys from the keyring.
//!
//! Keys in an always-decrypted keyring are read on every request. Keys sealed
//! under a passphrase have to be unlocked once; the decrypted key then lives in
//! an in-memory cache, keyed by key name, until the engine is dropped.

use crate::{
    config::KeyringBackend,
    errors::{EotsError, Result},
    key::PrivateKey,
    keyring::Keyring,
};
use std::{collections::HashMap, sync::RwLock};
use tracing::{error, info};

#[derive(Debug)]
pub(crate) enum KeyAccess {
    AlwaysDecrypted,
    PassphraseGated {
        unlocked: RwLock<HashMap<String, PrivateKey>>,
    },
}

fn poisoned<T>(_: T) -> EotsError {
    error!("Unlocked key cache lock is poisoned");
    EotsError::InternalInvariantFailed
}

impl KeyAccess {
    pub(crate) fn for_backend(backend: KeyringBackend) -> Self {
        match backend {
            KeyringBackend::Test => KeyAccess::AlwaysDecrypted,
            KeyringBackend::File => KeyAccess::PassphraseGated {
                unlocked: RwLock::new(HashMap::new()),
            },
        }
    }

    /// The private key stored under `name`.
    ///
    /// Fails with [`EotsError::KeyLocked`] for a sealed key that has not been
    /// unlocked; this never asks for a passphrase.
    pub(crate) fn resolve_private_key<K: Keyring + ?Sized>(
        &self,
        keyring: &K,
        name: &str,
    ) -> Result<PrivateKey> {
        match self {
            KeyAccess::AlwaysDecrypted => keyring.key(name)?.private_key(""),
            KeyAccess::PassphraseGated { unlocked } => unlocked
                .read()
                .map_err(poisoned)?
                .get(name)
                .cloned()
                .ok_or_else(|| EotsError::KeyLocked(name.to_string())),
        }
    }

    /// Decrypt the key stored under `name` and keep it in the cache.
    pub(crate) fn unlock<K: Keyring + ?Sized>(
        &self,
        keyring: &K,
        name: &str,
        passphrase: &str,
    ) -> Result<()> {
        let unlocked = match self {
            KeyAccess::AlwaysDecrypted => {
                return arg_err!("keys of the test keyring are never locked");
            }
            KeyAccess::PassphraseGated { unlocked } => unlocked,
        };

        if unlocked.read().map_err(poisoned)?.contains_key(name) {
            return Err(EotsError::AlreadyUnlocked(name.to_string()));
        }

        // Decryption runs scrypt; no cache guard may be held across it.
        let record = keyring.key(name)?;
        let private_key = record.private_key(passphrase)?;
        if private_key.public_key() != record.public_key()? {
            error!("Key {} decrypted to a key that does not match its record", name);
            return Err(EotsError::StoreCorrupted(format!(
                "key `{name}` does not match its public key"
            )));
        }

        let mut cache = unlocked.write().map_err(poisoned)?;
        if cache.contains_key(name) {
            return Err(EotsError::AlreadyUnlocked(name.to_string()));
        }
        let _ = cache.insert(name.to_string(), private_key);
        info!("Unlocked key {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::SledKeyring;
    use bip39::Mnemonic;
    use rand::{rngs::OsRng, RngCore};

    fn mnemonic() -> Mnemonic {
        let mut entropy = [0u8; 32];
        OsRng.fill_bytes(&mut entropy);
        Mnemonic::from_entropy(&entropy).unwrap()
    }

    #[test]
    fn always_decrypted_resolves_directly() -> Result<()> {
        let keyring = SledKeyring::temporary(KeyringBackend::Test, 4)?;
        let record = keyring.new_account("alice", &mnemonic(), "")?;
        let access = KeyAccess::for_backend(KeyringBackend::Test);

        let sk = access.resolve_private_key(&keyring, "alice")?;
        assert_eq!(sk.public_key(), record.public_key()?);
        assert!(matches!(
            access.unlock(&keyring, "alice", ""),
            Err(EotsError::InvalidArgument(_))
        ));
        assert!(access
            .resolve_private_key(&keyring, "bob")
            .unwrap_err()
            .is_not_found());
        Ok(())
    }

    #[test]
    fn gated_keys_need_unlock_once() -> Result<()> {
        let keyring = SledKeyring::temporary(KeyringBackend::File, 4)?;
        let record = keyring.new_account("alice", &mnemonic(), "passphrase")?;
        let access = KeyAccess::for_backend(KeyringBackend::File);

        assert_eq!(
            access.resolve_private_key(&keyring, "alice").unwrap_err(),
            EotsError::KeyLocked("alice".to_string())
        );
        assert_eq!(
            access.unlock(&keyring, "alice", "not the passphrase"),
            Err(EotsError::WrongPassphrase("alice".to_string()))
        );
        access.unlock(&keyring, "alice", "passphrase")?;
        assert_eq!(
            access.resolve_private_key(&keyring, "alice")?.public_key(),
            record.public_key()?
        );
        assert_eq!(
            access.unlock(&keyring, "alice", "passphrase"),
            Err(EotsError::AlreadyUnlocked("alice".to_string()))
        );
        Ok(())
    }

    #[test]
    fn concurrent_unlocks_admit_one() -> Result<()> {
        let keyring = SledKeyring::temporary(KeyringBackend::File, 4)?;
        keyring.new_account("alice", &mnemonic(), "passphrase")?;
        keyring.new_account("bob", &mnemonic(), "passphrase")?;
        let access = KeyAccess::for_backend(KeyringBackend::File);

        let outcomes = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| access.unlock(&keyring, "alice", "passphrase")))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter_map(|o| o.as_ref().err())
            .all(|e| *e == EotsError::AlreadyUnlocked("alice".to_string())));

        // an unlock in progress does not hold the cache against readers
        std::thread::scope(|s| -> Result<()> {
            let unlocking = s.spawn(|| access.unlock(&keyring, "bob", "passphrase"));
            access.resolve_private_key(&keyring, "alice")?;
            unlocking.join().unwrap()
        })?;
        access.resolve_private_key(&keyring, "bob")?;
        Ok(())
    }
}
