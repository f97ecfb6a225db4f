// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The keystore holding named, mnemonic-backed accounts.
//!
//! The engine only depends on the [`Keyring`] trait. [`SledKeyring`] is the
//! bundled implementation: one sled tree of bincode-encoded [`KeyRecord`]s,
//! with private keys either in clear ([`KeyringBackend::Test`]) or sealed
//! under a passphrase ([`KeyringBackend::File`]).

mod encryption;

use crate::{
    config::{KeyringBackend, KeyringConfig},
    errors::{EotsError, Result},
    key::{EotsPublicKey, PrivateKey},
};
use bip39::Mnemonic;
use encryption::EncryptedSecret;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::fmt::Debug;
use tracing::{error, info};
use zeroize::Zeroizing;

/// Algorithm tag of every key this keyring creates.
pub const SECP256K1_ALGORITHM: &str = "secp256k1";

const KEYS_TREE: &str = "keys";
const MASTER_KEY_DOMAIN: &[u8] = b"Bitcoin seed";

/// How the private key of a record is stored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
enum StoredSecret {
    Plain(Vec<u8>),
    Encrypted(EncryptedSecret),
}

impl Debug for StoredSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoredSecret::Plain(_) => f.debug_tuple("Plain").field(&"[redacted]").finish(),
            StoredSecret::Encrypted(sealed) => f.debug_tuple("Encrypted").field(sealed).finish(),
        }
    }
}

/// One named account in the keyring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    name: String,
    algorithm: String,
    /// SEC1 compressed public key.
    public_key: Vec<u8>,
    secret: StoredSecret,
}

impl KeyRecord {
    /// The name this record is stored under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the private key can only be read with a passphrase.
    pub fn is_encrypted(&self) -> bool {
        matches!(self.secret, StoredSecret::Encrypted(_))
    }

    /// The x-only public key embedded in the record.
    pub fn public_key(&self) -> Result<EotsPublicKey> {
        if self.algorithm != SECP256K1_ALGORITHM {
            return Err(EotsError::UnsupportedKeyType(self.name.clone()));
        }
        EotsPublicKey::from_sec1_bytes(&self.public_key)
            .map_err(|_| EotsError::UnsupportedKeyType(self.name.clone()))
    }

    /// Read the private key. The passphrase is ignored for records stored in
    /// clear.
    pub fn private_key(&self, passphrase: &str) -> Result<PrivateKey> {
        match &self.secret {
            StoredSecret::Plain(bytes) => PrivateKey::from_bytes(bytes),
            StoredSecret::Encrypted(sealed) => {
                let bytes = sealed
                    .open(passphrase.as_bytes())?
                    .ok_or_else(|| EotsError::WrongPassphrase(self.name.clone()))?;
                PrivateKey::from_bytes(&bytes)
            }
        }
    }
}

/// A store of named accounts.
pub trait Keyring: Send + Sync {
    /// How this keyring stores private keys.
    fn backend(&self) -> KeyringBackend;

    /// Derive an account from `mnemonic` and store it under `name`, sealing
    /// it with `passphrase` if the backend encrypts keys.
    ///
    /// Fails with [`EotsError::KeyAlreadyExists`] if `name` is taken.
    fn new_account(&self, name: &str, mnemonic: &Mnemonic, passphrase: &str) -> Result<KeyRecord>;

    /// The record stored under `name`.
    fn key(&self, name: &str) -> Result<KeyRecord>;
}

/// Derive the account key of a mnemonic: the BIP-32 master key of its seed.
pub(crate) fn derive_account_key(mnemonic: &Mnemonic) -> Result<PrivateKey> {
    let seed = Zeroizing::new(mnemonic.to_seed(""));
    let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(MASTER_KEY_DOMAIN)
        .map_err(|_| EotsError::InternalInvariantFailed)?;
    mac.update(&seed[..]);
    let output = Zeroizing::new(mac.finalize().into_bytes().to_vec());
    PrivateKey::from_bytes(&output[..32]).map_err(|_| {
        error!("Mnemonic seed produced an invalid master key");
        EotsError::InvalidMnemonic(String::from("seed does not yield a valid key"))
    })
}

/// A [`Keyring`] persisted in its own sled database.
#[derive(Debug)]
pub struct SledKeyring {
    _db: sled::Db,
    tree: sled::Tree,
    backend: KeyringBackend,
    scrypt_log_n: u8,
}

impl SledKeyring {
    /// Open (or create) the keyring described by `config`.
    pub fn open(config: &KeyringConfig) -> Result<Self> {
        info!(
            "Opening {} keyring at {}",
            config.backend,
            config.dir.display()
        );
        let db = sled::Config::new().path(&config.dir).open()?;
        Self::from_db(db, config.backend, config.scrypt_log_n)
    }

    /// A throwaway keyring that is removed when dropped.
    pub fn temporary(backend: KeyringBackend, scrypt_log_n: u8) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, backend, scrypt_log_n)
    }

    /// All records, ordered by name.
    #[cfg(test)]
    pub(crate) fn list(&self) -> Result<Vec<KeyRecord>> {
        self.tree
            .iter()
            .values()
            .map(|bytes| deserialize!(&bytes?))
            .collect()
    }

    fn from_db(db: sled::Db, backend: KeyringBackend, scrypt_log_n: u8) -> Result<Self> {
        let tree = db.open_tree(KEYS_TREE)?;
        Ok(Self {
            _db: db,
            tree,
            backend,
            scrypt_log_n,
        })
    }
}

impl Keyring for SledKeyring {
    fn backend(&self) -> KeyringBackend {
        self.backend
    }

    fn new_account(&self, name: &str, mnemonic: &Mnemonic, passphrase: &str) -> Result<KeyRecord> {
        if name.is_empty() {
            return arg_err!("key name must not be empty");
        }
        let private_key = derive_account_key(mnemonic)?;
        let secret = match self.backend {
            KeyringBackend::Test => StoredSecret::Plain(private_key.to_bytes().to_vec()),
            KeyringBackend::File => StoredSecret::Encrypted(EncryptedSecret::seal(
                &mut OsRng,
                private_key.to_bytes().as_ref(),
                passphrase.as_bytes(),
                self.scrypt_log_n,
            )?),
        };
        let record = KeyRecord {
            name: name.to_string(),
            algorithm: SECP256K1_ALGORITHM.to_string(),
            public_key: private_key.compressed_public_key(),
            secret,
        };

        let swapped = self.tree.compare_and_swap(
            name.as_bytes(),
            None as Option<&[u8]>,
            Some(serialize!(&record)?),
        )?;
        if swapped.is_err() {
            return Err(EotsError::KeyAlreadyExists(name.to_string()));
        }
        self.tree.flush()?;
        info!("Created key {} in the {} keyring", name, self.backend);
        Ok(record)
    }

    fn key(&self, name: &str) -> Result<KeyRecord> {
        let bytes = self
            .tree
            .get(name.as_bytes())?
            .ok_or_else(|| EotsError::KeyNameNotFound(name.to_string()))?;
        deserialize!(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORDS: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn mnemonic() -> Mnemonic {
        Mnemonic::parse(WORDS).unwrap()
    }

    #[test]
    fn account_derivation_is_deterministic() -> Result<()> {
        let a = derive_account_key(&mnemonic())?;
        let b = derive_account_key(&mnemonic())?;
        assert_eq!(a.public_key(), b.public_key());
        Ok(())
    }

    #[test]
    fn test_backend_stores_in_clear() -> Result<()> {
        let keyring = SledKeyring::temporary(KeyringBackend::Test, 4)?;
        let record = keyring.new_account("alice", &mnemonic(), "")?;
        assert!(!record.is_encrypted());

        let loaded = keyring.key("alice")?;
        assert_eq!(loaded, record);
        let sk = loaded.private_key("")?;
        assert_eq!(sk.public_key(), loaded.public_key()?);
        Ok(())
    }

    #[test]
    fn file_backend_requires_passphrase() -> Result<()> {
        let keyring = SledKeyring::temporary(KeyringBackend::File, 4)?;
        let record = keyring.new_account("alice", &mnemonic(), "passphrase")?;
        assert!(record.is_encrypted());

        assert_eq!(
            record.private_key("wrong pass").unwrap_err(),
            EotsError::WrongPassphrase("alice".to_string())
        );
        let sk = record.private_key("passphrase")?;
        assert_eq!(sk.public_key(), record.public_key()?);
        Ok(())
    }

    #[test]
    fn names_are_unique() -> Result<()> {
        let keyring = SledKeyring::temporary(KeyringBackend::Test, 4)?;
        keyring.new_account("alice", &mnemonic(), "")?;
        assert_eq!(
            keyring.new_account("alice", &mnemonic(), "").unwrap_err(),
            EotsError::KeyAlreadyExists("alice".to_string())
        );
        assert_eq!(
            keyring.key("bob").unwrap_err(),
            EotsError::KeyNameNotFound("bob".to_string())
        );
        assert_eq!(keyring.list()?.len(), 1);
        Ok(())
    }

    #[test]
    fn unsupported_algorithm_is_rejected() -> Result<()> {
        let keyring = SledKeyring::temporary(KeyringBackend::Test, 4)?;
        let mut record = keyring.new_account("alice", &mnemonic(), "")?;
        record.algorithm = "ed25519".to_string();
        assert_eq!(
            record.public_key().unwrap_err(),
            EotsError::UnsupportedKeyType("alice".to_string())
        );
        Ok(())
    }
}
