// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The signing engine.
//!
//! [`SigningEngine`] owns the key-name store, the signing history and access
//! to the keyring. Its guarded signing methods ([`SigningEngine::sign`] and
//! [`SigningEngine::sign_batch`]) run the whole read-check-sign-write sequence
//! under one engine-wide lock, so a nonce is never used for two different
//! messages.

use crate::{
    config::{EngineConfig, KeyringBackend},
    eots::{self, EotsSignature},
    errors::{EotsError, Result},
    key::{EotsPublicKey, PrivateKey},
    key_access::KeyAccess,
    keyring::{Keyring, SledKeyring},
    randomness::{derive_randomness, PublicRand},
    schnorr::{self, SchnorrSignature},
    storage::{Database, KeyNameStore, SignStore, SigningRecord},
};
use bip39::Mnemonic;
use rand::{rngs::OsRng, RngCore};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};
use tracing::{error, info, instrument, warn};
use zeroize::Zeroizing;

/// Minimum passphrase length for keys sealed at rest.
pub const MIN_PASSPHRASE_LENGTH: usize = 8;

const MNEMONIC_ENTROPY_BYTES: usize = 32;

/// Engine behavior that is not tied to storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Refuse [`SigningEngine::unsafe_sign`] requests.
    pub disable_unsafe_endpoints: bool,
}

/// Height selection for [`SigningEngine::generate_randomness_list`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RandomnessOptions {
    /// Distance between consecutive heights. `None` means consecutive
    /// heights; zero is rejected.
    pub interval: Option<u64>,
}

/// One message to sign in a [`SigningEngine::sign_batch`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignRequest {
    /// The message to sign.
    pub msg: Vec<u8>,
    /// The height whose nonce signs it.
    pub height: u64,
}

impl SignRequest {
    /// Pair a message with a height.
    pub fn new(msg: impl Into<Vec<u8>>, height: u64) -> Self {
        Self {
            msg: msg.into(),
            height,
        }
    }
}

/// The signing oracle.
#[derive(Debug)]
pub struct SigningEngine<K: Keyring> {
    db: Database,
    key_names: KeyNameStore,
    sign_records: SignStore,
    keyring: K,
    key_access: KeyAccess,
    sign_lock: Mutex<()>,
    options: EngineOptions,
}

impl SigningEngine<SledKeyring> {
    /// Open the database and keyring described by `config`.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let db = Database::open(&config.db_path)?;
        let keyring = SledKeyring::open(&config.keyring)?;
        Self::new(
            db,
            keyring,
            EngineOptions {
                disable_unsafe_endpoints: config.disable_unsafe_endpoints,
            },
        )
    }
}

impl<K: Keyring> SigningEngine<K> {
    /// Build an engine over an opened database and keyring.
    pub fn new(db: Database, keyring: K, options: EngineOptions) -> Result<Self> {
        let key_names = db.key_name_store()?;
        let sign_records = db.sign_store()?;
        let key_access = KeyAccess::for_backend(keyring.backend());
        info!(
            "Signing engine started with the {} keyring",
            keyring.backend()
        );
        Ok(Self {
            db,
            key_names,
            sign_records,
            keyring,
            key_access,
            sign_lock: Mutex::new(()),
            options,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.db.is_closed() {
            return Err(EotsError::StoreClosed);
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.sign_lock.lock().map_err(|_| {
            error!("Signing lock is poisoned");
            EotsError::InternalInvariantFailed
        })
    }

    fn check_passphrase(&self, passphrase: &str) -> Result<()> {
        if self.keyring.backend() == KeyringBackend::File
            && passphrase.chars().count() < MIN_PASSPHRASE_LENGTH
        {
            return Err(EotsError::PassphraseTooShort(MIN_PASSPHRASE_LENGTH));
        }
        Ok(())
    }

    /// Create a key from fresh entropy and register it under `name`.
    #[instrument(skip_all, err(Debug))]
    pub fn create_key(&self, name: &str, passphrase: &str) -> Result<EotsPublicKey> {
        self.ensure_open()?;
        if name.is_empty() {
            return arg_err!("key name must not be empty");
        }
        self.check_passphrase(passphrase)?;

        let mut entropy = Zeroizing::new([0u8; MNEMONIC_ENTROPY_BYTES]);
        OsRng.fill_bytes(&mut entropy[..]);
        let mnemonic = Mnemonic::from_entropy(&entropy[..]).map_err(|e| {
            error!("Could not build a mnemonic from fresh entropy: {}", e);
            EotsError::InternalInvariantFailed
        })?;
        self.register_account(name, &mnemonic, passphrase)
    }

    /// Create a key from a caller-supplied BIP-39 mnemonic and register it
    /// under `name`.
    #[instrument(skip_all, err(Debug))]
    pub fn create_key_with_mnemonic(
        &self,
        name: &str,
        mnemonic: &str,
        passphrase: &str,
    ) -> Result<EotsPublicKey> {
        self.ensure_open()?;
        if name.is_empty() {
            return arg_err!("key name must not be empty");
        }
        self.check_passphrase(passphrase)?;

        let mnemonic = Mnemonic::parse(mnemonic)
            .map_err(|e| EotsError::InvalidMnemonic(e.to_string()))?;
        self.register_account(name, &mnemonic, passphrase)
    }

    fn register_account(
        &self,
        name: &str,
        mnemonic: &Mnemonic,
        passphrase: &str,
    ) -> Result<EotsPublicKey> {
        let record = self.keyring.new_account(name, mnemonic, passphrase)?;
        let pk = record.public_key()?;
        self.key_names.save_key_name(&pk, name)?;
        info!("Created key {} with public key {}", record.name(), pk);
        Ok(pk)
    }

    /// Link a key that already exists in the keyring to `name`.
    #[instrument(skip_all, err(Debug))]
    pub fn save_key_name(&self, pk: &EotsPublicKey, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.key_names.save_key_name(pk, name)
    }

    /// The public key of the keyring entry `name`, read from the keyring
    /// itself.
    pub fn load_public_key_for_name(&self, name: &str) -> Result<EotsPublicKey> {
        self.ensure_open()?;
        self.keyring.key(name)?.public_key()
    }

    /// All registered keys, ordered by name.
    pub fn list_keys(&self) -> Result<BTreeMap<String, EotsPublicKey>> {
        self.ensure_open()?;
        self.key_names.list()
    }

    fn private_key_for(&self, pk: &EotsPublicKey) -> Result<PrivateKey> {
        let name = self.key_names.key_name(pk)?;
        let sk = self.key_access.resolve_private_key(&self.keyring, &name)?;
        if sk.public_key() != *pk {
            error!("Key name {} resolves to a key other than {}", name, pk);
            return Err(EotsError::StoreCorrupted(format!(
                "key name `{name}` is registered for a different key"
            )));
        }
        Ok(sk)
    }

    /// Public nonces for `count` heights starting at `start_height`.
    ///
    /// Nothing is persisted; calling this again returns the same nonces.
    #[instrument(skip_all, err(Debug))]
    pub fn generate_randomness_list(
        &self,
        pk: &EotsPublicKey,
        chain_id: &[u8],
        start_height: u64,
        count: u32,
        options: RandomnessOptions,
    ) -> Result<Vec<PublicRand>> {
        self.ensure_open()?;
        let interval = match options.interval {
            Some(0) => return arg_err!("randomness interval must be positive"),
            Some(interval) => interval,
            None => 1,
        };
        if count == 0 {
            return Ok(Vec::new());
        }

        let sk = self.private_key_for(pk)?;
        let secret = sk.to_bytes();
        (0..u64::from(count))
            .map(|i| {
                let height = i
                    .checked_mul(interval)
                    .and_then(|offset| start_height.checked_add(offset))
                    .ok_or_else(|| {
                        EotsError::InvalidArgument(String::from("height range overflows u64"))
                    })?;
                let (_, public_rand) = derive_randomness(secret.as_ref(), chain_id, height)?;
                Ok(public_rand)
            })
            .collect()
    }

    fn double_sign(&self, pk: &EotsPublicKey, chain_id: &[u8], height: u64) -> EotsError {
        error!(
            target: "eots::security",
            public_key = %pk,
            chain_id = %hex::encode(chain_id),
            height,
            "Refused to sign a second message at an already signed height"
        );
        EotsError::DoubleSign {
            chain_id: hex::encode(chain_id),
            height,
        }
    }

    /// Sign `msg` with the nonce of `(pk, chain_id, height)`.
    ///
    /// Repeating an earlier request returns the stored signature. A different
    /// message at a signed height fails with [`EotsError::DoubleSign`].
    #[instrument(skip_all, fields(height = height), err(Debug))]
    pub fn sign(
        &self,
        pk: &EotsPublicKey,
        chain_id: &[u8],
        msg: &[u8],
        height: u64,
    ) -> Result<EotsSignature> {
        self.ensure_open()?;
        let _guard = self.lock()?;

        if let Some(record) = self.sign_records.get_record(pk, chain_id, height)? {
            if record.msg == msg {
                info!("Returning the stored signature for height {}", height);
                return Ok(record.eots_sig);
            }
            return Err(self.double_sign(pk, chain_id, height));
        }

        let sk = self.private_key_for(pk)?;
        let (private_rand, _) = derive_randomness(sk.to_bytes().as_ref(), chain_id, height)?;
        let eots_sig = eots::sign(&sk, &private_rand, msg);
        self.sign_records
            .save_record(pk, chain_id, height, msg, &eots_sig)?;
        info!("Signed height {} for {}", height, pk);
        Ok(eots_sig)
    }

    /// Sign several messages for one `(pk, chain_id)` under a single lock
    /// acquisition.
    ///
    /// Signatures come back in request order. Each request follows the rules
    /// of [`SigningEngine::sign`]; an equivocation anywhere fails the whole
    /// batch and nothing is written.
    #[instrument(skip_all, fields(requests = requests.len()), err(Debug))]
    pub fn sign_batch(
        &self,
        pk: &EotsPublicKey,
        chain_id: &[u8],
        requests: &[SignRequest],
    ) -> Result<Vec<EotsSignature>> {
        self.ensure_open()?;
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.lock()?;

        let heights: Vec<u64> = requests.iter().map(|r| r.height).collect();
        let existing = self.sign_records.get_records(pk, chain_id, &heights)?;

        let mut sk: Option<PrivateKey> = None;
        let mut staged: HashMap<u64, (&[u8], EotsSignature)> = HashMap::new();
        let mut signatures = Vec::with_capacity(requests.len());
        for request in requests {
            if let Some(record) = existing.get(&request.height) {
                if record.msg != request.msg {
                    return Err(self.double_sign(pk, chain_id, request.height));
                }
                signatures.push(record.eots_sig);
                continue;
            }
            if let Some((msg, sig)) = staged.get(&request.height) {
                if *msg != request.msg.as_slice() {
                    return Err(self.double_sign(pk, chain_id, request.height));
                }
                signatures.push(*sig);
                continue;
            }

            if sk.is_none() {
                sk = Some(self.private_key_for(pk)?);
            }
            let key = sk.as_ref().ok_or(EotsError::InternalInvariantFailed)?;
            let (private_rand, _) =
                derive_randomness(key.to_bytes().as_ref(), chain_id, request.height)?;
            let eots_sig = eots::sign(key, &private_rand, &request.msg);
            let _ = staged.insert(request.height, (request.msg.as_slice(), eots_sig));
            signatures.push(eots_sig);
        }

        if !staged.is_empty() {
            let mut new_records: Vec<_> = staged
                .into_iter()
                .map(|(height, (msg, sig))| (height, msg.to_vec(), sig))
                .collect();
            new_records.sort_by_key(|(height, _, _)| *height);
            self.sign_records
                .save_records(pk, chain_id, &new_records)?;
            info!("Signed {} new heights for {}", new_records.len(), pk);
        }
        Ok(signatures)
    }

    /// Sign without consulting or updating the signing history.
    ///
    /// # 🔒 Security
    /// Signing two messages at one height through this method leaks the
    /// private key. Use it only in test harnesses.
    #[instrument(skip_all, fields(height = height), err(Debug))]
    pub fn unsafe_sign(
        &self,
        pk: &EotsPublicKey,
        chain_id: &[u8],
        msg: &[u8],
        height: u64,
    ) -> Result<EotsSignature> {
        if self.options.disable_unsafe_endpoints {
            return Err(EotsError::UnsafeSigningDisabled);
        }
        self.ensure_open()?;
        warn!("Signing height {} without the signing history", height);

        let sk = self.private_key_for(pk)?;
        let (private_rand, _) = derive_randomness(sk.to_bytes().as_ref(), chain_id, height)?;
        Ok(eots::sign(&sk, &private_rand, msg))
    }

    /// A BIP-340 signature over `msg`, unrelated to any height.
    #[instrument(skip_all, err(Debug))]
    pub fn sign_schnorr_sig(&self, pk: &EotsPublicKey, msg: &[u8]) -> Result<SchnorrSignature> {
        self.ensure_open()?;
        let sk = self.private_key_for(pk)?;
        schnorr::sign(&mut OsRng, &sk, msg)
    }

    /// Like [`SigningEngine::sign_schnorr_sig`] but addressing the key by
    /// name. Also returns the public key.
    #[instrument(skip_all, err(Debug))]
    pub fn sign_schnorr_sig_by_name(
        &self,
        name: &str,
        msg: &[u8],
    ) -> Result<(SchnorrSignature, EotsPublicKey)> {
        self.ensure_open()?;
        let sk = self.key_access.resolve_private_key(&self.keyring, name)?;
        let sig = schnorr::sign(&mut OsRng, &sk, msg)?;
        Ok((sig, sk.public_key()))
    }

    /// Decrypt the key of `pk` with `passphrase` and keep it in memory for
    /// later signing requests.
    #[instrument(skip_all, err(Debug))]
    pub fn unlock(&self, pk: &EotsPublicKey, passphrase: &str) -> Result<()> {
        self.ensure_open()?;
        let name = self.key_names.key_name(pk)?;
        self.key_access.unlock(&self.keyring, &name, passphrase)
    }

    /// Delete the signing history of `(pk, chain_id)` at and above
    /// `from_height`. Returns the number of records removed.
    #[instrument(skip_all, fields(from_height = from_height), err(Debug))]
    pub fn rollback_sign_history(
        &self,
        pk: &EotsPublicKey,
        chain_id: &[u8],
        from_height: u64,
    ) -> Result<usize> {
        self.ensure_open()?;
        let _guard = self.lock()?;
        self.sign_records
            .delete_from_height(pk, chain_id, from_height)
    }

    /// The stored record at `(pk, chain_id, height)`.
    pub fn sign_record(
        &self,
        pk: &EotsPublicKey,
        chain_id: &[u8],
        height: u64,
    ) -> Result<SigningRecord> {
        self.ensure_open()?;
        self.sign_records
            .get_record(pk, chain_id, height)?
            .ok_or_else(|| EotsError::SignRecordNotFound {
                chain_id: hex::encode(chain_id),
                height,
            })
    }

    /// Whether `(pk, chain_id, height)` has been signed.
    pub fn is_record_present(&self, pk: &EotsPublicKey, chain_id: &[u8], height: u64) -> Result<bool> {
        self.ensure_open()?;
        self.sign_records.is_record_present(pk, chain_id, height)
    }

    /// Flush and close the database. Every later call fails with
    /// [`EotsError::StoreClosed`].
    pub fn close(&self) -> Result<()> {
        self.db.close()
    }
}
