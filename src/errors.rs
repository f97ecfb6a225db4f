// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! A list of error types which are produced by the signing engine and its
//! stores.
use core::fmt::Debug;
use thiserror::Error;

/// The default Result type used in this crate
pub type Result<T> = std::result::Result<T, EotsError>;

/// Represents an error produced while managing keys or signing
#[derive(Clone, Eq, PartialEq, Error, Debug)]
#[allow(missing_docs)]
pub enum EotsError {
    #[error("Serialization Error")]
    Serialization,
    #[error("Function call contained invalid arguments: `{0}`")]
    InvalidArgument(String),
    #[error("Passphrase must be at least {0} characters long")]
    PassphraseTooShort(usize),
    #[error("Invalid mnemonic: `{0}`")]
    InvalidMnemonic(String),
    #[error("Key name `{0}` was not found in the keyring")]
    KeyNameNotFound(String),
    #[error("Public key `{0}` has no registered key name")]
    PublicKeyNotFound(String),
    #[error("No sign record for chain `{chain_id}` at height {height}")]
    SignRecordNotFound { chain_id: String, height: u64 },
    #[error("Key name `{0}` already exists in the keyring")]
    KeyAlreadyExists(String),
    #[error("Public key `{0}` is already registered under a key name")]
    DuplicateKeyName(String),
    #[error("A sign record for chain `{chain_id}` at height {height} was written concurrently")]
    SignRecordConflict { chain_id: String, height: u64 },
    #[error("Equivocation attempted: a different message was already signed for chain `{chain_id}` at height {height}")]
    DoubleSign { chain_id: String, height: u64 },
    #[error("Stored data is corrupted: `{0}`")]
    StoreCorrupted(String),
    #[error("Key `{0}` is locked; run unlock with its passphrase before signing")]
    KeyLocked(String),
    #[error("Key `{0}` is already unlocked")]
    AlreadyUnlocked(String),
    #[error("Wrong passphrase for key `{0}`")]
    WrongPassphrase(String),
    #[error("Key `{0}` does not hold a supported secp256k1 key")]
    UnsupportedKeyType(String),
    #[error("Unsafe signing is disabled by configuration")]
    UnsafeSigningDisabled,
    #[error("The database has been closed")]
    StoreClosed,
    #[error("Database error: `{0}`")]
    Database(String),
    #[error("Invalid public key encoding")]
    InvalidPublicKey,
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Could not extract a private key from the given signatures: `{0}`")]
    ExtractionFailed(String),
    #[error("Reached the maximum allowed number of retries")]
    RetryFailed,
    #[error("Represents some code assumption that was checked at runtime but failed to be true")]
    InternalInvariantFailed,
}

impl EotsError {
    /// Whether this error reports an attempt to sign two different messages
    /// at the same height.
    pub fn is_double_sign(&self) -> bool {
        matches!(self, EotsError::DoubleSign { .. })
    }

    /// Whether this error reports a missing key or record.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EotsError::KeyNameNotFound(_)
                | EotsError::PublicKeyNotFound(_)
                | EotsError::SignRecordNotFound { .. }
        )
    }

    /// Whether this error reports a write that collided with existing data.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EotsError::KeyAlreadyExists(_)
                | EotsError::DuplicateKeyName(_)
                | EotsError::SignRecordConflict { .. }
        )
    }
}

impl From<sled::Error> for EotsError {
    fn from(err: sled::Error) -> Self {
        EotsError::Database(err.to_string())
    }
}

macro_rules! serialize {
    ($x:expr) => {{
        bincode::serialize($x).or(Err(crate::errors::EotsError::Serialization))
    }};
}

macro_rules! deserialize {
    ($x:expr) => {{
        bincode::deserialize($x).or(Err(crate::errors::EotsError::Serialization))
    }};
}

macro_rules! arg_err {
    ($x:expr) => {{
        Err(crate::errors::EotsError::InvalidArgument(String::from($x)))
    }};
}
