// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! A signing oracle for Extractable One-Time Signatures (EOTS)
//!
//! In an EOTS scheme every signature is bound to a nonce that was committed
//! to in advance. Signing two different messages with the same nonce lets
//! anyone recover the signer's private key from the two signatures. Staking
//! protocols use this as a punishment: a finality provider that votes for two
//! conflicting blocks at one height loses its key.
//!
//! The [`SigningEngine`] derives one nonce per `(key, chain, height)` with
//! [`derive_randomness`], which is deterministic so that the public nonces can
//! be published ahead of time with [`SigningEngine::generate_randomness_list`].
//! Every signature it produces is recorded, and a request to sign a different
//! message at a height that was already signed is refused with
//! [`EotsError::DoubleSign`] instead of leaking the key.
//!
//! Keys live in a [`Keyring`]. The bundled [`SledKeyring`] either stores keys
//! in clear (for tests) or seals them under a passphrase, in which case each
//! key has to be unlocked with [`SigningEngine::unlock`] before it can sign.
//!
//! ```no_run
//! use eots_signer::{EngineConfig, SigningEngine, RandomnessOptions};
//!
//! # fn main() -> eots_signer::errors::Result<()> {
//! let engine = SigningEngine::open(&EngineConfig::default())?;
//! let pk = engine.create_key("finality-provider", "")?;
//! let nonces =
//!     engine.generate_randomness_list(&pk, b"chain-1", 1, 100, RandomnessOptions::default())?;
//! let sig = engine.sign(&pk, b"chain-1", b"block hash", 1)?;
//! eots_signer::eots::verify(&pk, &nonces[0], b"block hash", &sig)?;
//! # Ok(())
//! # }
//! ```

#![allow(non_snake_case)]
#![warn(missing_docs)]

#[macro_use]
pub mod errors;

pub mod config;
pub mod eots;
mod engine;
mod key;
mod key_access;
pub mod keyring;
mod randomness;
pub mod schnorr;
pub mod storage;

pub use config::{EngineConfig, KeyringBackend, KeyringConfig};
pub use engine::{
    EngineOptions, RandomnessOptions, SignRequest, SigningEngine, MIN_PASSPHRASE_LENGTH,
};
pub use errors::EotsError;
pub use key::{EotsPublicKey, PrivateKey, PUBLIC_KEY_LENGTH};
pub use keyring::{KeyRecord, Keyring, SledKeyring};
pub use randomness::{derive_randomness, PrivateRand, PublicRand};
