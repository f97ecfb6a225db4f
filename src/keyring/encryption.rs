// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Passphrase-based encryption of key material at rest: scrypt derives a
//! symmetric key that seals the secret with xsalsa20-poly1305.

use crate::errors::{EotsError, Result};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::error;
use zeroize::Zeroizing;

const NONCE_LENGTH: usize = 24;
const SALT_LENGTH: usize = 32;
const KEY_SIZE: usize = 32;

/// Scrypt cost parameters and salt stored alongside each ciphertext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ScryptParams {
    salt: [u8; SALT_LENGTH],
    log_n: u8,
    r: u32,
    p: u32,
}

impl ScryptParams {
    fn new<R: RngCore + CryptoRng>(rng: &mut R, log_n: u8) -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        rng.fill_bytes(&mut salt);
        Self {
            salt,
            log_n,
            r: 8,
            p: 1,
        }
    }

    fn derive_key(&self, passphrase: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let output = nacl::scrypt(
            passphrase,
            &self.salt,
            self.log_n,
            self.r as usize,
            self.p as usize,
            KEY_SIZE,
            &|_| {},
        )
        .map_err(|e| {
            error!("Scrypt key derivation failed: {:?}", e);
            EotsError::InternalInvariantFailed
        })?;
        Ok(Zeroizing::new(output))
    }
}

/// A sealed secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct EncryptedSecret {
    params: ScryptParams,
    nonce: [u8; NONCE_LENGTH],
    ciphertext: Vec<u8>,
}

impl Debug for EncryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("log_n", &self.params.log_n)
            .field("ciphertext", &"[redacted]")
            .finish()
    }
}

impl EncryptedSecret {
    /// Seal `plaintext` under `passphrase`.
    pub(crate) fn seal<R: RngCore + CryptoRng>(
        rng: &mut R,
        plaintext: &[u8],
        passphrase: &[u8],
        log_n: u8,
    ) -> Result<Self> {
        let params = ScryptParams::new(rng, log_n);
        let key = params.derive_key(passphrase)?;

        let mut nonce = [0u8; NONCE_LENGTH];
        rng.fill_bytes(&mut nonce);

        let ciphertext = nacl::secret_box::pack(plaintext, &nonce, &key[..KEY_SIZE]).map_err(|e| {
            error!("Sealing key material failed: {:?}", e);
            EotsError::InternalInvariantFailed
        })?;
        Ok(Self {
            params,
            nonce,
            ciphertext,
        })
    }

    /// Open the secret. Returns `None` if the passphrase is wrong or the
    /// ciphertext was tampered with.
    pub(crate) fn open(&self, passphrase: &[u8]) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let key = self.params.derive_key(passphrase)?;
        Ok(nacl::secret_box::open(&self.ciphertext, &self.nonce, &key[..KEY_SIZE])
            .ok()
            .map(Zeroizing::new))
    }
}
