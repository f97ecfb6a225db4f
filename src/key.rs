// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Key types used by the signing engine.
//!
//! Public keys are addressed by their 32-byte x-only encoding (the point with
//! even Y is implied), which is the fixed-width identity used as the primary
//! lookup key by every signing API.

use crate::errors::{EotsError, Result};
use k256::{
    elliptic_curve::{
        point::{AffineCoordinates, DecompressPoint},
        sec1::ToEncodedPoint,
        subtle::Choice,
    },
    AffinePoint, FieldBytes, ProjectivePoint, Scalar, SecretKey,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use zeroize::Zeroizing;

/// Length of an x-only public key.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// A secp256k1 private key.
///
/// # 🔒 Storage requirements
/// This type must never be persisted in clear outside of the keyring's
/// always-decrypted backend.
#[derive(Clone)]
pub struct PrivateKey(SecretKey);

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").field(&"[redacted]").finish()
    }
}

impl PrivateKey {
    /// Sample a fresh private key.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(SecretKey::random(rng))
    }

    /// Parse a private key from its 32-byte big-endian encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return arg_err!("private key must be 32 bytes");
        }
        SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| EotsError::InvalidArgument(String::from("private key out of range")))
    }

    /// The 32-byte big-endian encoding of this key.
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_bytes().into())
    }

    pub(crate) fn scalar(&self) -> Scalar {
        *self.0.to_nonzero_scalar()
    }

    /// The SEC1 compressed encoding of the matching public point.
    pub fn compressed_public_key(&self) -> Vec<u8> {
        self.0.public_key().to_encoded_point(true).as_bytes().to_vec()
    }

    /// The x-only public key.
    pub fn public_key(&self) -> EotsPublicKey {
        EotsPublicKey::from_point(self.0.public_key().as_affine())
    }
}

/// An x-only (BIP-340) secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EotsPublicKey([u8; PUBLIC_KEY_LENGTH]);

impl EotsPublicKey {
    /// Parse an x-only public key, rejecting x-coordinates off the curve.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let x: [u8; PUBLIC_KEY_LENGTH] =
            bytes.try_into().map_err(|_| EotsError::InvalidPublicKey)?;
        let _ = lift_x(&x)?;
        Ok(Self(x))
    }

    /// Convert a SEC1 (compressed or uncompressed) public key into its
    /// x-only form.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        let pk = k256::PublicKey::from_sec1_bytes(bytes).map_err(|_| EotsError::InvalidPublicKey)?;
        Ok(Self::from_point(pk.as_affine()))
    }

    pub(crate) fn from_point(point: &AffinePoint) -> Self {
        Self(point.x().into())
    }

    /// Borrow the raw 32 bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// The even-Y point this key encodes.
    pub(crate) fn to_point(self) -> Result<ProjectivePoint> {
        lift_x(&self.0).map(ProjectivePoint::from)
    }

    /// Hex encoding, used in logs and error messages.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Debug for EotsPublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EotsPublicKey({})", self.to_hex())
    }
}

impl Display for EotsPublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for EotsPublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Recover the point with even Y whose x-coordinate is `x`.
pub(crate) fn lift_x(x: &[u8; 32]) -> Result<AffinePoint> {
    Option::from(AffinePoint::decompress(
        FieldBytes::from_slice(x),
        Choice::from(0),
    ))
    .ok_or(EotsError::InvalidPublicKey)
}

/// Whether the point has an odd Y coordinate.
pub(crate) fn has_odd_y(point: &AffinePoint) -> bool {
    point.y_is_odd().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn public_key_encodings_agree() -> Result<()> {
        let sk = PrivateKey::random(&mut OsRng);
        let compressed = sk.compressed_public_key();
        assert_eq!(compressed.len(), 33);

        let from_sec1 = EotsPublicKey::from_sec1_bytes(&compressed)?;
        assert_eq!(from_sec1, sk.public_key());
        assert_eq!(&compressed[1..], from_sec1.as_bytes());

        let parsed = EotsPublicKey::from_bytes(from_sec1.as_bytes())?;
        assert_eq!(parsed, from_sec1);
        Ok(())
    }

    #[test]
    fn lifted_point_has_even_y() -> Result<()> {
        for _ in 0..16 {
            let pk = PrivateKey::random(&mut OsRng).public_key();
            let point = pk.to_point()?.to_affine();
            assert!(!has_odd_y(&point));
            assert_eq!(EotsPublicKey::from_point(&point), pk);
        }
        Ok(())
    }

    #[test]
    fn rejects_malformed_keys() {
        assert_eq!(
            EotsPublicKey::from_bytes(&[1u8; 31]),
            Err(EotsError::InvalidPublicKey)
        );
        // above the field modulus
        assert_eq!(
            EotsPublicKey::from_bytes(&[0xffu8; 32]),
            Err(EotsError::InvalidPublicKey)
        );
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_err());
        assert!(PrivateKey::from_bytes(&[1u8; 16]).is_err());
    }

    #[test]
    fn private_key_debug_is_redacted() {
        let sk = PrivateKey::random(&mut OsRng);
        let printed = format!("{sk:?}");
        assert!(printed.contains("redacted"));
        assert!(!printed.contains(&hex::encode(*sk.to_bytes())));
    }
}
