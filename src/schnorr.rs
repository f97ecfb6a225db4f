// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Ordinary BIP-340 Schnorr signatures, used for one-shot attestations such as
//! proof of possession. These carry no per-height nonce commitment.

#![allow(non_snake_case)]

use crate::{
    eots::{challenge, normalized_scalar, tagged_hash},
    errors::{EotsError, Result},
    key::{has_odd_y, lift_x, EotsPublicKey, PrivateKey},
};
use k256::{
    elliptic_curve::{ops::Reduce, point::AffineCoordinates, PrimeField},
    FieldBytes, ProjectivePoint, Scalar, U256,
};
use rand::{CryptoRng, RngCore};
use sha2::Digest;
use std::fmt::Debug;
use tracing::error;

const AUX_TAG: &[u8] = b"BIP0340/aux";
const NONCE_TAG: &[u8] = b"BIP0340/nonce";

/// A 64-byte BIP-340 signature `R.x || s`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SchnorrSignature([u8; 64]);

impl SchnorrSignature {
    /// Parse a signature from its 64-byte encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 64] = bytes.try_into().map_err(|_| EotsError::InvalidSignature)?;
        Ok(Self(bytes))
    }

    /// Borrow the raw 64 bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl Debug for SchnorrSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SchnorrSignature({})", hex::encode(self.0))
    }
}

/// Sign `msg` with a nonce derived from the key, the message and fresh
/// auxiliary randomness.
pub fn sign<R: RngCore + CryptoRng>(
    rng: &mut R,
    sk: &PrivateKey,
    msg: &[u8],
) -> Result<SchnorrSignature> {
    let mut aux_rand = [0u8; 32];
    rng.fill_bytes(&mut aux_rand);

    let x = normalized_scalar(sk);
    let pk = sk.public_key();

    let aux_hash = tagged_hash(AUX_TAG).chain_update(aux_rand).finalize();
    let mut t = x.to_bytes();
    t.iter_mut().zip(aux_hash.iter()).for_each(|(a, b)| *a ^= b);

    let rand = tagged_hash(NONCE_TAG)
        .chain_update(t)
        .chain_update(pk.as_bytes())
        .chain_update(msg)
        .finalize();
    let k0 = <Scalar as Reduce<U256>>::reduce_bytes(&rand);
    if bool::from(k0.is_zero()) {
        error!("BIP-340 nonce derivation produced zero");
        return Err(EotsError::InternalInvariantFailed);
    }

    let R = (ProjectivePoint::GENERATOR * k0).to_affine();
    let k = if has_odd_y(&R) { -k0 } else { k0 };
    let r: [u8; 32] = R.x().into();
    let e = challenge(&r, &pk, msg);

    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&r);
    bytes[32..].copy_from_slice(&(k + e * x).to_bytes());
    Ok(SchnorrSignature(bytes))
}

/// Verify a BIP-340 signature over `msg`.
pub fn verify(pk: &EotsPublicKey, msg: &[u8], sig: &SchnorrSignature) -> Result<()> {
    let mut r = [0u8; 32];
    r.copy_from_slice(&sig.0[..32]);
    let R = ProjectivePoint::from(lift_x(&r).map_err(|_| EotsError::InvalidSignature)?);
    let s = Option::<Scalar>::from(Scalar::from_repr(*FieldBytes::from_slice(&sig.0[32..])))
        .ok_or(EotsError::InvalidSignature)?;
    let e = challenge(&r, pk, msg);

    if ProjectivePoint::GENERATOR * s != R + pk.to_point()? * e {
        return Err(EotsError::InvalidSignature);
    }
    Ok(())
}
