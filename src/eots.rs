// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Extractable one-time signatures over secp256k1.
//!
//! An EOTS signature is the `s` half of a BIP-340 signature whose nonce is
//! fixed in advance: the verifier already knows `R.x` (the [`PublicRand`]).
//! Signing two different messages with the same nonce reveals the private
//! key through [`extract`].

#![allow(non_snake_case)]

use crate::{
    errors::{EotsError, Result},
    key::{has_odd_y, lift_x, EotsPublicKey, PrivateKey},
    randomness::{PrivateRand, PublicRand},
};
use k256::{
    elliptic_curve::{ops::Reduce, PrimeField},
    FieldBytes, ProjectivePoint, Scalar, U256,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use tracing::error;

const CHALLENGE_TAG: &[u8] = b"BIP0340/challenge";

/// An EOTS signature: the 32-byte scalar `s = k + e·x`.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EotsSignature([u8; 32]);

impl EotsSignature {
    /// Parse a signature, rejecting values outside the scalar field.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let s: [u8; 32] = bytes.try_into().map_err(|_| EotsError::InvalidSignature)?;
        let _ = scalar_from_bytes(&s)?;
        Ok(Self(s))
    }

    /// Borrow the raw 32 bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn scalar(&self) -> Result<Scalar> {
        scalar_from_bytes(&self.0)
    }
}

impl Debug for EotsSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EotsSignature({})", hex::encode(self.0))
    }
}

fn scalar_from_bytes(bytes: &[u8; 32]) -> Result<Scalar> {
    Option::from(Scalar::from_repr(*FieldBytes::from_slice(bytes))).ok_or(EotsError::InvalidSignature)
}

pub(crate) fn tagged_hash(tag: &[u8]) -> Sha256 {
    let tag_hash = Sha256::digest(tag);
    let mut digest = Sha256::new();
    digest.update(tag_hash);
    digest.update(tag_hash);
    digest
}

pub(crate) fn challenge(r: &[u8; 32], pk: &EotsPublicKey, msg: &[u8]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(
        &tagged_hash(CHALLENGE_TAG)
            .chain_update(r)
            .chain_update(pk.as_bytes())
            .chain_update(msg)
            .finalize(),
    )
}

/// The private key scalar normalised so that its public point has even Y.
pub(crate) fn normalized_scalar(sk: &PrivateKey) -> Scalar {
    let x = sk.scalar();
    if has_odd_y(&(ProjectivePoint::GENERATOR * x).to_affine()) {
        -x
    } else {
        x
    }
}

/// Sign `msg` with `sk` using the pre-committed nonce `private_rand`.
pub fn sign(sk: &PrivateKey, private_rand: &PrivateRand, msg: &[u8]) -> EotsSignature {
    let x = normalized_scalar(sk);
    let k = if private_rand.has_odd_point() {
        -private_rand.scalar()
    } else {
        private_rand.scalar()
    };
    let r = private_rand.public();
    let e = challenge(r.as_bytes(), &sk.public_key(), msg);
    EotsSignature((k + e * x).to_bytes().into())
}

/// Check `sig` over `msg` against `pk` and the pre-committed nonce `public_rand`.
pub fn verify(
    pk: &EotsPublicKey,
    public_rand: &PublicRand,
    msg: &[u8],
    sig: &EotsSignature,
) -> Result<()> {
    let P = pk.to_point()?;
    let R = ProjectivePoint::from(lift_x(public_rand.as_bytes())?);
    let s = sig.scalar()?;
    let e = challenge(public_rand.as_bytes(), pk, msg);

    if ProjectivePoint::GENERATOR * s != R + P * e {
        return Err(EotsError::InvalidSignature);
    }
    Ok(())
}

/// Recover the private key from two signatures over different messages that
/// share one nonce.
///
/// The returned key is normalised to the even-Y point, so its public key
/// equals `pk`.
pub fn extract(
    pk: &EotsPublicKey,
    public_rand: &PublicRand,
    msg1: &[u8],
    sig1: &EotsSignature,
    msg2: &[u8],
    sig2: &EotsSignature,
) -> Result<PrivateKey> {
    if msg1 == msg2 {
        return Err(EotsError::ExtractionFailed(String::from(
            "messages are identical",
        )));
    }
    let e1 = challenge(public_rand.as_bytes(), pk, msg1);
    let e2 = challenge(public_rand.as_bytes(), pk, msg2);
    let denominator = Option::<Scalar>::from((e1 - e2).invert()).ok_or_else(|| {
        error!("Challenge difference is zero for distinct messages");
        EotsError::ExtractionFailed(String::from("challenges collide"))
    })?;
    let x = (sig1.scalar()? - sig2.scalar()?) * denominator;

    let sk = PrivateKey::from_bytes(x.to_bytes().as_slice()).map_err(|_| {
        EotsError::ExtractionFailed(String::from("recovered scalar is zero"))
    })?;
    if sk.public_key() != *pk {
        return Err(EotsError::ExtractionFailed(String::from(
            "signatures do not belong to this key and nonce",
        )));
    }
    Ok(sk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::randomness::derive_randomness;
    use rand::rngs::OsRng;

    #[test]
    fn sign_and_verify() -> Result<()> {
        for height in 0..16u64 {
            let sk = PrivateKey::random(&mut OsRng);
            let pk = sk.public_key();
            let (sec, public) = derive_randomness(sk.to_bytes().as_ref(), b"chain", height)?;
            let sig = sign(&sk, &sec, b"block hash");
            verify(&pk, &public, b"block hash", &sig)?;

            assert!(verify(&pk, &public, b"other block", &sig).is_err());
            let (_, next) = derive_randomness(sk.to_bytes().as_ref(), b"chain", height + 1)?;
            assert!(verify(&pk, &next, b"block hash", &sig).is_err());
        }
        Ok(())
    }

    #[test]
    fn extraction_recovers_key() -> Result<()> {
        for _ in 0..8 {
            let sk = PrivateKey::random(&mut OsRng);
            let pk = sk.public_key();
            let (sec, public) = derive_randomness(sk.to_bytes().as_ref(), b"chain", 7)?;
            let sig1 = sign(&sk, &sec, b"first");
            let sig2 = sign(&sk, &sec, b"second");

            let extracted = extract(&pk, &public, b"first", &sig1, b"second", &sig2)?;
            assert_eq!(extracted.public_key(), pk);
            assert_eq!(
                normalized_scalar(&extracted),
                normalized_scalar(&sk)
            );
        }
        Ok(())
    }

    #[test]
    fn extraction_requires_distinct_messages() -> Result<()> {
        let sk = PrivateKey::random(&mut OsRng);
        let (sec, public) = derive_randomness(sk.to_bytes().as_ref(), b"chain", 1)?;
        let sig = sign(&sk, &sec, b"same");
        assert!(matches!(
            extract(&sk.public_key(), &public, b"same", &sig, b"same", &sig),
            Err(EotsError::ExtractionFailed(_))
        ));
        Ok(())
    }

    #[test]
    fn signature_parsing() -> Result<()> {
        let sk = PrivateKey::random(&mut OsRng);
        let (sec, _) = derive_randomness(sk.to_bytes().as_ref(), b"chain", 1)?;
        let sig = sign(&sk, &sec, b"msg");
        assert_eq!(EotsSignature::from_bytes(sig.as_bytes())?, sig);
        assert_eq!(
            EotsSignature::from_bytes(&[0xffu8; 32]),
            Err(EotsError::InvalidSignature)
        );
        assert_eq!(
            EotsSignature::from_bytes(&[1u8; 33]),
            Err(EotsError::InvalidSignature)
        );
        Ok(())
    }
}
