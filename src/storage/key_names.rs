// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use super::Bucket;
use crate::{
    errors::{EotsError, Result},
    key::EotsPublicKey,
};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Maps each public key to the key name used to address it in the keyring.
///
/// A public key is registered at most once; a second registration fails with
/// [`EotsError::DuplicateKeyName`] even if it carries the same name.
#[derive(Clone, Debug)]
pub struct KeyNameStore {
    bucket: Bucket,
}

impl KeyNameStore {
    pub(crate) fn new(bucket: Bucket) -> Self {
        Self { bucket }
    }

    /// Register `name` for `pk`.
    pub fn save_key_name(&self, pk: &EotsPublicKey, name: &str) -> Result<()> {
        if name.is_empty() {
            return arg_err!("key name must not be empty");
        }
        let tree = self.bucket.tree()?;
        let swapped = tree.compare_and_swap(
            pk.as_bytes(),
            None as Option<&[u8]>,
            Some(name.as_bytes()),
        )?;
        if swapped.is_err() {
            return Err(EotsError::DuplicateKeyName(pk.to_hex()));
        }
        tree.flush()?;
        debug!("Registered key name {} for {}", name, pk);
        Ok(())
    }

    /// Look up the key name registered for `pk`.
    pub fn key_name(&self, pk: &EotsPublicKey) -> Result<String> {
        let value = self
            .bucket
            .tree()?
            .get(pk.as_bytes())?
            .ok_or_else(|| EotsError::PublicKeyNotFound(pk.to_hex()))?;
        decode_name(&value)
    }

    /// All registered keys, ordered by name.
    pub fn list(&self) -> Result<BTreeMap<String, EotsPublicKey>> {
        let mut keys = BTreeMap::new();
        for entry in self.bucket.tree()?.iter() {
            let (pk, name) = entry?;
            let pk = EotsPublicKey::from_bytes(&pk).map_err(|_| {
                error!("Bucket {} holds an invalid public key", self.bucket.name());
                EotsError::StoreCorrupted(String::from("invalid public key in key name store"))
            })?;
            let _ = keys.insert(decode_name(&name)?, pk);
        }
        Ok(keys)
    }
}

fn decode_name(value: &[u8]) -> Result<String> {
    String::from_utf8(value.to_vec())
        .map_err(|_| EotsError::StoreCorrupted(String::from("key name is not valid UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{key::PrivateKey, storage::Database};
    use rand::rngs::OsRng;

    #[test]
    fn save_and_lookup() -> Result<()> {
        let db = Database::temporary()?;
        let store = db.key_name_store()?;
        let pk = PrivateKey::random(&mut OsRng).public_key();

        assert_eq!(
            store.key_name(&pk),
            Err(EotsError::PublicKeyNotFound(pk.to_hex()))
        );
        store.save_key_name(&pk, "alice")?;
        assert_eq!(store.key_name(&pk)?, "alice");
        Ok(())
    }

    #[test]
    fn second_registration_is_a_conflict() -> Result<()> {
        let db = Database::temporary()?;
        let store = db.key_name_store()?;
        let pk = PrivateKey::random(&mut OsRng).public_key();

        store.save_key_name(&pk, "alice")?;
        let err = store.save_key_name(&pk, "bob").unwrap_err();
        assert!(err.is_conflict());
        // same mapping again is not idempotent either
        assert!(store.save_key_name(&pk, "alice").is_err());
        assert_eq!(store.key_name(&pk)?, "alice");
        Ok(())
    }

    #[test]
    fn list_is_ordered_by_name() -> Result<()> {
        let db = Database::temporary()?;
        let store = db.key_name_store()?;
        let a = PrivateKey::random(&mut OsRng).public_key();
        let b = PrivateKey::random(&mut OsRng).public_key();
        store.save_key_name(&b, "zed")?;
        store.save_key_name(&a, "amy")?;

        let listed: Vec<_> = store.list()?.into_iter().collect();
        assert_eq!(listed, vec![("amy".to_string(), a), ("zed".to_string(), b)]);
        Ok(())
    }

    #[test]
    fn empty_name_is_rejected() -> Result<()> {
        let db = Database::temporary()?;
        let store = db.key_name_store()?;
        let pk = PrivateKey::random(&mut OsRng).public_key();
        assert!(matches!(
            store.save_key_name(&pk, ""),
            Err(EotsError::InvalidArgument(_))
        ));
        Ok(())
    }
}
