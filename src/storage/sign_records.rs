// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The signing history.
//!
//! Records are keyed by `chain_id || public_key || be64(height)`, so all
//! records of one `(chain_id, public_key)` pair are contiguous and sorted by
//! height. Records are never overwritten; they are only removed by
//! [`SignStore::delete_from_height`].

use super::Bucket;
use crate::{
    eots::EotsSignature,
    errors::{EotsError, Result},
    key::{EotsPublicKey, PUBLIC_KEY_LENGTH},
};
use serde::{Deserialize, Serialize};
use sled::transaction::{abort, ConflictableTransactionError, TransactionError};
use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{error, info};

/// What was signed at one coordinate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRecord {
    /// The message that was signed.
    pub msg: Vec<u8>,
    /// The signature that was produced.
    pub eots_sig: EotsSignature,
    /// When the record was written, in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl SigningRecord {
    fn new(msg: Vec<u8>, eots_sig: EotsSignature) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            msg,
            eots_sig,
            timestamp_ms,
        }
    }
}

/// Persistent signing history, one [`SigningRecord`] per
/// `(public key, chain id, height)`.
#[derive(Clone, Debug)]
pub struct SignStore {
    bucket: Bucket,
}

fn prefix(pk: &EotsPublicKey, chain_id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(chain_id.len() + PUBLIC_KEY_LENGTH + 8);
    key.extend_from_slice(chain_id);
    key.extend_from_slice(pk.as_bytes());
    key
}

fn record_key(pk: &EotsPublicKey, chain_id: &[u8], height: u64) -> Vec<u8> {
    let mut key = prefix(pk, chain_id);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

#[cfg(test)]
fn height_of(key: &[u8]) -> Result<u64> {
    let start = key
        .len()
        .checked_sub(8)
        .ok_or_else(|| EotsError::StoreCorrupted(String::from("sign record key too short")))?;
    let mut height = [0u8; 8];
    height.copy_from_slice(&key[start..]);
    Ok(u64::from_be_bytes(height))
}

fn decode_record(bytes: &[u8]) -> Result<SigningRecord> {
    deserialize!(bytes).map_err(|_| {
        error!("Could not decode a stored sign record");
        EotsError::StoreCorrupted(String::from("undecodable sign record"))
    })
}

impl SignStore {
    pub(crate) fn new(bucket: Bucket) -> Self {
        Self { bucket }
    }

    /// Persist a new record. Fails with [`EotsError::SignRecordConflict`] if
    /// one already exists at this coordinate.
    pub fn save_record(
        &self,
        pk: &EotsPublicKey,
        chain_id: &[u8],
        height: u64,
        msg: &[u8],
        eots_sig: &EotsSignature,
    ) -> Result<()> {
        let value = serialize!(&SigningRecord::new(msg.to_vec(), *eots_sig))?;
        let tree = self.bucket.tree()?;
        let swapped = tree.compare_and_swap(
            record_key(pk, chain_id, height),
            None as Option<&[u8]>,
            Some(value),
        )?;
        if swapped.is_err() {
            return Err(EotsError::SignRecordConflict {
                chain_id: hex::encode(chain_id),
                height,
            });
        }
        // The record has to be on disk before its signature leaves the engine.
        tree.flush()?;
        Ok(())
    }

    /// Persist several new records atomically. If any coordinate already holds
    /// a record nothing is written.
    pub fn save_records(
        &self,
        pk: &EotsPublicKey,
        chain_id: &[u8],
        records: &[(u64, Vec<u8>, EotsSignature)],
    ) -> Result<()> {
        let encoded = records
            .iter()
            .map(|(height, msg, sig)| {
                Ok((
                    *height,
                    record_key(pk, chain_id, *height),
                    serialize!(&SigningRecord::new(msg.clone(), *sig))?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let tree = self.bucket.tree()?;
        let outcome = tree.transaction(|tx| {
            for (height, key, value) in &encoded {
                if tx.get(key)?.is_some() {
                    return abort(EotsError::SignRecordConflict {
                        chain_id: hex::encode(chain_id),
                        height: *height,
                    });
                }
                let _ = tx.insert(key.as_slice(), value.as_slice())?;
            }
            Ok::<_, ConflictableTransactionError<EotsError>>(())
        });
        match outcome {
            Ok(()) => {}
            Err(TransactionError::Abort(err)) => return Err(err),
            Err(TransactionError::Storage(err)) => return Err(err.into()),
        }
        tree.flush()?;
        Ok(())
    }

    /// The record at one coordinate, if any.
    pub fn get_record(
        &self,
        pk: &EotsPublicKey,
        chain_id: &[u8],
        height: u64,
    ) -> Result<Option<SigningRecord>> {
        self.bucket
            .tree()?
            .get(record_key(pk, chain_id, height))?
            .map(|bytes| decode_record(&bytes))
            .transpose()
    }

    /// The records present among `heights`, keyed by height.
    pub fn get_records(
        &self,
        pk: &EotsPublicKey,
        chain_id: &[u8],
        heights: &[u64],
    ) -> Result<HashMap<u64, SigningRecord>> {
        let tree = self.bucket.tree()?;
        let mut found = HashMap::new();
        for height in heights {
            if let Some(bytes) = tree.get(record_key(pk, chain_id, *height))? {
                let _ = found.insert(*height, decode_record(&bytes)?);
            }
        }
        Ok(found)
    }

    /// Whether a record exists at one coordinate.
    pub fn is_record_present(&self, pk: &EotsPublicKey, chain_id: &[u8], height: u64) -> Result<bool> {
        Ok(self
            .bucket
            .tree()?
            .contains_key(record_key(pk, chain_id, height))?)
    }

    /// All records of `(pk, chain_id)` in ascending height order.
    #[cfg(test)]
    pub(crate) fn records(&self, pk: &EotsPublicKey, chain_id: &[u8]) -> Result<Vec<(u64, SigningRecord)>> {
        let prefix = prefix(pk, chain_id);
        let key_len = prefix.len() + 8;
        let mut records = Vec::new();
        for entry in self.bucket.tree()?.scan_prefix(&prefix) {
            let (key, value) = entry?;
            if key.len() != key_len {
                continue;
            }
            records.push((height_of(&key)?, decode_record(&value)?));
        }
        Ok(records)
    }

    /// Delete every record of `(pk, chain_id)` at or above `from_height`.
    /// Returns the number of records removed.
    pub fn delete_from_height(
        &self,
        pk: &EotsPublicKey,
        chain_id: &[u8],
        from_height: u64,
    ) -> Result<usize> {
        let tree = self.bucket.tree()?;
        let start = record_key(pk, chain_id, from_height);
        let end = record_key(pk, chain_id, u64::MAX);
        let key_len = end.len();

        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for entry in tree.range(start..=end) {
            let (key, _) = entry?;
            // A longer chain id sharing this prefix sorts into the same range.
            if key.len() != key_len {
                continue;
            }
            batch.remove(key);
            removed += 1;
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        info!(
            "Removed {} sign records for {} on chain {} from height {}",
            removed,
            pk,
            hex::encode(chain_id),
            from_height
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{key::PrivateKey, storage::Database};
    use rand::rngs::OsRng;

    fn sig(byte: u8) -> EotsSignature {
        EotsSignature::from_bytes(&[byte; 32]).unwrap()
    }

    fn setup() -> Result<(Database, SignStore, EotsPublicKey)> {
        let db = Database::temporary()?;
        let store = db.sign_store()?;
        let pk = PrivateKey::random(&mut OsRng).public_key();
        Ok((db, store, pk))
    }

    #[test]
    fn records_are_never_overwritten() -> Result<()> {
        let (_db, store, pk) = setup()?;
        store.save_record(&pk, b"chain", 10, b"msg", &sig(1))?;

        let err = store
            .save_record(&pk, b"chain", 10, b"other", &sig(2))
            .unwrap_err();
        assert!(err.is_conflict());

        let record = store.get_record(&pk, b"chain", 10)?.unwrap();
        assert_eq!(record.msg, b"msg".to_vec());
        assert_eq!(record.eots_sig, sig(1));
        assert!(record.timestamp_ms > 0);
        assert!(store.is_record_present(&pk, b"chain", 10)?);
        assert!(!store.is_record_present(&pk, b"chain", 11)?);
        Ok(())
    }

    #[test]
    fn batch_write_is_all_or_nothing() -> Result<()> {
        let (_db, store, pk) = setup()?;
        store.save_record(&pk, b"chain", 3, b"three", &sig(3))?;

        let err = store
            .save_records(
                &pk,
                b"chain",
                &[
                    (1, b"one".to_vec(), sig(1)),
                    (2, b"two".to_vec(), sig(2)),
                    (3, b"three'".to_vec(), sig(9)),
                ],
            )
            .unwrap_err();
        assert_eq!(
            err,
            EotsError::SignRecordConflict {
                chain_id: hex::encode(b"chain"),
                height: 3
            }
        );
        assert!(!store.is_record_present(&pk, b"chain", 1)?);
        assert!(!store.is_record_present(&pk, b"chain", 2)?);

        store.save_records(
            &pk,
            b"chain",
            &[(1, b"one".to_vec(), sig(1)), (2, b"two".to_vec(), sig(2))],
        )?;
        let found = store.get_records(&pk, b"chain", &[1, 2, 3, 4])?;
        assert_eq!(found.len(), 3);
        assert_eq!(found[&2].msg, b"two".to_vec());
        Ok(())
    }

    #[test]
    fn rollback_removes_heights_at_or_above() -> Result<()> {
        let (_db, store, pk) = setup()?;
        for height in (10..=100).step_by(10) {
            store.save_record(&pk, b"chain", height, b"m", &sig(1))?;
        }
        assert_eq!(store.delete_from_height(&pk, b"chain", 50)?, 6);
        let heights: Vec<u64> = store
            .records(&pk, b"chain")?
            .into_iter()
            .map(|(h, _)| h)
            .collect();
        assert_eq!(heights, vec![10, 20, 30, 40]);

        assert_eq!(store.delete_from_height(&pk, b"chain", 0)?, 4);
        assert!(store.records(&pk, b"chain")?.is_empty());
        Ok(())
    }

    #[test]
    fn rollback_is_scoped_to_key_and_chain() -> Result<()> {
        let (_db, store, pk) = setup()?;
        let other = PrivateKey::random(&mut OsRng).public_key();
        store.save_record(&pk, b"chain", 5, b"m", &sig(1))?;
        store.save_record(&other, b"chain", 5, b"m", &sig(1))?;
        store.save_record(&pk, b"chain-2", 5, b"m", &sig(1))?;

        assert_eq!(store.delete_from_height(&pk, b"chain", 0)?, 1);
        assert!(store.is_record_present(&other, b"chain", 5)?);
        assert!(store.is_record_present(&pk, b"chain-2", 5)?);
        Ok(())
    }

    #[test]
    fn longer_chain_id_with_shared_prefix_is_untouched() -> Result<()> {
        let (_db, store, pk) = setup()?;
        // Keys for chain "ab" || pk start with the same bytes as keys for
        // chain "ab", so they fall inside the rollback range.
        let mut long_chain = b"ab".to_vec();
        long_chain.extend_from_slice(pk.as_bytes());
        store.save_record(&pk, &long_chain, 1, b"m", &sig(1))?;
        store.save_record(&pk, b"ab", 7, b"m", &sig(1))?;

        assert_eq!(store.delete_from_height(&pk, b"ab", 0)?, 1);
        assert!(store.is_record_present(&pk, &long_chain, 1)?);
        assert_eq!(store.records(&pk, b"ab")?.len(), 0);
        Ok(())
    }
}
