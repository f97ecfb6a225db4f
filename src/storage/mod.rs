// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Durable storage for the signing engine.
//!
//! One [`Database`] handle backs both the [`KeyNameStore`] (public key to key
//! name) and the [`SignStore`] (signing history). Each store lives in its own
//! named sled tree. Reads do not need the engine's signing lock; sled trees are
//! safe to share across threads.

mod key_names;
mod sign_records;

pub use key_names::KeyNameStore;
pub use sign_records::{SignStore, SigningRecord};

use crate::errors::{EotsError, Result};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{error, info};

const KEY_NAMES_TREE: &str = "key_names";
const SIGN_RECORDS_TREE: &str = "sign_records";

/// A named tree together with the shared "closed" flag of its database.
#[derive(Clone, Debug)]
pub(crate) struct Bucket {
    name: &'static str,
    tree: sled::Tree,
    closed: Arc<AtomicBool>,
}

impl Bucket {
    /// Access the underlying tree, failing once the database is closed.
    pub(crate) fn tree(&self) -> Result<&sled::Tree> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EotsError::StoreClosed);
        }
        Ok(&self.tree)
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }
}

/// The database handle shared by the key-name and signing-history stores.
#[derive(Debug)]
pub struct Database {
    db: sled::Db,
    closed: Arc<AtomicBool>,
}

impl Database {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening signing database at {}", path.display());
        let db = sled::Config::new().path(path).open()?;
        Ok(Self::from_db(db))
    }

    /// Open a throwaway database that is removed when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::from_db(db))
    }

    fn from_db(db: sled::Db) -> Self {
        Self {
            db,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn bucket(&self, name: &'static str) -> Result<Bucket> {
        if self.is_closed() {
            return Err(EotsError::StoreClosed);
        }
        let tree = self.db.open_tree(name).map_err(|e| {
            error!("Could not open bucket {}: {}", name, e);
            EotsError::StoreCorrupted(format!("bucket `{name}` is unavailable"))
        })?;
        Ok(Bucket {
            name,
            tree,
            closed: self.closed.clone(),
        })
    }

    /// The store mapping public keys to key names.
    pub fn key_name_store(&self) -> Result<KeyNameStore> {
        Ok(KeyNameStore::new(self.bucket(KEY_NAMES_TREE)?))
    }

    /// The store holding the signing history.
    pub fn sign_store(&self) -> Result<SignStore> {
        Ok(SignStore::new(self.bucket(SIGN_RECORDS_TREE)?))
    }

    /// Flush outstanding writes and refuse all further operations.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.db.flush()?;
        info!("Signing database closed");
        Ok(())
    }

    /// Whether [`Database::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
