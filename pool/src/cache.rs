// Copyright 2019 The Kestrel Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! On-disk persistence of the pool, so a restart does not dump every
//! unconfirmed transaction on the floor.
//!
//! The layout is a flat key/value store: `V` holds the cache version, `R`
//! the tip the cached state is valid against, `F` the fee estimator blob and
//! `e<hash>` one serialized entry each. Writes ride a rolling batch that is
//! flushed at most once every few seconds during admissions and
//! unconditionally on block boundaries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use kestrel_core::core::Hash;
use kestrel_core::ser;
use kestrel_store::{new_env, Error, Store};

use crate::fees::FeeEstimator;
use crate::types::PoolEntry;

/// Bumped whenever the entry layout changes; a mismatch wipes the cache.
const CACHE_VERSION: u32 = 2;

/// Minimum seconds between admission-driven flushes.
const FLUSH_INTERVAL: i64 = 10;

const KEY_VERSION: &[u8] = b"V";
const KEY_TIP: &[u8] = b"R";
const KEY_FEE: &[u8] = b"F";
const ENTRY_PREFIX: u8 = b'e';

fn entry_key(hash: &Hash) -> Vec<u8> {
	let mut key = Vec::with_capacity(33);
	key.push(ENTRY_PREFIX);
	key.extend_from_slice(hash.as_bytes());
	key
}

/// The pool's on-disk cache.
pub struct MempoolCache {
	db: Store,
	pending: HashMap<Hash, Option<PoolEntry>>,
	pending_fee: Option<Vec<u8>>,
	last_flush: i64,
}

impl MempoolCache {
	/// Open (or re-initialize) the cache under the given directory. The
	/// stored version and tip must match what the chain reports; any
	/// mismatch wipes the cache rather than replaying stale state. Returns
	/// the cache along with every entry it held.
	pub fn open(path: &str, tip: &Hash) -> Result<(MempoolCache, Vec<PoolEntry>), Error> {
		let env = Arc::new(new_env(path.to_string()));
		let db = Store::open(env, "mempool");
		let mut cache = MempoolCache {
			db,
			pending: HashMap::new(),
			pending_fee: None,
			last_flush: Utc::now().timestamp(),
		};

		if !cache.verify(tip)? {
			warn!("mempool: cache is stale or foreign, re-initializing");
			cache.wipe()?;
			cache.init(tip)?;
			return Ok((cache, vec![]));
		}

		let entries = cache.load_entries()?;
		info!("mempool: loaded {} cached entries", entries.len());
		Ok((cache, entries))
	}

	fn verify(&self, tip: &Hash) -> Result<bool, Error> {
		let version = match self.db.get(KEY_VERSION)? {
			Some(bytes) => bytes,
			None => return Ok(false),
		};
		if version.len() != 4
			|| u32::from_le_bytes([version[0], version[1], version[2], version[3]])
				!= CACHE_VERSION
		{
			return Ok(false);
		}
		let stored_tip = match self.db.get(KEY_TIP)? {
			Some(bytes) => bytes,
			None => return Ok(false),
		};
		Ok(stored_tip[..] == tip.as_bytes()[..])
	}

	fn init(&self, tip: &Hash) -> Result<(), Error> {
		let batch = self.db.batch()?;
		batch.put(KEY_VERSION, CACHE_VERSION.to_le_bytes().to_vec())?;
		batch.put(KEY_TIP, tip.to_vec())?;
		batch.commit()
	}

	fn load_entries(&self) -> Result<Vec<PoolEntry>, Error> {
		let iter = self.db.iter::<PoolEntry>(&[ENTRY_PREFIX])?;
		Ok(iter.map(|(_, entry)| entry).collect())
	}

	/// Load the fee estimator blob, if one was stored.
	pub fn load_fee(&self) -> Result<Option<FeeEstimator>, Error> {
		self.db.get_ser(KEY_FEE)
	}

	/// Queue an entry write.
	pub fn save_entry(&mut self, entry: &PoolEntry) -> Result<(), Error> {
		self.pending.insert(entry.hash, Some(entry.clone()));
		self.maybe_flush()
	}

	/// Queue an entry deletion.
	pub fn remove_entry(&mut self, hash: &Hash) -> Result<(), Error> {
		self.pending.insert(*hash, None);
		self.maybe_flush()
	}

	/// Queue the fee estimator state.
	pub fn save_fee(&mut self, estimator: &FeeEstimator) -> Result<(), Error> {
		let blob = ser::ser_vec(estimator).map_err(|e| Error::SerErr(format!("{}", e)))?;
		self.pending_fee = Some(blob);
		Ok(())
	}

	fn maybe_flush(&mut self) -> Result<(), Error> {
		let now = Utc::now().timestamp();
		if now - self.last_flush >= FLUSH_INTERVAL {
			self.flush()?;
		}
		Ok(())
	}

	/// Write out everything queued.
	pub fn flush(&mut self) -> Result<(), Error> {
		if self.pending.is_empty() && self.pending_fee.is_none() {
			self.last_flush = Utc::now().timestamp();
			return Ok(());
		}
		let batch = self.db.batch()?;
		for (hash, op) in self.pending.drain() {
			let key = entry_key(&hash);
			match op {
				Some(entry) => batch.put_ser(&key, &entry)?,
				None => batch.delete(&key)?,
			}
		}
		if let Some(blob) = self.pending_fee.take() {
			batch.put(KEY_FEE, blob)?;
		}
		batch.commit()?;
		self.last_flush = Utc::now().timestamp();
		Ok(())
	}

	/// Block boundary: flush everything queued and move the stored tip.
	pub fn sync(&mut self, tip: &Hash) -> Result<(), Error> {
		self.flush()?;
		let batch = self.db.batch()?;
		batch.put(KEY_TIP, tip.to_vec())?;
		batch.commit()
	}

	/// Delete every key in the cache.
	pub fn wipe(&mut self) -> Result<(), Error> {
		self.pending.clear();
		self.pending_fee = None;
		let keys = self.db.keys(&[])?;
		let count = keys.len();
		let batch = self.db.batch()?;
		for key in keys {
			batch.delete(&key)?;
		}
		batch.commit()?;
		info!("mempool: wiped cache ({} keys)", count);
		Ok(())
	}

	/// Wipe and write a fresh header, anchoring the cache at the given tip.
	pub fn reset(&mut self, tip: &Hash) -> Result<(), Error> {
		self.wipe()?;
		self.init(tip)
	}
}
