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

//! Transactions whose parents have not been seen yet. Orphans are held as
//! raw bytes to defer parsing cost and bound what a peer can make us keep in
//! memory, together with the set of parents still missing. When a parent
//! arrives, dependents whose missing set drains to empty are handed back for
//! a full admission run.

use std::collections::{HashMap, HashSet};

use rand::{thread_rng, Rng};

use kestrel_core::core::{Hash, Transaction};
use kestrel_core::ser;

/// An unverified transaction waiting on missing parents.
#[derive(Clone, Debug)]
pub struct Orphan {
	/// The serialized transaction.
	pub raw: Vec<u8>,
	/// Parents not yet seen. Invariant: for each hash in here, the waiting
	/// table maps it back to this orphan.
	pub missing: HashSet<Hash>,
	/// Identifier of the peer the transaction came from.
	pub peer_id: i32,
}

impl Orphan {
	/// Deserialize the buffered transaction.
	pub fn tx(&self) -> Result<Transaction, ser::Error> {
		ser::deserialize(&mut &self.raw[..])
	}
}

/// The orphan table: orphans by id, plus the reverse map from each missing
/// parent to the orphans waiting on it.
pub struct OrphanPool {
	orphans: HashMap<Hash, Orphan>,
	waiting: HashMap<Hash, HashSet<Hash>>,
}

impl OrphanPool {
	/// An empty orphan pool.
	pub fn new() -> OrphanPool {
		OrphanPool {
			orphans: HashMap::new(),
			waiting: HashMap::new(),
		}
	}

	/// Number of buffered orphans.
	pub fn count(&self) -> usize {
		self.orphans.len()
	}

	/// Whether the given id is buffered as an orphan.
	pub fn has(&self, hash: &Hash) -> bool {
		self.orphans.contains_key(hash)
	}

	/// The orphan for the given id.
	pub fn get(&self, hash: &Hash) -> Option<&Orphan> {
		self.orphans.get(hash)
	}

	/// Whether any orphan is waiting on the given parent.
	pub fn has_waiting(&self, parent: &Hash) -> bool {
		self.waiting.contains_key(parent)
	}

	/// The set of orphans waiting on the given parent.
	pub fn waiting_on(&self, parent: &Hash) -> Option<&HashSet<Hash>> {
		self.waiting.get(parent)
	}

	/// Buffer a transaction as an orphan waiting on the given parents.
	pub fn insert(
		&mut self,
		tx: &Transaction,
		missing: &[Hash],
		peer_id: i32,
	) -> Result<(), ser::Error> {
		let hash = tx.hash();
		let raw = ser::ser_vec(tx)?;
		let missing: HashSet<Hash> = missing.iter().cloned().collect();
		for parent in &missing {
			self.waiting.entry(*parent).or_default().insert(hash);
		}
		self.orphans.insert(
			hash,
			Orphan {
				raw,
				missing,
				peer_id,
			},
		);
		Ok(())
	}

	/// A parent has arrived: cross it off every dependent's missing set and
	/// extract the orphans that became complete.
	pub fn resolve(&mut self, parent: &Hash) -> Vec<(Hash, Orphan)> {
		let dependents = match self.waiting.remove(parent) {
			Some(dependents) => dependents,
			None => return vec![],
		};
		let mut resolved = vec![];
		for hash in dependents {
			let complete = match self.orphans.get_mut(&hash) {
				Some(orphan) => {
					orphan.missing.remove(parent);
					orphan.missing.is_empty()
				}
				None => false,
			};
			if complete {
				let orphan = self.orphans.remove(&hash).expect("checked above");
				resolved.push((hash, orphan));
			}
		}
		resolved
	}

	/// Drop an orphan, unhooking it from every parent it was waiting on.
	/// Waiting sets left empty are removed entirely.
	pub fn remove(&mut self, hash: &Hash) -> Option<Orphan> {
		let orphan = self.orphans.remove(hash)?;
		for parent in &orphan.missing {
			let empty = match self.waiting.get_mut(parent) {
				Some(set) => {
					set.remove(hash);
					set.is_empty()
				}
				None => false,
			};
			if empty {
				self.waiting.remove(parent);
			}
		}
		Some(orphan)
	}

	/// Enforce the orphan cap by deleting uniformly-random victims. Returns
	/// the ids dropped.
	pub fn limit(&mut self, max: usize) -> Vec<Hash> {
		let mut rng = thread_rng();
		let mut evicted = vec![];
		while self.orphans.len() > max {
			let victim = {
				let index = rng.gen_range(0, self.orphans.len());
				*self
					.orphans
					.keys()
					.nth(index)
					.expect("index is within bounds")
			};
			self.remove(&victim);
			evicted.push(victim);
		}
		evicted
	}

	/// Drop everything.
	pub fn clear(&mut self) {
		self.orphans.clear();
		self.waiting.clear();
	}
}

impl Default for OrphanPool {
	fn default() -> OrphanPool {
		OrphanPool::new()
	}
}
