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

//! The authoritative set of pool entries and the spend graph connecting
//! them.
//!
//! Entries are connected only through the `spent` map (outpoint to spender)
//! and the input lists of the transactions themselves; there are no direct
//! references between entries. Ancestor and descendant walks take the graph
//! as it stands and are bounded by the configured ancestor limit.

use std::collections::{HashMap, HashSet};

use kestrel_core::core::{Hash, OutPoint, Transaction};

use crate::heap::FeeHeap;
use crate::types::PoolEntry;

/// Ancestor bookkeeping operations applied while walking the spend graph.
/// In every case the "child" is the entry that originated the walk, not the
/// immediate descendant.
#[derive(Clone, Copy, Debug)]
pub enum FeeUpdate {
	/// A new descendant arrived: fold its adjusted fee and size in.
	Add,
	/// A descendant is leaving: subtract its whole descendant package.
	Remove,
	/// About to re-prioritise the child: back its old adjusted fee out.
	PrePrioritise,
	/// Re-prioritisation done: fold the new adjusted fee back in.
	PostPrioritise,
}

/// Snapshot of the originating entry's counters, taken before a walk
/// mutates its ancestors.
#[derive(Clone, Copy, Debug)]
struct ChildStats {
	delta_fee: i64,
	size: u64,
	desc_fee: i64,
	desc_size: u64,
}

/// The pool itself. Holds every unconfirmed entry keyed by transaction id,
/// plus the map of every outpoint consumed by those entries.
pub struct Pool {
	/// All entries in the pool.
	entries: HashMap<Hash, PoolEntry>,
	/// Every input spent by an entry, mapped to the spending entry's id.
	spent: HashMap<OutPoint, Hash>,
	/// Total memory usage of all entries.
	size: u64,
	/// Hash of the block the pool state is valid against.
	pub tip: Hash,
}

impl Pool {
	/// An empty pool anchored at the given tip.
	pub fn new(tip: Hash) -> Pool {
		Pool {
			entries: HashMap::new(),
			spent: HashMap::new(),
			size: 0,
			tip,
		}
	}

	/// Number of entries in the pool.
	pub fn count(&self) -> usize {
		self.entries.len()
	}

	/// Total bytes the pool accounts for.
	pub fn size(&self) -> u64 {
		self.size
	}

	/// Whether the pool holds an entry for the given id.
	pub fn has(&self, hash: &Hash) -> bool {
		self.entries.contains_key(hash)
	}

	/// The entry for the given id, if present.
	pub fn get(&self, hash: &Hash) -> Option<&PoolEntry> {
		self.entries.get(hash)
	}

	/// Mutable access to an entry.
	pub fn get_mut(&mut self, hash: &Hash) -> Option<&mut PoolEntry> {
		self.entries.get_mut(hash)
	}

	/// Iterate over all entries.
	pub fn entries(&self) -> impl Iterator<Item = &PoolEntry> {
		self.entries.values()
	}

	/// All entry ids currently in the pool.
	pub fn hashes(&self) -> Vec<Hash> {
		self.entries.keys().cloned().collect()
	}

	/// The id of the entry spending the given outpoint, if any.
	pub fn spender(&self, outpoint: &OutPoint) -> Option<&Hash> {
		self.spent.get(outpoint)
	}

	/// Number of spent-map entries, equal to the total input count of the
	/// pool.
	pub fn spent_count(&self) -> usize {
		self.spent.len()
	}

	/// Whether any of the transaction's inputs is already consumed by an
	/// entry in the pool.
	pub fn is_double_spend(&self, tx: &Transaction) -> bool {
		tx.inputs
			.iter()
			.any(|input| self.spent.contains_key(&input.prevout))
	}

	/// Whether anything in the pool depends on this entry, that is, spends
	/// one of its outputs.
	pub fn has_depends(&self, entry: &PoolEntry) -> bool {
		(0..entry.tx.outputs.len())
			.any(|i| self.spent.contains_key(&OutPoint::new(entry.hash, i as u32)))
	}

	/// Insert an entry, claiming all its inputs in the spent map. The caller
	/// has already established none of them is taken.
	pub fn track_entry(&mut self, entry: PoolEntry) {
		for input in &entry.tx.inputs {
			self.spent.insert(input.prevout, entry.hash);
		}
		self.size += entry.mem_usage();
		self.entries.insert(entry.hash, entry);
	}

	/// Remove a single entry, releasing its inputs. Descendant entries are
	/// left alone; this is the path taken when a block confirms the
	/// transaction.
	pub fn remove_entry(&mut self, hash: &Hash) -> Option<PoolEntry> {
		let entry = self.entries.remove(hash)?;
		for input in &entry.tx.inputs {
			self.spent.remove(&input.prevout);
		}
		self.size -= entry.mem_usage();
		Some(entry)
	}

	/// The in-pool parents of a transaction, deduplicated.
	fn parents(&self, tx: &Transaction) -> Vec<Hash> {
		let mut seen = HashSet::new();
		let mut parents = vec![];
		for input in &tx.inputs {
			let parent = input.prevout.hash;
			if self.entries.contains_key(&parent) && seen.insert(parent) {
				parents.push(parent);
			}
		}
		parents
	}

	/// Count the distinct in-pool ancestors of a transaction, walking the
	/// spend graph upward, never past `max`.
	pub fn count_ancestors(&self, tx: &Transaction, max: usize) -> usize {
		let mut visited = HashSet::new();
		let mut stack = self.parents(tx);
		while let Some(hash) = stack.pop() {
			if !visited.insert(hash) {
				continue;
			}
			if visited.len() >= max {
				break;
			}
			if let Some(entry) = self.entries.get(&hash) {
				for parent in self.parents(&entry.tx) {
					if !visited.contains(&parent) {
						stack.push(parent);
					}
				}
			}
		}
		visited.len()
	}

	/// Apply a fee bookkeeping operation to every ancestor of the given
	/// entry. The child's counters are snapshotted before any mutation, so
	/// the update always sees the values the originating entry had when the
	/// walk began.
	pub fn update_ancestors(&mut self, hash: &Hash, max: usize, update: FeeUpdate) {
		let child = match self.entries.get(hash) {
			Some(entry) => ChildStats {
				delta_fee: entry.delta_fee,
				size: entry.size,
				desc_fee: entry.desc_fee,
				desc_size: entry.desc_size,
			},
			None => return,
		};

		let tx = &self.entries[hash].tx;
		let mut visited = HashSet::new();
		let mut stack = self.parents(tx);
		let mut ancestors = vec![];
		while let Some(parent) = stack.pop() {
			if !visited.insert(parent) {
				continue;
			}
			ancestors.push(parent);
			if visited.len() >= max {
				break;
			}
			if let Some(entry) = self.entries.get(&parent) {
				for grandparent in self.parents(&entry.tx) {
					if !visited.contains(&grandparent) {
						stack.push(grandparent);
					}
				}
			}
		}

		for parent in ancestors {
			if let Some(entry) = self.entries.get_mut(&parent) {
				match update {
					FeeUpdate::Add => {
						entry.desc_fee += child.delta_fee;
						entry.desc_size += child.size;
					}
					FeeUpdate::Remove => {
						entry.desc_fee -= child.desc_fee;
						entry.desc_size -= child.desc_size;
					}
					FeeUpdate::PrePrioritise => {
						entry.desc_fee -= child.delta_fee;
					}
					FeeUpdate::PostPrioritise => {
						entry.desc_fee += child.delta_fee;
					}
				}
			}
		}
	}

	/// Collect the distinct in-pool descendants of an entry by following the
	/// spent map downward.
	pub fn get_descendants(&self, hash: &Hash) -> Vec<Hash> {
		let mut visited = HashSet::new();
		let mut stack = vec![*hash];
		let mut descendants = vec![];
		while let Some(current) = stack.pop() {
			let outputs = match self.entries.get(&current) {
				Some(entry) => entry.tx.outputs.len(),
				None => continue,
			};
			for i in 0..outputs {
				let outpoint = OutPoint::new(current, i as u32);
				if let Some(spender) = self.spent.get(&outpoint) {
					if visited.insert(*spender) {
						descendants.push(*spender);
						stack.push(*spender);
					}
				}
			}
		}
		descendants
	}

	/// Count the distinct in-pool descendants of an entry.
	pub fn count_descendants(&self, hash: &Hash) -> usize {
		self.get_descendants(hash).len()
	}

	/// Evict an entry along with every entry spending it, spenders first.
	/// Each removed entry backs its package out of its remaining ancestors.
	/// Returns the removed entries in removal order.
	pub fn evict_entry(&mut self, hash: &Hash, max_ancestors: usize) -> Vec<PoolEntry> {
		let mut removed = vec![];
		self.evict_recursive(hash, max_ancestors, &mut removed);
		removed
	}

	fn evict_recursive(&mut self, hash: &Hash, max_ancestors: usize, removed: &mut Vec<PoolEntry>) {
		let outputs = match self.entries.get(hash) {
			Some(entry) => entry.tx.outputs.len(),
			None => return,
		};
		for i in 0..outputs {
			let outpoint = OutPoint::new(*hash, i as u32);
			if let Some(spender) = self.spent.get(&outpoint).cloned() {
				self.evict_recursive(&spender, max_ancestors, removed);
			}
		}
		self.update_ancestors(hash, max_ancestors, FeeUpdate::Remove);
		if let Some(entry) = self.remove_entry(hash) {
			removed.push(entry);
		}
	}

	/// Enforce the pool's byte budget. Entries with in-pool dependents are
	/// left alone; of the rest, expired ones are purged first, then the
	/// worst effective fee rates are evicted until usage drops below 90% of
	/// the budget. Returns whether the entry `added` fell out, along with
	/// everything removed.
	pub fn limit_size(
		&mut self,
		added: &Hash,
		max_size: u64,
		expiry_time: i64,
		max_ancestors: usize,
		now: i64,
	) -> (bool, Vec<PoolEntry>) {
		if self.size <= max_size {
			return (false, vec![]);
		}
		let threshold = max_size - max_size / 10;

		let mut queue = FeeHeap::new();
		let mut expired = vec![];
		for entry in self.entries.values() {
			if self.has_depends(entry) {
				continue;
			}
			if now < entry.time + expiry_time {
				queue.push(entry);
			} else {
				expired.push(entry.hash);
			}
		}

		let mut removed = vec![];
		for hash in expired {
			removed.extend(self.evict_entry(&hash, max_ancestors));
		}

		while self.size > threshold {
			let hash = match queue.pop() {
				Some(hash) => hash,
				None => break,
			};
			// skip anything an earlier eviction already took out
			if !self.entries.contains_key(&hash) {
				continue;
			}
			removed.extend(self.evict_entry(&hash, max_ancestors));
		}

		(!self.entries.contains_key(added), removed)
	}

	/// Drop everything.
	pub fn clear(&mut self) {
		self.entries.clear();
		self.spent.clear();
		self.size = 0;
	}
}
