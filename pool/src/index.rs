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

//! Optional secondary indices over the pool, keyed by the 20-byte address
//! hash a script pays to. They let wallet-facing callers ask "which
//! unconfirmed transactions touch this address" and "which unconfirmed
//! outputs does this address currently own" without scanning the pool.

use std::collections::{HashMap, HashSet};

use kestrel_core::core::{CoinView, Hash, OutPoint, Script};

use crate::types::PoolEntry;

/// Address hash to the unconfirmed transactions touching it, with the
/// inverse map used for removal.
pub struct TxIndex {
	index: HashMap<[u8; 20], HashSet<Hash>>,
	map: HashMap<Hash, Vec<[u8; 20]>>,
}

impl TxIndex {
	/// An empty index.
	pub fn new() -> TxIndex {
		TxIndex {
			index: HashMap::new(),
			map: HashMap::new(),
		}
	}

	/// Record an entry under every address its inputs and outputs touch.
	pub fn insert(&mut self, entry: &PoolEntry, view: &CoinView) {
		let mut addrs = HashSet::new();
		for input in &entry.tx.inputs {
			if let Some(coin) = view.get_entry(&input.prevout) {
				if let Some(addr) = coin.script.address_hash() {
					addrs.insert(addr);
				}
			}
		}
		for output in &entry.tx.outputs {
			if let Some(addr) = output.script.address_hash() {
				addrs.insert(addr);
			}
		}
		if addrs.is_empty() {
			return;
		}
		let addrs: Vec<_> = addrs.into_iter().collect();
		for addr in &addrs {
			self.index.entry(*addr).or_default().insert(entry.hash);
		}
		self.map.insert(entry.hash, addrs);
	}

	/// Unhook an entry from every address it was recorded under.
	pub fn remove(&mut self, hash: &Hash) {
		let addrs = match self.map.remove(hash) {
			Some(addrs) => addrs,
			None => return,
		};
		for addr in addrs {
			let empty = match self.index.get_mut(&addr) {
				Some(set) => {
					set.remove(hash);
					set.is_empty()
				}
				None => false,
			};
			if empty {
				self.index.remove(&addr);
			}
		}
	}

	/// Transactions touching the given address.
	pub fn get(&self, addr: &[u8; 20]) -> Vec<Hash> {
		match self.index.get(addr) {
			Some(set) => set.iter().cloned().collect(),
			None => vec![],
		}
	}

	/// Drop everything.
	pub fn clear(&mut self) {
		self.index.clear();
		self.map.clear();
	}
}

impl Default for TxIndex {
	fn default() -> TxIndex {
		TxIndex::new()
	}
}

/// An unconfirmed coin as seen by the address index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexedCoin {
	/// Value of the output.
	pub value: u64,
	/// The locking script.
	pub script: Script,
}

/// Address hash to the unconfirmed coins it owns. Admitting an entry
/// consumes the in-pool coins it spends and creates one per output; removal
/// restores the consumed coins whose creating entry is still in the pool.
pub struct CoinIndex {
	index: HashMap<[u8; 20], HashMap<OutPoint, IndexedCoin>>,
	map: HashMap<Hash, Vec<([u8; 20], OutPoint)>>,
	undo: HashMap<Hash, Vec<([u8; 20], OutPoint, IndexedCoin)>>,
}

impl CoinIndex {
	/// An empty index.
	pub fn new() -> CoinIndex {
		CoinIndex {
			index: HashMap::new(),
			map: HashMap::new(),
			undo: HashMap::new(),
		}
	}

	fn remove_coin(&mut self, addr: &[u8; 20], outpoint: &OutPoint) -> Option<IndexedCoin> {
		let (coin, empty) = match self.index.get_mut(addr) {
			Some(coins) => {
				let coin = coins.remove(outpoint);
				(coin, coins.is_empty())
			}
			None => (None, false),
		};
		if empty {
			self.index.remove(addr);
		}
		coin
	}

	/// Record the coins a new entry creates and consume the in-pool coins it
	/// spends, remembering the latter for undo.
	pub fn insert(&mut self, entry: &PoolEntry, view: &CoinView) {
		let mut undo = vec![];
		for input in &entry.tx.inputs {
			if let Some(coin) = view.get_entry(&input.prevout) {
				if let Some(addr) = coin.script.address_hash() {
					if let Some(indexed) = self.remove_coin(&addr, &input.prevout) {
						undo.push((addr, input.prevout, indexed));
					}
				}
			}
		}
		if !undo.is_empty() {
			self.undo.insert(entry.hash, undo);
		}

		let mut created = vec![];
		for (i, output) in entry.tx.outputs.iter().enumerate() {
			if let Some(addr) = output.script.address_hash() {
				let outpoint = OutPoint::new(entry.hash, i as u32);
				self.index.entry(addr).or_default().insert(
					outpoint,
					IndexedCoin {
						value: output.value,
						script: output.script.clone(),
					},
				);
				created.push((addr, outpoint));
			}
		}
		if !created.is_empty() {
			self.map.insert(entry.hash, created);
		}
	}

	/// Remove an entry's coins and restore the parent coins it had consumed,
	/// as long as their creating entry is still pooled.
	pub fn remove<F>(&mut self, hash: &Hash, parent_pooled: F)
	where
		F: Fn(&Hash) -> bool,
	{
		if let Some(created) = self.map.remove(hash) {
			for (addr, outpoint) in created {
				self.remove_coin(&addr, &outpoint);
			}
		}
		if let Some(undo) = self.undo.remove(hash) {
			for (addr, outpoint, coin) in undo {
				if parent_pooled(&outpoint.hash) {
					self.index.entry(addr).or_default().insert(outpoint, coin);
				}
			}
		}
	}

	/// Unconfirmed coins owned by the given address.
	pub fn get(&self, addr: &[u8; 20]) -> Vec<(OutPoint, IndexedCoin)> {
		match self.index.get(addr) {
			Some(coins) => coins.iter().map(|(op, c)| (*op, c.clone())).collect(),
			None => vec![],
		}
	}

	/// Drop everything.
	pub fn clear(&mut self) {
		self.index.clear();
		self.map.clear();
		self.undo.clear();
	}
}

impl Default for CoinIndex {
	fn default() -> CoinIndex {
		CoinIndex::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use kestrel_core::core::{Coin, Input, Output, Transaction};

	fn entry_spending(prevout: OutPoint, view: &CoinView, out_addr: [u8; 20]) -> PoolEntry {
		let tx = Transaction {
			version: 1,
			inputs: vec![Input::new(prevout)],
			outputs: vec![Output {
				value: 900,
				script: Script::PubkeyHash(out_addr),
			}],
			lock_time: 0,
		};
		PoolEntry::new(tx, view, 1, -1)
	}

	#[test]
	fn coin_index_consumes_and_restores() {
		let mut index = CoinIndex::new();
		let parent_addr = [1; 20];
		let child_addr = [2; 20];

		// parent entry creating a coin for parent_addr
		let mut view = CoinView::new();
		view.add_entry(
			OutPoint::new(Hash([9; 32]), 0),
			Coin {
				value: 1_000,
				script: Script::PubkeyHash([0; 20]),
				height: 1,
				coinbase: false,
			},
		);
		let parent = entry_spending(OutPoint::new(Hash([9; 32]), 0), &view, parent_addr);
		index.insert(&parent, &view);
		assert_eq!(index.get(&parent_addr).len(), 1);

		// child spends the parent's coin
		let parent_out = OutPoint::new(parent.hash, 0);
		let mut child_view = CoinView::new();
		child_view.add_entry(
			parent_out,
			Coin {
				value: 900,
				script: Script::PubkeyHash(parent_addr),
				height: -1,
				coinbase: false,
			},
		);
		let child = entry_spending(parent_out, &child_view, child_addr);
		index.insert(&child, &child_view);
		assert!(index.get(&parent_addr).is_empty());
		assert_eq!(index.get(&child_addr).len(), 1);

		// removing the child puts the parent's coin back
		let parent_hash = parent.hash;
		index.remove(&child.hash, |h| *h == parent_hash);
		assert_eq!(index.get(&parent_addr).len(), 1);
		assert!(index.get(&child_addr).is_empty());
	}

	#[test]
	fn tx_index_tracks_addresses() {
		let mut index = TxIndex::new();
		let addr = [5; 20];
		let view = CoinView::new();
		let entry = entry_spending(OutPoint::new(Hash([1; 32]), 0), &view, addr);
		index.insert(&entry, &view);
		assert_eq!(index.get(&addr), vec![entry.hash]);
		index.remove(&entry.hash);
		assert!(index.get(&addr).is_empty());
	}
}
