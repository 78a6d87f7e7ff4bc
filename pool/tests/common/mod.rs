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

//! Common test functions

use std::collections::HashMap;
use std::sync::Arc;

use kestrel_core::consensus::{self, LOCKTIME_MEDIAN_TIME_PAST};
use kestrel_core::core::{
	BlockHeader, Coin, CoinView, Hash, Hashed, Input, OutPoint, Output, Script, Transaction,
	ZERO_HASH,
};
use kestrel_pool::{
	BlockChain, NoopAdapter, NoopVerifier, PoolAdapter, PoolConfig, PoolEntry, PoolError,
	TransactionPool, TxSource, VerifyError,
};
use kestrel_util::{Mutex, RwLock};

struct ChainInner {
	utxo: HashMap<OutPoint, Coin>,
	coin_count: HashMap<Hash, usize>,
	tip: BlockHeader,
	mtp: i64,
	csv: bool,
	witness: bool,
	synced: bool,
}

/// An in-memory chain standing in for the blockchain collaborator.
pub struct ChainAdapter {
	inner: RwLock<ChainInner>,
}

impl ChainAdapter {
	pub fn new(height: u32) -> ChainAdapter {
		let tip = BlockHeader {
			version: 1,
			prev_hash: ZERO_HASH,
			merkle_root: ZERO_HASH,
			time: 1_500_000_000 + i64::from(height) * 600,
			height,
		};
		let mtp = tip.time - 3_600;
		ChainAdapter {
			inner: RwLock::new(ChainInner {
				utxo: HashMap::new(),
				coin_count: HashMap::new(),
				tip,
				mtp,
				csv: true,
				witness: true,
				synced: true,
			}),
		}
	}

	/// Seed the UTXO set with a spendable coin.
	pub fn add_utxo(&self, outpoint: OutPoint, value: u64, height: i32, coinbase: bool) {
		let mut addr = [0u8; 20];
		addr.copy_from_slice(&outpoint.hash.as_bytes()[..20]);
		let mut inner = self.inner.write();
		inner.utxo.insert(
			outpoint,
			Coin {
				value,
				script: Script::PubkeyHash(addr),
				height,
				coinbase,
			},
		);
		*inner.coin_count.entry(outpoint.hash).or_insert(0) += 1;
	}

	/// Remove a coin without going through a block.
	pub fn remove_utxo(&self, outpoint: &OutPoint) {
		let mut inner = self.inner.write();
		if inner.utxo.remove(outpoint).is_some() {
			let drained = match inner.coin_count.get_mut(&outpoint.hash) {
				Some(count) => {
					*count -= 1;
					*count == 0
				}
				None => false,
			};
			if drained {
				inner.coin_count.remove(&outpoint.hash);
			}
		}
	}

	/// Apply a block to the UTXO set and move the tip.
	pub fn apply_block(&self, header: &BlockHeader, txs: &[Transaction]) {
		for tx in txs {
			if !tx.is_coinbase() {
				for input in &tx.inputs {
					self.remove_utxo(&input.prevout);
				}
			}
			let hash = tx.hash();
			for (i, _) in tx.outputs.iter().enumerate() {
				self.add_output_coin(tx, hash, i as u32, header.height as i32);
			}
		}
		let mut inner = self.inner.write();
		inner.tip = header.clone();
		inner.mtp = header.time - 3_600;
	}

	fn add_output_coin(&self, tx: &Transaction, hash: Hash, index: u32, height: i32) {
		let output = &tx.outputs[index as usize];
		let mut inner = self.inner.write();
		inner.utxo.insert(
			OutPoint::new(hash, index),
			Coin {
				value: output.value,
				script: output.script.clone(),
				height,
				coinbase: tx.is_coinbase(),
			},
		);
		*inner.coin_count.entry(hash).or_insert(0) += 1;
	}

	/// The current tip header.
	pub fn tip_header(&self) -> BlockHeader {
		self.inner.read().tip.clone()
	}

	/// A header extending the current tip.
	pub fn next_header(&self) -> BlockHeader {
		let tip = self.tip_header();
		BlockHeader {
			version: 1,
			prev_hash: tip.hash(),
			merkle_root: ZERO_HASH,
			time: tip.time + 600,
			height: tip.height + 1,
		}
	}

	/// Force the tip header, without touching the UTXO set. Used to mimic
	/// reorganizations.
	pub fn set_tip(&self, header: BlockHeader) {
		let mut inner = self.inner.write();
		inner.mtp = header.time - 3_600;
		inner.tip = header;
	}
}

impl BlockChain for ChainAdapter {
	fn tip(&self) -> Result<BlockHeader, PoolError> {
		Ok(self.inner.read().tip.clone())
	}

	fn synced(&self) -> bool {
		self.inner.read().synced
	}

	fn has_csv(&self) -> bool {
		self.inner.read().csv
	}

	fn has_witness(&self) -> bool {
		self.inner.read().witness
	}

	fn get_median_time(&self, _header: &BlockHeader) -> Result<i64, PoolError> {
		Ok(self.inner.read().mtp)
	}

	fn has_coins(&self, tx: &Transaction) -> Result<bool, PoolError> {
		let hash = tx.hash();
		Ok(self.inner.read().coin_count.get(&hash).copied().unwrap_or(0) > 0)
	}

	fn read_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, PoolError> {
		Ok(self.inner.read().utxo.get(outpoint).cloned())
	}

	fn verify_final(
		&self,
		tip: &BlockHeader,
		tx: &Transaction,
		flags: u32,
	) -> Result<bool, PoolError> {
		let time = if flags & LOCKTIME_MEDIAN_TIME_PAST != 0 {
			self.inner.read().mtp
		} else {
			tip.time
		};
		Ok(tx.is_final(tip.height + 1, time))
	}

	fn verify_locks(
		&self,
		tip: &BlockHeader,
		tx: &Transaction,
		view: &CoinView,
		flags: u32,
	) -> Result<bool, PoolError> {
		// this chain has no header index; every block shares the tip's
		// median time
		let mtp = self.inner.read().mtp;
		Ok(consensus::check_sequence_locks(
			tx,
			view,
			tip.height + 1,
			mtp,
			flags,
			|_| mtp,
		))
	}
}

/// Adapter recording the names of the events it saw, in order.
pub struct EventAdapter {
	events: Mutex<Vec<String>>,
}

impl EventAdapter {
	pub fn new() -> EventAdapter {
		EventAdapter {
			events: Mutex::new(vec![]),
		}
	}

	pub fn take(&self) -> Vec<String> {
		self.events.lock().drain(..).collect()
	}

	fn push(&self, name: &str) {
		self.events.lock().push(name.to_string());
	}
}

impl PoolAdapter for EventAdapter {
	fn tx_accepted(&self, _entry: &PoolEntry) {
		self.push("tx");
	}
	fn entry_added(&self, _entry: &PoolEntry) {
		self.push("add entry");
	}
	fn orphan_added(&self, _tx: &Transaction, _missing: &[Hash]) {
		self.push("add orphan");
	}
	fn tx_confirmed(&self, _entry: &PoolEntry, _block: &Hash) {
		self.push("confirmed");
	}
	fn entry_removed(&self, _entry: &PoolEntry) {
		self.push("remove entry");
	}
	fn orphan_removed(&self, _hash: &Hash) {
		self.push("remove orphan");
	}
	fn double_spend(&self, _entry: &PoolEntry) {
		self.push("double spend");
	}
	fn conflict(&self, _tx: &Transaction) {
		self.push("conflict");
	}
	fn bad_orphan(&self, _err: &VerifyError, _peer_id: i32) {
		self.push("bad orphan");
	}
	fn tx_unconfirmed(&self, _tx: &Transaction) {
		self.push("unconfirmed");
	}
}

/// Config used across the tests: no relay fee floor so small values work.
pub fn test_config() -> PoolConfig {
	PoolConfig {
		min_relay_fee: 0,
		..PoolConfig::default()
	}
}

pub fn test_setup(chain: &Arc<ChainAdapter>) -> TransactionPool<ChainAdapter> {
	TransactionPool::new(
		test_config(),
		chain.clone(),
		Arc::new(NoopVerifier),
		Arc::new(NoopAdapter),
	)
	.unwrap()
}

pub fn test_setup_with(
	chain: &Arc<ChainAdapter>,
	config: PoolConfig,
	adapter: Arc<dyn PoolAdapter>,
) -> TransactionPool<ChainAdapter> {
	TransactionPool::new(config, chain.clone(), Arc::new(NoopVerifier), adapter).unwrap()
}

fn addr_for(value: u64) -> [u8; 20] {
	let mut addr = [0u8; 20];
	addr[..8].copy_from_slice(&value.to_le_bytes());
	addr
}

/// Build a plain transaction spending the given outpoints into the given
/// values. Fees are whatever the inputs leave over.
pub fn test_transaction(inputs: Vec<OutPoint>, outputs: Vec<u64>) -> Transaction {
	Transaction {
		version: 1,
		inputs: inputs.into_iter().map(Input::new).collect(),
		outputs: outputs
			.into_iter()
			.map(|value| Output {
				value,
				script: Script::PubkeyHash(addr_for(value)),
			})
			.collect(),
		lock_time: 0,
	}
}

/// An outpoint to a never-mined transaction, usable as a seed UTXO key.
pub fn test_outpoint(seed: u8, index: u32) -> OutPoint {
	OutPoint::new(Hash([seed; 32]), index)
}

/// A minimal coinbase transaction, distinguishable by its `extra` byte.
pub fn test_coinbase(value: u64, extra: u8) -> Transaction {
	let mut input = Input::new(OutPoint::null());
	input.script = vec![extra, 0, 0, 0];
	Transaction {
		version: 1,
		inputs: vec![input],
		outputs: vec![Output {
			value,
			script: Script::PubkeyHash([extra; 20]),
		}],
		lock_time: 0,
	}
}

pub fn test_source() -> TxSource {
	TxSource {
		debug_name: "test".to_string(),
		peer_id: 8,
	}
}

/// Check the pool's structural invariants: byte accounting, the spent-map
/// bijection, the ancestor cap and the descendant fee rollups.
pub fn assert_consistent(pool: &TransactionPool<ChainAdapter>) {
	let inner = &pool.pool;

	let total: u64 = inner.entries().map(|e| e.mem_usage()).sum();
	assert_eq!(inner.size(), total, "size accounting out of sync");

	let mut input_count = 0;
	for entry in inner.entries() {
		for input in &entry.tx.inputs {
			assert_eq!(
				inner.spender(&input.prevout),
				Some(&entry.hash),
				"spent map does not point back at the entry"
			);
			input_count += 1;
		}
		let ancestors = inner.count_ancestors(&entry.tx, pool.config.max_ancestors);
		assert!(ancestors <= pool.config.max_ancestors);
	}
	assert_eq!(inner.spent_count(), input_count);

	for entry in inner.entries() {
		let mut expect_fee = entry.delta_fee;
		let mut expect_size = entry.size;
		for hash in inner.get_descendants(&entry.hash) {
			let child = inner.get(&hash).unwrap();
			expect_fee += child.delta_fee;
			expect_size += child.size;
		}
		assert_eq!(entry.desc_fee, expect_fee, "descendant fee rollup broken");
		assert_eq!(entry.desc_size, expect_size, "descendant size rollup broken");
	}
}
