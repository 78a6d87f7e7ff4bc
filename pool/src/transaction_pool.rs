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

//! Top-level TransactionPool type: the admission pipeline and the block,
//! reorg and orphan machinery wired around the inner [`Pool`].
//!
//! The pool performs no locking of its own. Happens under an exclusive
//! mutable reference gated by the write portion of a RwLock held by the
//! surrounding node: block events and reorgs take it globally, admissions
//! take it for the duration of the call.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use kestrel_core::consensus::{
	MAX_TX_SIGOPS_COST, MAX_TX_WEIGHT, SEQUENCE_DISABLE_FLAG, STANDARD_LOCKTIME_FLAGS,
	STANDARD_VERIFY_FLAGS, VERIFY_CLEANSTACK, VERIFY_WITNESS,
};
use kestrel_core::core::{BlockHeader, CoinView, Hash, Hashed, Transaction};

use crate::cache::MempoolCache;
use crate::fees::FeeEstimator;
use crate::filter::RollingFilter;
use crate::index::{CoinIndex, TxIndex};
use crate::orphans::OrphanPool;
use crate::pool::{FeeUpdate, Pool};
use crate::types::{
	get_min_fee, Accepted, BlockChain, PoolAdapter, PoolConfig, PoolEntry, PoolError, Rejection,
	ScriptVerifier, TxSource, VerifyError,
};

/// Sizing of the recently-rejected filter: enough for a few blocks worth of
/// junk at a one-in-a-million false positive rate.
const REJECT_FILTER_ITEMS: u32 = 120_000;
const REJECT_FILTER_FP_RATE: f64 = 0.000_001;

/// The unconfirmed transaction pool.
pub struct TransactionPool<T> {
	/// Pool configuration.
	pub config: PoolConfig,
	/// The entries and their spend graph.
	pub pool: Pool,
	/// Transactions waiting on missing parents.
	pub orphans: OrphanPool,
	/// Hashes of recently rejected transactions.
	rejects: RollingFilter,
	/// On-disk persistence, when configured.
	cache: Option<MempoolCache>,
	/// Fee estimation fed from admissions and confirmations.
	estimator: Option<FeeEstimator>,
	/// Address to transactions index, when configured.
	tx_index: Option<TxIndex>,
	/// Address to unconfirmed coins index, when configured.
	coin_index: Option<CoinIndex>,
	/// Decaying byte count of free transactions relayed.
	free_count: f64,
	/// Last time the free-relay throttle decayed.
	last_time: i64,
	/// The blockchain the pool validates against.
	pub blockchain: Arc<T>,
	/// Script verification workers.
	verifier: Arc<dyn ScriptVerifier>,
	/// Event sink.
	pub adapter: Arc<dyn PoolAdapter>,
}

impl<T> TransactionPool<T>
where
	T: BlockChain,
{
	/// Create a new transaction pool anchored at the chain's current tip,
	/// loading the on-disk cache when one is configured.
	pub fn new(
		config: PoolConfig,
		chain: Arc<T>,
		verifier: Arc<dyn ScriptVerifier>,
		adapter: Arc<dyn PoolAdapter>,
	) -> Result<TransactionPool<T>, PoolError> {
		let tip = chain.tip()?.hash();
		let mut pool = TransactionPool {
			pool: Pool::new(tip),
			orphans: OrphanPool::new(),
			rejects: RollingFilter::new(REJECT_FILTER_ITEMS, REJECT_FILTER_FP_RATE),
			cache: None,
			estimator: if config.estimate_fee {
				Some(FeeEstimator::new())
			} else {
				None
			},
			tx_index: if config.index_address {
				Some(TxIndex::new())
			} else {
				None
			},
			coin_index: if config.index_address {
				Some(CoinIndex::new())
			} else {
				None
			},
			free_count: 0.0,
			last_time: Utc::now().timestamp(),
			blockchain: chain,
			verifier,
			adapter,
			config,
		};
		if let Some(path) = pool.config.persistent_db.clone() {
			pool.open_cache(&path, &tip)?;
		}
		Ok(pool)
	}

	/// Open the cache and replay its entries into the in-memory state.
	/// Entries are tracked in admission order first, then a second pass
	/// rebuilds the ancestor fee sums.
	fn open_cache(&mut self, path: &str, tip: &Hash) -> Result<(), PoolError> {
		let (cache, mut entries) = MempoolCache::open(path, tip)?;
		if self.config.estimate_fee {
			if let Some(estimator) = cache.load_fee()? {
				self.estimator = Some(estimator);
			}
		}
		self.cache = Some(cache);

		// children were admitted after their parents, so time order is
		// dependency order
		entries.sort_by_key(|e| e.time);
		let hashes: Vec<Hash> = entries.iter().map(|e| e.hash).collect();
		let synced = self.blockchain.synced();

		for mut entry in entries {
			entry.desc_fee = entry.delta_fee;
			entry.desc_size = entry.size;
			let view = self.get_coin_view(&entry.tx)?;
			if let Some(index) = &mut self.tx_index {
				index.insert(&entry, &view);
			}
			if let Some(index) = &mut self.coin_index {
				index.insert(&entry, &view);
			}
			if let Some(estimator) = &mut self.estimator {
				estimator.process_entry(&entry, entry.height, synced);
			}
			self.pool.track_entry(entry);
		}
		for hash in hashes {
			self.pool
				.update_ancestors(&hash, self.config.max_ancestors, FeeUpdate::Add);
		}
		Ok(())
	}

	/// Total bytes accounted by the pool.
	pub fn size(&self) -> u64 {
		self.pool.size()
	}

	/// Number of entries in the pool.
	pub fn count(&self) -> usize {
		self.pool.count()
	}

	/// Whether the pool holds a verified entry for the given id.
	pub fn has_entry(&self, hash: &Hash) -> bool {
		self.pool.has(hash)
	}

	/// The entry for the given id.
	pub fn get_entry(&self, hash: &Hash) -> Option<&PoolEntry> {
		self.pool.get(hash)
	}

	/// The transaction for the given id, if pooled.
	pub fn get_tx(&self, hash: &Hash) -> Option<&Transaction> {
		self.pool.get(hash).map(|entry| &entry.tx)
	}

	/// Whether the id was recently rejected. Approximate: false positives
	/// at the filter's configured rate.
	pub fn has_reject(&self, hash: &Hash) -> bool {
		self.rejects.contains(hash.as_bytes())
	}

	/// The ids of everything currently pooled.
	pub fn get_snapshot(&self) -> Vec<Hash> {
		self.pool.hashes()
	}

	/// Whether the pool or the orphan table knows the id already.
	pub fn exists(&self, hash: &Hash) -> bool {
		self.pool.has(hash) || self.orphans.has(hash)
	}

	/// Whether any of the transaction's inputs is already spent in-pool.
	pub fn is_double_spend(&self, tx: &Transaction) -> bool {
		self.pool.is_double_spend(tx)
	}

	/// Estimated fee rate to confirm within `target` blocks, in grains per
	/// kilobyte. Zero when estimation is disabled or has no data.
	pub fn estimate_fee(&self, target: usize) -> u64 {
		match &self.estimator {
			Some(estimator) => estimator.estimate_fee(target),
			None => 0,
		}
	}

	/// Attempt to add a transaction to the pool, running the full admission
	/// pipeline. On success any orphans waiting on it are replayed. On
	/// rejection the hash enters the reject filter, unless witness data
	/// may have caused the failure.
	pub fn add_tx(&mut self, tx: Transaction, source: TxSource) -> Result<Accepted, PoolError> {
		let hash = tx.hash();
		let has_witness = tx.has_witness();
		debug!("pool: adding {} from {}", hash, source.debug_name);

		match self.insert_tx(tx, source.peer_id) {
			Ok(Accepted::Entry) => {
				self.handle_orphans(&hash)?;
				Ok(Accepted::Entry)
			}
			Ok(orphaned) => Ok(orphaned),
			Err(PoolError::Verify(err)) => {
				if !has_witness && !err.malleated {
					self.rejects.add(hash.as_bytes());
				}
				debug!("pool: rejected {}: {}", hash, err);
				Err(PoolError::Verify(err))
			}
			Err(e) => Err(e),
		}
	}

	/// The admission pipeline proper. Validates, classifies orphans, builds
	/// the entry, inserts it and enforces the byte budget. All mutations
	/// happen after every fallible check has passed.
	fn insert_tx(&mut self, tx: Transaction, peer_id: i32) -> Result<Accepted, PoolError> {
		let hash = tx.hash();
		let tip = self.blockchain.tip()?;
		let height = tip.height;

		// context-free checks first
		if let Err(e) = tx.check_sanity() {
			return Err(VerifyError::new(hash, Rejection::Invalid, e.reason, e.score).into());
		}

		if tx.is_coinbase() {
			return Err(VerifyError::new(hash, Rejection::Invalid, "coinbase", 100).into());
		}

		if self.config.require_standard {
			if tx.version >= 2 && !self.blockchain.has_csv() {
				return Err(VerifyError::new(
					hash,
					Rejection::Nonstandard,
					"premature-version2-tx",
					0,
				)
				.into());
			}
			if !self.blockchain.has_witness() && tx.has_witness() {
				// soft reject: a post-activation retry must not be poisoned
				return Err(VerifyError::malleated(
					hash,
					Rejection::Nonstandard,
					"no-witness-yet",
					0,
				)
				.into());
			}
			if let Err(e) = tx.check_standard(self.config.min_relay_fee) {
				return Err(VerifyError::new(hash, Rejection::Nonstandard, e.reason, e.score).into());
			}
		}

		if !self.config.replace_by_fee && tx.is_rbf() {
			return Err(VerifyError::new(hash, Rejection::Nonstandard, "replace-by-fee", 0).into());
		}

		if !self
			.blockchain
			.verify_final(&tip, &tx, STANDARD_LOCKTIME_FLAGS)?
		{
			return Err(VerifyError::new(hash, Rejection::Invalid, "non-final", 0).into());
		}

		if self.exists(&hash) {
			return Err(VerifyError::new(
				hash,
				Rejection::AlreadyKnown,
				"txn-already-in-mempool",
				0,
			)
			.into());
		}

		if self.blockchain.has_coins(&tx)? {
			return Err(VerifyError::new(
				hash,
				Rejection::AlreadyKnown,
				"txn-already-known",
				0,
			)
			.into());
		}

		if self.pool.is_double_spend(&tx) {
			self.adapter.conflict(&tx);
			return Err(VerifyError::new(
				hash,
				Rejection::Duplicate,
				"bad-txns-inputs-spent",
				0,
			)
			.into());
		}

		let view = self.get_coin_view(&tx)?;

		if let Some(missing) = self.maybe_orphan(&tx, &view, peer_id)? {
			return Ok(Accepted::Orphan(missing));
		}

		let entry = PoolEntry::new(tx, &view, height, peer_id);
		self.verify_entry(&entry, &view, &tip)?;

		// all checks passed: commit
		self.adapter.tx_accepted(&entry);
		self.track_entry(entry, &view)?;
		self.pool
			.update_ancestors(&hash, self.config.max_ancestors, FeeUpdate::Add);
		if let Some(entry) = self.pool.get(&hash) {
			self.adapter.entry_added(entry);
		}
		debug!(
			"pool: added {} (txs: {}, size: {})",
			hash,
			self.pool.count(),
			self.pool.size()
		);

		if self.pool.size() > self.config.max_size {
			if self.limit_size(&hash)? {
				return Err(VerifyError::new(
					hash,
					Rejection::InsufficientFee,
					"mempool full",
					0,
				)
				.into());
			}
		}

		Ok(Accepted::Entry)
	}

	/// Resolve every input of the transaction: unconfirmed parent outputs
	/// first, the chain's UTXO set second. Unresolvable slots stay absent.
	pub fn get_coin_view(&self, tx: &Transaction) -> Result<CoinView, PoolError> {
		let mut view = CoinView::new();
		for input in &tx.inputs {
			let outpoint = input.prevout;
			if let Some(parent) = self.pool.get(&outpoint.hash) {
				if (outpoint.index as usize) < parent.tx.outputs.len() {
					view.add_index(&parent.tx, outpoint.index, -1);
				}
				continue;
			}
			if let Some(coin) = self.blockchain.read_coin(&outpoint)? {
				view.add_entry(outpoint, coin);
			}
		}
		Ok(view)
	}

	/// Classify a transaction with unresolved inputs. When the parents are
	/// merely unknown the transaction is enrolled as an orphan and the
	/// missing ids are returned; parents that were themselves rejected take
	/// the dependent down with them.
	fn maybe_orphan(
		&mut self,
		tx: &Transaction,
		view: &CoinView,
		peer_id: i32,
	) -> Result<Option<Vec<Hash>>, PoolError> {
		let hash = tx.hash();
		let mut missing = vec![];
		for input in &tx.inputs {
			if view.has_entry(&input.prevout) {
				continue;
			}
			let parent = input.prevout.hash;
			if self.rejects.contains(parent.as_bytes()) {
				debug!("pool: orphan {} spends rejected parent {}", hash, parent);
				self.rejects.add(hash.as_bytes());
				return Err(VerifyError::new(
					hash,
					Rejection::Duplicate,
					"duplicate-orphan",
					0,
				)
				.into());
			}
			if !missing.contains(&parent) {
				missing.push(parent);
			}
		}

		if missing.is_empty() {
			return Ok(None);
		}

		// orphans are held unverified, so bound what we are willing to keep
		if tx.weight() > MAX_TX_WEIGHT {
			return Err(VerifyError::new(hash, Rejection::Nonstandard, "tx-size", 0).into());
		}

		self.orphans.insert(tx, &missing, peer_id)?;
		self.adapter.orphan_added(tx, &missing);
		debug!(
			"pool: stored orphan {} (missing: {}, orphans: {})",
			hash,
			missing.len(),
			self.orphans.count()
		);

		for evicted in self.orphans.limit(self.config.max_orphans) {
			debug!("pool: evicted random orphan {}", evicted);
			self.adapter.orphan_removed(&evicted);
		}

		Ok(Some(missing))
	}

	/// The contextual half of verification: locks, policy, fees, ancestor
	/// limits, input values and finally scripts.
	fn verify_entry(
		&mut self,
		entry: &PoolEntry,
		view: &CoinView,
		tip: &BlockHeader,
	) -> Result<(), PoolError> {
		let hash = entry.hash;
		let height = tip.height;

		if !self
			.blockchain
			.verify_locks(tip, &entry.tx, view, STANDARD_LOCKTIME_FLAGS)?
		{
			return Err(VerifyError::new(hash, Rejection::Nonstandard, "non-bip68-final", 0).into());
		}

		if self.config.require_standard {
			if !entry.tx.has_standard_inputs(view) {
				return Err(VerifyError::new(
					hash,
					Rejection::Nonstandard,
					"bad-txns-nonstandard-inputs",
					0,
				)
				.into());
			}
			if self.blockchain.has_witness() && !entry.tx.has_standard_witness(view) {
				return Err(VerifyError::malleated(
					hash,
					Rejection::Nonstandard,
					"bad-witness-nonstandard",
					0,
				)
				.into());
			}
		}

		if entry.sigops > MAX_TX_SIGOPS_COST {
			return Err(VerifyError::new(
				hash,
				Rejection::Nonstandard,
				"bad-txns-too-many-sigops",
				0,
			)
			.into());
		}

		let min_fee = get_min_fee(entry.size, self.config.min_relay_fee);
		if self.config.relay_priority && entry.fee < min_fee {
			if !entry.is_free(height) {
				return Err(VerifyError::new(
					hash,
					Rejection::InsufficientFee,
					"insufficient priority",
					0,
				)
				.into());
			}
		}

		if self.config.limit_free && entry.fee < min_fee {
			let now = Utc::now().timestamp();
			self.free_count *= (1.0f64 - 1.0 / 600.0).powi((now - self.last_time).max(0) as i32);
			self.last_time = now;
			if self.free_count > self.config.limit_free_relay as f64 * 10_000.0 {
				return Err(VerifyError::new(
					hash,
					Rejection::InsufficientFee,
					"rate limited free transaction",
					0,
				)
				.into());
			}
			self.free_count += entry.size as f64;
		}

		if self.config.reject_absurd_fees && min_fee > 0 && entry.fee > min_fee * 10_000 {
			return Err(VerifyError::new(hash, Rejection::HighFee, "absurdly-high-fee", 0).into());
		}

		let ancestors = self.pool.count_ancestors(&entry.tx, self.config.max_ancestors);
		if ancestors + 1 > self.config.max_ancestors {
			return Err(VerifyError::new(
				hash,
				Rejection::Nonstandard,
				"too-long-mempool-chain",
				0,
			)
			.into());
		}

		if let Err(e) = entry.tx.check_inputs(view, height + 1) {
			return Err(VerifyError::new(hash, Rejection::Invalid, e.reason, e.score).into());
		}

		let flags = STANDARD_VERIFY_FLAGS;
		if !self.verifier.verify(&entry.tx, view, flags)? {
			// Retry without the witness-dependent flags. Passing stripped
			// but failing once CLEANSTACK is reinstated means a witness
			// program tripped us up, which a third party can cause.
			let relaxed = flags & !(VERIFY_WITNESS | VERIFY_CLEANSTACK);
			if self.verifier.verify(&entry.tx, view, relaxed)?
				&& !self
					.verifier
					.verify(&entry.tx, view, relaxed | VERIFY_CLEANSTACK)?
			{
				return Err(VerifyError::malleated(
					hash,
					Rejection::Nonstandard,
					"non-mandatory-script-verify-flag",
					0,
				)
				.into());
			}
			return Err(VerifyError::new(
				hash,
				Rejection::Nonstandard,
				"non-mandatory-script-verify-flag",
				0,
			)
			.into());
		}

		Ok(())
	}

	/// Insert a verified entry into the pool, the indices, the estimator
	/// and the cache. The fallible cache write happens before any in-memory
	/// mutation so a failure leaves the pool untouched.
	fn track_entry(&mut self, entry: PoolEntry, view: &CoinView) -> Result<(), PoolError> {
		if let Some(cache) = &mut self.cache {
			cache.save_entry(&entry)?;
		}
		if let Some(index) = &mut self.tx_index {
			index.insert(&entry, view);
		}
		if let Some(index) = &mut self.coin_index {
			index.insert(&entry, view);
		}
		if let Some(estimator) = &mut self.estimator {
			estimator.process_entry(&entry, entry.height, self.blockchain.synced());
		}
		self.pool.track_entry(entry);
		Ok(())
	}

	/// Back an entry out of the indices and the cache. The estimator is
	/// handled separately: eviction untracks, confirmation credits.
	fn forget_entry(&mut self, entry: &PoolEntry) -> Result<(), PoolError> {
		if let Some(cache) = &mut self.cache {
			cache.remove_entry(&entry.hash)?;
		}
		if let Some(index) = &mut self.tx_index {
			index.remove(&entry.hash);
		}
		{
			let pool = &self.pool;
			if let Some(index) = &mut self.coin_index {
				index.remove(&entry.hash, |h| pool.has(h));
			}
		}
		Ok(())
	}

	/// Evict an entry and its spender descendants, with all the secondary
	/// bookkeeping.
	fn evict_entry(&mut self, hash: &Hash) -> Result<Vec<PoolEntry>, PoolError> {
		let removed = self.pool.evict_entry(hash, self.config.max_ancestors);
		for entry in &removed {
			self.forget_entry(entry)?;
			if let Some(estimator) = &mut self.estimator {
				estimator.remove_entry(&entry.hash);
			}
			self.adapter.entry_removed(entry);
		}
		Ok(removed)
	}

	/// Enforce the byte budget. Returns true when the entry named `added`
	/// did not survive, meaning its admission must be reported as failed.
	fn limit_size(&mut self, added: &Hash) -> Result<bool, PoolError> {
		let now = Utc::now().timestamp();
		let (evicted_added, removed) = self.pool.limit_size(
			added,
			self.config.max_size,
			self.config.expiry_time,
			self.config.max_ancestors,
			now,
		);
		for entry in &removed {
			self.forget_entry(entry)?;
			if let Some(estimator) = &mut self.estimator {
				estimator.remove_entry(&entry.hash);
			}
			self.adapter.entry_removed(entry);
		}
		if !removed.is_empty() {
			info!(
				"pool: limited size, evicted {} entries (size: {})",
				removed.len(),
				self.pool.size()
			);
		}
		Ok(evicted_added)
	}

	/// Evict every in-pool spender of the confirmed transaction's inputs.
	fn remove_double_spends(&mut self, tx: &Transaction) -> Result<(), PoolError> {
		for input in &tx.inputs {
			let spender = match self.pool.spender(&input.prevout) {
				Some(spender) => *spender,
				None => continue,
			};
			debug!(
				"pool: removing double spender {} of {}",
				spender, input.prevout
			);
			let removed = self.evict_entry(&spender)?;
			// the spender itself is removed last
			if let Some(entry) = removed.last() {
				self.adapter.double_spend(entry);
			}
		}
		Ok(())
	}

	/// Drop an orphan, if present.
	pub fn remove_orphan(&mut self, hash: &Hash) {
		if self.orphans.remove(hash).is_some() {
			self.adapter.orphan_removed(hash);
		}
	}

	/// Replay every orphan that became complete now that `parent` is
	/// available. Failures discard the orphan and flag the original peer;
	/// successes cascade.
	fn handle_orphans(&mut self, parent: &Hash) -> Result<(), PoolError> {
		let resolved = self.orphans.resolve(parent);
		for (ohash, orphan) in resolved {
			let tx = match orphan.tx() {
				Ok(tx) => tx,
				Err(e) => {
					warn!("pool: dropping undecodable orphan {}: {}", ohash, e);
					continue;
				}
			};
			let has_witness = tx.has_witness();
			self.adapter.orphan_removed(&ohash);

			match self.insert_tx(tx, orphan.peer_id) {
				Ok(Accepted::Entry) => {
					debug!("pool: resolved orphan {}", ohash);
					self.handle_orphans(&ohash)?;
				}
				Ok(Accepted::Orphan(_)) => {
					// still waiting on some other parent
				}
				Err(PoolError::Verify(err)) => {
					if !has_witness && !err.malleated {
						self.rejects.add(ohash.as_bytes());
					}
					debug!("pool: verification failed for orphan {}: {}", ohash, err);
					self.adapter.bad_orphan(&err, orphan.peer_id);
				}
				Err(e) => return Err(e),
			}
		}
		Ok(())
	}

	/// Reconcile the pool with a newly connected block: confirmed entries
	/// leave, double spends of confirmed inputs are evicted, and orphans
	/// whose missing parent was just mined get their chance.
	pub fn add_block(&mut self, block: &BlockHeader, txs: &[Transaction]) -> Result<(), PoolError> {
		let block_hash = block.hash();
		let mut confirmed = vec![];

		for tx in txs.iter().rev() {
			if tx.is_coinbase() {
				continue;
			}
			let hash = tx.hash();
			if self.pool.has(&hash) {
				if let Some(entry) = self.pool.remove_entry(&hash) {
					self.forget_entry(&entry)?;
					self.adapter.tx_confirmed(&entry, &block_hash);
					confirmed.push(entry);
				}
			} else {
				self.remove_orphan(&hash);
				self.remove_double_spends(tx)?;
				if self.orphans.has_waiting(&hash) {
					self.handle_orphans(&hash)?;
				}
			}
		}

		self.rejects.reset();
		if let Some(estimator) = &mut self.estimator {
			estimator.process_block(block.height, &confirmed, self.blockchain.synced());
		}
		self.pool.tip = block_hash;

		if let Some(cache) = &mut self.cache {
			if let Some(estimator) = &self.estimator {
				cache.save_fee(estimator)?;
			}
			cache.sync(&block_hash)?;
		}

		info!(
			"pool: added block {} (confirmed: {}, txs: {})",
			block.height,
			confirmed.len(),
			self.pool.count()
		);
		Ok(())
	}

	/// Reconcile the pool with a disconnected block: its transactions are
	/// offered back to the pool as unconfirmed. Individual rejections are
	/// reported and skipped rather than aborting the batch.
	pub fn remove_block(
		&mut self,
		block: &BlockHeader,
		txs: &[Transaction],
	) -> Result<(), PoolError> {
		let mut total = 0;

		for tx in txs.iter().rev() {
			if tx.is_coinbase() {
				continue;
			}
			let hash = tx.hash();
			if self.pool.has(&hash) {
				continue;
			}
			match self.insert_tx(tx.clone(), -1) {
				Ok(Accepted::Entry) => {
					total += 1;
					self.adapter.tx_unconfirmed(tx);
					self.handle_orphans(&hash)?;
				}
				Ok(Accepted::Orphan(_)) => {}
				Err(PoolError::Verify(err)) => {
					debug!("pool: could not reinsert {}: {}", hash, err);
					self.adapter.reinsert_failed(tx, &err);
				}
				Err(e) => return Err(e),
			}
		}

		self.rejects.reset();
		self.pool.tip = block.prev_hash;
		if let Some(cache) = &mut self.cache {
			cache.sync(&block.prev_hash)?;
		}

		info!(
			"pool: removed block {} (reinserted: {}, txs: {})",
			block.height,
			total,
			self.pool.count()
		);
		Ok(())
	}

	/// After a reorganization, scan every entry for conditions the new
	/// chain may have invalidated: absolute lock times, relative lock times
	/// on v2 transactions, and spends of now-immature coinbases.
	pub fn handle_reorg(&mut self) -> Result<(), PoolError> {
		let tip = self.blockchain.tip()?;
		let next_height = tip.height + 1;
		let mtp = self.blockchain.get_median_time(&tip)?;

		let mut doomed = vec![];
		for entry in self.pool.entries() {
			let tx = &entry.tx;
			if !tx.is_final(next_height, mtp) {
				doomed.push(entry.hash);
				continue;
			}
			if tx.version >= 2
				&& tx
					.inputs
					.iter()
					.any(|i| i.sequence & SEQUENCE_DISABLE_FLAG == 0)
			{
				doomed.push(entry.hash);
				continue;
			}
			if entry.coinbase {
				doomed.push(entry.hash);
			}
		}

		info!(
			"pool: reorg sanitizing, removing {} of {} entries",
			doomed.len(),
			self.pool.count()
		);
		for hash in doomed {
			self.evict_entry(&hash)?;
		}
		Ok(())
	}

	/// Manually bump an entry's priority and fee, keeping the ancestor fee
	/// sums consistent around the change. Unknown ids are ignored.
	pub fn prioritise(&mut self, hash: &Hash, priority_delta: i64, fee_delta: i64) {
		if !self.pool.has(hash) {
			return;
		}
		let max = self.config.max_ancestors;
		self.pool
			.update_ancestors(hash, max, FeeUpdate::PrePrioritise);
		if let Some(entry) = self.pool.get_mut(hash) {
			entry.priority += priority_delta;
			entry.delta_fee += fee_delta;
			entry.desc_fee += fee_delta;
		}
		self.pool
			.update_ancestors(hash, max, FeeUpdate::PostPrioritise);

		if let Some(cache) = &mut self.cache {
			if let Some(entry) = self.pool.get(hash) {
				if let Err(e) = cache.save_entry(entry) {
					warn!("pool: failed to persist prioritised {}: {}", hash, e);
				}
			}
		}
		debug!(
			"pool: prioritised {} (priority: {:+}, fee: {:+})",
			hash, priority_delta, fee_delta
		);
	}

	/// Drop the entire pool state, re-anchoring at the chain's current tip.
	pub fn reset(&mut self) -> Result<(), PoolError> {
		let tip = self.blockchain.tip()?.hash();
		self.pool.clear();
		self.pool.tip = tip;
		self.orphans.clear();
		self.rejects.reset();
		self.free_count = 0.0;
		self.last_time = Utc::now().timestamp();
		if let Some(estimator) = &mut self.estimator {
			estimator.reset();
		}
		if let Some(index) = &mut self.tx_index {
			index.clear();
		}
		if let Some(index) = &mut self.coin_index {
			index.clear();
		}
		if let Some(cache) = &mut self.cache {
			cache.reset(&tip)?;
		}
		info!("pool: reset");
		Ok(())
	}

	/// Flush anything still buffered to the cache. Called on shutdown.
	pub fn close(&mut self) -> Result<(), PoolError> {
		if let Some(cache) = &mut self.cache {
			if let Some(estimator) = &self.estimator {
				cache.save_fee(estimator)?;
			}
			cache.flush()?;
		}
		Ok(())
	}
}
