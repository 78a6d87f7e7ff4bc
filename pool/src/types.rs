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

//! Base types for the transaction pool implementation.

use std::fmt;

use chrono::Utc;
use failure::Fail;
use serde_derive::{Deserialize, Serialize};

use kestrel_core::consensus::COIN;
use kestrel_core::core::{BlockHeader, Coin, CoinView, Hash, OutPoint, Transaction};
use kestrel_core::ser::{self, Readable, Reader, Writeable, Writer};

/// Entries whose running priority exceeds this threshold qualify for free
/// relay: roughly one coin aged a day, per 250 bytes.
pub const FREE_THRESHOLD: i64 = (COIN as i64) * 144 / 250;

/// Approximate bookkeeping overhead of an entry beyond its raw transaction
/// bytes, counted against the pool's byte budget.
const MEM_OVERHEAD: u64 = 160;

/// The minimum fee required to relay a transaction of the given virtual
/// size at the given per-kilobyte rate.
pub fn get_min_fee(size: u64, rate: u64) -> u64 {
	size * rate / 1000
}

/// Where we heard about a tx from.
#[derive(Clone, Debug)]
pub struct TxSource {
	/// Human-readable name used for logging and errors.
	pub debug_name: String,
	/// Identifier of the originating peer, -1 for local submissions.
	pub peer_id: i32,
}

impl TxSource {
	/// A local (non-peer) source.
	pub fn local() -> TxSource {
		TxSource {
			debug_name: "local".to_string(),
			peer_id: -1,
		}
	}
}

/// Classification of a transaction rejection, mirroring the reject codes
/// relayed back to peers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Rejection {
	/// Breaks a consensus rule.
	Invalid,
	/// Valid but violates local relay policy.
	Nonstandard,
	/// We already have it, in the pool or on chain.
	AlreadyKnown,
	/// Conflicts with something we already have.
	Duplicate,
	/// Pays less than the relay floor.
	InsufficientFee,
	/// Pays absurdly more than needed.
	HighFee,
}

impl fmt::Display for Rejection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Rejection::Invalid => "invalid",
			Rejection::Nonstandard => "nonstandard",
			Rejection::AlreadyKnown => "alreadyknown",
			Rejection::Duplicate => "duplicate",
			Rejection::InsufficientFee => "insufficientfee",
			Rejection::HighFee => "highfee",
		};
		write!(f, "{}", s)
	}
}

/// The one externally-visible failure class of transaction admission.
#[derive(Clone, Debug, Eq, PartialEq, Fail)]
#[fail(display = "{}: {} ({})", hash, reason, code)]
pub struct VerifyError {
	/// Hash of the offending transaction.
	pub hash: Hash,
	/// Rejection classification.
	pub code: Rejection,
	/// Relay-level reason code.
	pub reason: &'static str,
	/// Misbehavior score assigned to the relaying peer.
	pub score: u32,
	/// Set when the failure may have been caused by a third party stripping
	/// or mutating witness data, in which case the reject cache must not be
	/// poisoned with the tx hash.
	pub malleated: bool,
}

impl VerifyError {
	/// A plain verification error.
	pub fn new(hash: Hash, code: Rejection, reason: &'static str, score: u32) -> VerifyError {
		VerifyError {
			hash,
			code,
			reason,
			score,
			malleated: false,
		}
	}

	/// A verification error attributable to witness malleation.
	pub fn malleated(
		hash: Hash,
		code: Rejection,
		reason: &'static str,
		score: u32,
	) -> VerifyError {
		VerifyError {
			hash,
			code,
			reason,
			score,
			malleated: true,
		}
	}
}

/// Pool-level errors. Verification failures are the ordinary rejection path;
/// everything else is a collaborator failing underneath us.
#[derive(Debug, Fail)]
pub enum PoolError {
	/// The transaction failed admission.
	#[fail(display = "{}", _0)]
	Verify(VerifyError),
	/// The chain collaborator failed.
	#[fail(display = "chain error: {}", _0)]
	Chain(String),
	/// The backing store failed.
	#[fail(display = "store error: {}", _0)]
	Store(kestrel_store::Error),
	/// A serialization failed.
	#[fail(display = "serialization error: {}", _0)]
	Ser(ser::Error),
	/// Anything else.
	#[fail(display = "{}", _0)]
	Other(String),
}

impl From<VerifyError> for PoolError {
	fn from(e: VerifyError) -> PoolError {
		PoolError::Verify(e)
	}
}

impl From<kestrel_store::Error> for PoolError {
	fn from(e: kestrel_store::Error) -> PoolError {
		PoolError::Store(e)
	}
}

impl From<ser::Error> for PoolError {
	fn from(e: ser::Error) -> PoolError {
		PoolError::Ser(e)
	}
}

/// Outcome of a successful transaction submission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Accepted {
	/// The transaction was validated and entered the pool.
	Entry,
	/// The transaction is missing the listed parents and was buffered as an
	/// orphan.
	Orphan(Vec<Hash>),
}

/// Transaction pool configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
	/// Total byte budget for the pool; eviction targets 90% of this on
	/// overflow.
	#[serde(default = "default_max_size")]
	pub max_size: u64,
	/// Hard cap on the number of buffered orphans.
	#[serde(default = "default_max_orphans")]
	pub max_orphans: usize,
	/// Hard cap on the in-pool ancestor count of any admitted tx.
	#[serde(default = "default_max_ancestors")]
	pub max_ancestors: usize,
	/// Seconds after which a dependency-free entry may be purged.
	#[serde(default = "default_expiry_time")]
	pub expiry_time: i64,
	/// Minimum relay fee rate, in grains per kilobyte.
	#[serde(default = "default_min_relay_fee")]
	pub min_relay_fee: u64,
	/// Whether to relay below-fee transactions at all, rate-limited.
	#[serde(default = "default_true")]
	pub limit_free: bool,
	/// Kilobytes per minute of free transactions allowed through the
	/// throttle.
	#[serde(default = "default_limit_free_relay")]
	pub limit_free_relay: u64,
	/// Whether high-priority transactions may skip the fee floor.
	#[serde(default = "default_true")]
	pub relay_priority: bool,
	/// Whether to enforce standardness policy on top of consensus rules.
	#[serde(default = "default_true")]
	pub require_standard: bool,
	/// Whether to reject fees beyond 10000x the floor.
	#[serde(default = "default_true")]
	pub reject_absurd_fees: bool,
	/// Whether to admit transactions signalling opt-in replacement.
	#[serde(default)]
	pub replace_by_fee: bool,
	/// Whether to maintain the address-indexed views of the pool.
	#[serde(default)]
	pub index_address: bool,
	/// Whether to feed the fee estimator.
	#[serde(default = "default_true")]
	pub estimate_fee: bool,
	/// Directory for the on-disk cache; in-memory only when unset.
	#[serde(default)]
	pub persistent_db: Option<String>,
}

fn default_max_size() -> u64 {
	100_000_000
}
fn default_max_orphans() -> usize {
	100
}
fn default_max_ancestors() -> usize {
	25
}
fn default_expiry_time() -> i64 {
	72 * 60 * 60
}
fn default_min_relay_fee() -> u64 {
	1_000
}
fn default_limit_free_relay() -> u64 {
	15
}
fn default_true() -> bool {
	true
}

impl Default for PoolConfig {
	fn default() -> PoolConfig {
		PoolConfig {
			max_size: default_max_size(),
			max_orphans: default_max_orphans(),
			max_ancestors: default_max_ancestors(),
			expiry_time: default_expiry_time(),
			min_relay_fee: default_min_relay_fee(),
			limit_free: true,
			limit_free_relay: default_limit_free_relay(),
			relay_priority: true,
			require_standard: true,
			reject_absurd_fees: true,
			replace_by_fee: false,
			index_address: false,
			estimate_fee: true,
			persistent_db: None,
		}
	}
}

/// A transaction wrapped with the bookkeeping the pool maintains for it.
/// `desc_fee` and `desc_size` accumulate the entry's own adjusted fee and
/// size plus those of every in-pool descendant, and drive the eviction
/// comparator.
#[derive(Clone, Debug, PartialEq)]
pub struct PoolEntry {
	/// The transaction itself.
	pub tx: Transaction,
	/// Memoized transaction id.
	pub hash: Hash,
	/// Virtual size in bytes.
	pub size: u64,
	/// Signature operation cost.
	pub sigops: u32,
	/// Fee paid by the transaction.
	pub fee: u64,
	/// Fee adjusted by manual prioritisation.
	pub delta_fee: i64,
	/// Priority at entry, from the value and age of the coins spent.
	pub priority: i64,
	/// Total value of the coins spent.
	pub value: u64,
	/// Whether any coin spent is a coinbase output.
	pub coinbase: bool,
	/// Chain height when the entry was admitted.
	pub height: u32,
	/// Unix time when the entry was admitted.
	pub time: i64,
	/// Adjusted fee of this entry plus all current descendants.
	pub desc_fee: i64,
	/// Virtual size of this entry plus all current descendants.
	pub desc_size: u64,
	/// Identifier of the peer the transaction came from, -1 for local.
	pub peer_id: i32,
}

impl PoolEntry {
	/// Build an entry from a transaction and the fully-resolved view of the
	/// coins it spends.
	pub fn new(tx: Transaction, view: &CoinView, height: u32, peer_id: i32) -> PoolEntry {
		let hash = tx.hash();
		let size = tx.virtual_size();
		let sigops = tx.sigops_cost(view);
		let value = tx.input_value(view);
		let fee = value.saturating_sub(tx.output_value());

		let mut priority: i64 = 0;
		let mut coinbase = false;
		for input in &tx.inputs {
			if let Some(coin) = view.get_entry(&input.prevout) {
				if coin.coinbase {
					coinbase = true;
				}
				if coin.height >= 0 {
					let age = i64::from(height).saturating_sub(i64::from(coin.height));
					priority += coin.value as i64 * age.max(0);
				}
			}
		}
		priority /= size as i64;

		PoolEntry {
			hash,
			size,
			sigops,
			fee,
			delta_fee: fee as i64,
			priority,
			value,
			coinbase,
			height,
			time: Utc::now().timestamp(),
			desc_fee: fee as i64,
			desc_size: size,
			peer_id,
			tx,
		}
	}

	/// Bytes this entry counts against the pool's budget.
	pub fn mem_usage(&self) -> u64 {
		self.tx.total_size() as u64 + MEM_OVERHEAD
	}

	/// Priority of the entry at the given chain height. Coins age while the
	/// entry sits in the pool.
	pub fn get_priority(&self, height: u32) -> i64 {
		let delta = i64::from(height) - i64::from(self.height);
		let earned = delta.max(0).saturating_mul(self.value as i64) / self.size as i64;
		self.priority + earned
	}

	/// Whether the entry qualifies for free relay at the given height.
	pub fn is_free(&self, height: u32) -> bool {
		self.get_priority(height) > FREE_THRESHOLD
	}

	/// Fee rate of the entry in grains per kilobyte, before prioritisation.
	pub fn fee_rate(&self) -> u64 {
		self.fee * 1000 / self.size
	}
}

impl Writeable for PoolEntry {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.tx.write(writer)?;
		writer.write_u64(self.size)?;
		writer.write_u32(self.sigops)?;
		writer.write_u64(self.fee)?;
		writer.write_i64(self.delta_fee)?;
		writer.write_i64(self.priority)?;
		writer.write_u64(self.value)?;
		writer.write_u8(self.coinbase as u8)?;
		writer.write_u32(self.height)?;
		writer.write_i64(self.time)?;
		writer.write_i64(self.desc_fee)?;
		writer.write_u64(self.desc_size)?;
		writer.write_i32(self.peer_id)
	}
}

impl Readable for PoolEntry {
	fn read(reader: &mut dyn Reader) -> Result<PoolEntry, ser::Error> {
		let tx = Transaction::read(reader)?;
		let hash = tx.hash();
		let size = reader.read_u64()?;
		let sigops = reader.read_u32()?;
		let fee = reader.read_u64()?;
		let delta_fee = reader.read_i64()?;
		let priority = reader.read_i64()?;
		let value = reader.read_u64()?;
		let coinbase = reader.read_u8()? != 0;
		let height = reader.read_u32()?;
		let time = reader.read_i64()?;
		let desc_fee = reader.read_i64()?;
		let desc_size = reader.read_u64()?;
		let peer_id = reader.read_i32()?;
		Ok(PoolEntry {
			tx,
			hash,
			size,
			sigops,
			fee,
			delta_fee,
			priority,
			value,
			coinbase,
			height,
			time,
			desc_fee,
			desc_size,
			peer_id,
		})
	}
}

/// Bridge to the blockchain the pool validates against. All suspension
/// points of the admission pipeline go through this trait.
pub trait BlockChain: Sync + Send {
	/// Header of the current chain tip.
	fn tip(&self) -> Result<BlockHeader, PoolError>;
	/// Whether initial sync has completed.
	fn synced(&self) -> bool;
	/// Whether relative lock times have activated.
	fn has_csv(&self) -> bool;
	/// Whether segregated witness has activated.
	fn has_witness(&self) -> bool;
	/// Median time past of the given header.
	fn get_median_time(&self, header: &BlockHeader) -> Result<i64, PoolError>;
	/// Whether the chain still holds unspent coins created by this
	/// transaction.
	fn has_coins(&self, tx: &Transaction) -> Result<bool, PoolError>;
	/// Read a single coin out of the chain's UTXO set.
	fn read_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, PoolError>;
	/// Whether the transaction is final on top of the given tip.
	fn verify_final(&self, tip: &BlockHeader, tx: &Transaction, flags: u32)
		-> Result<bool, PoolError>;
	/// Whether all BIP68 relative locks are satisfied on top of the given
	/// tip.
	fn verify_locks(
		&self,
		tip: &BlockHeader,
		tx: &Transaction,
		view: &CoinView,
		flags: u32,
	) -> Result<bool, PoolError>;
}

/// Script and signature verification, delegated to a worker pool.
pub trait ScriptVerifier: Sync + Send {
	/// Verify every input of the transaction against its coin under the
	/// given flags.
	fn verify(&self, tx: &Transaction, view: &CoinView, flags: u32) -> Result<bool, PoolError>;
}

/// A verifier that accepts everything. Stands in where the surrounding node
/// has not wired up its verification workers, and in tests.
pub struct NoopVerifier;

impl ScriptVerifier for NoopVerifier {
	fn verify(&self, _tx: &Transaction, _view: &CoinView, _flags: u32) -> Result<bool, PoolError> {
		Ok(true)
	}
}

/// Interface the pool uses to notify the rest of the system of the events it
/// produces. All methods default to no-ops; implementors pick what they care
/// about.
pub trait PoolAdapter: Send + Sync {
	/// A transaction passed verification and is about to be tracked.
	fn tx_accepted(&self, _entry: &PoolEntry) {}
	/// An entry was inserted into the pool.
	fn entry_added(&self, _entry: &PoolEntry) {}
	/// A transaction was buffered as an orphan, waiting on missing parents.
	fn orphan_added(&self, _tx: &Transaction, _missing: &[Hash]) {}
	/// An entry left the pool because a block confirmed it.
	fn tx_confirmed(&self, _entry: &PoolEntry, _block: &Hash) {}
	/// An entry left the pool for any reason.
	fn entry_removed(&self, _entry: &PoolEntry) {}
	/// An orphan was dropped.
	fn orphan_removed(&self, _hash: &Hash) {}
	/// An entry was evicted because a confirmed transaction spent one of its
	/// inputs.
	fn double_spend(&self, _entry: &PoolEntry) {}
	/// An incoming transaction conflicted with an in-pool spend.
	fn conflict(&self, _tx: &Transaction) {}
	/// A resolved orphan failed verification.
	fn bad_orphan(&self, _err: &VerifyError, _peer_id: i32) {}
	/// A transaction returned to the pool after its block was disconnected.
	fn tx_unconfirmed(&self, _tx: &Transaction) {}
	/// A disconnected block's transaction could not be reinserted.
	fn reinsert_failed(&self, _tx: &Transaction, _err: &VerifyError) {}
}

/// Dummy adapter used as a placeholder where a node does not care about
/// pool events.
pub struct NoopAdapter;

impl PoolAdapter for NoopAdapter {}
