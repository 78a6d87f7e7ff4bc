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

//! All the rules required for a cryptocurrency to have reach consensus across
//! the whole network are complex and hard to completely isolate. Some can be
//! simple parameters (like block reward), others complex algorithms (like
//! locktime evaluation). However, as much of these settings as possible
//! should be kept as constants here.

use crate::core::coins::CoinView;
use crate::core::transaction::Transaction;

/// A kestrel is divisible to 10^8, the smallest unit being a grain.
pub const COIN: u64 = 100_000_000;

/// Total supply cap, in grains. No transaction output or fee may exceed it.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

/// Number of blocks a coinbase output must age before it can be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Maximum weight of a block, where weight counts base bytes at 4x.
pub const MAX_BLOCK_WEIGHT: u64 = 4_000_000;

/// Maximum weight of a single transaction.
pub const MAX_TX_WEIGHT: u64 = 400_000;

/// Maximum signature operation cost a single transaction may carry.
pub const MAX_TX_SIGOPS_COST: u32 = 80_000;

/// Scale factor between weight units and virtual bytes.
pub const WITNESS_SCALE_FACTOR: u64 = 4;

/// Highest transaction version relayed as standard.
pub const MAX_TX_VERSION: u32 = 2;

/// Maximum size of a locking or unlocking script, in bytes.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum payload of a null-data (data carrier) output relayed as standard.
pub const MAX_NULLDATA_SIZE: usize = 83;

/// Maximum size of a single witness stack item relayed as standard.
pub const MAX_WITNESS_ITEM_SIZE: usize = 3_600;

/// Lock times below this threshold are interpreted as block heights,
/// those equal or above as unix timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Sequence number bit signalling the relative lock time is disabled.
pub const SEQUENCE_DISABLE_FLAG: u32 = 1 << 31;

/// Sequence number bit signalling a time-based (rather than height-based)
/// relative lock.
pub const SEQUENCE_TYPE_FLAG: u32 = 1 << 22;

/// Mask extracting the relative lock value from a sequence number.
pub const SEQUENCE_MASK: u32 = 0x0000_ffff;

/// Time-based relative locks count in units of 2^9 (512) seconds.
pub const SEQUENCE_GRANULARITY: u32 = 9;

/// Script verification: evaluate pay-to-script-hash subscripts.
pub const VERIFY_P2SH: u32 = 1 << 0;
/// Script verification: enforce strict DER signature encoding.
pub const VERIFY_DERSIG: u32 = 1 << 2;
/// Script verification: enforce low-S signatures.
pub const VERIFY_LOW_S: u32 = 1 << 3;
/// Script verification: dummy multisig stack element must be null.
pub const VERIFY_NULLDUMMY: u32 = 1 << 4;
/// Script verification: require minimal push encodings.
pub const VERIFY_MINIMALDATA: u32 = 1 << 6;
/// Script verification: reject upgradable NOPs (policy).
pub const VERIFY_DISCOURAGE_UPGRADABLE_NOPS: u32 = 1 << 7;
/// Script verification: stack must hold exactly one element after evaluation.
pub const VERIFY_CLEANSTACK: u32 = 1 << 8;
/// Script verification: evaluate OP_CHECKLOCKTIMEVERIFY.
pub const VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;
/// Script verification: evaluate OP_CHECKSEQUENCEVERIFY.
pub const VERIFY_CHECKSEQUENCEVERIFY: u32 = 1 << 10;
/// Script verification: evaluate witness programs.
pub const VERIFY_WITNESS: u32 = 1 << 11;
/// Script verification: reject unknown witness program versions (policy).
pub const VERIFY_DISCOURAGE_UPGRADABLE_WITNESS: u32 = 1 << 12;
/// Script verification: minimal if/notif arguments.
pub const VERIFY_MINIMALIF: u32 = 1 << 13;
/// Script verification: failed CHECKSIG must leave an empty signature.
pub const VERIFY_NULLFAIL: u32 = 1 << 14;
/// Script verification: witness pubkeys must be compressed (policy).
pub const VERIFY_WITNESS_PUBKEYTYPE: u32 = 1 << 15;

/// Flags every relayed transaction must pass. Blocks are validated with
/// these as well.
pub const MANDATORY_VERIFY_FLAGS: u32 = VERIFY_P2SH
	| VERIFY_DERSIG
	| VERIFY_NULLDUMMY
	| VERIFY_CHECKLOCKTIMEVERIFY
	| VERIFY_CHECKSEQUENCEVERIFY
	| VERIFY_WITNESS;

/// Local policy flags applied on top of the mandatory set for mempool
/// acceptance.
pub const STANDARD_VERIFY_FLAGS: u32 = MANDATORY_VERIFY_FLAGS
	| VERIFY_LOW_S
	| VERIFY_MINIMALDATA
	| VERIFY_DISCOURAGE_UPGRADABLE_NOPS
	| VERIFY_CLEANSTACK
	| VERIFY_DISCOURAGE_UPGRADABLE_WITNESS
	| VERIFY_MINIMALIF
	| VERIFY_NULLFAIL
	| VERIFY_WITNESS_PUBKEYTYPE;

/// Locktime evaluation: enforce BIP68 relative lock times.
pub const LOCKTIME_VERIFY_SEQUENCE: u32 = 1 << 0;
/// Locktime evaluation: use median-time-past rather than block time.
pub const LOCKTIME_MEDIAN_TIME_PAST: u32 = 1 << 1;

/// Locktime flags applied to everything entering the mempool.
pub const STANDARD_LOCKTIME_FLAGS: u32 = LOCKTIME_VERIFY_SEQUENCE | LOCKTIME_MEDIAN_TIME_PAST;

/// The floor a block must clear for an input's relative lock to be satisfied.
/// Heights and times of -1 are trivially satisfied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LockFloor {
	/// Minimum height of the including block, exclusive lower bound plus one.
	pub height: i64,
	/// Minimum median time past of the including block.
	pub time: i64,
}

/// Evaluate the BIP68 relative lock carried by a single input sequence
/// number against the height and median time of the block that created the
/// coin being spent. Returns None when the lock is disabled.
pub fn sequence_lock(sequence: u32, coin_height: u32, coin_median_time: i64) -> Option<LockFloor> {
	if sequence & SEQUENCE_DISABLE_FLAG != 0 {
		return None;
	}
	let value = i64::from(sequence & SEQUENCE_MASK);
	if sequence & SEQUENCE_TYPE_FLAG != 0 {
		Some(LockFloor {
			height: -1,
			time: coin_median_time + (value << SEQUENCE_GRANULARITY) - 1,
		})
	} else {
		Some(LockFloor {
			height: i64::from(coin_height) + value - 1,
			time: -1,
		})
	}
}

/// Aggregate every BIP68 relative lock a transaction carries and decide
/// whether a block at `next_height` could include it. Coins without a
/// confirmed height (unconfirmed parents) count as created by that block
/// itself. `median_time_past` is the median time of the chain the block
/// extends; `median_time_at` resolves the median time of the block at a
/// given height, which chain implementations look up from their header
/// index.
pub fn check_sequence_locks<F>(
	tx: &Transaction,
	view: &CoinView,
	next_height: u32,
	median_time_past: i64,
	flags: u32,
	median_time_at: F,
) -> bool
where
	F: Fn(u32) -> i64,
{
	if flags & LOCKTIME_VERIFY_SEQUENCE == 0 || tx.version < 2 {
		return true;
	}
	let mut floor = LockFloor {
		height: -1,
		time: -1,
	};
	for input in &tx.inputs {
		if input.sequence & SEQUENCE_DISABLE_FLAG != 0 {
			continue;
		}
		let coin = match view.get_entry(&input.prevout) {
			Some(coin) => coin,
			None => continue,
		};
		let coin_height = if coin.height < 0 {
			next_height
		} else {
			coin.height as u32
		};
		if let Some(lock) = sequence_lock(input.sequence, coin_height, median_time_at(coin_height))
		{
			floor.height = floor.height.max(lock.height);
			floor.time = floor.time.max(lock.time);
		}
	}
	i64::from(next_height) > floor.height && median_time_past > floor.time
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn disabled_sequence_has_no_lock() {
		assert_eq!(sequence_lock(SEQUENCE_DISABLE_FLAG | 10, 100, 1_000), None);
	}

	#[test]
	fn height_based_lock() {
		let floor = sequence_lock(10, 100, 1_000).unwrap();
		assert_eq!(floor.height, 109);
		assert_eq!(floor.time, -1);
	}

	#[test]
	fn time_based_lock() {
		let floor = sequence_lock(SEQUENCE_TYPE_FLAG | 2, 100, 1_000).unwrap();
		assert_eq!(floor.height, -1);
		assert_eq!(floor.time, 1_000 + 2 * 512 - 1);
	}

	#[test]
	fn aggregate_sequence_locks() {
		use crate::core::{Coin, CoinView, Hash, Input, OutPoint, Output, Script, Transaction};

		fn locked_tx(sequence: u32) -> (Transaction, CoinView) {
			let outpoint = OutPoint::new(Hash([1; 32]), 0);
			let mut input = Input::new(outpoint);
			input.sequence = sequence;
			let tx = Transaction {
				version: 2,
				inputs: vec![input],
				outputs: vec![Output {
					value: 1,
					script: Script::PubkeyHash([0; 20]),
				}],
				lock_time: 0,
			};
			let mut view = CoinView::new();
			view.add_entry(
				outpoint,
				Coin {
					value: 1,
					script: Script::PubkeyHash([0; 20]),
					height: 10,
					coinbase: false,
				},
			);
			(tx, view)
		}

		// a five block lock on a coin from height 10 clears at height 15
		let (tx, view) = locked_tx(5);
		let flags = STANDARD_LOCKTIME_FLAGS;
		assert!(check_sequence_locks(&tx, &view, 16, 1_000, flags, |_| 0));
		assert!(!check_sequence_locks(&tx, &view, 14, 1_000, flags, |_| 0));

		// version 1 and disabled sequences carry no locks
		let (mut v1, v1_view) = locked_tx(5);
		v1.version = 1;
		assert!(check_sequence_locks(&v1, &v1_view, 5, 0, flags, |_| 0));
		let (disabled, disabled_view) = locked_tx(SEQUENCE_DISABLE_FLAG | 5);
		assert!(check_sequence_locks(&disabled, &disabled_view, 5, 0, flags, |_| 0));
	}
}
