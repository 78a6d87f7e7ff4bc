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

pub mod common;

use std::sync::Arc;

use common::*;
use kestrel_core::core::transaction::SEQUENCE_FINAL;

/// A transaction spending a coinbase is evicted when a reorg may have made
/// the coinbase immature again.
#[test]
fn test_reorg_drops_coinbase_spend() {
	let chain = Arc::new(ChainAdapter::new(150));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100_000, 40, true);

	let mut pool = test_setup(&chain);
	let tx = test_transaction(vec![outpoint], vec![90_000]);
	let hash = tx.hash();
	pool.add_tx(tx, test_source()).unwrap();
	assert!(pool.get_entry(&hash).unwrap().coinbase);

	// the chain shrinks under us
	let mut shorter = chain.tip_header();
	shorter.height = 120;
	chain.set_tip(shorter);
	pool.handle_reorg().unwrap();

	assert!(!pool.has_entry(&hash));
	assert_eq!(pool.count(), 0);
	assert_consistent(&pool);
}

/// Entries that are no longer final at the new height are evicted.
#[test]
fn test_reorg_drops_nonfinal() {
	let chain = Arc::new(ChainAdapter::new(40));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100_000, 1, false);

	let mut pool = test_setup(&chain);
	let mut tx = test_transaction(vec![outpoint], vec![90_000]);
	tx.lock_time = 30;
	// a non-final sequence keeps the lock time in force
	tx.inputs[0].sequence = SEQUENCE_FINAL - 1;
	let hash = tx.hash();
	pool.add_tx(tx, test_source()).unwrap();

	let mut shorter = chain.tip_header();
	shorter.height = 20;
	chain.set_tip(shorter);
	pool.handle_reorg().unwrap();

	assert!(!pool.has_entry(&hash));
	assert_consistent(&pool);
}

/// Version-2 transactions with live relative locks are conservatively
/// evicted on reorg.
#[test]
fn test_reorg_drops_v2_sequence_locks() {
	let chain = Arc::new(ChainAdapter::new(40));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100_000, 10, false);

	let mut config = test_config();
	config.replace_by_fee = true;
	let mut pool = test_setup_with(&chain, config, Arc::new(EventAdapter::new()));

	let mut tx = test_transaction(vec![outpoint], vec![90_000]);
	tx.version = 2;
	// five-block relative lock, satisfied at the current height
	tx.inputs[0].sequence = 5;
	let hash = tx.hash();
	pool.add_tx(tx, test_source()).unwrap();

	pool.handle_reorg().unwrap();
	assert!(!pool.has_entry(&hash));

	// a disabled lock survives the same sweep
	let mut tx2 = test_transaction(vec![test_outpoint(2, 0)], vec![90_000]);
	chain.add_utxo(test_outpoint(2, 0), 100_000, 10, false);
	tx2.version = 2;
	tx2.inputs[0].sequence = kestrel_core::consensus::SEQUENCE_DISABLE_FLAG | 5;
	let hash2 = tx2.hash();
	pool.add_tx(tx2, test_source()).unwrap();
	pool.handle_reorg().unwrap();
	assert!(pool.has_entry(&hash2));
	assert_consistent(&pool);
}
