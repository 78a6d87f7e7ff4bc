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
use kestrel_core::core::{Hashed, OutPoint};

/// A connected block removes what it confirmed and leaves the rest.
#[test]
fn test_block_confirms_and_prunes() {
	let chain = Arc::new(ChainAdapter::new(1));
	let op1 = test_outpoint(1, 0);
	let op2 = test_outpoint(2, 0);
	chain.add_utxo(op1, 100_000, 1, false);
	chain.add_utxo(op2, 100_000, 1, false);

	let adapter = Arc::new(EventAdapter::new());
	let mut pool = test_setup_with(&chain, test_config(), adapter.clone());

	let tx1 = test_transaction(vec![op1], vec![90_000]);
	let tx1_hash = tx1.hash();
	let tx2 = test_transaction(vec![op2], vec![90_000]);
	let tx2_hash = tx2.hash();
	pool.add_tx(tx1.clone(), test_source()).unwrap();
	pool.add_tx(tx2, test_source()).unwrap();

	// poison the reject filter so we can observe the reset
	let double_spend = test_transaction(vec![op1], vec![80_000]);
	let rejected_hash = double_spend.hash();
	assert!(pool.add_tx(double_spend, test_source()).is_err());
	assert!(pool.has_reject(&rejected_hash));
	adapter.take();

	let header = chain.next_header();
	let txs = vec![test_coinbase(50_000, 1), tx1];
	chain.apply_block(&header, &txs);
	pool.add_block(&header, &txs).unwrap();

	assert!(!pool.has_entry(&tx1_hash));
	assert!(pool.has_entry(&tx2_hash));
	assert_eq!(pool.count(), 1);
	assert_eq!(pool.pool.tip, header.hash());
	assert!(!pool.has_reject(&rejected_hash));
	assert_eq!(adapter.take(), vec!["confirmed".to_string()]);
	assert_consistent(&pool);
}

/// Connecting then disconnecting the same block restores the pool.
#[test]
fn test_block_disconnect_reinserts() {
	let chain = Arc::new(ChainAdapter::new(1));
	let op1 = test_outpoint(1, 0);
	let op2 = test_outpoint(2, 0);
	chain.add_utxo(op1, 100_000, 1, false);
	chain.add_utxo(op2, 100_000, 1, false);

	let adapter = Arc::new(EventAdapter::new());
	let mut pool = test_setup_with(&chain, test_config(), adapter.clone());

	let tx1 = test_transaction(vec![op1], vec![90_000]);
	let tx1_hash = tx1.hash();
	let tx2 = test_transaction(vec![op2], vec![90_000]);
	let tx2_hash = tx2.hash();
	pool.add_tx(tx1.clone(), test_source()).unwrap();
	pool.add_tx(tx2, test_source()).unwrap();

	let original_tip = chain.tip_header();
	let header = chain.next_header();
	let txs = vec![test_coinbase(50_000, 1), tx1.clone()];
	chain.apply_block(&header, &txs);
	pool.add_block(&header, &txs).unwrap();
	assert_eq!(pool.count(), 1);
	adapter.take();

	// disconnect: unwind the chain state, then tell the pool
	for (i, _) in tx1.outputs.iter().enumerate() {
		chain.remove_utxo(&OutPoint::new(tx1_hash, i as u32));
	}
	let coinbase_hash = txs[0].hash();
	for (i, _) in txs[0].outputs.iter().enumerate() {
		chain.remove_utxo(&OutPoint::new(coinbase_hash, i as u32));
	}
	chain.add_utxo(op1, 100_000, 1, false);
	chain.set_tip(original_tip.clone());
	pool.remove_block(&header, &txs).unwrap();

	assert_eq!(pool.count(), 2);
	assert!(pool.has_entry(&tx1_hash));
	assert!(pool.has_entry(&tx2_hash));
	assert_eq!(pool.pool.tip, header.prev_hash);
	assert_eq!(pool.pool.tip, original_tip.hash());
	let events = adapter.take();
	assert!(events.contains(&"unconfirmed".to_string()));
	assert_consistent(&pool);
}

/// A block spending an input some pool entry also spends evicts that entry
/// and its descendants.
#[test]
fn test_block_evicts_double_spenders() {
	let chain = Arc::new(ChainAdapter::new(1));
	let op1 = test_outpoint(1, 0);
	chain.add_utxo(op1, 100_000, 1, false);

	let adapter = Arc::new(EventAdapter::new());
	let mut pool = test_setup_with(&chain, test_config(), adapter.clone());

	let pooled = test_transaction(vec![op1], vec![90_000]);
	let pooled_hash = pooled.hash();
	let dependent = test_transaction(vec![OutPoint::new(pooled_hash, 0)], vec![80_000]);
	let dependent_hash = dependent.hash();
	pool.add_tx(pooled, test_source()).unwrap();
	pool.add_tx(dependent, test_source()).unwrap();
	adapter.take();

	// the block confirms a different spender of op1
	let winner = test_transaction(vec![op1], vec![85_000]);
	let header = chain.next_header();
	let txs = vec![test_coinbase(50_000, 1), winner];
	chain.apply_block(&header, &txs);
	pool.add_block(&header, &txs).unwrap();

	assert!(!pool.has_entry(&pooled_hash));
	assert!(!pool.has_entry(&dependent_hash));
	assert_eq!(pool.count(), 0);
	let events = adapter.take();
	assert!(events.contains(&"double spend".to_string()));
	assert_consistent(&pool);
}

/// Mining an orphan's missing parent promotes the orphan into the pool.
#[test]
fn test_block_promotes_waiting_orphans() {
	let chain = Arc::new(ChainAdapter::new(1));
	let op1 = test_outpoint(1, 0);
	chain.add_utxo(op1, 100_000, 1, false);

	let mut pool = test_setup(&chain);

	let parent = test_transaction(vec![op1], vec![90_000]);
	let parent_hash = parent.hash();
	let orphan = test_transaction(vec![OutPoint::new(parent_hash, 0)], vec![80_000]);
	let orphan_hash = orphan.hash();

	// the orphan arrives while its parent is still unknown
	pool.add_tx(orphan, test_source()).unwrap();
	assert_eq!(pool.orphans.count(), 1);

	// the parent gets mined directly, never touching the pool
	let header = chain.next_header();
	let txs = vec![test_coinbase(50_000, 1), parent];
	chain.apply_block(&header, &txs);
	pool.add_block(&header, &txs).unwrap();

	assert_eq!(pool.orphans.count(), 0);
	assert!(pool.has_entry(&orphan_hash));
	assert_eq!(pool.count(), 1);
	assert_consistent(&pool);
}
