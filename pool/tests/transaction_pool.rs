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
use kestrel_core::core::OutPoint;
use kestrel_pool::{Accepted, PoolError, Rejection};

/// The simplest possible admission: one confirmed input, one output.
#[test]
fn test_simple_admit() {
	let chain = Arc::new(ChainAdapter::new(1));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100, 1, false);

	let adapter = Arc::new(EventAdapter::new());
	let mut pool = test_setup_with(&chain, test_config(), adapter.clone());

	let tx = test_transaction(vec![outpoint], vec![99]);
	let hash = tx.hash();
	let result = pool.add_tx(tx, test_source()).unwrap();
	assert_eq!(result, Accepted::Entry);

	assert_eq!(pool.count(), 1);
	assert!(pool.has_entry(&hash));
	assert!(pool.size() > 0);
	let entry = pool.get_entry(&hash).unwrap();
	assert_eq!(entry.fee, 1);
	assert_eq!(entry.peer_id, 8);
	assert_eq!(adapter.take(), vec!["tx".to_string(), "add entry".to_string()]);
	assert_consistent(&pool);
}

/// Spending the same confirmed output twice must reject the second spender
/// and flag the conflict.
#[test]
fn test_double_spend_rejected() {
	let chain = Arc::new(ChainAdapter::new(1));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100, 1, false);

	let adapter = Arc::new(EventAdapter::new());
	let mut pool = test_setup_with(&chain, test_config(), adapter.clone());

	pool.add_tx(test_transaction(vec![outpoint], vec![99]), test_source())
		.unwrap();
	adapter.take();

	let double_spend = test_transaction(vec![outpoint], vec![98]);
	match pool.add_tx(double_spend, test_source()) {
		Err(PoolError::Verify(err)) => {
			assert_eq!(err.code, Rejection::Duplicate);
			assert_eq!(err.reason, "bad-txns-inputs-spent");
		}
		other => panic!("expected a double spend rejection, got {:?}", other.ok()),
	}
	assert_eq!(adapter.take(), vec!["conflict".to_string()]);
	assert_eq!(pool.count(), 1);
	assert_consistent(&pool);
}

/// Adding the exact same transaction twice reports it as already known.
#[test]
fn test_duplicate_rejected() {
	let chain = Arc::new(ChainAdapter::new(1));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100, 1, false);

	let mut pool = test_setup(&chain);
	let tx = test_transaction(vec![outpoint], vec![99]);
	pool.add_tx(tx.clone(), test_source()).unwrap();

	match pool.add_tx(tx, test_source()) {
		Err(PoolError::Verify(err)) => {
			assert_eq!(err.code, Rejection::AlreadyKnown);
			assert_eq!(err.reason, "txn-already-in-mempool");
		}
		other => panic!("expected already-known, got {:?}", other.ok()),
	}
}

/// Coinbases never enter the pool, and carry the maximum score.
#[test]
fn test_coinbase_rejected() {
	let chain = Arc::new(ChainAdapter::new(1));
	let mut pool = test_setup(&chain);

	match pool.add_tx(test_coinbase(50, 1), test_source()) {
		Err(PoolError::Verify(err)) => {
			assert_eq!(err.code, Rejection::Invalid);
			assert_eq!(err.reason, "coinbase");
			assert_eq!(err.score, 100);
		}
		other => panic!("expected coinbase rejection, got {:?}", other.ok()),
	}
}

/// Replace-by-fee signalling is rejected wholesale unless enabled.
#[test]
fn test_rbf_policy() {
	let chain = Arc::new(ChainAdapter::new(1));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100, 1, false);

	let mut pool = test_setup(&chain);
	let mut tx = test_transaction(vec![outpoint], vec![99]);
	tx.inputs[0].sequence = 0;
	match pool.add_tx(tx.clone(), test_source()) {
		Err(PoolError::Verify(err)) => {
			assert_eq!(err.code, Rejection::Nonstandard);
			assert_eq!(err.reason, "replace-by-fee");
		}
		other => panic!("expected rbf rejection, got {:?}", other.ok()),
	}

	let mut config = test_config();
	config.replace_by_fee = true;
	let mut rbf_pool = test_setup_with(&chain, config, Arc::new(EventAdapter::new()));
	assert_eq!(rbf_pool.add_tx(tx, test_source()).unwrap(), Accepted::Entry);
}

/// A zero-confirmation chain: the child resolves its parent's output from
/// the pool and the ancestor fee sums roll up.
#[test]
fn test_zero_conf_chain() {
	let chain = Arc::new(ChainAdapter::new(1));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100_000, 1, false);

	let mut pool = test_setup(&chain);
	let parent = test_transaction(vec![outpoint], vec![90_000]);
	let parent_hash = parent.hash();
	let child = test_transaction(vec![OutPoint::new(parent_hash, 0)], vec![80_000]);
	let child_hash = child.hash();

	pool.add_tx(parent, test_source()).unwrap();
	pool.add_tx(child, test_source()).unwrap();

	assert_eq!(pool.count(), 2);
	let parent_entry = pool.get_entry(&parent_hash).unwrap();
	let child_entry = pool.get_entry(&child_hash).unwrap();
	assert_eq!(parent_entry.fee, 10_000);
	assert_eq!(child_entry.fee, 10_000);
	assert_eq!(
		parent_entry.desc_fee,
		parent_entry.delta_fee + child_entry.delta_fee
	);
	assert_eq!(
		parent_entry.desc_size,
		parent_entry.size + child_entry.size
	);
	assert_consistent(&pool);
}

/// Chains longer than max_ancestors are cut off.
#[test]
fn test_ancestor_limit() {
	let chain = Arc::new(ChainAdapter::new(1));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100_000, 1, false);

	let mut config = test_config();
	config.max_ancestors = 2;
	let mut pool = test_setup_with(&chain, config, Arc::new(EventAdapter::new()));

	let tx1 = test_transaction(vec![outpoint], vec![90_000]);
	let tx2 = test_transaction(
		vec![OutPoint::new(tx1.hash(), 0)],
		vec![80_000],
	);
	let tx3 = test_transaction(
		vec![OutPoint::new(tx2.hash(), 0)],
		vec![70_000],
	);

	pool.add_tx(tx1, test_source()).unwrap();
	pool.add_tx(tx2, test_source()).unwrap();
	match pool.add_tx(tx3, test_source()) {
		Err(PoolError::Verify(err)) => {
			assert_eq!(err.reason, "too-long-mempool-chain");
		}
		other => panic!("expected ancestor limit rejection, got {:?}", other.ok()),
	}
	assert_eq!(pool.count(), 2);
	assert_consistent(&pool);
}

/// Manual prioritisation shifts the adjusted fee and keeps every ancestor
/// sum consistent.
#[test]
fn test_prioritise() {
	let chain = Arc::new(ChainAdapter::new(1));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100_000, 1, false);

	let mut pool = test_setup(&chain);
	let parent = test_transaction(vec![outpoint], vec![90_000]);
	let parent_hash = parent.hash();
	let child = test_transaction(
		vec![OutPoint::new(parent_hash, 0)],
		vec![80_000],
	);
	let child_hash = child.hash();
	pool.add_tx(parent, test_source()).unwrap();
	pool.add_tx(child, test_source()).unwrap();

	pool.prioritise(&child_hash, 1_000, 5_000);

	let child_entry = pool.get_entry(&child_hash).unwrap();
	assert_eq!(child_entry.delta_fee, 15_000);
	let parent_entry = pool.get_entry(&parent_hash).unwrap();
	assert_eq!(
		parent_entry.desc_fee,
		parent_entry.delta_fee + child_entry.delta_fee
	);
	assert_consistent(&pool);

	// prioritising an unknown hash is a no-op
	pool.prioritise(&test_outpoint(9, 0).hash, 1, 1);
	assert_consistent(&pool);
}
