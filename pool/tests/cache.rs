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

use std::fs;
use std::sync::Arc;

use common::*;
use kestrel_core::core::OutPoint;
use kestrel_pool::{NoopAdapter, NoopVerifier, TransactionPool};

fn clean_output_dir(db_root: &str) {
	if let Err(e) = fs::remove_dir_all(db_root) {
		if e.kind() != std::io::ErrorKind::NotFound {
			println!("cleaning output dir failed - {:?}", e)
		}
	}
}

/// A persistent pool reloads its entries, rebuilding the ancestor sums.
#[test]
fn test_cache_round_trip() {
	let db_root = "target/.kestrel_cache_round_trip";
	clean_output_dir(db_root);

	let chain = Arc::new(ChainAdapter::new(10));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100_000, 1, false);

	let mut config = test_config();
	config.persistent_db = Some(db_root.to_string());

	let parent = test_transaction(vec![outpoint], vec![99_000]);
	let parent_hash = parent.hash();
	let child = test_transaction(vec![OutPoint::new(parent_hash, 0)], vec![98_000]);
	let child_hash = child.hash();

	{
		let mut pool = TransactionPool::new(
			config.clone(),
			chain.clone(),
			Arc::new(NoopVerifier),
			Arc::new(NoopAdapter),
		)
		.unwrap();
		pool.add_tx(parent, test_source()).unwrap();
		pool.add_tx(child, test_source()).unwrap();
		pool.close().unwrap();
	}

	{
		let pool = TransactionPool::new(
			config.clone(),
			chain.clone(),
			Arc::new(NoopVerifier),
			Arc::new(NoopAdapter),
		)
		.unwrap();
		assert_eq!(pool.count(), 2);
		assert!(pool.has_entry(&parent_hash));
		assert!(pool.has_entry(&child_hash));
		let parent_entry = pool.get_entry(&parent_hash).unwrap();
		assert_eq!(parent_entry.fee, 1_000);
		assert_eq!(parent_entry.desc_fee, 2_000);
		assert_consistent(&pool);
	}

	clean_output_dir(db_root);
}

/// A cache anchored at a different tip than the chain is wiped on open.
#[test]
fn test_cache_wiped_on_stale_tip() {
	let db_root = "target/.kestrel_cache_stale_tip";
	clean_output_dir(db_root);

	let chain = Arc::new(ChainAdapter::new(10));
	let outpoint = test_outpoint(1, 0);
	chain.add_utxo(outpoint, 100_000, 1, false);

	let mut config = test_config();
	config.persistent_db = Some(db_root.to_string());

	{
		let mut pool = TransactionPool::new(
			config.clone(),
			chain.clone(),
			Arc::new(NoopVerifier),
			Arc::new(NoopAdapter),
		)
		.unwrap();
		pool.add_tx(test_transaction(vec![outpoint], vec![99_000]), test_source())
			.unwrap();
		pool.close().unwrap();
	}

	// the chain moves on while the pool is down
	let header = chain.next_header();
	chain.apply_block(&header, &[test_coinbase(50_000, 1)]);

	{
		let pool = TransactionPool::new(
			config.clone(),
			chain.clone(),
			Arc::new(NoopVerifier),
			Arc::new(NoopAdapter),
		)
		.unwrap();
		assert_eq!(pool.count(), 0);
	}

	clean_output_dir(db_root);
}
