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

//! Unspent outputs and the coin views assembled for transaction validation.

use std::collections::HashMap;

use crate::core::script::Script;
use crate::core::transaction::{OutPoint, Transaction};

/// A single unspent output, annotated with where it came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Coin {
	/// Value of the output, in grains.
	pub value: u64,
	/// The locking script.
	pub script: Script,
	/// Height of the block that created the coin, -1 when still unconfirmed.
	pub height: i32,
	/// Whether the coin was created by a coinbase transaction.
	pub coinbase: bool,
}

/// The set of coins a transaction's inputs resolve against: some pulled from
/// the chain's UTXO set, some from unconfirmed parents. Slots left absent
/// mark missing parents.
#[derive(Clone, Debug, Default)]
pub struct CoinView {
	coins: HashMap<OutPoint, Coin>,
}

impl CoinView {
	/// An empty view.
	pub fn new() -> CoinView {
		CoinView {
			coins: HashMap::new(),
		}
	}

	/// Whether the view holds a coin for the given outpoint.
	pub fn has_entry(&self, outpoint: &OutPoint) -> bool {
		self.coins.contains_key(outpoint)
	}

	/// The coin for the given outpoint, if resolved.
	pub fn get_entry(&self, outpoint: &OutPoint) -> Option<&Coin> {
		self.coins.get(outpoint)
	}

	/// Add a coin under the given outpoint.
	pub fn add_entry(&mut self, outpoint: OutPoint, coin: Coin) {
		self.coins.insert(outpoint, coin);
	}

	/// Add the i-th output of the given transaction as a coin created at the
	/// given height. Heights of -1 mark unconfirmed parents.
	pub fn add_index(&mut self, tx: &Transaction, index: u32, height: i32) {
		let output = &tx.outputs[index as usize];
		self.add_entry(
			OutPoint::new(tx.hash(), index),
			Coin {
				value: output.value,
				script: output.script.clone(),
				height,
				coinbase: tx.is_coinbase(),
			},
		);
	}

	/// Number of resolved coins in the view.
	pub fn len(&self) -> usize {
		self.coins.len()
	}

	/// Whether the view is empty.
	pub fn is_empty(&self) -> bool {
		self.coins.is_empty()
	}
}
