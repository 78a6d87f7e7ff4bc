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

//! Priority queue ordering pool entries by effective fee rate, used to pick
//! eviction victims.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use kestrel_core::core::Hash;

use crate::types::PoolEntry;

/// The rate an entry is judged by when the pool overflows. An entry with
/// descendants paying a better rate than its own is protected by the package
/// rate; otherwise it stands on its own fee.
#[derive(Clone, Debug, Eq, PartialEq)]
struct RateKey {
	fee: i64,
	size: u64,
	time: i64,
	hash: Hash,
}

impl RateKey {
	fn from_entry(entry: &PoolEntry) -> RateKey {
		// the package view wins when desc_fee/desc_size > delta_fee/size
		let use_desc = (entry.desc_fee as i128) * (entry.size as i128)
			> (entry.delta_fee as i128) * (entry.desc_size as i128);
		let (fee, size) = if use_desc {
			(entry.desc_fee, entry.desc_size)
		} else {
			(entry.delta_fee, entry.size)
		};
		RateKey {
			fee,
			size,
			time: entry.time,
			hash: entry.hash,
		}
	}
}

impl Ord for RateKey {
	fn cmp(&self, other: &RateKey) -> Ordering {
		let lhs = (self.fee as i128) * (other.size as i128);
		let rhs = (other.fee as i128) * (self.size as i128);
		lhs.cmp(&rhs)
			.then_with(|| self.time.cmp(&other.time))
			.then_with(|| self.hash.cmp(&other.hash))
	}
}

impl PartialOrd for RateKey {
	fn partial_cmp(&self, other: &RateKey) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// Min-heap over entries, popping the worst effective fee rate first, older
/// entries before newer on ties.
pub struct FeeHeap {
	heap: BinaryHeap<Reverse<RateKey>>,
}

impl FeeHeap {
	/// An empty heap.
	pub fn new() -> FeeHeap {
		FeeHeap {
			heap: BinaryHeap::new(),
		}
	}

	/// Queue an entry for consideration.
	pub fn push(&mut self, entry: &PoolEntry) {
		self.heap.push(Reverse(RateKey::from_entry(entry)));
	}

	/// Pop the hash of the entry with the worst rate.
	pub fn pop(&mut self) -> Option<Hash> {
		self.heap.pop().map(|Reverse(key)| key.hash)
	}

	/// Number of queued entries.
	pub fn len(&self) -> usize {
		self.heap.len()
	}

	/// Whether the heap is empty.
	pub fn is_empty(&self) -> bool {
		self.heap.is_empty()
	}
}

impl Default for FeeHeap {
	fn default() -> FeeHeap {
		FeeHeap::new()
	}
}
