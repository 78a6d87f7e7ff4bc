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

//! An approximate set of recently-seen items with a bounded memory
//! footprint. The filter rolls through three generations; once an item is
//! two full generations old it silently drops out. False positives happen at
//! the configured rate, false negatives only for items older than two
//! generations.

use blake2_rfc::blake2b::blake2b;
use rand::{thread_rng, Rng};

/// A rolling bloom filter. Bit positions store the 2-bit generation of the
/// last insert that touched them.
pub struct RollingFilter {
	entries_per_generation: u64,
	entries_this_generation: u64,
	generation: u64,
	num_hashes: u32,
	tweak: u32,
	data: Vec<u64>,
}

impl RollingFilter {
	/// Create a filter able to hold `items` elements at the given false
	/// positive rate.
	pub fn new(items: u32, fp_rate: f64) -> RollingFilter {
		let log_fp = fp_rate.ln();
		let num_hashes = ((log_fp / 0.5f64.ln()).round() as i64).max(1).min(50) as u32;
		let entries_per_generation = (u64::from(items) + 1) / 2;
		let max_elements = entries_per_generation * 3;
		let bits = (-1.0 * f64::from(num_hashes) * max_elements as f64
			/ (1.0 - (log_fp / f64::from(num_hashes)).exp()).ln())
		.ceil() as u64;
		let words = (((bits + 63) / 64) << 1) as usize;
		let mut filter = RollingFilter {
			entries_per_generation,
			entries_this_generation: 0,
			generation: 1,
			num_hashes,
			tweak: 0,
			data: vec![0; words],
		};
		filter.reset();
		filter
	}

	fn bit_pos(&self, n: u32, data: &[u8]) -> (usize, u64) {
		let mut key = [0u8; 8];
		key[..4].copy_from_slice(&n.to_le_bytes());
		key[4..].copy_from_slice(&self.tweak.to_le_bytes());
		let digest = blake2b(8, &key, data);
		let mut word = [0u8; 8];
		word.copy_from_slice(digest.as_bytes());
		let h = u64::from_le_bytes(word);
		let bit = h & 0x3f;
		let pos = (h >> 6) as usize % self.data.len();
		(pos, bit)
	}

	/// Add an item to the filter, rolling to the next generation when the
	/// current one fills up.
	pub fn add(&mut self, data: &[u8]) {
		if self.entries_this_generation == self.entries_per_generation {
			self.entries_this_generation = 0;
			self.generation += 1;
			if self.generation == 4 {
				self.generation = 1;
			}
			let mask1 = 0u64.wrapping_sub(self.generation & 1);
			let mask2 = 0u64.wrapping_sub(self.generation >> 1);
			// wipe the entries that carried this generation number
			for p in (0..self.data.len()).step_by(2) {
				let p1 = self.data[p];
				let p2 = self.data[p + 1];
				let mask = (p1 ^ mask1) | (p2 ^ mask2);
				self.data[p] = p1 & mask;
				self.data[p + 1] = p2 & mask;
			}
		}
		self.entries_this_generation += 1;

		for n in 0..self.num_hashes {
			let (pos, bit) = self.bit_pos(n, data);
			let lo = pos & !1;
			let hi = pos | 1;
			self.data[lo] = (self.data[lo] & !(1u64 << bit)) | ((self.generation & 1) << bit);
			self.data[hi] = (self.data[hi] & !(1u64 << bit)) | ((self.generation >> 1) << bit);
		}
	}

	/// Whether the filter has (probably) seen the item recently.
	pub fn contains(&self, data: &[u8]) -> bool {
		for n in 0..self.num_hashes {
			let (pos, bit) = self.bit_pos(n, data);
			if ((self.data[pos & !1] | self.data[pos | 1]) >> bit) & 1 == 0 {
				return false;
			}
		}
		true
	}

	/// Empty the filter and re-randomize its tweak.
	pub fn reset(&mut self) {
		self.tweak = thread_rng().gen();
		self.entries_this_generation = 0;
		self.generation = 1;
		for word in self.data.iter_mut() {
			*word = 0;
		}
	}
}
