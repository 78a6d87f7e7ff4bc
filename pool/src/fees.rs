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

//! Fee estimation from observed confirmation times.
//!
//! Admitted entries are binned into exponentially-spaced fee-rate buckets.
//! When a block confirms an entry, the number of blocks it waited feeds a
//! decaying per-bucket success average. Estimating a fee for a confirmation
//! target walks the buckets from the most expensive down, as far as the
//! success ratio stays above the required threshold.

use std::collections::HashMap;

use log::debug;

use kestrel_core::core::Hash;
use kestrel_core::ser::{self, Readable, Reader, Writeable, Writer};

use crate::types::PoolEntry;

/// Deepest confirmation target tracked, in blocks.
const MAX_CONFIRM_TARGET: usize = 25;

/// Lowest bucket boundary, in grains per kilobyte.
const MIN_BUCKET_RATE: f64 = 1_000.0;

/// Highest bucket boundary.
const MAX_BUCKET_RATE: f64 = 10_000_000.0;

/// Multiplicative spacing between bucket boundaries.
const BUCKET_SPACING: f64 = 1.1;

/// Per-block decay applied to the moving averages.
const DECAY: f64 = 0.998;

/// Fraction of tracked transactions in a bucket range that must confirm
/// within the target for the range to count as sufficient.
const MIN_SUCCESS_RATE: f64 = 0.95;

/// Minimum decayed sample mass before a bucket range is trusted.
const SUFFICIENT_SAMPLES: f64 = 1.0;

#[derive(Clone, Copy, Debug)]
struct TrackedTx {
	height: u32,
	bucket: usize,
}

/// Tracks fee-rate buckets from accepted and confirmed transactions and
/// answers "what rate confirms within N blocks".
pub struct FeeEstimator {
	/// Upper boundary of each bucket.
	buckets: Vec<f64>,
	/// Decayed count of confirmations within each target, per bucket.
	conf_avg: Vec<Vec<f64>>,
	/// Decayed count of everything tracked, per bucket.
	tx_avg: Vec<f64>,
	/// In-flight entries being watched.
	map: HashMap<Hash, TrackedTx>,
	/// Height of the last processed block.
	best_height: u32,
}

impl FeeEstimator {
	/// A fresh estimator with no history.
	pub fn new() -> FeeEstimator {
		let mut buckets = vec![];
		let mut rate = MIN_BUCKET_RATE;
		while rate < MAX_BUCKET_RATE {
			buckets.push(rate);
			rate *= BUCKET_SPACING;
		}
		buckets.push(MAX_BUCKET_RATE);
		let len = buckets.len();
		FeeEstimator {
			buckets,
			conf_avg: vec![vec![0.0; len]; MAX_CONFIRM_TARGET],
			tx_avg: vec![0.0; len],
			map: HashMap::new(),
			best_height: 0,
		}
	}

	fn bucket_index(&self, rate: u64) -> usize {
		let rate = rate as f64;
		match self.buckets.iter().position(|&b| rate <= b) {
			Some(index) => index,
			None => self.buckets.len() - 1,
		}
	}

	/// Start watching a newly admitted entry. Unconfirmed data is only
	/// meaningful once the chain is synced.
	pub fn process_entry(&mut self, entry: &PoolEntry, height: u32, synced: bool) {
		if !synced {
			return;
		}
		let bucket = self.bucket_index(entry.fee_rate());
		self.tx_avg[bucket] += 1.0;
		self.map.insert(entry.hash, TrackedTx { height, bucket });
	}

	/// Stop watching an entry that left the pool unconfirmed.
	pub fn remove_entry(&mut self, hash: &Hash) {
		if let Some(tracked) = self.map.remove(hash) {
			self.tx_avg[tracked.bucket] = (self.tx_avg[tracked.bucket] - 1.0).max(0.0);
		}
	}

	/// A block came in: decay history and credit every confirmed entry with
	/// the number of blocks it waited.
	pub fn process_block(&mut self, height: u32, entries: &[PoolEntry], synced: bool) {
		if height <= self.best_height && self.best_height != 0 {
			return;
		}
		self.best_height = height;
		if !synced {
			return;
		}

		for row in self.conf_avg.iter_mut() {
			for cell in row.iter_mut() {
				*cell *= DECAY;
			}
		}
		for cell in self.tx_avg.iter_mut() {
			*cell *= DECAY;
		}

		for entry in entries {
			let tracked = match self.map.remove(&entry.hash) {
				Some(tracked) => tracked,
				None => continue,
			};
			let blocks = height.saturating_sub(tracked.height).max(1) as usize;
			if blocks > MAX_CONFIRM_TARGET {
				continue;
			}
			for target in blocks..=MAX_CONFIRM_TARGET {
				self.conf_avg[target - 1][tracked.bucket] += 1.0;
			}
		}

		debug!(
			"estimator: processed block {} (tracking {} txs)",
			height,
			self.map.len()
		);
	}

	/// Estimated fee rate, in grains per kilobyte, to confirm within the
	/// given number of blocks. Returns 0 when there is not enough data.
	pub fn estimate_fee(&self, target: usize) -> u64 {
		if target == 0 || target > MAX_CONFIRM_TARGET {
			return 0;
		}
		let row = &self.conf_avg[target - 1];

		let mut best = 0u64;
		let mut confirmed = 0.0;
		let mut total = 0.0;
		// walk from the most expensive bucket down while the success ratio
		// holds up
		for bucket in (0..self.buckets.len()).rev() {
			confirmed += row[bucket];
			total += self.tx_avg[bucket];
			if total < SUFFICIENT_SAMPLES {
				continue;
			}
			if confirmed / total < MIN_SUCCESS_RATE {
				break;
			}
			best = self.buckets[bucket] as u64;
		}
		best
	}

	/// Forget all history.
	pub fn reset(&mut self) {
		let len = self.buckets.len();
		self.conf_avg = vec![vec![0.0; len]; MAX_CONFIRM_TARGET];
		self.tx_avg = vec![0.0; len];
		self.map.clear();
		self.best_height = 0;
	}
}

impl Default for FeeEstimator {
	fn default() -> FeeEstimator {
		FeeEstimator::new()
	}
}

impl Writeable for FeeEstimator {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.best_height)?;
		writer.write_u64(self.buckets.len() as u64)?;
		for rate in &self.buckets {
			writer.write_u64(rate.to_bits())?;
		}
		for cell in &self.tx_avg {
			writer.write_u64(cell.to_bits())?;
		}
		writer.write_u64(self.conf_avg.len() as u64)?;
		for row in &self.conf_avg {
			for cell in row {
				writer.write_u64(cell.to_bits())?;
			}
		}
		Ok(())
	}
}

impl Readable for FeeEstimator {
	fn read(reader: &mut dyn Reader) -> Result<FeeEstimator, ser::Error> {
		let best_height = reader.read_u32()?;
		let len = reader.read_u64()? as usize;
		if len == 0 || len > 1_000 {
			return Err(ser::Error::CorruptedData);
		}
		let mut buckets = Vec::with_capacity(len);
		for _ in 0..len {
			buckets.push(f64::from_bits(reader.read_u64()?));
		}
		let mut tx_avg = Vec::with_capacity(len);
		for _ in 0..len {
			tx_avg.push(f64::from_bits(reader.read_u64()?));
		}
		let targets = reader.read_u64()? as usize;
		if targets != MAX_CONFIRM_TARGET {
			return Err(ser::Error::CorruptedData);
		}
		let mut conf_avg = Vec::with_capacity(targets);
		for _ in 0..targets {
			let mut row = Vec::with_capacity(len);
			for _ in 0..len {
				row.push(f64::from_bits(reader.read_u64()?));
			}
			conf_avg.push(row);
		}
		Ok(FeeEstimator {
			buckets,
			conf_avg,
			tx_avg,
			map: HashMap::new(),
			best_height,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use kestrel_core::core::{CoinView, Input, OutPoint, Output, Script, Transaction};

	fn entry_with_rate(seed: u8, rate: u64) -> PoolEntry {
		let tx = Transaction {
			version: 1,
			inputs: vec![Input::new(OutPoint::new(Hash([seed; 32]), 0))],
			outputs: vec![Output {
				value: 1_000,
				script: Script::PubkeyHash([seed; 20]),
			}],
			lock_time: 0,
		};
		let mut entry = PoolEntry::new(tx, &CoinView::new(), 100, -1);
		entry.fee = rate * entry.size / 1000;
		entry
	}

	#[test]
	fn learns_from_confirmations() {
		let mut estimator = FeeEstimator::new();
		let mut entries = vec![];
		for i in 0u8..50 {
			let entry = entry_with_rate(i, 5_000);
			estimator.process_entry(&entry, 100, true);
			entries.push(entry);
		}
		estimator.process_block(101, &entries, true);
		let estimate = estimator.estimate_fee(2);
		assert!(estimate > 0);
		assert!(estimate <= 5_500);
	}

	#[test]
	fn no_data_no_estimate() {
		let estimator = FeeEstimator::new();
		assert_eq!(estimator.estimate_fee(2), 0);
	}

	#[test]
	fn round_trip() {
		let mut estimator = FeeEstimator::new();
		let entry = entry_with_rate(1, 2_000);
		estimator.process_entry(&entry, 10, true);
		estimator.process_block(11, &[entry], true);

		let bytes = ser::ser_vec(&estimator).unwrap();
		let back: FeeEstimator = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(back.best_height, 11);
		assert_eq!(back.buckets.len(), estimator.buckets.len());
		assert_eq!(back.estimate_fee(5), estimator.estimate_fee(5));
	}
}
