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

//! Transactions

use std::collections::HashSet;
use std::fmt;

use failure::Fail;

use crate::consensus::{
	COINBASE_MATURITY, LOCKTIME_THRESHOLD, MAX_MONEY, MAX_SCRIPT_SIZE, MAX_TX_VERSION,
	MAX_TX_WEIGHT, MAX_WITNESS_ITEM_SIZE, WITNESS_SCALE_FACTOR,
};
use crate::core::coins::CoinView;
use crate::core::hash::{Hash, HashWriter, ZERO_HASH};
use crate::core::script::Script;
use crate::ser::{self, BinWriter, Readable, Reader, Writeable, Writer};

/// The sequence number marking an input as final regardless of lock time.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Inputs with a sequence number below this opt in to replacement.
pub const SEQUENCE_NO_RBF: u32 = 0xffff_fffe;

/// Maximum number of inputs or outputs a transaction may have and be
/// deserializable, in case a facetious peer sends us more than what we
/// would ever allocate.
pub const MAX_IN_OUT_LEN: u64 = 50_000;

/// Relay bound on the size of an unlocking script.
const MAX_INPUT_SCRIPT_SIZE: usize = 1_650;

/// Relay bound on the number of witness stack items per input.
const MAX_WITNESS_ITEMS: usize = 100;

/// Failure of a transaction-level check, carrying the relay reason code and
/// the peer misbehavior score attached to it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
#[fail(display = "{}", reason)]
pub struct TxCheckError {
	/// Relay-level reason code, e.g. "bad-txns-inputs-duplicate".
	pub reason: &'static str,
	/// Misbehavior score assigned to the relaying peer.
	pub score: u32,
}

impl TxCheckError {
	fn new(reason: &'static str, score: u32) -> TxCheckError {
		TxCheckError { reason, score }
	}
}

/// A reference to a prior transaction output.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OutPoint {
	/// Hash of the transaction holding the output.
	pub hash: Hash,
	/// Index of the output within that transaction.
	pub index: u32,
}

impl OutPoint {
	/// Build an outpoint from its parts.
	pub fn new(hash: Hash, index: u32) -> OutPoint {
		OutPoint { hash, index }
	}

	/// The null outpoint, only valid in a coinbase input.
	pub fn null() -> OutPoint {
		OutPoint {
			hash: ZERO_HASH,
			index: u32::max_value(),
		}
	}

	/// Whether this is the null outpoint.
	pub fn is_null(&self) -> bool {
		self.hash == ZERO_HASH && self.index == u32::max_value()
	}

	/// The fixed 36-byte lookup key: the 32-byte tx hash in internal order
	/// followed by the output index in little-endian.
	pub fn key(&self) -> [u8; 36] {
		let mut key = [0; 36];
		key[..32].copy_from_slice(self.hash.as_bytes());
		key[32..].copy_from_slice(&self.index.to_le_bytes());
		key
	}
}

impl fmt::Display for OutPoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.hash, self.index)
	}
}

impl Writeable for OutPoint {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)?;
		writer.write_u32(self.index)
	}
}

impl Readable for OutPoint {
	fn read(reader: &mut dyn Reader) -> Result<OutPoint, ser::Error> {
		let hash = Hash::read(reader)?;
		let index = reader.read_u32()?;
		Ok(OutPoint { hash, index })
	}
}

/// A transaction input, spending a prior output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Input {
	/// The output being consumed.
	pub prevout: OutPoint,
	/// Unlocking script satisfying the spent output's conditions.
	pub script: Vec<u8>,
	/// Witness stack, empty for non-segwit spends.
	pub witness: Vec<Vec<u8>>,
	/// Sequence number, doubling as the BIP68 relative lock field.
	pub sequence: u32,
}

impl Input {
	/// A plain input spending the given outpoint with a final sequence.
	pub fn new(prevout: OutPoint) -> Input {
		Input {
			prevout,
			script: vec![],
			witness: vec![],
			sequence: SEQUENCE_FINAL,
		}
	}

	/// Whether the input signals opt-in replaceability.
	pub fn is_rbf(&self) -> bool {
		self.sequence < SEQUENCE_NO_RBF
	}

	/// Whether the input carries witness data.
	pub fn has_witness(&self) -> bool {
		!self.witness.is_empty()
	}

	fn write_base<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.prevout.write(writer)?;
		writer.write_bytes(&self.script)?;
		writer.write_u32(self.sequence)
	}
}

impl Writeable for Input {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.write_base(writer)?;
		writer.write_u64(self.witness.len() as u64)?;
		for item in &self.witness {
			writer.write_bytes(item)?;
		}
		Ok(())
	}
}

impl Readable for Input {
	fn read(reader: &mut dyn Reader) -> Result<Input, ser::Error> {
		let prevout = OutPoint::read(reader)?;
		let script = reader.read_bytes_len_prefix()?;
		let sequence = reader.read_u32()?;
		let witness_len = reader.read_u64()?;
		if witness_len > MAX_IN_OUT_LEN {
			return Err(ser::Error::TooLargeReadErr(
				"too many witness items".to_string(),
			));
		}
		let witness = (0..witness_len)
			.map(|_| reader.read_bytes_len_prefix())
			.collect::<Result<Vec<_>, _>>()?;
		Ok(Input {
			prevout,
			script,
			witness,
			sequence,
		})
	}
}

/// A transaction output, locking value behind a script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Output {
	/// Value of the output, in grains.
	pub value: u64,
	/// The locking script.
	pub script: Script,
}

impl Writeable for Output {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.value)?;
		self.script.write(writer)
	}
}

impl Readable for Output {
	fn read(reader: &mut dyn Reader) -> Result<Output, ser::Error> {
		let value = reader.read_u64()?;
		let script = Script::read(reader)?;
		Ok(Output { value, script })
	}
}

/// A transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
	/// Version, gating feature availability.
	pub version: u32,
	/// The inputs being spent.
	pub inputs: Vec<Input>,
	/// The outputs being created.
	pub outputs: Vec<Output>,
	/// Absolute lock time, a height below the locktime threshold and a unix
	/// time above it.
	pub lock_time: u32,
}

impl Writeable for Transaction {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.version)?;
		writer.write_u64(self.inputs.len() as u64)?;
		for input in &self.inputs {
			input.write(writer)?;
		}
		writer.write_u64(self.outputs.len() as u64)?;
		for output in &self.outputs {
			output.write(writer)?;
		}
		writer.write_u32(self.lock_time)
	}
}

impl Readable for Transaction {
	fn read(reader: &mut dyn Reader) -> Result<Transaction, ser::Error> {
		let version = reader.read_u32()?;
		let input_len = reader.read_u64()?;
		if input_len > MAX_IN_OUT_LEN {
			return Err(ser::Error::TooLargeReadErr("too many inputs".to_string()));
		}
		let inputs = (0..input_len)
			.map(|_| Input::read(reader))
			.collect::<Result<Vec<_>, _>>()?;
		let output_len = reader.read_u64()?;
		if output_len > MAX_IN_OUT_LEN {
			return Err(ser::Error::TooLargeReadErr("too many outputs".to_string()));
		}
		let outputs = (0..output_len)
			.map(|_| Output::read(reader))
			.collect::<Result<Vec<_>, _>>()?;
		let lock_time = reader.read_u32()?;
		Ok(Transaction {
			version,
			inputs,
			outputs,
			lock_time,
		})
	}
}

impl Transaction {
	/// Serialize the transaction without any witness data. This is the form
	/// the transaction id commits to, keeping the id immune to witness
	/// malleation.
	fn write_base<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.version)?;
		writer.write_u64(self.inputs.len() as u64)?;
		for input in &self.inputs {
			input.write_base(writer)?;
		}
		writer.write_u64(self.outputs.len() as u64)?;
		for output in &self.outputs {
			output.write(writer)?;
		}
		writer.write_u32(self.lock_time)
	}

	/// The transaction id: a hash of the witness-stripped serialization.
	pub fn hash(&self) -> Hash {
		let mut hasher = HashWriter::new();
		self.write_base(&mut hasher)
			.expect("write to hasher cannot fail");
		hasher.into_hash()
	}

	/// Hash of the full serialization, witness included.
	pub fn witness_hash(&self) -> Hash {
		let mut hasher = HashWriter::new();
		self.write(&mut hasher)
			.expect("write to hasher cannot fail");
		hasher.into_hash()
	}

	/// Size of the witness-stripped serialization in bytes.
	pub fn base_size(&self) -> usize {
		let mut out = vec![];
		{
			let mut writer = BinWriter::new(&mut out);
			self.write_base(&mut writer)
				.expect("write to vec cannot fail");
		}
		out.len()
	}

	/// Size of the full serialization in bytes.
	pub fn total_size(&self) -> usize {
		ser::ser_vec(self).expect("write to vec cannot fail").len()
	}

	/// Weight of the transaction: base bytes count four times, witness bytes
	/// once.
	pub fn weight(&self) -> u64 {
		let base = self.base_size() as u64;
		let total = self.total_size() as u64;
		base * (WITNESS_SCALE_FACTOR - 1) + total
	}

	/// Size in virtual bytes, the weight scaled back down and rounded up.
	pub fn virtual_size(&self) -> u64 {
		(self.weight() + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
	}

	/// Whether this is a coinbase transaction.
	pub fn is_coinbase(&self) -> bool {
		self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
	}

	/// Whether any input carries witness data.
	pub fn has_witness(&self) -> bool {
		self.inputs.iter().any(|i| i.has_witness())
	}

	/// Whether any input signals opt-in replaceability.
	pub fn is_rbf(&self) -> bool {
		self.inputs.iter().any(|i| i.is_rbf())
	}

	/// Whether the transaction is final at the given height and time. Lock
	/// times below the locktime threshold are compared against the height,
	/// others against the time. Fully final sequences override the lock.
	pub fn is_final(&self, height: u32, time: i64) -> bool {
		if self.lock_time == 0 {
			return true;
		}
		let target = if self.lock_time < LOCKTIME_THRESHOLD {
			i64::from(height)
		} else {
			time
		};
		if i64::from(self.lock_time) < target {
			return true;
		}
		self.inputs.iter().all(|i| i.sequence == SEQUENCE_FINAL)
	}

	/// Total value created by the outputs. Only meaningful after
	/// `check_sanity` has ruled out overflow.
	pub fn output_value(&self) -> u64 {
		self.outputs.iter().map(|o| o.value).sum()
	}

	/// Total value consumed by the inputs, resolved through the provided
	/// view. Inputs without a resolved coin contribute nothing.
	pub fn input_value(&self, view: &CoinView) -> u64 {
		self.inputs
			.iter()
			.filter_map(|i| view.get_entry(&i.prevout))
			.map(|c| c.value)
			.sum()
	}

	/// Context-free validity checks: anything that can be decided from the
	/// transaction alone, before touching the chain.
	pub fn check_sanity(&self) -> Result<(), TxCheckError> {
		if self.inputs.is_empty() {
			return Err(TxCheckError::new("bad-txns-vin-empty", 100));
		}
		if self.outputs.is_empty() {
			return Err(TxCheckError::new("bad-txns-vout-empty", 100));
		}
		if self.base_size() as u64 * WITNESS_SCALE_FACTOR > MAX_TX_WEIGHT {
			return Err(TxCheckError::new("bad-txns-oversize", 100));
		}

		let mut total: u64 = 0;
		for output in &self.outputs {
			if output.value > MAX_MONEY {
				return Err(TxCheckError::new("bad-txns-vout-toolarge", 100));
			}
			total = total
				.checked_add(output.value)
				.ok_or_else(|| TxCheckError::new("bad-txns-txouttotal-toolarge", 100))?;
			if total > MAX_MONEY {
				return Err(TxCheckError::new("bad-txns-txouttotal-toolarge", 100));
			}
		}

		let mut seen = HashSet::with_capacity(self.inputs.len());
		for input in &self.inputs {
			if !seen.insert(input.prevout) {
				return Err(TxCheckError::new("bad-txns-inputs-duplicate", 100));
			}
			if input.script.len() > MAX_SCRIPT_SIZE {
				return Err(TxCheckError::new("bad-txns-scriptsig-size", 100));
			}
		}

		if self.is_coinbase() {
			let len = self.inputs[0].script.len();
			if len < 2 || len > 100 {
				return Err(TxCheckError::new("bad-cb-length", 100));
			}
		} else {
			for input in &self.inputs {
				if input.prevout.is_null() {
					return Err(TxCheckError::new("bad-txns-prevout-null", 10));
				}
			}
		}
		Ok(())
	}

	/// Local-policy standardness of the transaction itself: version, weight,
	/// script forms, dust and data-carrier limits.
	pub fn check_standard(&self, relay_fee: u64) -> Result<(), TxCheckError> {
		if self.version > MAX_TX_VERSION {
			return Err(TxCheckError::new("version", 0));
		}
		if self.weight() > MAX_TX_WEIGHT {
			return Err(TxCheckError::new("tx-size", 0));
		}
		for input in &self.inputs {
			if input.script.len() > MAX_INPUT_SCRIPT_SIZE {
				return Err(TxCheckError::new("scriptsig-size", 0));
			}
		}
		let mut nulldata = 0;
		for output in &self.outputs {
			if !output.script.is_standard() {
				return Err(TxCheckError::new("scriptpubkey", 0));
			}
			if output.script.is_nulldata() {
				nulldata += 1;
				continue;
			}
			if output.script.is_dust(output.value, relay_fee) {
				return Err(TxCheckError::new("dust", 0));
			}
		}
		if nulldata > 1 {
			return Err(TxCheckError::new("multi-op-return", 0));
		}
		Ok(())
	}

	/// Whether every input spends a coin of a standard form. Non-standard
	/// locking scripts are not relayed even when spendable.
	pub fn has_standard_inputs(&self, view: &CoinView) -> bool {
		for input in &self.inputs {
			let coin = match view.get_entry(&input.prevout) {
				Some(coin) => coin,
				None => return false,
			};
			match coin.script {
				Script::NonStandard(_) => return false,
				Script::ScriptHash(_) => {
					if input.script.len() > MAX_INPUT_SCRIPT_SIZE {
						return false;
					}
				}
				_ => {}
			}
		}
		true
	}

	/// Whether all witness data is within standard bounds.
	pub fn has_standard_witness(&self, view: &CoinView) -> bool {
		for input in &self.inputs {
			if input.witness.len() > MAX_WITNESS_ITEMS {
				return false;
			}
			for item in &input.witness {
				if item.len() > MAX_WITNESS_ITEM_SIZE {
					return false;
				}
			}
			if let Some(coin) = view.get_entry(&input.prevout) {
				if let Script::WitnessPubkeyHash(_) = coin.script {
					if input.has_witness() && input.witness.len() != 2 {
						return false;
					}
				}
			}
		}
		true
	}

	/// Signature operation cost: the locking scripts of the outputs created
	/// plus the scripts of every coin being spent.
	pub fn sigops_cost(&self, view: &CoinView) -> u32 {
		let own: u32 = self.outputs.iter().map(|o| o.script.sigops_cost()).sum();
		let spent: u32 = self
			.inputs
			.iter()
			.filter_map(|i| view.get_entry(&i.prevout))
			.map(|c| c.script.sigops_cost())
			.sum();
		own + spent
	}

	/// Contextual input checks: every input resolved, coinbase maturity
	/// honored, values conserved. Returns the transaction fee.
	pub fn check_inputs(&self, view: &CoinView, spend_height: u32) -> Result<u64, TxCheckError> {
		let mut total_in: u64 = 0;
		for input in &self.inputs {
			let coin = view
				.get_entry(&input.prevout)
				.ok_or_else(|| TxCheckError::new("bad-txns-input-missingorspent", 0))?;
			if coin.coinbase && coin.height >= 0 {
				let age = i64::from(spend_height) - i64::from(coin.height);
				if age < i64::from(COINBASE_MATURITY) {
					return Err(TxCheckError::new("bad-txns-premature-spend-of-coinbase", 0));
				}
			}
			total_in = total_in
				.checked_add(coin.value)
				.ok_or_else(|| TxCheckError::new("bad-txns-inputvalues-outofrange", 100))?;
			if total_in > MAX_MONEY {
				return Err(TxCheckError::new("bad-txns-inputvalues-outofrange", 100));
			}
		}
		let total_out = self.output_value();
		if total_in < total_out {
			return Err(TxCheckError::new("bad-txns-in-belowout", 100));
		}
		let fee = total_in - total_out;
		if fee > MAX_MONEY {
			return Err(TxCheckError::new("bad-txns-fee-outofrange", 100));
		}
		Ok(fee)
	}
}
