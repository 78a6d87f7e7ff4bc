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

//! Locking scripts, flattened to their standard forms.
//!
//! Full script execution is delegated to the verification workers; what the
//! node itself needs from a locking script is its standard classification,
//! its signature operation cost, its encoded size and the address hash it
//! pays to. Representing the standard templates directly keeps all of those
//! cheap and total.

use crate::consensus::{MAX_NULLDATA_SIZE, MAX_SCRIPT_SIZE};
use crate::core::hash::hash160;
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// Weight scale applied to legacy (non-witness) signature operations.
const LEGACY_SIGOPS_SCALE: u32 = 4;

/// A locking script in one of the recognized standard forms, or a raw
/// non-standard script we carry around opaquely.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Script {
	/// Bare public key plus checksig.
	Pubkey(Vec<u8>),
	/// Pay to public key hash.
	PubkeyHash([u8; 20]),
	/// Pay to script hash.
	ScriptHash([u8; 20]),
	/// Bare m-of-n multisig.
	Multisig {
		/// Required signature count.
		m: u8,
		/// The public keys, in order.
		keys: Vec<Vec<u8>>,
	},
	/// Provably unspendable data carrier.
	NullData(Vec<u8>),
	/// Pay to witness public key hash (version 0 program).
	WitnessPubkeyHash([u8; 20]),
	/// Pay to witness script hash (version 0 program).
	WitnessScriptHash([u8; 32]),
	/// Anything else, kept as raw bytes.
	NonStandard(Vec<u8>),
}

impl Script {
	/// Short name for the script form, used in logging.
	pub fn kind(&self) -> &'static str {
		match self {
			Script::Pubkey(_) => "pubkey",
			Script::PubkeyHash(_) => "pubkeyhash",
			Script::ScriptHash(_) => "scripthash",
			Script::Multisig { .. } => "multisig",
			Script::NullData(_) => "nulldata",
			Script::WitnessPubkeyHash(_) => "witnesspubkeyhash",
			Script::WitnessScriptHash(_) => "witnessscripthash",
			Script::NonStandard(_) => "nonstandard",
		}
	}

	/// Encoded size of the script in bytes, matching the canonical template
	/// encodings.
	pub fn size(&self) -> usize {
		match self {
			Script::Pubkey(key) => key.len() + 2,
			Script::PubkeyHash(_) => 25,
			Script::ScriptHash(_) => 23,
			Script::Multisig { keys, .. } => 3 + keys.iter().map(|k| k.len() + 1).sum::<usize>(),
			Script::NullData(data) => data.len() + 2,
			Script::WitnessPubkeyHash(_) => 22,
			Script::WitnessScriptHash(_) => 34,
			Script::NonStandard(raw) => raw.len(),
		}
	}

	/// Whether the script is one of the forms relayed under standard policy.
	pub fn is_standard(&self) -> bool {
		match self {
			Script::Multisig { m, keys } => {
				let m = *m as usize;
				m >= 1 && m <= keys.len() && keys.len() <= 3
			}
			Script::NullData(data) => data.len() <= MAX_NULLDATA_SIZE,
			Script::NonStandard(_) => false,
			_ => true,
		}
	}

	/// Whether the script pays to a witness program.
	pub fn is_witness_program(&self) -> bool {
		match self {
			Script::WitnessPubkeyHash(_) | Script::WitnessScriptHash(_) => true,
			_ => false,
		}
	}

	/// Whether the script is a provably unspendable data carrier.
	pub fn is_nulldata(&self) -> bool {
		match self {
			Script::NullData(_) => true,
			_ => false,
		}
	}

	/// Signature operation cost of the locking script, counted in weight
	/// units. Legacy operations are scaled up by 4, witness operations count
	/// singly. Script-hash redeem scripts are evaluated by the verification
	/// workers, so only the outer script is counted here.
	pub fn sigops_cost(&self) -> u32 {
		match self {
			Script::Pubkey(_) | Script::PubkeyHash(_) => LEGACY_SIGOPS_SCALE,
			Script::ScriptHash(_) => LEGACY_SIGOPS_SCALE,
			Script::Multisig { keys, .. } => keys.len() as u32 * LEGACY_SIGOPS_SCALE,
			Script::WitnessPubkeyHash(_) | Script::WitnessScriptHash(_) => 1,
			Script::NullData(_) | Script::NonStandard(_) => 0,
		}
	}

	/// The 20-byte address hash the script pays to, if it pays to anything
	/// addressable.
	pub fn address_hash(&self) -> Option<[u8; 20]> {
		match self {
			Script::Pubkey(key) => Some(hash160(key)),
			Script::PubkeyHash(h) | Script::ScriptHash(h) | Script::WitnessPubkeyHash(h) => {
				Some(*h)
			}
			Script::WitnessScriptHash(program) => Some(hash160(program)),
			Script::Multisig { .. } | Script::NullData(_) | Script::NonStandard(_) => None,
		}
	}

	/// The minimum output value at which spending an output locked by this
	/// script costs less than a third of the value itself in relay fees.
	/// Outputs below it are considered dust. Data carriers carry no value and
	/// are never dust.
	pub fn dust_threshold(&self, relay_fee: u64) -> u64 {
		if self.is_nulldata() {
			return 0;
		}
		// output size plus the cost of a typical spending input, witness
		// spends discounted
		let spend_size = if self.is_witness_program() {
			32 + 4 + 1 + 107 / 4 + 4
		} else {
			32 + 4 + 1 + 107 + 4
		};
		let total = (self.size() + 9 + spend_size) as u64;
		3 * total * relay_fee / 1000
	}

	/// Whether an output of the given value locked by this script is dust.
	pub fn is_dust(&self, value: u64, relay_fee: u64) -> bool {
		value < self.dust_threshold(relay_fee)
	}
}

impl Writeable for Script {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		match self {
			Script::Pubkey(key) => {
				writer.write_u8(0)?;
				writer.write_bytes(key)
			}
			Script::PubkeyHash(h) => {
				writer.write_u8(1)?;
				writer.write_fixed_bytes(h)
			}
			Script::ScriptHash(h) => {
				writer.write_u8(2)?;
				writer.write_fixed_bytes(h)
			}
			Script::Multisig { m, keys } => {
				writer.write_u8(3)?;
				writer.write_u8(*m)?;
				writer.write_u8(keys.len() as u8)?;
				for key in keys {
					writer.write_bytes(key)?;
				}
				Ok(())
			}
			Script::NullData(data) => {
				writer.write_u8(4)?;
				writer.write_bytes(data)
			}
			Script::WitnessPubkeyHash(h) => {
				writer.write_u8(5)?;
				writer.write_fixed_bytes(h)
			}
			Script::WitnessScriptHash(h) => {
				writer.write_u8(6)?;
				writer.write_fixed_bytes(h)
			}
			Script::NonStandard(raw) => {
				writer.write_u8(7)?;
				writer.write_bytes(raw)
			}
		}
	}
}

impl Readable for Script {
	fn read(reader: &mut dyn Reader) -> Result<Script, ser::Error> {
		let tag = reader.read_u8()?;
		let script = match tag {
			0 => Script::Pubkey(reader.read_bytes_len_prefix()?),
			1 => Script::PubkeyHash(read_20(reader)?),
			2 => Script::ScriptHash(read_20(reader)?),
			3 => {
				let m = reader.read_u8()?;
				let n = reader.read_u8()?;
				if n > 20 {
					return Err(ser::Error::CorruptedData);
				}
				let mut keys = Vec::with_capacity(n as usize);
				for _ in 0..n {
					keys.push(reader.read_bytes_len_prefix()?);
				}
				Script::Multisig { m, keys }
			}
			4 => Script::NullData(reader.read_bytes_len_prefix()?),
			5 => Script::WitnessPubkeyHash(read_20(reader)?),
			6 => {
				let v = reader.read_fixed_bytes(32)?;
				let mut h = [0; 32];
				h.copy_from_slice(&v[..]);
				Script::WitnessScriptHash(h)
			}
			7 => {
				let raw = reader.read_bytes_len_prefix()?;
				if raw.len() > MAX_SCRIPT_SIZE {
					return Err(ser::Error::CorruptedData);
				}
				Script::NonStandard(raw)
			}
			_ => return Err(ser::Error::CorruptedData),
		};
		Ok(script)
	}
}

fn read_20(reader: &mut dyn Reader) -> Result<[u8; 20], ser::Error> {
	let v = reader.read_fixed_bytes(20)?;
	let mut h = [0; 20];
	h.copy_from_slice(&v[..]);
	Ok(h)
}
