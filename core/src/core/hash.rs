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

//! Hash Function
//!
//! Primary hash function used in the protocol
//!

use std::fmt;

use blake2_rfc::blake2b::Blake2b;

use crate::ser::{self, Readable, Reader, Writeable, Writer};
use kestrel_util::to_hex;

/// A hash to uniquely (or close enough) identify one of the main blockchain
/// constructs. Used pervasively for blocks, transactions and outputs.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

/// The "zero" hash, conventionally marking an absent reference (such as the
/// prevout of a coinbase input).
pub const ZERO_HASH: Hash = Hash([0; 32]);

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for i in self.0[..4].iter() {
			write!(f, "{:02x}", i)?;
		}
		Ok(())
	}
}

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl Hash {
	/// Size of a hash in bytes.
	pub const LEN: usize = 32;

	/// Builds a Hash from a byte slice. If the slice is too short, it will be
	/// completed by zeroes. If it's too long, it will be truncated.
	pub fn from_vec(v: &[u8]) -> Hash {
		let mut h = [0; Hash::LEN];
		let copy_size = v.len().min(Hash::LEN);
		h[..copy_size].copy_from_slice(&v[..copy_size]);
		Hash(h)
	}

	/// Converts the hash to a byte vector
	pub fn to_vec(&self) -> Vec<u8> {
		self.0.to_vec()
	}

	/// The hash as a byte slice
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Convert hash to hex string
	pub fn to_hex(&self) -> String {
		to_hex(self.to_vec())
	}
}

impl Writeable for Hash {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for Hash {
	fn read(reader: &mut dyn Reader) -> Result<Hash, ser::Error> {
		let v = reader.read_fixed_bytes(32)?;
		Ok(Hash::from_vec(&v))
	}
}

/// Serializer that outputs a hash of the serialized object
pub struct HashWriter {
	state: Blake2b,
}

impl HashWriter {
	/// Start a new hash computation.
	pub fn new() -> HashWriter {
		HashWriter {
			state: Blake2b::new(32),
		}
	}

	/// Consume the `HashWriter`, outputting a `Hash` corresponding to its
	/// current state
	pub fn into_hash(self) -> Hash {
		Hash::from_vec(self.state.finalize().as_bytes())
	}
}

impl Default for HashWriter {
	fn default() -> HashWriter {
		HashWriter::new()
	}
}

impl Writer for HashWriter {
	fn write_u8(&mut self, n: u8) -> Result<(), ser::Error> {
		self.state.update(&[n]);
		Ok(())
	}
	fn write_u16(&mut self, n: u16) -> Result<(), ser::Error> {
		self.state.update(&n.to_be_bytes());
		Ok(())
	}
	fn write_u32(&mut self, n: u32) -> Result<(), ser::Error> {
		self.state.update(&n.to_be_bytes());
		Ok(())
	}
	fn write_u64(&mut self, n: u64) -> Result<(), ser::Error> {
		self.state.update(&n.to_be_bytes());
		Ok(())
	}
	fn write_i32(&mut self, n: i32) -> Result<(), ser::Error> {
		self.state.update(&n.to_be_bytes());
		Ok(())
	}
	fn write_i64(&mut self, n: i64) -> Result<(), ser::Error> {
		self.state.update(&n.to_be_bytes());
		Ok(())
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), ser::Error> {
		self.state.update(bytes);
		Ok(())
	}
}

/// A trait for types that have a canonical hash derived from their binary
/// serialization.
pub trait Hashed {
	/// Obtain the hash of the object
	fn hash(&self) -> Hash;
}

/// Hash anything that can write itself to a `Writer`.
pub fn hash_writeable<T: Writeable>(thing: &T) -> Hash {
	let mut hasher = HashWriter::new();
	thing
		.write(&mut hasher)
		.expect("write to hasher cannot fail");
	hasher.into_hash()
}

/// Hash a raw byte slice down to 20 bytes, the form used for address keys.
pub fn hash160(data: &[u8]) -> [u8; 20] {
	let digest = blake2_rfc::blake2b::blake2b(20, &[], data);
	let mut out = [0; 20];
	out.copy_from_slice(digest.as_bytes());
	out
}
