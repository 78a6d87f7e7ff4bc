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

//! Blocks and block headers.

use crate::core::hash::{Hash, HashWriter, Hashed};
use crate::core::transaction::Transaction;
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// A block header.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct BlockHeader {
	/// Header version.
	pub version: u32,
	/// Hash of the previous block.
	pub prev_hash: Hash,
	/// Merkle root over the block's transaction ids.
	pub merkle_root: Hash,
	/// Block timestamp.
	pub time: i64,
	/// Height of the block in the chain.
	pub height: u32,
}

impl Writeable for BlockHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.version)?;
		self.prev_hash.write(writer)?;
		self.merkle_root.write(writer)?;
		writer.write_i64(self.time)?;
		writer.write_u32(self.height)
	}
}

impl Readable for BlockHeader {
	fn read(reader: &mut dyn Reader) -> Result<BlockHeader, ser::Error> {
		let version = reader.read_u32()?;
		let prev_hash = Hash::read(reader)?;
		let merkle_root = Hash::read(reader)?;
		let time = reader.read_i64()?;
		let height = reader.read_u32()?;
		Ok(BlockHeader {
			version,
			prev_hash,
			merkle_root,
			time,
			height,
		})
	}
}

impl Hashed for BlockHeader {
	fn hash(&self) -> Hash {
		let mut hasher = HashWriter::new();
		self.write(&mut hasher)
			.expect("write to hasher cannot fail");
		hasher.into_hash()
	}
}

/// A full block: a header plus the transactions it confirms, the coinbase
/// first.
#[derive(Clone, Debug, Default)]
pub struct Block {
	/// The block header.
	pub header: BlockHeader,
	/// The confirmed transactions, coinbase first.
	pub txs: Vec<Transaction>,
}

impl Block {
	/// The block's hash, which is the hash of its header.
	pub fn hash(&self) -> Hash {
		self.header.hash()
	}
}
