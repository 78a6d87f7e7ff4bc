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

//! The transaction pool, keeping a view of currently-valid transactions that
//! may be confirmed soon.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

mod cache;
mod fees;
mod filter;
mod heap;
mod index;
mod orphans;
mod pool;
mod transaction_pool;
pub mod types;

pub use crate::cache::MempoolCache;
pub use crate::fees::FeeEstimator;
pub use crate::filter::RollingFilter;
pub use crate::index::{CoinIndex, IndexedCoin, TxIndex};
pub use crate::orphans::{Orphan, OrphanPool};
pub use crate::pool::Pool;
pub use crate::transaction_pool::TransactionPool;
pub use crate::types::{
	Accepted, BlockChain, NoopAdapter, NoopVerifier, PoolAdapter, PoolConfig, PoolEntry,
	PoolError, Rejection, ScriptVerifier, TxSource, VerifyError,
};
