//! Cache layer for jwkd
//!
//! A [`KeyCache`] groups JSON entries under `keys:<group>:<key>` on top of any
//! [`CacheStore`]. Group purges and key listings need a store that supports
//! cursor scans; [`MemoryStore`] does.
// Copyright 2025 Francisco F. Pinochet
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


pub mod error;
pub mod key_cache;
pub mod memory;
pub mod scan;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use key_cache::KeyCache;
pub use memory::MemoryStore;
pub use scan::ScanIter;
pub use store::{CacheStore, ScanPage};
