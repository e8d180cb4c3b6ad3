// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Implementation of the MINHTON overlay network.
//!
//! MINHTON arranges participants as the nodes of a balanced m-ary tree. Every
//! participant occupies a unique logical position `(level, number)` and is
//! reachable at a physical transport address. The overlay supports dynamic
//! membership (join, graceful leave, replacement of interior positions by leaf
//! successors) while preserving tree balance, and runs a distributed entity
//! search over Distributed Search Nodes (DSNs) which aggregate attribute
//! queries across cover areas.

// Forbid some very bad patterns. Forbid is stronger than `deny`, preventing us from suppressing the
// lint with `#[allow(...)]` et-all.
#![forbid(
    arithmetic_overflow,
    mutable_transmutes,
    no_mangle_const_items,
    unknown_crate_types,
    unsafe_code
)]
// Turn on some additional warnings to encourage good style.
#![warn(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

#[macro_use]
extern crate tracing;

mod error;
pub mod messaging;
pub mod node;
pub mod routing;
pub mod types;

pub use error::{Error, Result};
pub use node::{Config, JoinInfo, Node, TimeoutConfig};

#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
#[ctor::ctor]
fn test_setup() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        color_eyre::install().expect("color_eyre::install can only be called once");
    });
}
