// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::Position;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::net::SocketAddr;

/// Lowest port a peer may announce; below lie the privileged ports.
pub const PORT_MIN: u16 = 1024;

/// Lifecycle status of a peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PeerStatus {
    Uninit,
    Running,
    Left,
    Failed,
}

impl Default for PeerStatus {
    fn default() -> Self {
        Self::Uninit
    }
}

/// A reference to a network participant: logical tree position plus the
/// transport address it is reachable at.
///
/// A peer is *initialised* iff both halves are known. A *valid peer* has an
/// initialised logical half — it exists, but we may have no way to reach it
/// (`addr` is `None`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Peer {
    position: Position,
    addr: Option<SocketAddr>,
    status: PeerStatus,
}

impl Peer {
    /// A fully initialised peer.
    pub fn new(level: u32, number: u32, fanout: u16, addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            position: Position::new(level, number, fanout)?,
            addr: Some(addr),
            status: PeerStatus::Uninit,
        })
    }

    /// A valid peer whose transport address is unknown.
    pub fn unaddressed(level: u32, number: u32, fanout: u16) -> Result<Self> {
        Ok(Self {
            position: Position::new(level, number, fanout)?,
            addr: None,
            status: PeerStatus::Uninit,
        })
    }

    /// A peer known only by its transport address, e.g. a fresh node that has
    /// not been assigned a tree position yet.
    pub fn addressed(fanout: u16, addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            position: Position::with_fanout(fanout)?,
            addr: Some(addr),
            status: PeerStatus::Uninit,
        })
    }

    pub fn from_parts(position: Position, addr: Option<SocketAddr>) -> Self {
        Self {
            position,
            addr,
            status: PeerStatus::Uninit,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn status(&self) -> PeerStatus {
        self.status
    }

    pub fn level(&self) -> u32 {
        self.position.level()
    }

    pub fn number(&self) -> u32 {
        self.position.number()
    }

    pub fn fanout(&self) -> u16 {
        self.position.fanout()
    }

    /// Both halves known.
    pub fn is_initialised(&self) -> bool {
        self.position.is_initialised() && self.addr.is_some()
    }

    /// The logical half is known; the peer exists in the tree.
    pub fn is_valid_peer(&self) -> bool {
        self.position.is_initialised()
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub fn set_addr(&mut self, addr: Option<SocketAddr>) {
        self.addr = addr;
    }

    pub fn set_status(&mut self, status: PeerStatus) {
        self.status = status;
    }

    /// Drops the physical half, keeping the logical slot.
    pub fn clear_addr(&mut self) {
        self.addr = None;
    }

    /// Same logical slot, regardless of address or identity.
    pub fn same_position(&self, other: &Self) -> bool {
        self.position.is_initialised()
            && other.position.is_initialised()
            && self.position.same_slot(other.position())
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "{} at {}", self.position, addr),
            None => write!(f, "{} (unreachable)", self.position),
        }
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position && self.addr == other.addr
    }
}

impl Eq for Peer {}

impl Ord for Peer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.position
            .cmp(&other.position)
            .then_with(|| self.addr.cmp(&other.addr))
    }
}

impl PartialOrd for Peer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for Peer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.position.hash(state);
        self.addr.hash(state);
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    /// A loopback address with a deterministic port, for tests that need
    /// distinct reachable peers.
    pub(crate) fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    pub(crate) fn test_peer(level: u32, number: u32, fanout: u16, port: u16) -> Peer {
        Peer::new(level, number, fanout, test_addr(port)).expect("valid test peer")
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::{test_addr, test_peer};
    use super::*;

    #[test]
    fn initialisation_needs_both_halves() {
        let full = test_peer(1, 0, 2, 4000);
        assert!(full.is_initialised());
        assert!(full.is_valid_peer());

        let logical_only = Peer::unaddressed(1, 0, 2).unwrap();
        assert!(!logical_only.is_initialised());
        assert!(logical_only.is_valid_peer());

        let physical_only = Peer::addressed(2, test_addr(4001)).unwrap();
        assert!(!physical_only.is_initialised());
        assert!(!physical_only.is_valid_peer());
    }

    #[test]
    fn clearing_the_address_keeps_the_slot() {
        let mut peer = test_peer(2, 1, 2, 4000);
        peer.clear_addr();
        assert!(!peer.is_initialised());
        assert!(peer.is_valid_peer());
        assert_eq!(peer.level(), 2);
        assert_eq!(peer.number(), 1);
    }

    #[test]
    fn ordering_follows_the_horizontal_value() {
        let left = test_peer(1, 0, 2, 4000);
        let root = test_peer(0, 0, 2, 4001);
        let right = test_peer(1, 1, 2, 4002);
        let mut peers = vec![right.clone(), root.clone(), left.clone()];
        peers.sort();
        assert_eq!(peers, vec![left, root, right]);
    }
}
