// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! One overlay participant.
//!
//! [`Node`] is the async shell: it owns the transport, the timers and the
//! event queue, and drives the single-threaded [`core::NodeCore`] one event
//! at a time. The application talks to it through `start`, `stop`, the
//! attribute store calls and `find`.

mod algorithms;
mod comm;
pub(crate) mod config;
mod core;
pub mod fsm;
mod procedure_info;
mod watchdog;

pub use config::{AlgorithmConfig, Config, JoinInfo, TimeoutConfig, DEFAULT_MULTICAST_ADDR};
pub use fsm::{FsmState, Signal, TimeoutKind};
pub use procedure_info::{ProcedureInfo, ProcedureKey};

use crate::error::{Error, Result};
use crate::messaging::system::{FindQuery, FindResult};
use crate::types::{Entry, Key, Peer};
use self::core::{Effect, Event, NodeCore};
use comm::Comm;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use watchdog::Watchdog;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// A running MINHTON node.
#[derive(Debug)]
pub struct Node {
    event_tx: mpsc::UnboundedSender<Event>,
    state_rx: watch::Receiver<FsmState>,
    peer_rx: watch::Receiver<Peer>,
    local_addr: SocketAddr,
    _run_task: JoinHandle<()>,
}

impl Node {
    /// Brings a node up: binds the transport, starts the event loop and —
    /// unless this is the root — kicks off the configured join.
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (comm, local_addr) =
            Comm::new(config.listen_addr, config.multicast_addr, event_tx.clone()).await?;

        let core = NodeCore::new(config, local_addr)?;
        let startup_signal = core.startup_signal();

        let (state_tx, state_rx) = watch::channel(core.fsm_state());
        let (peer_tx, peer_rx) = watch::channel(core.this_node().clone());
        let watchdog = Watchdog::new(event_tx.clone());

        let run_task = tokio::spawn(run_loop(core, event_rx, comm, watchdog, state_tx, peer_tx));

        if let Some(signal) = startup_signal {
            event_tx
                .send(Event::Signal(signal))
                .map_err(|_| Error::Configuration("node loop ended at startup".to_string()))?;
        }

        Ok(Self {
            event_tx,
            state_rx,
            peer_rx,
            local_addr,
            _run_task: run_task,
        })
    }

    /// The address the transport is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The node's current lifecycle state.
    pub fn state(&self) -> FsmState {
        *self.state_rx.borrow()
    }

    /// Our own peer record (position becomes valid once joined).
    pub fn this_node(&self) -> Peer {
        self.peer_rx.borrow().clone()
    }

    /// Injects a synthetic signal; the regular start/stop paths use this
    /// internally.
    pub fn process_signal(&self, signal: Signal) -> Result<()> {
        self.event_tx
            .send(Event::Signal(signal))
            .map_err(|_| Error::Configuration("node loop has ended".to_string()))
    }

    /// Leaves the overlay gracefully, waiting until the node went idle. The
    /// leave retries internally until it acquires the required locks.
    pub async fn stop(&self) -> Result<()> {
        self.process_signal(Signal::leave_network())?;
        let mut state_rx = self.state_rx.clone();
        loop {
            if *state_rx.borrow() == FsmState::Idle {
                return Ok(());
            }
            if state_rx.changed().await.is_err() {
                return Ok(());
            }
        }
    }

    /// Inserts attributes into the local data store; subscribed DSNs are
    /// notified.
    pub fn insert(&self, entries: Vec<Entry>) -> Result<()> {
        self.event_tx
            .send(Event::Insert(entries))
            .map_err(|_| Error::Configuration("node loop has ended".to_string()))
    }

    /// Updates attributes in the local data store.
    pub fn update(&self, entries: Vec<Entry>) -> Result<()> {
        self.event_tx
            .send(Event::UpdateData(entries))
            .map_err(|_| Error::Configuration("node loop has ended".to_string()))
    }

    /// Removes attributes from the local data store.
    pub fn remove(&self, keys: Vec<Key>) -> Result<()> {
        self.event_tx
            .send(Event::RemoveData(keys))
            .map_err(|_| Error::Configuration("node loop has ended".to_string()))
    }

    /// Runs an entity search. The future resolves when the aggregation
    /// window closes; an empty result is a legal outcome.
    pub async fn find(&self, query: FindQuery) -> Result<FindResult> {
        let (responder, receiver) = oneshot::channel();
        self.event_tx
            .send(Event::Find(query, responder))
            .map_err(|_| Error::Configuration("node loop has ended".to_string()))?;
        receiver
            .await
            .map_err(|_| Error::Configuration("find was dropped by the node loop".to_string()))
    }
}

async fn run_loop(
    mut core: NodeCore,
    mut event_rx: mpsc::UnboundedReceiver<Event>,
    comm: Comm,
    mut watchdog: Watchdog,
    state_tx: watch::Sender<FsmState>,
    peer_tx: watch::Sender<Peer>,
) {
    while let Some(event) = event_rx.recv().await {
        let effects = core.handle(event, now_millis());

        for effect in effects {
            match effect {
                Effect::Send(msg) => {
                    if let Err(error) = comm.send(&msg).await {
                        warn!("send failed: {}", error);
                    }
                }
                Effect::Multicast(msg) => {
                    if let Err(error) = comm.multicast(&msg).await {
                        warn!("multicast failed: {}", error);
                    }
                }
                Effect::ArmTimeout(kind) => {
                    if let Some(duration) = core.config().timeouts.length(kind) {
                        watchdog.arm(kind, duration);
                    }
                }
                Effect::CancelTimeout(kind) => watchdog.cancel(kind),
            }
        }

        let _ = state_tx.send(core.fsm_state());
        let _ = peer_tx.send(core.this_node().clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn local(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn root_config() -> Config {
        Config {
            fanout: 2,
            is_root: true,
            join_info: JoinInfo::None,
            listen_addr: local(0),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn root_starts_connected() {
        let node = Node::start(root_config()).await.unwrap();
        assert_eq!(node.state(), FsmState::Connected);
        let this_node = node.this_node();
        assert!(this_node.position().is_root());
    }

    #[tokio::test]
    async fn join_via_address_over_the_wire() {
        let root = Node::start(root_config()).await.unwrap();
        let root_addr = root.local_addr();

        let joiner = Node::start(Config {
            fanout: 2,
            is_root: false,
            join_info: JoinInfo::Ip {
                ip: root_addr.ip(),
                port: root_addr.port(),
            },
            listen_addr: local(0),
            ..Config::default()
        })
        .await
        .unwrap();

        // wait for the join handshake to settle
        let mut state_rx = joiner.state_rx.clone();
        let joined = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if *state_rx.borrow() == FsmState::Connected {
                    return;
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        assert!(joined.is_ok(), "join did not complete in time");

        let this_node = joiner.this_node();
        assert_eq!(this_node.level(), 1);
        assert_eq!(this_node.number(), 0);
    }
}
