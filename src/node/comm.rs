// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The UDP transport of a node: unicast datagrams for peer traffic plus a
//! multicast group for bootstrap discovery. Incoming datagrams are decoded
//! and fed into the node's event queue; everything else about delivery is
//! the overlay's business.

use crate::error::{Error, Result};
use crate::messaging::WireMsg;
use crate::node::core::Event;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Largest datagram we expect on the wire.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub(crate) struct Comm {
    socket: Arc<UdpSocket>,
    multicast_addr: SocketAddr,
    _recv_task: JoinHandle<()>,
    _multicast_task: Option<JoinHandle<()>>,
}

impl Drop for Comm {
    fn drop(&mut self) {
        self._recv_task.abort();
        if let Some(task) = &self._multicast_task {
            task.abort();
        }
    }
}

impl Comm {
    /// Binds the unicast socket (and, best effort, the multicast listener)
    /// and starts feeding `event_tx`.
    pub(crate) async fn new(
        listen_addr: SocketAddr,
        multicast_addr: SocketAddr,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> Result<(Self, SocketAddr)> {
        let socket = Arc::new(UdpSocket::bind(listen_addr).await?);
        let local_addr = socket.local_addr()?;

        let recv_task = tokio::spawn(recv_loop(socket.clone(), event_tx.clone()));

        // Discovery reception is best effort: the group port may already be
        // claimed by another node on this host, which only means we will not
        // hear probes ourselves.
        let multicast_task = match Self::bind_multicast(multicast_addr).await {
            Ok(multicast_socket) => Some(tokio::spawn(recv_loop(
                Arc::new(multicast_socket),
                event_tx,
            ))),
            Err(error) => {
                warn!("not listening for bootstrap probes: {}", error);
                None
            }
        };

        Ok((
            Self {
                socket,
                multicast_addr,
                _recv_task: recv_task,
                _multicast_task: multicast_task,
            },
            local_addr,
        ))
    }

    async fn bind_multicast(multicast_addr: SocketAddr) -> Result<UdpSocket> {
        let group = match multicast_addr.ip() {
            IpAddr::V4(group) if group.is_multicast() => group,
            other => {
                return Err(Error::Configuration(format!(
                    "{} is not an IPv4 multicast group",
                    other
                )))
            }
        };
        let socket = UdpSocket::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            multicast_addr.port(),
        ))
        .await?;
        socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
        Ok(socket)
    }

    /// Sends to the address carried in the message header.
    pub(crate) async fn send(&self, msg: &WireMsg) -> Result<()> {
        let target = msg
            .target()
            .addr()
            .ok_or(Error::InvalidMessage(msg.msg_type()))?;
        let bytes = msg.serialize()?;
        let _ = self.socket.send_to(&bytes, target).await?;
        Ok(())
    }

    /// Best-effort send to the discovery group.
    pub(crate) async fn multicast(&self, msg: &WireMsg) -> Result<()> {
        let bytes = msg.serialize()?;
        let _ = self.socket.send_to(&bytes, self.multicast_addr).await?;
        Ok(())
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, event_tx: mpsc::UnboundedSender<Event>) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((length, sender)) => match WireMsg::from_bytes(&buffer[..length]) {
                Ok(msg) => {
                    if event_tx.send(Event::Rx(msg)).is_err() {
                        // the node is shutting down
                        return;
                    }
                }
                Err(error) => {
                    warn!("undecodable datagram from {}: {}", sender, error);
                }
            },
            Err(error) => {
                warn!("transport receive error: {}", error);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::system::{Empty, NetworkMsg};
    use crate::messaging::MsgHeader;
    use crate::types::Peer;

    #[tokio::test]
    async fn unicast_round_trip() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let group: SocketAddr = "239.255.42.98:47123".parse().unwrap();
        let (comm_a, _addr_a) = Comm::new(any, group, tx_a).await.unwrap();
        let (_comm_b, addr_b) = Comm::new(any, group, tx_b).await.unwrap();

        let sender = Peer::new(0, 0, 2, _addr_a).unwrap();
        let target = Peer::addressed(2, addr_b).unwrap();
        let msg = WireMsg::new(MsgHeader::new(sender, target, 0), NetworkMsg::Empty(Empty));

        comm_a.send(&msg).await.unwrap();

        match rx_b.recv().await {
            Some(Event::Rx(received)) => assert_eq!(received.msg_type(), msg.msg_type()),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
