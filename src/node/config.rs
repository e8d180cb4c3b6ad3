// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::error::{Error, Result};
use crate::node::fsm::TimeoutKind;
use crate::routing::calculations::is_fanout_valid;
use crate::types::{Peer, PORT_MIN};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default multicast group the bootstrap discovery probes.
pub const DEFAULT_MULTICAST_ADDR: &str = "239.255.42.99:47000";

/// How a starting node finds its way into the overlay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JoinInfo {
    /// Join via a known peer address.
    Ip { ip: IpAddr, port: u16 },
    /// Join via multicast discovery.
    Discovery,
    /// Do not join; only legal for the root.
    None,
}

/// Milliseconds for every timeout kind. A length of zero disables the
/// respective timer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub bootstrap_response: u64,
    pub join_response: u64,
    pub join_accept_ack_response: u64,
    pub replacement_offer_response: u64,
    pub replacement_ack_response: u64,
    pub dsn_aggregation: u64,
    pub inquiry_aggregation: u64,
    pub self_departure_retry: u64,
    pub join_retry: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            bootstrap_response: 500,
            join_response: 1000,
            join_accept_ack_response: 1000,
            replacement_offer_response: 1000,
            replacement_ack_response: 1000,
            dsn_aggregation: 1000,
            inquiry_aggregation: 500,
            self_departure_retry: 1000,
            join_retry: 1000,
        }
    }
}

impl TimeoutConfig {
    /// The configured length for a kind; `None` when the timer is disabled.
    pub fn length(&self, kind: TimeoutKind) -> Option<Duration> {
        let millis = match kind {
            TimeoutKind::BootstrapResponse => self.bootstrap_response,
            TimeoutKind::JoinAcceptResponse => self.join_response,
            TimeoutKind::JoinAcceptAckResponse => self.join_accept_ack_response,
            TimeoutKind::ReplacementOfferResponse => self.replacement_offer_response,
            TimeoutKind::ReplacementAckResponse => self.replacement_ack_response,
            TimeoutKind::DsnAggregation => self.dsn_aggregation,
            TimeoutKind::InquiryAggregation => self.inquiry_aggregation,
            TimeoutKind::SelfDepartureRetry => self.self_departure_retry,
            TimeoutKind::JoinRetry => self.join_retry,
        };
        if millis == 0 {
            None
        } else {
            Some(Duration::from_millis(millis))
        }
    }
}

/// Which concrete implementation each algorithm category uses, as string
/// tags. Today one implementation exists per category; unknown tags are
/// rejected at startup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub join: String,
    pub leave: String,
    pub search_exact: String,
    pub entity_search: String,
    pub bootstrap: String,
    pub response: String,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            join: "minhton".to_string(),
            leave: "minhton".to_string(),
            search_exact: "minhton".to_string(),
            entity_search: "minhton".to_string(),
            bootstrap: "minhton".to_string(),
            response: "minhton".to_string(),
        }
    }
}

impl AlgorithmConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        for (category, tag) in &[
            ("join", &self.join),
            ("leave", &self.leave),
            ("search_exact", &self.search_exact),
            ("entity_search", &self.entity_search),
            ("bootstrap", &self.bootstrap),
            ("response", &self.response),
        ] {
            if tag.as_str() != "minhton" {
                return Err(Error::Configuration(format!(
                    "unknown {} algorithm '{}'",
                    category, tag
                )));
            }
        }
        Ok(())
    }
}

/// Node configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Tree fanout, 2..=255. Must match the overlay being joined.
    pub fanout: u16,
    /// Whether this node starts the overlay as root at `(0, 0)`.
    pub is_root: bool,
    pub join_info: JoinInfo,
    /// Address to bind the transport to.
    pub listen_addr: SocketAddr,
    /// Multicast group used by bootstrap discovery.
    pub multicast_addr: SocketAddr,
    pub timeouts: TimeoutConfig,
    pub algorithms: AlgorithmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fanout: 2,
            is_root: false,
            join_info: JoinInfo::Discovery,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            multicast_addr: DEFAULT_MULTICAST_ADDR
                .parse()
                .expect("default multicast address parses"),
            timeouts: TimeoutConfig::default(),
            algorithms: AlgorithmConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !is_fanout_valid(self.fanout) {
            return Err(Error::InvalidFanout(self.fanout));
        }
        self.algorithms.validate()?;

        match (&self.join_info, self.is_root) {
            (JoinInfo::None, false) => Err(Error::Configuration(
                "cannot start a non-root node without join info".to_string(),
            )),
            (JoinInfo::None, true) => Ok(()),
            (_, true) => Err(Error::Configuration(
                "the root cannot join anywhere".to_string(),
            )),
            (JoinInfo::Ip { port, .. }, false) => {
                if *port < PORT_MIN {
                    return Err(Error::Configuration(format!(
                        "join port {} is below the allowed minimum {}",
                        port, PORT_MIN
                    )));
                }
                Ok(())
            }
            (JoinInfo::Discovery, false) => Ok(()),
        }
    }

    /// The seed peer to direct the join at, when joining via address.
    pub(crate) fn join_target(&self) -> Option<Peer> {
        match &self.join_info {
            JoinInfo::Ip { ip, port } => {
                Peer::addressed(self.fanout, SocketAddr::new(*ip, *port)).ok()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn root_must_not_join() {
        let config = Config {
            is_root: true,
            join_info: JoinInfo::Discovery,
            ..Config::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let config = Config {
            is_root: true,
            join_info: JoinInfo::None,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_root_needs_join_info() {
        let config = Config {
            join_info: JoinInfo::None,
            ..Config::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn privileged_join_ports_are_rejected() {
        let config = Config {
            join_info: JoinInfo::Ip {
                ip: "127.0.0.1".parse().unwrap(),
                port: 80,
            },
            ..Config::default()
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn fanout_is_checked() {
        let config = Config {
            fanout: 1,
            ..Config::default()
        };
        assert_matches!(config.validate(), Err(Error::InvalidFanout(1)));
    }

    #[test]
    fn zero_timeout_disables_the_timer() {
        let timeouts = TimeoutConfig {
            bootstrap_response: 0,
            ..TimeoutConfig::default()
        };
        assert!(timeouts.length(TimeoutKind::BootstrapResponse).is_none());
        assert_eq!(
            timeouts.length(TimeoutKind::SelfDepartureRetry),
            Some(Duration::from_millis(1000))
        );
    }
}
