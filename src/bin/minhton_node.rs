// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Runs a single MINHTON node until interrupted, then leaves gracefully.

use eyre::Result;
use minhton::{Config, JoinInfo, Node};
use std::net::{IpAddr, SocketAddr};
use structopt::StructOpt;
use tracing_subscriber::filter::EnvFilter;

#[derive(Debug, StructOpt)]
#[structopt(name = "minhton-node", about = "A MINHTON overlay node")]
struct Opt {
    /// Tree fanout; must match the overlay being joined.
    #[structopt(long, default_value = "2")]
    fanout: u16,

    /// Start the overlay as root instead of joining one.
    #[structopt(long)]
    root: bool,

    /// Address to bind the transport to.
    #[structopt(long, default_value = "0.0.0.0:0")]
    listen: SocketAddr,

    /// Join via a known peer instead of multicast discovery.
    #[structopt(long)]
    join_ip: Option<IpAddr>,

    /// Port of the known peer to join via.
    #[structopt(long, requires = "join-ip")]
    join_port: Option<u16>,

    /// Log filter, e.g. "minhton=debug".
    #[structopt(long, default_value = "minhton=info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let opt = Opt::from_args();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&opt.log_filter))
        .init();

    let join_info = if opt.root {
        JoinInfo::None
    } else {
        match (opt.join_ip, opt.join_port) {
            (Some(ip), Some(port)) => JoinInfo::Ip { ip, port },
            (Some(ip), None) => JoinInfo::Ip { ip, port: 47000 },
            _ => JoinInfo::Discovery,
        }
    };

    let config = Config {
        fanout: opt.fanout,
        is_root: opt.root,
        join_info,
        listen_addr: opt.listen,
        ..Config::default()
    };

    let node = Node::start(config).await?;
    tracing::info!(
        "node up at {} ({})",
        node.local_addr(),
        if opt.root { "root" } else { "joining" }
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("leaving the overlay");
    node.stop().await?;
    Ok(())
}
