use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::net::discovery::{ANNOUNCE_INTERVAL, DEFAULT_INSTANCE, DEFAULT_SERVICE_TYPE, DISCOVERY_TIMEOUT};
use crate::net::receiver::DEFAULT_PORT;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Advertise a service, accept one client and chart received bytes/s
    Serve(Serve),
    /// Discover a receiver, stream random payloads to it and chart sent bytes/s
    Stream(Stream),
    /// List advertised receivers and exit
    Browse(Browse),
}

#[derive(Args, Clone, Debug)]
pub struct DiscoveryArgs {
    /// mDNS service type
    #[arg(long, default_value = DEFAULT_SERVICE_TYPE)]
    pub service_type: String,

    /// Seconds to wait for mDNS answers
    #[arg(long, default_value_t = DISCOVERY_TIMEOUT.as_secs())]
    pub timeout: u64,
}

impl DiscoveryArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Parser, Clone, Debug)]
pub struct Serve {
    /// TCP port to listen on (all interfaces)
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// mDNS service type to advertise
    #[arg(long, default_value = DEFAULT_SERVICE_TYPE)]
    pub service_type: String,

    /// mDNS instance name
    #[arg(long, default_value = DEFAULT_INSTANCE)]
    pub name: String,

    /// Seconds between mDNS re-announcements
    #[arg(long, default_value_t = ANNOUNCE_INTERVAL.as_secs())]
    pub announce_interval: u64,
}

impl Serve {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval.max(1))
    }
}

#[derive(Parser, Clone, Debug)]
pub struct Stream {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    /// Skip discovery and connect to this address
    #[arg(long)]
    pub connect: Option<SocketAddr>,
}

#[derive(Parser, Clone, Debug)]
pub struct Browse {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = ListFormat::Text)]
    pub format: ListFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListFormat {
    Text,
    Json,
}
