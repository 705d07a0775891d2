use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::BytesMut;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::lifecycle::{StopFlag, Ticker};
use crate::state::SampleBuffer;

pub const PAYLOAD_MIN: usize = 100;
pub const PAYLOAD_MAX: usize = 1000;
pub const PRODUCE_INTERVAL: Duration = Duration::from_millis(100);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a transfer loop ended.
#[derive(Debug)]
pub enum StreamEnd {
    /// Stop flag observed at the top of the loop.
    Stopped,
    /// Orderly close by the peer.
    PeerClosed,
    Failed(io::Error),
}

pub fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).with_context(|| format!("Connecting to {addr}"))?;
    if let Err(e) = stream.set_nodelay(true) {
        warn!(?e, %addr, "Failed to set TCP_NODELAY");
    }
    stream
        .set_write_timeout(Some(WRITE_TIMEOUT))
        .context("Setting write timeout")?;
    info!(%addr, "Connected");
    Ok(stream)
}

/// Uniformly sized, uniformly filled synthetic payload.
pub fn random_payload<R: Rng>(rng: &mut R) -> BytesMut {
    let size = rng.random_range(PAYLOAD_MIN..=PAYLOAD_MAX);
    let mut payload = BytesMut::zeroed(size);
    rng.fill(&mut payload[..]);
    payload
}

/// Write one random payload per tick and record each successful write.
/// Any write error ends the loop and triggers `stop`; nothing is retried.
pub fn run_generator<W: Write, R: Rng>(
    mut writer: W,
    samples: &SampleBuffer,
    stop: &StopFlag,
    rng: &mut R,
) -> StreamEnd {
    let mut ticker = Ticker::new(PRODUCE_INTERVAL);
    let end = loop {
        if !ticker.wait(stop) {
            break StreamEnd::Stopped;
        }
        let payload = random_payload(rng).freeze();
        match writer.write_all(&payload) {
            Ok(()) => {
                samples.record(payload.len());
                debug!(bytes = payload.len(), "Sent payload");
            }
            Err(e) => {
                warn!(?e, "TCP write error");
                break StreamEnd::Failed(e);
            }
        }
    };
    stop.trigger();
    end
}
