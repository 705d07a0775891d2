use std::io::{ErrorKind, Read};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::lifecycle::{StopFlag, POLL_SLICE};
use crate::net::streamer::StreamEnd;
use crate::state::{MonitorEvent, SampleBuffer};

pub const DEFAULT_PORT: u16 = 7000;
pub const RECV_CHUNK: usize = 4096;
/// Bounds how long a blocked read can hide a stop request.
pub const READ_TIMEOUT: Duration = Duration::from_millis(200);

pub fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(addr).with_context(|| format!("Binding TCP listener at {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("Setting TCP listener non-blocking mode")?;
    Ok(listener)
}

/// Wait for the single client of this run. `None` if `stop` was set first.
pub fn accept_one(listener: &TcpListener, stop: &StopFlag) -> Result<Option<(TcpStream, SocketAddr)>> {
    loop {
        if stop.is_set() {
            return Ok(None);
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                stream
                    .set_nonblocking(false)
                    .context("Setting TCP stream blocking mode")?;
                stream
                    .set_read_timeout(Some(READ_TIMEOUT))
                    .context("Setting read timeout")?;
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(?e, %addr, "Failed to set TCP_NODELAY");
                }
                info!(%addr, "Accepted connection");
                return Ok(Some((stream, addr)));
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(POLL_SLICE),
            Err(e) => return Err(e).context("Accepting connection"),
        }
    }
}

/// Record every non-empty read until the peer closes, a read fails, or `stop` is set.
/// Read timeouts are not errors; they only give the loop a chance to see `stop`.
pub fn run_receiver<R: Read>(mut reader: R, samples: &SampleBuffer, stop: &StopFlag) -> StreamEnd {
    let mut buffer = [0u8; RECV_CHUNK];
    let end = loop {
        if stop.is_set() {
            break StreamEnd::Stopped;
        }
        match reader.read(&mut buffer) {
            Ok(0) => break StreamEnd::PeerClosed,
            Ok(n) => {
                samples.record(n);
                debug!(bytes = n, "Received chunk");
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(?e, "TCP read error");
                break StreamEnd::Failed(e);
            }
        }
    };
    stop.trigger();
    end
}

/// Server-side transport loop: accept one client, then receive until the stream ends.
pub fn serve_one(
    listener: TcpListener,
    samples: &SampleBuffer,
    events: &Sender<MonitorEvent>,
    stop: &StopFlag,
) -> Result<StreamEnd> {
    let (stream, addr) = match accept_one(&listener, stop) {
        Ok(Some(conn)) => conn,
        Ok(None) => return Ok(StreamEnd::Stopped),
        Err(e) => {
            stop.trigger();
            return Err(e);
        }
    };
    // one client per run
    drop(listener);
    let _ = events.send(MonitorEvent::PeerConnected(addr));

    let end = run_receiver(&stream, samples, stop);
    let _ = events.send(MonitorEvent::PeerClosed);
    info!(%addr, ?end, "Closed connection");
    Ok(end)
}
