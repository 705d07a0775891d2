use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use crossbeam_channel as channel;
use tracing::{info, warn};

use crate::cli::Serve;
use crate::lifecycle::StopFlag;
use crate::net::discovery::{advertise, Registration};
use crate::net::receiver::{bind, serve_one};
use crate::state::{MonitorEvent, SampleBuffer};
use crate::ui::monitor::{run_monitor, MonitorView};

pub fn run_serve(serve: Serve) -> Result<()> {
    let stop = StopFlag::new();
    stop.install_ctrlc_handler();

    let listener = bind(serve.port)?;
    info!(port = serve.port, service_type = %serve.service_type, instance = %serve.name, "Starting airmeter receiver");
    println!("Listening on port {}...", serve.port);

    let samples = Arc::new(SampleBuffer::new());
    let (event_tx, event_rx) = channel::unbounded::<MonitorEvent>();

    // Advertisement: register once, refresh on an interval, unregister on stop
    let registration = Registration::new(&serve.service_type, &serve.name, serve.port);
    let interval = serve.announce_interval();
    let announcer = {
        let events = event_tx.clone();
        let stop = stop.clone();
        thread::spawn(move || advertise(registration, interval, &events, &stop))
    };

    // Transport: one client, every chunk becomes a sample
    let receiver = {
        let samples = Arc::clone(&samples);
        let events = event_tx.clone();
        let stop = stop.clone();
        thread::spawn(move || serve_one(listener, &samples, &events, &stop))
    };
    drop(event_tx);

    let view = MonitorView::receiver(serve.name.clone(), serve.port);
    let ui = run_monitor(view, &samples, &event_rx, &stop);

    // Shutdown
    stop.trigger();
    info!("Shutting down");
    let transport = receiver
        .join()
        .unwrap_or_else(|_| Err(anyhow!("Receiver thread panicked")));
    if announcer.join().is_err() {
        warn!("Announcer thread panicked");
    }

    ui?;
    let end = transport?;
    info!(?end, retained = samples.len(), "Receiver finished");
    Ok(())
}
