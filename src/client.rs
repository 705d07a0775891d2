use std::io::{BufRead, Write};
use std::net::Shutdown;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel as channel;
use rand::{rngs::SmallRng, SeedableRng};
use tracing::{info, warn};

use crate::cli::{Browse, DiscoveryArgs, ListFormat, Stream};
use crate::lifecycle::StopFlag;
use crate::net::discovery::{ensure_found, select_service, DiscoveredService, Discovery, DiscoveryError};
use crate::net::streamer::{connect, run_generator};
use crate::state::{MonitorEvent, SampleBuffer};
use crate::ui::monitor::{run_monitor, MonitorView};

fn discovery() -> Result<Box<dyn Discovery>, DiscoveryError> {
    #[cfg(feature = "mdns")]
    {
        Ok(Box::new(crate::net::discovery::MdnsBrowser))
    }
    #[cfg(not(feature = "mdns"))]
    {
        Err(DiscoveryError::Unavailable)
    }
}

fn resolve(args: &DiscoveryArgs) -> Result<Vec<DiscoveredService>> {
    let found = discovery()?.resolve(&args.service_type, args.timeout())?;
    Ok(ensure_found(found, &args.service_type)?)
}

pub(crate) fn numbered_listing(services: &[DiscoveredService]) -> Vec<String> {
    services
        .iter()
        .enumerate()
        .map(|(idx, s)| format!("[{idx}] {} -> {}", s.name, s.addr))
        .collect()
}

fn prompt_selection(services: &[DiscoveredService]) -> Result<DiscoveredService> {
    println!("Discovered services:");
    for line in numbered_listing(services) {
        println!("{line}");
    }
    print!("Select service index: ");
    std::io::stdout().flush().ok();

    let mut input = String::new();
    std::io::stdin().lock().read_line(&mut input).context("Reading service selection")?;
    Ok(select_service(services, &input)?.clone())
}

pub fn run_stream(stream: Stream) -> Result<()> {
    let target = match stream.connect {
        Some(addr) => DiscoveredService { name: addr.to_string(), addr },
        None => prompt_selection(&resolve(&stream.discovery)?)?,
    };

    println!("Connecting to {}...", target.addr);
    let conn = connect(target.addr)?;
    println!("Connected! Streaming fake packets...");

    let stop = StopFlag::new();
    stop.install_ctrlc_handler();
    let samples = Arc::new(SampleBuffer::new());

    let producer = {
        let writer = conn.try_clone().context("Cloning TCP stream (writer)")?;
        let samples = Arc::clone(&samples);
        let stop = stop.clone();
        thread::spawn(move || run_generator(writer, &samples, &stop, &mut SmallRng::from_os_rng()))
    };

    // the generator side has no status events to show
    let (_event_tx, event_rx) = channel::unbounded::<MonitorEvent>();
    let view = MonitorView::streamer(format!("{} ({})", target.name, target.addr));
    let ui = run_monitor(view, &samples, &event_rx, &stop);

    // Shutdown: unblock a write stuck on a full send buffer
    stop.trigger();
    let _ = conn.shutdown(Shutdown::Both);
    match producer.join() {
        Ok(end) => info!(?end, "Generator finished"),
        Err(_) => warn!("Generator thread panicked"),
    }
    ui
}

pub fn run_browse(browse: Browse) -> Result<()> {
    let services = resolve(&browse.discovery)?;
    match browse.format {
        ListFormat::Text => {
            for line in numbered_listing(&services) {
                println!("{line}");
            }
        }
        ListFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&services).context("Encoding services")?);
        }
    }
    Ok(())
}
