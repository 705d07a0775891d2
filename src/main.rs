mod cli;
mod client;
mod lifecycle;
mod metrics;
mod net;
mod server;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::client::{run_browse, run_stream};
use crate::net::discovery::DiscoveryError;
use crate::server::run_serve;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let result: Result<()> = match cli.command {
        Some(Commands::Serve(serve)) => run_serve(serve),
        Some(Commands::Stream(stream)) => run_stream(stream),
        Some(Commands::Browse(browse)) => run_browse(browse),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(err) = result {
        // Map to stable exit codes
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: no services, 3: bad selection, 4: bind/connect failure, 1: other
    for cause in err.chain() {
        if let Some(disc) = cause.downcast_ref::<DiscoveryError>() {
            return match disc {
                DiscoveryError::NoServices { .. } => 2,
                DiscoveryError::InvalidSelection { .. } => 3,
                #[cfg(not(feature = "mdns"))]
                DiscoveryError::Unavailable => 1,
            };
        }
        if let Some(ioe) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind::*;
            return match ioe.kind() {
                AddrInUse | AddrNotAvailable | PermissionDenied | ConnectionRefused | ConnectionAborted
                | ConnectionReset => 4,
                _ => 1,
            };
        }
    }
    1
}
