// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! sysupdated: system update management daemon.

use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use sysupdate_daemon::lifecycle::{self, Config};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(0o022));

    match lifecycle::run(Config::load()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("sysupdated failed: {e}");
            ExitCode::FAILURE
        }
    }
}
