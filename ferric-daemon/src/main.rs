//
// Copyright (c) The Ferric Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

use std::path::Path;

use clap::{App, Arg};
use ferric_bgp::config::Config;
use ferric_bgp::instance::Instance;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("ferric=debug".parse().unwrap())
        .from_env_lossy();
    let stdout = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout)
        .init();
}

fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, String> {
    let contents = std::fs::read_to_string(&path)
        .map_err(|error| format!("failed to read configuration: {error}"))?;
    toml::from_str(&contents)
        .map_err(|error| format!("failed to parse configuration: {error}"))
}

fn main() {
    // Parse command-line parameters.
    let matches = App::new("ferricd")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("BGP-4 speaker")
        .arg(
            Arg::with_name("config")
                .short("f")
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
                .default_value("/etc/ferricd.toml"),
        )
        .get_matches();

    init_tracing();

    let config_path = matches.value_of("config").unwrap().to_owned();
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");
    runtime.block_on(async move {
        let (mut instance, mut rx) = Instance::new(config);
        if let Err(error) = instance.start() {
            error!(%error, "failed to start");
            std::process::exit(1);
        }
        info!("started");

        if let Err(error) = instance.run(&mut rx).await {
            error!(%error, "reactor error");
        }
        info!("exiting");
    });
}
