// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

mod cli;

use std::os::fd::AsRawFd;

use cli::CliOutcome;
use xtee_core::spawn::StdChildSpawner;
use xtee_core::{logging, StopToken, XteeError};

fn main() -> anyhow::Result<()> {
    let config = match cli::parse(std::env::args_os()) {
        Ok(CliOutcome::Run(config)) => config,
        Ok(CliOutcome::HelpShown) => std::process::exit(0),
        Err(err) => {
            eprintln!("xtee: {err}");
            std::process::exit(-1);
        }
    };

    let stderr = std::io::stderr();
    if let Err(err) = logging::XteeLogger::install(stderr.as_raw_fd(), config.logflags) {
        eprintln!("xtee: failed to install logger: {err}");
    }

    let stop = StopToken::new();
    let handler_stop = stop.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_stop.request_stop()) {
        log::error!("failed to install signal handler: {err}");
    }

    let spawner = StdChildSpawner;
    // Safety: 0/1/2 are the process's real stdin/stdout/stderr, each open
    // and not otherwise owned at this point in `main`.
    let outcome = unsafe {
        xtee_core::run(
            &config,
            &spawner,
            libc::STDIN_FILENO,
            libc::STDOUT_FILENO,
            libc::STDERR_FILENO,
            stop,
        )
    };

    match &outcome {
        XteeError::SpawnFailed { .. } => log::error!("{outcome}"),
        _ => log::trace!("xtee exiting: {outcome}"),
    }
    std::process::exit(outcome.exit_code());
}
