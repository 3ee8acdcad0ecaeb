// Copyright (C) 2020-2025  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Command-line front end of `bhcertgen`.

use std::{path::PathBuf, process::ExitCode};

use bhcertgen::{Config, StalePolicy, DEFAULT_MANIFEST};
use clap::Parser;

/// Generates the certificates, private keys and revocation lists described
/// by a YAML manifest, rewriting only what changed since the previous run.
#[derive(Parser, Debug)]
#[command(name = "bhcertgen", version)]
struct Cli {
    /// Path of the manifest.
    #[arg(value_name = "MANIFEST", default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,

    /// Existing directory receiving the generated files.
    #[arg(long, env = "BHCERTGEN_DESTINATION", value_name = "DIR", default_value = ".")]
    destination: PathBuf,

    /// State file path [default: <DIR>/<manifest stem>.state].
    #[arg(long, env = "BHCERTGEN_STATE", value_name = "PATH")]
    state: Option<PathBuf>,

    /// Keep state entries of certificates removed from the manifest.
    #[arg(long)]
    retain_stale: bool,

    /// Log filter, e.g. `debug` or `bhcertgen=trace`.
    #[arg(long, env = "BHCERTGEN_LOG", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn config(&self) -> Config {
        let stale_policy = if self.retain_stale {
            StalePolicy::Retain
        } else {
            StalePolicy::Prune
        };

        let config = Config::new(&self.manifest)
            .with_destination(&self.destination)
            .with_stale_policy(stale_policy);

        match &self.state {
            Some(state) => config.with_state(state),
            None => config,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match bhcertgen::generate(&cli.config()) {
        Ok(report) => {
            tracing::info!(
                written = report.written().count(),
                skipped = report.skipped().count(),
                "done"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}", failure_message(&err));
            ExitCode::FAILURE
        }
    }
}

/// One line naming the error and its whole context chain.
fn failure_message(err: &bherror::Error<bhcertgen::Error>) -> String {
    format!("bhcertgen: {err:?}")
}
