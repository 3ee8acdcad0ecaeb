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

use std::path::PathBuf;

use crate::state::StalePolicy;

/// Manifest used when none is named.
pub const DEFAULT_MANIFEST: &str = "certs.yaml";

/// Extension of the state file derived from the manifest name.
const STATE_EXTENSION: &str = "state";

/// Inputs and outputs of one [`generate`](crate::generate) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path of the YAML manifest.
    pub manifest: PathBuf,
    /// Existing directory receiving the certificates, keys and revocation
    /// lists.
    pub destination: PathBuf,
    /// Path of the state file; see [`Config::state_path`] for the default.
    pub state: Option<PathBuf>,
    /// Treatment of state entries with no counterpart in the manifest.
    pub stale_policy: StalePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_MANIFEST)
    }
}

impl Config {
    /// Configuration for `manifest` writing into the current directory.
    pub fn new(manifest: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            destination: PathBuf::from("."),
            state: None,
            stale_policy: StalePolicy::default(),
        }
    }

    /// Sets the destination directory.
    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = destination.into();
        self
    }

    /// Sets an explicit state file path.
    pub fn with_state(mut self, state: impl Into<PathBuf>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Sets the stale entry policy.
    pub fn with_stale_policy(mut self, stale_policy: StalePolicy) -> Self {
        self.stale_policy = stale_policy;
        self
    }

    /// The state file path: the explicit one, or
    /// `<destination>/<manifest file stem>.state`.
    pub fn state_path(&self) -> PathBuf {
        match &self.state {
            Some(state) => state.clone(),
            None => {
                let stem = self
                    .manifest
                    .file_stem()
                    .map(|stem| stem.to_string_lossy())
                    .unwrap_or_else(|| "certs".into());
                self.destination
                    .join(format!("{stem}.{STATE_EXTENSION}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.manifest, PathBuf::from("certs.yaml"));
        assert_eq!(config.destination, PathBuf::from("."));
        assert_eq!(config.stale_policy, StalePolicy::Prune);
        assert_eq!(config.state_path(), PathBuf::from("./certs.state"));
    }

    #[test]
    fn test_state_path() {
        let config = Config::new("manifests/pki.yaml").with_destination("/tmp/out");
        assert_eq!(config.state_path(), PathBuf::from("/tmp/out/pki.state"));

        let dotted = Config::new("my.certs.yaml");
        assert_eq!(dotted.state_path(), PathBuf::from("./my.certs.state"));

        let config = config
            .with_state("/var/lib/pki.state")
            .with_stale_policy(StalePolicy::Retain);
        assert_eq!(config.state_path(), PathBuf::from("/var/lib/pki.state"));
        assert_eq!(config.stale_policy, StalePolicy::Retain);
    }
}
