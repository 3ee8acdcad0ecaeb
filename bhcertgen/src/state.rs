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

//! Fingerprints persisted between runs.

use std::{collections::BTreeMap, io::ErrorKind, path::Path};

use bherror::traits::{ErrorContext as _, ForeignError as _};
use serde::{Deserialize, Serialize};

use crate::{fingerprint::Fingerprint, Error, Result};

/// What happens to recorded fingerprints whose entity is no longer in the
/// manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StalePolicy {
    /// Drop them from the stored state.
    #[default]
    Prune,
    /// Carry them over unchanged.
    Retain,
}

/// Mapping of entity keys (output file base names) to the fingerprint of the
/// configuration their artifacts were generated from.
///
/// Stored as a flat YAML map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestState(BTreeMap<String, Fingerprint>);

impl ManifestState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the state stored at `path`.
    ///
    /// A missing file is an empty state, as on the very first run.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no previous state");
                return Ok(Self::new());
            }
            Err(err) => {
                return Err(err)
                    .foreign_err(|| Error::Filesystem)
                    .ctx(|| format!("cannot read state file {}", path.display()))
            }
        };

        if contents.trim().is_empty() {
            return Ok(Self::new());
        }

        serde_yaml::from_str(&contents)
            .foreign_err(|| Error::Filesystem)
            .ctx(|| format!("malformed state file {}", path.display()))
    }

    /// Writes the whole state to `path`, replacing the previous contents.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let contents = serde_yaml::to_string(self)
            .foreign_err(|| Error::Filesystem)
            .ctx(|| "cannot serialize state")?;

        std::fs::write(path, contents)
            .foreign_err(|| Error::Filesystem)
            .ctx(|| format!("cannot write state file {}", path.display()))
    }

    /// The fingerprint recorded for `key`.
    pub fn get(&self, key: &str) -> Option<&Fingerprint> {
        self.0.get(key)
    }

    /// Records `fingerprint` for `key`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, fingerprint: Fingerprint) {
        self.0.insert(key.into(), fingerprint);
    }

    /// Number of recorded entities.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Recorded entries ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Fingerprint)> {
        self.0.iter().map(|(key, fingerprint)| (key.as_str(), fingerprint))
    }

    /// Completes the state built by a run with the entries of `previous` that
    /// the run did not record, according to `policy`.
    pub fn with_stale(mut self, previous: &ManifestState, policy: StalePolicy) -> Self {
        match policy {
            StalePolicy::Prune => {
                for key in previous.0.keys().filter(|key| !self.0.contains_key(*key)) {
                    tracing::info!(key, "pruning stale state entry");
                }
            }
            StalePolicy::Retain => {
                for (key, fingerprint) in &previous.0 {
                    self.0
                        .entry(key.clone())
                        .or_insert_with(|| fingerprint.clone());
                }
            }
        }
        self
    }
}
