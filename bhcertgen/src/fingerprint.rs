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

//! Stable fingerprints of the effective configuration of each certificate.
//!
//! A fingerprint is the SHA-256 digest of the canonical JSON form of a
//! descriptor followed by the fingerprint of its issuer.  Chaining the issuer
//! fingerprint in means that any change to an ancestor changes the
//! fingerprint of every descendant.

use std::{fmt, path::Path};

use bherror::traits::{ErrorContext as _, ForeignError as _};
use chrono::{DateTime, SecondsFormat, Utc};
use openssl::sha::Sha256;
use serde::{Deserialize, Serialize};

use crate::{
    descriptor::{CertificateDescriptor, ExtKeyUsage, KeyType, KeyUsage},
    Error, Result,
};

/// Hex encoded SHA-256 fingerprint of a certificate configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// The fingerprint as a lowercase hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hex::encode(hasher.finish()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// The canonical form of a descriptor that gets hashed.
///
/// Defaults are resolved and order-insensitive lists are sorted, so that
/// equivalent manifests produce equal fingerprints.
#[derive(Serialize)]
struct Canonical<'a> {
    subject: &'a str,
    sans: Vec<String>,
    key_type: KeyType,
    key_size: u32,
    expires_seconds: i64,
    not_before: Option<String>,
    not_after: Option<String>,
    key_usages: Vec<KeyUsage>,
    ext_key_usages: Vec<ExtKeyUsage>,
    issuer: Option<&'a str>,
    filename: String,
    ca: bool,
    serial: Option<u64>,
    revoked: bool,
    crl_distribution_points: Vec<String>,
}

impl<'a> Canonical<'a> {
    fn new(descriptor: &'a CertificateDescriptor) -> Result<Self> {
        let key_spec = descriptor.key_spec()?;

        let mut sans = descriptor
            .subject_alternative_names()?
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        sans.sort_unstable();

        let mut crl_distribution_points = descriptor
            .crl_distribution_points()?
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        crl_distribution_points.sort_unstable();

        Ok(Self {
            subject: descriptor.subject.trim(),
            sans,
            key_type: key_spec.key_type(),
            key_size: key_spec.bits(),
            expires_seconds: descriptor.expires()?.num_seconds(),
            not_before: descriptor.not_before.as_ref().map(normalize_timestamp),
            not_after: descriptor.not_after.as_ref().map(normalize_timestamp),
            key_usages: descriptor.key_usages(),
            ext_key_usages: descriptor.ext_key_usages(),
            issuer: descriptor.issuer(),
            filename: descriptor.filename()?,
            ca: descriptor.is_ca(),
            serial: descriptor.serial,
            revoked: descriptor.revoked,
            crl_distribution_points,
        })
    }
}

fn normalize_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Computes the fingerprint of `descriptor` chained to the fingerprint of its
/// issuer; `issuer` is [`None`] for self-signed certificates.
pub fn fingerprint(
    descriptor: &CertificateDescriptor,
    issuer: Option<&Fingerprint>,
) -> Result<Fingerprint> {
    let canonical = Canonical::new(descriptor)?;
    let canonical = serde_json::to_vec(&canonical)
        .foreign_err(|| Error::Manifest)
        .ctx(|| format!("cannot canonicalize \"{}\"", descriptor.subject))?;

    let issuer = issuer.map(|issuer| issuer.as_str().as_bytes()).unwrap_or_default();

    Ok(Fingerprint::digest(&[canonical.as_slice(), issuer]))
}

/// Computes the fingerprint of a revocation list from the fingerprint of its
/// issuer and those of the revoked certificates, in manifest order.
pub fn revocation_list_fingerprint<'a>(
    issuer: &Fingerprint,
    revoked: impl IntoIterator<Item = &'a Fingerprint>,
) -> Fingerprint {
    let mut parts: Vec<&[u8]> = vec![issuer.as_str().as_bytes()];
    parts.extend(
        revoked
            .into_iter()
            .map(|fingerprint| fingerprint.as_str().as_bytes()),
    );

    Fingerprint::digest(&parts)
}

/// Whether an artifact must be written in this run.
#[derive(strum_macros::Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The recorded fingerprint matches and every output file exists.
    #[strum(to_string = "skip")]
    Skip,
    /// The configuration changed or an output file is missing.
    #[strum(to_string = "write")]
    Regenerate,
}

/// Compares a freshly computed fingerprint with the recorded one and checks
/// that the `outputs` are still on disk.
pub fn decide<P: AsRef<Path>>(
    current: &Fingerprint,
    recorded: Option<&Fingerprint>,
    outputs: impl IntoIterator<Item = P>,
) -> Decision {
    let unchanged = recorded == Some(current);

    if unchanged && outputs.into_iter().all(|output| output.as_ref().is_file()) {
        Decision::Skip
    } else {
        Decision::Regenerate
    }
}
