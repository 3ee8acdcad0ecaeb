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

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! This crate generates X.509 public key infrastructures for test and
//! development environments from a declarative YAML manifest.
//!
//! # Details
//!
//! Every document of the manifest describes one certificate: its subject,
//! key algorithm, validity, usages, alternative names and issuer.  A
//! certificate without an issuer is self-signed; every other certificate is
//! signed by the key of the entry whose subject matches its `issuer`, which
//! must appear earlier in the manifest.  For every entry the crate writes
//! `<filename>.pem` and `<filename>-key.pem` into the destination directory,
//! and for every authority issuing a `revoked` certificate it writes
//! `<filename>-crl.pem`.
//!
//! Generation is incremental.  A fingerprint of every entry, chained to the
//! fingerprint of its issuer, is recorded in a state file next to the
//! artifacts.  On the next run only the entries whose fingerprint changed,
//! whose files went missing, or whose issuer was re-issued are written again;
//! everything else, including existing private keys, is left untouched.
//!
//! The primary API is [`generate`], driven by a [`Config`].  [`run`] performs
//! the same work on an in-memory [`Manifest`] and [`ManifestState`].
//!
//! # Examples
//!
//! ```yaml
//! subject: cn=root-ca
//! ---
//! subject: cn=server
//! issuer: cn=root-ca
//! sans:
//! - DNS:localhost
//! - IP:127.0.0.1
//! ---
//! subject: cn=compromised
//! issuer: cn=root-ca
//! revoked: true
//! ```
//!
//! ```no_run
//! let config = bhcertgen::Config::new("certs.yaml").with_destination("out");
//!
//! let report = bhcertgen::generate(&config).expect("generate certificates");
//! for entry in report.entries() {
//!     println!("{} {}: {}", entry.decision, entry.kind, entry.name);
//! }
//! ```

mod builder;
mod config;
mod crl;
mod descriptor;
mod engine;
mod error;
mod fingerprint;
mod manifest;
mod resolver;
mod state;

pub use builder::*;
pub use config::*;
pub use crl::*;
pub use descriptor::*;
pub use engine::*;
pub use error::*;
pub use fingerprint::*;
pub use manifest::*;
pub use resolver::*;
pub use state::*;
