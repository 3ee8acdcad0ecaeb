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

//! The generation run.
//!
//! A run first plans every artifact without touching the destination:
//! issuers are resolved, every descriptor is validated and fingerprinted, and
//! each certificate and revocation list is marked to be skipped or written.
//! Only then are the artifacts written, in manifest order.  A configuration
//! error therefore never leaves a partially written hierarchy behind, while
//! an I/O or cryptographic failure in the second phase leaves the files
//! written before it in place.

use std::{
    collections::HashSet,
    iter,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use openssl::x509::X509;

use crate::{
    builder::{CertificatePrivateKeyPair, CertificateTemplate},
    config::Config,
    crl::{self, RevocationGroup, RevocationListBuilder},
    descriptor::CertificateDescriptor,
    fingerprint::{self, Decision, Fingerprint},
    manifest::Manifest,
    resolver::{self, Resolution, Signer},
    state::{ManifestState, StalePolicy},
    Error, Result,
};

/// Kind of a generated artifact.
#[derive(strum_macros::Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A certificate and its private key.
    #[strum(to_string = "certificate")]
    Certificate,
    /// The revocation list of an issuing authority.
    #[strum(to_string = "revocation list")]
    RevocationList,
}

/// What a run did with one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    /// Kind of the artifact.
    pub kind: ArtifactKind,
    /// State key of the artifact, which is also its file base name.
    pub name: String,
    /// Whether the artifact was skipped or written.
    pub decision: Decision,
}

/// Per artifact outcome of a run, certificates first in manifest order,
/// followed by the revocation lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    entries: Vec<ReportEntry>,
}

impl Report {
    /// All entries.
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// Names of the artifacts written by the run.
    pub fn written(&self) -> impl Iterator<Item = &str> {
        self.names(Decision::Regenerate)
    }

    /// Names of the artifacts left untouched by the run.
    pub fn skipped(&self) -> impl Iterator<Item = &str> {
        self.names(Decision::Skip)
    }

    fn names(&self, decision: Decision) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |entry| entry.decision == decision)
            .map(|entry| entry.name.as_str())
    }

    fn push(&mut self, kind: ArtifactKind, name: &str, decision: Decision) {
        tracing::info!(%kind, "{decision} {name}");

        self.entries.push(ReportEntry {
            kind,
            name: name.to_owned(),
            decision,
        });
    }
}

/// Result of a successful [`run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// State to persist for the next run.
    pub state: ManifestState,
    /// What was skipped and what was written.
    pub report: Report,
}

fn artifact_path(destination: &Path, name: &str) -> PathBuf {
    destination.join(format!("{name}.pem"))
}

fn private_key_name(filename: &str) -> String {
    format!("{filename}-key")
}

fn revocation_list_name(issuer_filename: &str) -> String {
    format!("{issuer_filename}-crl")
}

struct CertificatePlan<'a> {
    descriptor: &'a CertificateDescriptor,
    filename: String,
    signer: Signer,
    template: CertificateTemplate,
    fingerprint: Fingerprint,
    decision: Decision,
}

impl CertificatePlan<'_> {
    fn certificate_path(&self, destination: &Path) -> PathBuf {
        artifact_path(destination, &self.filename)
    }

    fn private_key_path(&self, destination: &Path) -> PathBuf {
        artifact_path(destination, &private_key_name(&self.filename))
    }
}

struct RevocationListPlan {
    name: String,
    issuer: usize,
    revoked: Vec<usize>,
    fingerprint: Fingerprint,
}

struct Plan<'a> {
    certificates: Vec<CertificatePlan<'a>>,
    revocation_lists: Vec<RevocationListPlan>,
}

impl<'a> Plan<'a> {
    fn new(
        descriptors: &'a [CertificateDescriptor],
        previous: &ManifestState,
        destination: &Path,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let resolutions = resolver::resolve(descriptors)?;
        let mut groups = crl::group_revocations(descriptors, &resolutions)?;

        let mut certificates: Vec<CertificatePlan<'a>> = Vec::with_capacity(descriptors.len());
        for (descriptor, Resolution { filename, signer }) in descriptors.iter().zip(resolutions) {
            let template = CertificateTemplate::new(descriptor, now)?;

            let (issuer_fingerprint, issuer_regenerated) = match signer {
                Signer::SelfSigned => (None, false),
                Signer::Issuer(issuer) => {
                    let issuer = &certificates[issuer];
                    (
                        Some(&issuer.fingerprint),
                        issuer.decision == Decision::Regenerate,
                    )
                }
            };
            let fingerprint = fingerprint::fingerprint(descriptor, issuer_fingerprint)?;

            let outputs = [
                artifact_path(destination, &filename),
                artifact_path(destination, &private_key_name(&filename)),
            ];
            // A new issuer key invalidates the signature of every child.
            let decision = match fingerprint::decide(&fingerprint, previous.get(&filename), outputs)
            {
                Decision::Skip if !issuer_regenerated => Decision::Skip,
                _ => Decision::Regenerate,
            };

            certificates.push(CertificatePlan {
                descriptor,
                filename,
                signer,
                template,
                fingerprint,
                decision,
            });
        }

        // A published list stays published, empty once nothing is revoked.
        for (issuer, certificate) in certificates.iter().enumerate() {
            let published = previous
                .get(&revocation_list_name(&certificate.filename))
                .is_some();
            if published && !groups.iter().any(|group| group.issuer == issuer) {
                groups.push(RevocationGroup {
                    issuer,
                    revoked: Vec::new(),
                });
            }
        }
        groups.sort_by_key(|group| group.issuer);

        let revocation_lists = groups
            .into_iter()
            .map(|group| {
                let issuer = &certificates[group.issuer];
                let fingerprint = fingerprint::revocation_list_fingerprint(
                    &issuer.fingerprint,
                    group
                        .revoked
                        .iter()
                        .map(|&revoked| &certificates[revoked].fingerprint),
                );

                RevocationListPlan {
                    name: revocation_list_name(&issuer.filename),
                    issuer: group.issuer,
                    revoked: group.revoked,
                    fingerprint,
                }
            })
            .collect();

        let plan = Self {
            certificates,
            revocation_lists,
        };
        plan.check_artifact_names()?;

        Ok(plan)
    }

    /// Every artifact must go to its own file, e.g. a certificate named
    /// `ca1-crl` would overwrite the revocation list of `ca1`.
    fn check_artifact_names(&self) -> Result<()> {
        let certificates = self.certificates.iter().flat_map(|certificate| {
            [
                certificate.filename.clone(),
                private_key_name(&certificate.filename),
            ]
        });
        let revocation_lists = self
            .revocation_lists
            .iter()
            .map(|revocation_list| revocation_list.name.clone());

        let mut names = HashSet::new();
        for name in certificates.chain(revocation_lists) {
            if !names.insert(name.clone()) {
                return Err(bherror::Error::root(Error::Manifest)
                    .ctx(format!("more than one artifact would be written to {name}.pem")));
            }
        }

        Ok(())
    }
}

/// Key pairs of the manifest entries, generated during the run or loaded
/// from the destination on first use.
struct KeyPairs<'p, 'a> {
    plans: &'p [CertificatePlan<'a>],
    destination: &'p Path,
    pairs: Vec<Option<CertificatePrivateKeyPair>>,
}

impl<'p, 'a> KeyPairs<'p, 'a> {
    fn new(plans: &'p [CertificatePlan<'a>], destination: &'p Path) -> Self {
        Self {
            plans,
            destination,
            pairs: plans.iter().map(|_| None).collect(),
        }
    }

    fn get(&mut self, index: usize) -> Result<&CertificatePrivateKeyPair> {
        let pair = match self.pairs[index].take() {
            Some(pair) => pair,
            None => {
                let plan = &self.plans[index];
                tracing::debug!(filename = %plan.filename, "loading key pair from disk");
                CertificatePrivateKeyPair::load(
                    &plan.certificate_path(self.destination),
                    &plan.private_key_path(self.destination),
                )?
            }
        };

        Ok(self.pairs[index].insert(pair))
    }

    fn set(&mut self, index: usize, pair: CertificatePrivateKeyPair) {
        self.pairs[index] = Some(pair);
    }
}

/// Generates every certificate, private key and revocation list of the
/// manifest `descriptors` whose configuration changed since `previous` was
/// recorded, or whose files are missing from `destination`.
///
/// `now` is the default start of validity periods and the issue date of
/// revocation lists.  The returned state is not persisted; see [`generate`].
pub fn run(
    descriptors: &[CertificateDescriptor],
    previous: &ManifestState,
    destination: &Path,
    stale_policy: StalePolicy,
    now: DateTime<Utc>,
) -> Result<Generation> {
    if !destination.is_dir() {
        return Err(bherror::Error::root(Error::Filesystem).ctx(format!(
            "destination {} is not an existing directory",
            destination.display()
        )));
    }

    let plan = Plan::new(descriptors, previous, destination, now)?;

    let mut state = ManifestState::new();
    let mut report = Report::default();
    let mut key_pairs = KeyPairs::new(&plan.certificates, destination);

    for (index, certificate) in plan.certificates.iter().enumerate() {
        state.insert(certificate.filename.clone(), certificate.fingerprint.clone());

        if certificate.decision == Decision::Regenerate {
            let pair = {
                let issuer = match certificate.signer {
                    Signer::SelfSigned => None,
                    Signer::Issuer(issuer) => Some(key_pairs.get(issuer)?),
                };
                certificate.template.issue(issuer)?
            };
            pair.store(
                &certificate.certificate_path(destination),
                &certificate.private_key_path(destination),
            )?;
            key_pairs.set(index, pair);
        }

        tracing::debug!(subject = %certificate.descriptor.subject, fingerprint = %certificate.fingerprint);
        report.push(
            ArtifactKind::Certificate,
            &certificate.filename,
            certificate.decision,
        );
    }

    for revocation_list in &plan.revocation_lists {
        state.insert(
            revocation_list.name.clone(),
            revocation_list.fingerprint.clone(),
        );

        let path = artifact_path(destination, &revocation_list.name);
        // Re-issued members carry new serial numbers.
        let members_regenerated = iter::once(revocation_list.issuer)
            .chain(revocation_list.revoked.iter().copied())
            .any(|member| plan.certificates[member].decision == Decision::Regenerate);
        let decision = match fingerprint::decide(
            &revocation_list.fingerprint,
            previous.get(&revocation_list.name),
            [&path],
        ) {
            Decision::Skip if !members_regenerated => Decision::Skip,
            _ => Decision::Regenerate,
        };

        if decision == Decision::Regenerate {
            let issuer = key_pairs.get(revocation_list.issuer)?.clone();
            let revoked = revocation_list
                .revoked
                .iter()
                .map(|&revoked| Ok(key_pairs.get(revoked)?.certificate().to_owned()))
                .collect::<Result<Vec<X509>>>()?;

            let crl = RevocationListBuilder::new(&issuer, now)
                .build(revoked.iter().map(|cert| &**cert))?;
            crl::store_revocation_list(&crl, &path)?;
        }

        report.push(
            ArtifactKind::RevocationList,
            &revocation_list.name,
            decision,
        );
    }

    Ok(Generation {
        state: state.with_stale(previous, stale_policy),
        report,
    })
}

/// Loads the manifest and the state named by `config`, performs a [`run`],
/// and stores the new state.
///
/// The state file is only written when the whole run succeeds.
///
/// ```no_run
/// use bhcertgen::{generate, Config};
///
/// let report = generate(&Config::new("certs.yaml").with_destination("out")).unwrap();
/// for name in report.written() {
///     println!("wrote {name}");
/// }
/// ```
pub fn generate(config: &Config) -> Result<Report> {
    let manifest = Manifest::load(&config.manifest)?;

    let state_path = config.state_path();
    let previous = ManifestState::load(&state_path)?;

    let Generation { state, report } = run(
        manifest.descriptors(),
        &previous,
        &config.destination,
        config.stale_policy,
        Utc::now(),
    )?;

    state.store(&state_path)?;

    Ok(report)
}
