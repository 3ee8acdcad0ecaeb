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

use std::collections::HashMap;

use crate::{descriptor::CertificateDescriptor, Error, Result};

/// The certificate whose key signs a given certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signer {
    /// The certificate signs itself.
    SelfSigned,
    /// The certificate is signed by the manifest entry at this index.
    Issuer(usize),
}

/// Outcome of resolving one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Output file base name, unique within the manifest.
    pub filename: String,
    /// Who signs the certificate.
    pub signer: Signer,
}

/// Resolves issuer references in a single pass over the manifest.
///
/// Issuers are looked up by exact subject match among the descriptors
/// resolved so far, so an issuer must be declared before it is referenced.
/// Forward references, typos and cycles all surface as
/// [`Error::UnresolvedIssuer`].
#[derive(Debug, Default)]
pub struct DependencyResolver<'a> {
    subjects: HashMap<&'a str, usize>,
    filenames: HashMap<String, usize>,
}

impl<'a> DependencyResolver<'a> {
    /// Creates a resolver with nothing resolved yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the descriptor at `index` of the manifest and makes it
    /// available as an issuer for the descriptors that follow.
    ///
    /// Descriptors must be passed in manifest order.
    pub fn resolve(
        &mut self,
        index: usize,
        descriptor: &'a CertificateDescriptor,
    ) -> Result<Resolution> {
        let filename = descriptor.filename()?;
        if let Some(previous) = self.filenames.insert(filename.clone(), index) {
            return Err(bherror::Error::root(Error::Manifest).ctx(format!(
                "entries {previous} and {index} both use the file name \"{filename}\""
            )));
        }

        let signer = match descriptor.issuer() {
            None => Signer::SelfSigned,
            Some(issuer) => match self.subjects.get(issuer) {
                Some(&issuer_index) => Signer::Issuer(issuer_index),
                None => {
                    return Err(bherror::Error::root(Error::UnresolvedIssuer(
                        issuer.to_owned(),
                    ))
                    .ctx(format!("referenced by \"{}\"", descriptor.subject)))
                }
            },
        };

        tracing::debug!(subject = %descriptor.subject, ?signer, "resolved issuer");

        // A later declaration with the same subject shadows the earlier one.
        self.subjects.insert(descriptor.subject.trim(), index);

        Ok(Resolution { filename, signer })
    }
}

/// Resolves every descriptor of the manifest, in order.
pub fn resolve(descriptors: &[CertificateDescriptor]) -> Result<Vec<Resolution>> {
    let mut resolver = DependencyResolver::new();

    descriptors
        .iter()
        .enumerate()
        .map(|(index, descriptor)| resolver.resolve(index, descriptor))
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn descriptor(subject: &str, issuer: Option<&str>) -> CertificateDescriptor {
        CertificateDescriptor {
            subject: subject.to_owned(),
            issuer: issuer.map(str::to_owned),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_chain() {
        let manifest = [
            descriptor("cn=root", None),
            descriptor("cn=intermediate", Some("cn=root")),
            descriptor("cn=leaf", Some("cn=intermediate")),
            descriptor("cn=other", Some("cn=root")),
        ];

        let resolutions = resolve(&manifest).unwrap();

        let signers = resolutions.iter().map(|r| r.signer).collect::<Vec<_>>();
        assert_eq!(
            signers,
            vec![
                Signer::SelfSigned,
                Signer::Issuer(0),
                Signer::Issuer(1),
                Signer::Issuer(0)
            ]
        );
        assert_eq!(resolutions[2].filename, "leaf");
    }

    #[test]
    fn test_forward_reference_is_unresolved() {
        let manifest = [
            descriptor("cn=leaf", Some("cn=root")),
            descriptor("cn=root", None),
        ];

        let err = resolve(&manifest).unwrap_err();
        assert_matches!(err.error, Error::UnresolvedIssuer(ref issuer) if issuer == "cn=root");
    }

    #[test]
    fn test_missing_and_self_reference_are_unresolved() {
        let err = resolve(&[descriptor("cn=root", None), descriptor("cn=leaf", Some("cn=typo"))])
            .unwrap_err();
        assert_matches!(err.error, Error::UnresolvedIssuer(_));

        let err = resolve(&[descriptor("cn=loop", Some("cn=loop"))]).unwrap_err();
        assert_matches!(err.error, Error::UnresolvedIssuer(_));
    }

    #[test]
    fn test_issuer_match_is_exact() {
        let err = resolve(&[descriptor("cn=root", None), descriptor("cn=leaf", Some("CN=root"))])
            .unwrap_err();
        assert_matches!(err.error, Error::UnresolvedIssuer(_));
    }

    #[test]
    fn test_duplicate_filename() {
        let err = resolve(&[descriptor("cn=root", None), descriptor("cn=root", None)]).unwrap_err();
        assert_matches!(err.error, Error::Manifest);

        // A distinct file name disambiguates, and the latest declaration wins.
        let manifest = [
            descriptor("cn=root", None),
            CertificateDescriptor {
                filename: Some("root-2".to_owned()),
                ..descriptor("cn=root", None)
            },
            descriptor("cn=leaf", Some("cn=root")),
        ];
        let resolutions = resolve(&manifest).unwrap();
        assert_eq!(resolutions[2].signer, Signer::Issuer(1));
    }
}
