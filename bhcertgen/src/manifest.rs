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

//! Loading of the multi-document YAML manifest.

use std::{path::Path, str::FromStr};

use bherror::traits::{ErrorContext as _, ForeignError as _};
use serde::Deserialize as _;

use crate::{descriptor::CertificateDescriptor, Error, Result};

/// An ordered list of certificate descriptors.
///
/// Each YAML document of the manifest holds one descriptor.  Empty documents
/// are ignored, unknown fields are rejected.
///
/// ```yaml
/// subject: cn=root
/// ---
/// subject: cn=leaf
/// issuer: cn=root
/// sans:
/// - DNS:leaf.example.com
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    descriptors: Vec<CertificateDescriptor>,
}

impl Manifest {
    /// Reads and parses the manifest at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let text = std::fs::read_to_string(path)
            .foreign_err(|| Error::Filesystem)
            .ctx(|| format!("cannot read manifest {}", path.display()))?;

        text.parse()
            .ctx(|| format!("invalid manifest {}", path.display()))
    }

    /// Descriptors in manifest order.
    pub fn descriptors(&self) -> &[CertificateDescriptor] {
        &self.descriptors
    }

    /// Consumes the manifest, returning its descriptors.
    pub fn into_descriptors(self) -> Vec<CertificateDescriptor> {
        self.descriptors
    }
}

impl FromStr for Manifest {
    type Err = bherror::Error<Error>;

    fn from_str(text: &str) -> Result<Self> {
        let mut descriptors = Vec::new();

        for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
            let descriptor = Option::<CertificateDescriptor>::deserialize(document)
                .foreign_err(|| Error::Manifest)
                .ctx(|| format!("cannot parse document {}", index + 1))?;

            if let Some(descriptor) = descriptor {
                descriptors.push(descriptor);
            }
        }

        Ok(Self { descriptors })
    }
}

impl From<Vec<CertificateDescriptor>> for Manifest {
    fn from(descriptors: Vec<CertificateDescriptor>) -> Self {
        Self { descriptors }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{TimeZone as _, Utc};

    use super::*;
    use crate::descriptor::{ExtKeyUsage, KeyType, KeyUsage};

    #[test]
    fn test_parse_documents() {
        let manifest: Manifest = "
subject: cn=root
---
subject: cn=leaf
issuer: cn=root
sans:
- DNS:leaf.example.com
- IP:127.0.0.1
key_type: RSA
key_size: 4096
expires: 1h30m
not_before: 2020-01-01T09:00:00Z
key_usages:
- DigitalSignature
- CRLSign
ext_key_usages:
- ServerAuth
- IPSECUser
- OCSPSigning
filename: custom
ca: false
serial: 123
revoked: true
crl_distribution_points:
- http://root.example.com/crl
"
        .parse()
        .unwrap();

        let descriptors = manifest.descriptors();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].subject, "cn=root");
        assert!(descriptors[0].is_self_signed());

        let leaf = &descriptors[1];
        assert_eq!(leaf.issuer(), Some("cn=root"));
        assert_eq!(leaf.sans, vec!["DNS:leaf.example.com", "IP:127.0.0.1"]);
        assert_eq!(leaf.key_type, KeyType::Rsa);
        assert_eq!(leaf.key_size, Some(4096));
        assert_eq!(leaf.expires.as_deref(), Some("1h30m"));
        assert_eq!(
            leaf.not_before,
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 9, 0, 0).unwrap())
        );
        assert_eq!(leaf.key_usages, vec![KeyUsage::DigitalSignature, KeyUsage::CrlSign]);
        assert_eq!(
            leaf.ext_key_usages,
            vec![
                ExtKeyUsage::ServerAuth,
                ExtKeyUsage::IpsecUser,
                ExtKeyUsage::OcspSigning
            ]
        );
        assert_eq!(leaf.filename().unwrap(), "custom");
        assert_eq!(leaf.ca, Some(false));
        assert_eq!(leaf.serial, Some(123));
        assert!(leaf.revoked);
        assert_eq!(leaf.crl_distribution_points.len(), 1);
    }

    #[test]
    fn test_empty_documents_are_ignored() {
        let manifest: Manifest = "---\nsubject: cn=root\n---\n---\nsubject: cn=other\n"
            .parse()
            .unwrap();
        assert_eq!(manifest.descriptors().len(), 2);

        let manifest: Manifest = "".parse().unwrap();
        assert!(manifest.descriptors().is_empty());
    }

    #[test]
    fn test_unknown_field() {
        let err = "subject: cn=root\nunknown: true\n"
            .parse::<Manifest>()
            .unwrap_err();
        assert_matches!(err.error, Error::Manifest);
    }

    #[test]
    fn test_invalid_values() {
        for text in [
            "issuer: cn=root\n",
            "subject: cn=root\nkey_type: DSA\n",
            "subject: cn=root\nkey_usages: [Everything]\n",
            "subject: cn=root\nnot_before: yesterday\n",
            "subject: [cn=root]\n",
        ] {
            let err = text.parse::<Manifest>().unwrap_err();
            assert_matches!(err.error, Error::Manifest, "accepted {text:?}");
        }
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certs.yaml");
        std::fs::write(&path, "subject: cn=root\n").unwrap();

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.into_descriptors()[0].subject, "cn=root");

        let err = Manifest::load(dir.path().join("missing.yaml")).unwrap_err();
        assert_matches!(err.error, Error::Filesystem);
    }
}
