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

//! Certificate revocation lists, one per issuing authority.
//!
//! `openssl` cannot build revocation lists, so the list is assembled from the
//! [`x509_cert`] DER structures and signed with the issuer's `openssl` key.
//!
//! See [RFC 5280 - section 5](https://datatracker.ietf.org/doc/html/rfc5280#section-5).

use std::{collections::BTreeMap, path::Path};

use bherror::traits::{ErrorContext as _, ForeignError as _};
use chrono::{DateTime, Duration, Utc};
use openssl::{
    pkey::{HasPrivate, HasPublic, Id, PKeyRef},
    sign::Signer,
    x509::{X509Crl, X509Ref},
};
use x509_cert::{
    certificate::{Certificate, Version},
    crl::{CertificateList, RevokedCert, TbsCertList},
    der::{
        asn1::{Any, AnyRef, BitString, GeneralizedTime, OctetString, UtcTime},
        oid::{
            db::{rfc5912, rfc8410},
            AssociatedOid as _, ObjectIdentifier,
        },
        Decode as _, Encode,
    },
    ext::{
        pkix::{AuthorityKeyIdentifier, CrlNumber},
        Extension,
    },
    spki::AlgorithmIdentifierOwned,
    time::Time,
};

use crate::{
    builder::{signature_digest, CertificatePrivateKeyPair},
    descriptor::{CertificateDescriptor, DEFAULT_VALIDITY_SECONDS},
    resolver::{Resolution, Signer as IssuerRef},
    Error, Result,
};

/// Revoked manifest entries sharing one issuing authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationGroup {
    /// Manifest index of the issuing authority.
    pub issuer: usize,
    /// Manifest indices of the revoked certificates, in manifest order.
    pub revoked: Vec<usize>,
}

/// Groups the revoked entries of the manifest by their issuer, ordered by
/// the issuer's position in the manifest.
///
/// Fails with [`Error::Revocation`] if a self-signed entry is revoked.
pub fn group_revocations(
    descriptors: &[CertificateDescriptor],
    resolutions: &[Resolution],
) -> Result<Vec<RevocationGroup>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

    for (index, (descriptor, resolution)) in descriptors.iter().zip(resolutions).enumerate() {
        if !descriptor.revoked {
            continue;
        }
        match resolution.signer {
            IssuerRef::Issuer(issuer) => groups.entry(issuer).or_default().push(index),
            IssuerRef::SelfSigned => {
                return Err(bherror::Error::root(Error::Revocation(
                    descriptor.subject.clone(),
                )))
            }
        }
    }

    Ok(groups
        .into_iter()
        .map(|(issuer, revoked)| RevocationGroup { issuer, revoked })
        .collect())
}

/// Builds the revocation list of one issuing authority.
#[derive(Debug)]
pub struct RevocationListBuilder<'a> {
    issuer: &'a CertificatePrivateKeyPair,
    this_update: DateTime<Utc>,
}

impl<'a> RevocationListBuilder<'a> {
    /// Creates a builder for lists signed by `issuer`, issued and revoking at
    /// `now`.
    pub fn new(issuer: &'a CertificatePrivateKeyPair, now: DateTime<Utc>) -> Self {
        Self {
            issuer,
            this_update: now,
        }
    }

    /// Builds and signs a version 2 list holding the serial numbers of the
    /// `revoked` certificates, in the given order.
    ///
    /// The next update is due a year after this one, and the CRL number is
    /// the Unix time of this update.
    pub fn build<'c>(&self, revoked: impl IntoIterator<Item = &'c X509Ref>) -> Result<X509Crl> {
        let issuer = decode_certificate(self.issuer.certificate())?;
        let this_update = x509_time(self.this_update)?;
        let next_update =
            x509_time(self.this_update + Duration::seconds(DEFAULT_VALIDITY_SECONDS))?;

        let revoked_certificates = revoked
            .into_iter()
            .map(|cert| {
                Ok(RevokedCert {
                    serial_number: decode_certificate(cert)?.tbs_certificate.serial_number,
                    revocation_date: this_update,
                    crl_entry_extensions: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let signing_key = self.issuer.private_key();
        let signature_algorithm = signature_algorithm(signing_key)?;

        let tbs_cert_list = TbsCertList {
            version: Version::V2,
            signature: signature_algorithm.clone(),
            issuer: issuer.tbs_certificate.subject,
            this_update,
            next_update: Some(next_update),
            revoked_certificates: (!revoked_certificates.is_empty())
                .then_some(revoked_certificates),
            crl_extensions: Some(self.extensions()?),
        };

        let tbs_der = tbs_cert_list
            .to_der()
            .foreign_err(|| Error::Crypto)
            .ctx(|| "Cannot encode revocation list")?;
        let signature = sign(signing_key, &tbs_der)?;

        let crl = CertificateList {
            tbs_cert_list,
            signature_algorithm,
            signature: BitString::from_bytes(&signature)
                .foreign_err(|| Error::Crypto)
                .ctx(|| "Cannot encode revocation list signature")?,
        };

        let der = crl
            .to_der()
            .foreign_err(|| Error::Crypto)
            .ctx(|| "Cannot encode revocation list")?;
        X509Crl::from_der(&der)
            .foreign_err(|| Error::Crypto)
            .ctx(|| "Cannot load encoded revocation list")
    }

    fn extensions(&self) -> Result<Vec<Extension>> {
        let crl_number = u64::try_from(self.this_update.timestamp())
            .foreign_err(|| Error::Crypto)
            .ctx(|| "CRL number must not be negative")?;

        let mut extensions = vec![extension(CrlNumber::OID, &crl_number)?];

        if let Some(key_id) = self.issuer.certificate().subject_key_id() {
            let authority_key_identifier = AuthorityKeyIdentifier {
                key_identifier: Some(
                    OctetString::new(key_id.as_slice())
                        .foreign_err(|| Error::Crypto)
                        .ctx(|| "Cannot encode authority key identifier")?,
                ),
                authority_cert_issuer: None,
                authority_cert_serial_number: None,
            };
            extensions.push(extension(
                AuthorityKeyIdentifier::OID,
                &authority_key_identifier,
            )?);
        }

        Ok(extensions)
    }
}

/// Writes `crl` to `path` as a PEM `X509 CRL`.
pub fn store_revocation_list(crl: &X509Crl, path: &Path) -> Result<()> {
    let pem = crl
        .to_pem()
        .foreign_err(|| Error::Crypto)
        .ctx(|| "Cannot encode revocation list")?;

    std::fs::write(path, pem)
        .foreign_err(|| Error::Filesystem)
        .ctx(|| format!("cannot write {}", path.display()))
}

fn decode_certificate(cert: &X509Ref) -> Result<Certificate> {
    let der = cert
        .to_der()
        .foreign_err(|| Error::Crypto)
        .ctx(|| "Cannot encode certificate")?;

    Certificate::from_der(&der)
        .foreign_err(|| Error::Crypto)
        .ctx(|| "Cannot decode certificate")
}

fn extension(extn_id: ObjectIdentifier, value: &impl Encode) -> Result<Extension> {
    let der = value
        .to_der()
        .foreign_err(|| Error::Crypto)
        .ctx(|| format!("Cannot encode extension {extn_id}"))?;

    Ok(Extension {
        extn_id,
        critical: false,
        extn_value: OctetString::new(der)
            .foreign_err(|| Error::Crypto)
            .ctx(|| format!("Cannot wrap extension {extn_id}"))?,
    })
}

/// UTCTime through [`UtcTime::MAX_YEAR`] and GeneralizedTime afterwards.
///
/// See [RFC 5280 - section 5.1.2.4](https://datatracker.ietf.org/doc/html/rfc5280#section-5.1.2.4).
fn x509_time(timestamp: DateTime<Utc>) -> Result<Time> {
    let seconds = u64::try_from(timestamp.timestamp())
        .foreign_err(|| Error::Crypto)
        .ctx(|| format!("{timestamp} is before the Unix epoch"))?;

    let date_time =
        x509_cert::der::DateTime::from_unix_duration(std::time::Duration::from_secs(seconds))
            .foreign_err(|| Error::Crypto)
            .ctx(|| format!("Cannot represent {timestamp}"))?;

    if date_time.year() <= UtcTime::MAX_YEAR {
        UtcTime::from_date_time(date_time)
            .map(Time::UtcTime)
            .foreign_err(|| Error::Crypto)
            .ctx(|| format!("Cannot represent {timestamp}"))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(date_time)))
    }
}

/// The algorithm identifier matching what [`sign`] produces with `key`.
fn signature_algorithm<T: HasPublic>(key: &PKeyRef<T>) -> Result<AlgorithmIdentifierOwned> {
    let (oid, parameters) = match key.id() {
        Id::RSA => (
            rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
            Some(Any::from(AnyRef::NULL)),
        ),
        Id::EC => {
            let oid = match key.bits() {
                384 => rfc5912::ECDSA_WITH_SHA_384,
                521 => rfc5912::ECDSA_WITH_SHA_512,
                _ => rfc5912::ECDSA_WITH_SHA_256,
            };
            (oid, None)
        }
        Id::ED25519 => (rfc8410::ID_ED_25519, None),
        _ => {
            return Err(bherror::Error::root(Error::Crypto)
                .ctx("unsupported revocation list signing key"))
        }
    };

    Ok(AlgorithmIdentifierOwned { oid, parameters })
}

fn sign<T: HasPrivate + HasPublic>(key: &PKeyRef<T>, data: &[u8]) -> Result<Vec<u8>> {
    let signer = match key.id() {
        Id::ED25519 => Signer::new_without_digest(key),
        _ => Signer::new(signature_digest(key), key),
    };

    signer
        .and_then(|mut signer| signer.sign_oneshot_to_vec(data))
        .foreign_err(|| Error::Crypto)
        .ctx(|| "Cannot sign revocation list")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use openssl::nid::Nid;

    use super::*;
    use crate::{builder::CertificateTemplate, descriptor::KeyType, resolver::resolve};

    fn descriptor(subject: &str, issuer: Option<&str>) -> CertificateDescriptor {
        CertificateDescriptor {
            subject: subject.to_owned(),
            issuer: issuer.map(str::to_owned),
            ..Default::default()
        }
    }

    fn issue(
        descriptor: &CertificateDescriptor,
        issuer: Option<&CertificatePrivateKeyPair>,
    ) -> CertificatePrivateKeyPair {
        CertificateTemplate::new(descriptor, Utc::now())
            .unwrap()
            .issue(issuer)
            .unwrap()
    }

    fn serials(crl: &X509Crl) -> Vec<String> {
        crl.get_revoked()
            .map(|revoked| {
                revoked
                    .iter()
                    .map(|entry| {
                        entry
                            .serial_number()
                            .to_bn()
                            .unwrap()
                            .to_dec_str()
                            .unwrap()
                            .to_string()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_group_revocations() {
        let manifest = [
            descriptor("cn=root", None),
            descriptor("cn=ca1", Some("cn=root")),
            CertificateDescriptor {
                revoked: true,
                ..descriptor("cn=a", Some("cn=ca1"))
            },
            descriptor("cn=b", Some("cn=ca1")),
            CertificateDescriptor {
                revoked: true,
                ..descriptor("cn=c", Some("cn=root"))
            },
            CertificateDescriptor {
                revoked: true,
                ..descriptor("cn=d", Some("cn=ca1"))
            },
        ];
        let resolutions = resolve(&manifest).unwrap();

        let groups = group_revocations(&manifest, &resolutions).unwrap();

        assert_eq!(
            groups,
            vec![
                RevocationGroup {
                    issuer: 0,
                    revoked: vec![4]
                },
                RevocationGroup {
                    issuer: 1,
                    revoked: vec![2, 5]
                },
            ]
        );
        assert_eq!(resolutions[2].signer, IssuerRef::Issuer(1));
    }

    #[test]
    fn test_revoking_self_signed_fails() {
        let manifest = [CertificateDescriptor {
            revoked: true,
            ..descriptor("cn=root", None)
        }];
        let resolutions = resolve(&manifest).unwrap();

        let err = group_revocations(&manifest, &resolutions).unwrap_err();
        assert_matches!(err.error, Error::Revocation(ref subject) if subject == "cn=root");
    }

    #[test]
    fn test_build_revocation_list() {
        let ca = issue(&descriptor("cn=ca1", None), None);
        let revoked = issue(
            &CertificateDescriptor {
                serial: Some(123),
                ..descriptor("cn=leaf", Some("cn=ca1"))
            },
            Some(&ca),
        );
        let now = Utc::now();

        let crl = RevocationListBuilder::new(&ca, now)
            .build([revoked.certificate()])
            .unwrap();

        assert_eq!(serials(&crl), vec!["123"]);
        assert!(crl.verify(ca.private_key()).unwrap());
        assert_eq!(
            crl.issuer_name()
                .entries_by_nid(Nid::COMMONNAME)
                .next()
                .unwrap()
                .data()
                .as_utf8()
                .unwrap()
                .to_string(),
            "ca1"
        );
        assert!(crl.next_update().is_some());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca1-crl.pem");
        store_revocation_list(&crl, &path).unwrap();

        let pem = std::fs::read(&path).unwrap();
        assert!(pem.starts_with(b"-----BEGIN X509 CRL-----"));
        let loaded = X509Crl::from_pem(&pem).unwrap();
        assert_eq!(serials(&loaded), vec!["123"]);
    }

    #[test]
    fn test_signing_key_types() {
        for (key_type, key_size) in [
            (KeyType::Ec, 256),
            (KeyType::Ec, 384),
            (KeyType::Ec, 521),
            (KeyType::Rsa, 2048),
            (KeyType::Ed25519, 256),
        ] {
            let ca = issue(
                &CertificateDescriptor {
                    key_type,
                    key_size: Some(key_size),
                    ..descriptor("cn=ca1", None)
                },
                None,
            );
            let first = issue(&descriptor("cn=first", Some("cn=ca1")), Some(&ca));
            let second = issue(&descriptor("cn=second", Some("cn=ca1")), Some(&ca));

            let crl = RevocationListBuilder::new(&ca, Utc::now())
                .build([first.certificate(), second.certificate()])
                .unwrap();

            assert!(crl.verify(ca.private_key()).unwrap());
            assert_eq!(serials(&crl).len(), 2);
        }
    }

    #[test]
    fn test_empty_revocation_list() {
        let ca = issue(&descriptor("cn=ca1", None), None);

        let crl = RevocationListBuilder::new(&ca, Utc::now())
            .build(std::iter::empty())
            .unwrap();

        assert!(serials(&crl).is_empty());
        assert!(crl.verify(ca.private_key()).unwrap());
    }

    #[test]
    fn test_time_encoding_switches_after_2049() {
        use chrono::TimeZone as _;

        let last_utc_time = Utc.with_ymd_and_hms(2049, 12, 31, 23, 59, 59).unwrap();
        assert_matches!(x509_time(last_utc_time).unwrap(), Time::UtcTime(_));

        let first_generalized_time = Utc.with_ymd_and_hms(2050, 1, 1, 0, 0, 0).unwrap();
        assert_matches!(
            x509_time(first_generalized_time).unwrap(),
            Time::GeneralTime(_)
        );
    }
}
