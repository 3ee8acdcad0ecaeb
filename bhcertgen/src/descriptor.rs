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

//! Normalized certificate descriptors and the typed values parsed out of them.

use std::{fmt, net::IpAddr, str::FromStr};

use bherror::traits::{ErrorContext as _, ForeignError as _};
use chrono::{DateTime, Duration, Utc};
use iref::UriBuf;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Validity period used when neither `not_after` nor `expires` is given
/// (`8760h`).
pub const DEFAULT_VALIDITY_SECONDS: i64 = 8760 * 60 * 60;

/// One certificate specification of the manifest.
///
/// Every field except `subject` is optional; the accessor methods resolve the
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateDescriptor {
    /// Distinguished name of the subject, e.g. `CN=server, O=Example`.
    pub subject: String,
    /// Subject alternative names with a `DNS:`, `IP:` or `URI:` prefix.
    #[serde(default)]
    pub sans: Vec<String>,
    /// Key algorithm.
    #[serde(default)]
    pub key_type: KeyType,
    /// Key size in bits.
    pub key_size: Option<u32>,
    /// Validity duration counted from `not_before`, e.g. `8760h` or `1h30m`.
    pub expires: Option<String>,
    /// Start of the validity period.
    pub not_before: Option<DateTime<Utc>>,
    /// End of the validity period, takes precedence over `expires`.
    pub not_after: Option<DateTime<Utc>>,
    /// Key usages overriding the CA / end-entity defaults.
    #[serde(default)]
    pub key_usages: Vec<KeyUsage>,
    /// Extended key usages.
    #[serde(default)]
    pub ext_key_usages: Vec<ExtKeyUsage>,
    /// Subject of a previously declared certificate signing this one.
    pub issuer: Option<String>,
    /// Base name of the output files.
    pub filename: Option<String>,
    /// Whether the certificate is a certificate authority.
    pub ca: Option<bool>,
    /// Pinned serial number.
    pub serial: Option<u64>,
    /// Whether the certificate is listed in its issuer's revocation list.
    #[serde(default)]
    pub revoked: bool,
    /// URLs placed into the CRL distribution points extension.
    #[serde(default)]
    pub crl_distribution_points: Vec<String>,
}

impl CertificateDescriptor {
    /// Subject of the issuing certificate, or [`None`] when self-signed.
    pub fn issuer(&self) -> Option<&str> {
        self.issuer
            .as_deref()
            .map(str::trim)
            .filter(|issuer| !issuer.is_empty())
    }

    /// Whether the certificate signs itself.
    pub fn is_self_signed(&self) -> bool {
        self.issuer().is_none()
    }

    /// Whether the certificate is a CA; self-signed certificates default to
    /// being one.
    pub fn is_ca(&self) -> bool {
        self.ca.unwrap_or_else(|| self.is_self_signed())
    }

    /// Parsed subject distinguished name.
    pub fn subject_name(&self) -> Result<DistinguishedName> {
        self.subject
            .parse()
            .ctx(|| format!("invalid subject \"{}\"", self.subject))
    }

    /// Output file base name, explicit or derived from the subject's common
    /// name.
    pub fn filename(&self) -> Result<String> {
        let filename = match &self.filename {
            Some(filename) => filename.trim().to_owned(),
            None => self
                .subject_name()?
                .common_name()
                .map(str::to_owned)
                .ok_or_else(|| bherror::Error::root(Error::Manifest))
                .ctx(|| {
                    format!(
                        "subject \"{}\" has no common name and no `filename` is set",
                        self.subject
                    )
                })?,
        };

        if filename.is_empty() || filename.contains(['/', '\\']) || filename == ".." {
            return Err(bherror::Error::root(Error::Manifest)
                .ctx(format!("\"{filename}\" is not a valid output file name")));
        }

        Ok(filename)
    }

    /// Validated key algorithm and size.
    pub fn key_spec(&self) -> Result<KeySpec> {
        KeySpec::new(self.key_type, self.key_size)
    }

    /// Parsed subject alternative names, in manifest order.
    pub fn subject_alternative_names(&self) -> Result<Vec<SubjectAlternativeName>> {
        self.sans.iter().map(|san| san.parse()).collect()
    }

    /// Effective key usages, sorted and without duplicates.
    ///
    /// Defaults to `CertSign` and `CRLSign` for a CA, and to
    /// `KeyEncipherment` and `DigitalSignature` otherwise.
    pub fn key_usages(&self) -> Vec<KeyUsage> {
        let mut key_usages = if self.key_usages.is_empty() {
            if self.is_ca() {
                vec![KeyUsage::CertSign, KeyUsage::CrlSign]
            } else {
                vec![KeyUsage::KeyEncipherment, KeyUsage::DigitalSignature]
            }
        } else {
            self.key_usages.clone()
        };
        key_usages.sort_unstable();
        key_usages.dedup();
        key_usages
    }

    /// Extended key usages, sorted and without duplicates.
    pub fn ext_key_usages(&self) -> Vec<ExtKeyUsage> {
        let mut ext_key_usages = self.ext_key_usages.clone();
        ext_key_usages.sort_unstable();
        ext_key_usages.dedup();
        ext_key_usages
    }

    /// Validity duration counted from `not_before`.
    pub fn expires(&self) -> Result<Duration> {
        match &self.expires {
            Some(expires) => parse_duration(expires),
            None => Ok(Duration::seconds(DEFAULT_VALIDITY_SECONDS)),
        }
    }

    /// Resolves the validity window relative to `now`.
    ///
    /// `not_before` defaults to `now`; `not_after` is the explicit value if
    /// present, otherwise `not_before + expires`.
    pub fn validity(&self, now: DateTime<Utc>) -> Result<Validity> {
        let not_before = self.not_before.unwrap_or(now);
        let not_after = match self.not_after {
            Some(not_after) => not_after,
            None => not_before
                .checked_add_signed(self.expires()?)
                .ok_or_else(|| bherror::Error::root(Error::Manifest))
                .ctx(|| "`expires` overflows the validity period")?,
        };

        if not_after <= not_before {
            return Err(bherror::Error::root(Error::Manifest).ctx(format!(
                "`not_after` ({not_after}) must be later than `not_before` ({not_before})"
            )));
        }

        Ok(Validity {
            not_before,
            not_after,
        })
    }

    /// Parsed CRL distribution point URLs, in manifest order.
    pub fn crl_distribution_points(&self) -> Result<Vec<UriBuf>> {
        self.crl_distribution_points
            .iter()
            .map(|url| {
                UriBuf::new(url.trim().as_bytes().to_vec()).map_err(|_| {
                    bherror::Error::root(Error::Manifest)
                        .ctx(format!("invalid CRL distribution point \"{url}\""))
                })
            })
            .collect()
    }
}

/// Key algorithm named in the manifest.
#[derive(
    strum_macros::Display, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum KeyType {
    /// ECDSA over a NIST curve.
    #[default]
    #[serde(rename = "EC")]
    #[strum(to_string = "EC")]
    Ec,
    /// RSA.
    #[serde(rename = "RSA")]
    #[strum(to_string = "RSA")]
    Rsa,
    /// Ed25519.
    #[serde(rename = "ED25519")]
    #[strum(to_string = "ED25519")]
    Ed25519,
}

/// A supported key algorithm and size combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    /// ECDSA over P-256, P-384 or P-521, identified by the curve size in bits.
    Ec(u32),
    /// RSA with a 1024, 2048 or 4096 bit modulus.
    Rsa(u32),
    /// Ed25519.
    Ed25519,
}

impl KeySpec {
    /// Validates the combination, filling in the default size per algorithm
    /// (256 for EC, 2048 for RSA).
    pub fn new(key_type: KeyType, key_size: Option<u32>) -> Result<Self> {
        match (key_type, key_size) {
            (KeyType::Ec, None) => Ok(Self::Ec(256)),
            (KeyType::Ec, Some(bits @ (256 | 384 | 521))) => Ok(Self::Ec(bits)),
            (KeyType::Rsa, None) => Ok(Self::Rsa(2048)),
            (KeyType::Rsa, Some(bits @ (1024 | 2048 | 4096))) => Ok(Self::Rsa(bits)),
            (KeyType::Ed25519, None | Some(256)) => Ok(Self::Ed25519),
            (key_type, Some(bits)) => Err(bherror::Error::root(Error::InvalidKeySpec(format!(
                "{key_type} with {bits} bits"
            )))),
        }
    }

    /// The algorithm of this specification.
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Ec(_) => KeyType::Ec,
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ed25519 => KeyType::Ed25519,
        }
    }

    /// Key size in bits.
    pub fn bits(&self) -> u32 {
        match self {
            Self::Ec(bits) | Self::Rsa(bits) => *bits,
            Self::Ed25519 => 256,
        }
    }
}

/// X.509 key usage bit.
///
/// See [RFC 5280 - section 4.2.1.3](https://datatracker.ietf.org/doc/html/rfc5280#section-4.2.1.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum KeyUsage {
    DigitalSignature,
    ContentCommitment,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    CertSign,
    #[serde(rename = "CRLSign")]
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

/// X.509 extended key usage.
///
/// See [RFC 5280 - section 4.2.1.12](https://datatracker.ietf.org/doc/html/rfc5280#section-4.2.1.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ExtKeyUsage {
    Any,
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    #[serde(rename = "IPSECEndSystem")]
    IpsecEndSystem,
    #[serde(rename = "IPSECTunnel")]
    IpsecTunnel,
    #[serde(rename = "IPSECUser")]
    IpsecUser,
    TimeStamping,
    #[serde(rename = "OCSPSigning")]
    OcspSigning,
    MicrosoftServerGatedCrypto,
    NetscapeServerGatedCrypto,
    MicrosoftCommercialCodeSigning,
    MicrosoftKernelCodeSigning,
}

/// Subject Alternative Name parsed from a prefixed manifest value.
///
/// See [RFC 5280 - section
/// 4.2.1.6](https://datatracker.ietf.org/doc/html/rfc5280#section-4.2.1.6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectAlternativeName {
    /// `DNS:` entry.
    Dns(String),
    /// `IP:` entry.
    Ip(IpAddr),
    /// `URI:` entry.
    Uri(UriBuf),
}

impl FromStr for SubjectAlternativeName {
    type Err = bherror::Error<Error>;

    fn from_str(value: &str) -> Result<Self> {
        let invalid = || Error::InvalidSan(value.to_owned());

        let (prefix, rest) = value
            .split_once(':')
            .ok_or_else(|| bherror::Error::root(invalid()))
            .ctx(|| "expected a `DNS:`, `IP:` or `URI:` prefix")?;
        let rest = rest.trim();

        match prefix.trim() {
            "DNS" if !rest.is_empty() => Ok(Self::Dns(rest.to_owned())),
            "IP" => rest
                .parse()
                .map(Self::Ip)
                .foreign_err(invalid)
                .ctx(|| "not an IP address"),
            // `UriBuf::new` does not return a `std::error::Error`
            "URI" => UriBuf::new(rest.as_bytes().to_vec())
                .map(Self::Uri)
                .map_err(|_| bherror::Error::root(invalid()).ctx("not a URI")),
            _ => Err(bherror::Error::root(invalid())),
        }
    }
}

impl fmt::Display for SubjectAlternativeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns(name) => write!(f, "DNS:{name}"),
            Self::Ip(address) => write!(f, "IP:{address}"),
            Self::Uri(uri) => write!(f, "URI:{uri}"),
        }
    }
}

/// A distinguished name as an ordered list of attributes.
///
/// Parsed from the textual form `CN=server, O=Example`.  Attribute names are
/// case-insensitive, and a `\` escapes the next character in a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName(Vec<(&'static str, String)>);

impl DistinguishedName {
    /// The value of the first `CN` attribute.
    pub fn common_name(&self) -> Option<&str> {
        self.entries()
            .find(|(attribute, _)| *attribute == "CN")
            .map(|(_, value)| value)
    }

    /// Attributes as (OpenSSL short name, value) pairs.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(attribute, value)| (*attribute, value.as_str()))
    }
}

impl FromStr for DistinguishedName {
    type Err = bherror::Error<Error>;

    fn from_str(text: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for component in split_unescaped(text, ',') {
            let (attribute, value) = component
                .split_once('=')
                .ok_or_else(|| bherror::Error::root(Error::Manifest))
                .ctx(|| format!("\"{component}\" is not an `attribute=value` pair"))?;

            let attribute = openssl_attribute_name(attribute.trim())?;
            let value = unescape(value.trim());
            if value.is_empty() {
                return Err(bherror::Error::root(Error::Manifest)
                    .ctx(format!("attribute {attribute} has an empty value")));
            }

            entries.push((attribute, value));
        }

        if entries.is_empty() {
            return Err(bherror::Error::root(Error::Manifest).ctx("empty distinguished name"));
        }

        Ok(Self(entries))
    }
}

fn openssl_attribute_name(attribute: &str) -> Result<&'static str> {
    let name = match attribute.to_ascii_lowercase().as_str() {
        "cn" => "CN",
        "c" => "C",
        "o" => "O",
        "ou" => "OU",
        "l" => "L",
        "st" => "ST",
        "street" => "street",
        "postalcode" => "postalCode",
        "serialnumber" => "serialNumber",
        "dc" => "DC",
        "emailaddress" => "emailAddress",
        _ => {
            return Err(bherror::Error::root(Error::Manifest)
                .ctx(format!("unknown distinguished name attribute \"{attribute}\"")))
        }
    };
    Ok(name)
}

/// Splits on `separator` unless it is preceded by a `\`, dropping blank parts.
fn split_unescaped(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (index, c) in text.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            c if c == separator => {
                parts.push(&text[start..index]);
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);

    parts.retain(|part| !part.trim().is_empty());
    parts
}

fn unescape(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => unescaped.extend(chars.next()),
            c => unescaped.push(c),
        }
    }
    unescaped
}

/// Resolved validity window of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    /// Start of the validity period.
    pub not_before: DateTime<Utc>,
    /// End of the validity period.
    pub not_after: DateTime<Utc>,
}

/// Parses a duration such as `8760h`, `1h30m` or `90s`.
pub(crate) fn parse_duration(text: &str) -> Result<Duration> {
    let duration = humantime::parse_duration(text.trim())
        .foreign_err(|| Error::Manifest)
        .ctx(|| format!("invalid duration \"{text}\", expected e.g. `8760h` or `1h30m`"))?;

    Duration::from_std(duration)
        .foreign_err(|| Error::Manifest)
        .ctx(|| format!("duration \"{text}\" is out of range"))
}
