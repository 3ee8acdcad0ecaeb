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

/// Error returned by the crate API.
///
/// Every variant aborts the whole generation run.
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum Error {
    /// The manifest is malformed, contains an unknown field, or holds a value
    /// that cannot be interpreted (distinguished name, timestamp, duration,
    /// duplicate filename).
    #[strum(to_string = "Invalid manifest")]
    Manifest,

    /// The `issuer` of a descriptor does not name a subject declared earlier
    /// in the manifest.
    #[strum(to_string = "Issuer \"{0}\" is not declared before it is referenced")]
    UnresolvedIssuer(String),

    /// The key algorithm and size combination is not supported.
    #[strum(to_string = "Unsupported key specification: {0}")]
    InvalidKeySpec(String),

    /// A subject alternative name could not be parsed.
    #[strum(to_string = "Invalid subject alternative name \"{0}\"")]
    InvalidSan(String),

    /// Reading or writing a file failed, or the destination directory is
    /// unusable.
    #[strum(to_string = "Filesystem operation failed")]
    Filesystem,

    /// Key generation, certificate building or signing failed.
    #[strum(to_string = "Cryptographic operation failed")]
    Crypto,

    /// A certificate was marked as revoked but has no issuing authority.
    #[strum(to_string = "Cannot revoke \"{0}\": it has no issuing authority")]
    Revocation(String),
}

impl bherror::BhError for Error {}

/// The [`bherror::Result`] type with the error type of
/// [`bhcertgen::Error`](Error), used throughout this crate.
pub type Result<T> = bherror::Result<T, Error>;
