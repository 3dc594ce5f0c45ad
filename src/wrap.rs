//! The wire form of a wrapped leaf share: the base64 ciphertext followed
//! by the literal `ver` and the decimal key version. The version rides
//! along in the clear so that a reader can pick the correct historical
//! key after a rotation.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::expression::{FormatError, FormatErrorKind};

const VERSION_DELIMITER: &str = "ver";

/// Encodes a wrapped share: `base64(ciphertext) + "ver" + version`.
pub(crate) fn encode_wrapped(ciphertext: &[u8], version: u32) -> String {
    format!("{}{}{}", STANDARD.encode(ciphertext), VERSION_DELIMITER, version)
}

/// Splits a wrapped share back into ciphertext and version.
///
/// The delimiter is matched from the right, so a `ver` occurring inside
/// the base64 payload does not confuse the split. A missing suffix or a
/// non-decimal version is a format error, as is an undecodable payload.
pub(crate) fn decode_wrapped(wrapped: &str) -> Result<(Vec<u8>, u32), FormatError> {
    let (payload, version) = split_version(wrapped)?;
    let ciphertext = STANDARD
        .decode(payload)
        .map_err(|_| FormatError::new(FormatErrorKind::BadPayload, 0))?;
    Ok((ciphertext, version))
}

/// Extracts the key version from a wrapped share without decoding the
/// payload. The planner uses this to pick which key to ask the store for.
pub(crate) fn split_version(wrapped: &str) -> Result<(&str, u32), FormatError> {
    let (payload, version) = wrapped
        .rsplit_once(VERSION_DELIMITER)
        .ok_or_else(|| FormatError::new(FormatErrorKind::MissingVersion, 0))?;
    let version = version
        .parse::<u32>()
        .map_err(|_| FormatError::new(FormatErrorKind::MissingVersion, payload.len()))?;
    Ok((payload, version))
}
