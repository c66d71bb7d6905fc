//! Bluetooth UUID helpers.
//!
//! All comparisons happen on the canonical form: lowercase, 128-bit,
//! hyphenated. 16- and 32-bit short forms are expanded into the Bluetooth
//! base UUID `0000xxxx-0000-1000-8000-00805f9b34fb`.

use ::uuid::Uuid;

use crate::constants::BLUETOOTH_BASE_UUID;
use crate::error::{BleError, BleResult};

/// Check whether a string is a 16-, 32- or 128-bit UUID (any case).
pub fn valid_uuid(uuid: &str) -> bool {
    match uuid.len() {
        4 | 8 => uuid.bytes().all(|c| c.is_ascii_hexdigit()),
        36 => Uuid::try_parse(uuid).is_ok(),
        _ => false,
    }
}

fn parse(uuid: &str) -> BleResult<Uuid> {
    let invalid = || BleError::InvalidUuid(uuid.to_string());
    if !valid_uuid(uuid) {
        return Err(invalid());
    }
    match uuid.len() {
        4 | 8 => {
            let short = u32::from_str_radix(uuid, 16).map_err(|_| invalid())?;
            Ok(Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96)))
        }
        _ => Uuid::try_parse(uuid).map_err(|_| invalid()),
    }
}

/// Convert a UUID to its canonical 128-bit lowercase form.
///
/// Idempotent: `canonical(canonical(u)) == canonical(u)`.
pub fn canonical(uuid: &str) -> BleResult<String> {
    parse(uuid.trim())
        .map(|parsed| parsed.hyphenated().to_string())
        .map_err(|_| BleError::InvalidUuid(uuid.to_string()))
}

/// Canonicalize when possible, otherwise fall back to plain lowercase.
///
/// Used when comparing values reported by the host, which are not
/// guaranteed to be well-formed.
pub fn normalize(uuid: &str) -> String {
    canonical(uuid).unwrap_or_else(|_| uuid.trim().to_ascii_lowercase())
}

/// Case-insensitive UUID equality after canonicalization.
pub fn uuid_eq(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Whether any of `advertised` appears in `filters`. Invalid filters never match.
pub fn intersects(advertised: &[String], filters: &[String]) -> bool {
    filters
        .iter()
        .filter(|f| valid_uuid(f.trim()))
        .any(|f| advertised.iter().any(|a| uuid_eq(a, f)))
}

/// Whether every filter UUID appears in `advertised`.
pub fn includes_all(advertised: &[String], filters: &[String]) -> bool {
    filters
        .iter()
        .all(|f| valid_uuid(f.trim()) && advertised.iter().any(|a| uuid_eq(a, f)))
}
