//! Deterministic eml filenames.
//!
//! `<YYYYMMDDhhmmss>_<md5>.eml`, plus `.gz` when compression is on.
//! Invalid messages have no trustworthy date and use the all-zero
//! timestamp. The md5 is the identity hash from classification.

use chrono::NaiveDateTime;

/// Timestamp slot used for messages without a resolvable date.
pub const ZERO_TIMESTAMP: &str = "00000000000000";

/// Hex md5 of arbitrary bytes.
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Base filename for a message, before any `del_`/`dup<k>_` prefix.
pub fn eml_filename(local: Option<&NaiveDateTime>, md5_hex: &str, compress: bool) -> String {
    let stamp = match local {
        Some(local) => local.format("%Y%m%d%H%M%S").to_string(),
        None => ZERO_TIMESTAMP.to_string(),
    };
    let mut name = format!("{stamp}_{md5_hex}.eml");
    if compress {
        name.push_str(".gz");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_md5_hex() {
        // Well-known digest of the empty input.
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_filename_format() {
        let local = NaiveDate::from_ymd_opt(2012, 11, 16)
            .unwrap()
            .and_hms_opt(13, 16, 9)
            .unwrap();
        assert_eq!(
            eml_filename(Some(&local), "900150983cd24fb0d6963f7d28e17f72", false),
            "20121116131609_900150983cd24fb0d6963f7d28e17f72.eml"
        );
        assert_eq!(
            eml_filename(Some(&local), "900150983cd24fb0d6963f7d28e17f72", true),
            "20121116131609_900150983cd24fb0d6963f7d28e17f72.eml.gz"
        );
    }

    #[test]
    fn test_invalid_filename_uses_zero_stamp() {
        let name = eml_filename(None, "d41d8cd98f00b204e9800998ecf8427e", false);
        assert!(name.starts_with("00000000000000_"));
    }
}
