use crate::error::BrokerError;
use std::path::Path;

/// Shortest prefix accepted for staging file names.
pub const MIN_STAGING_PREFIX_LEN: usize = 3;

/// Longest key pattern accepted by the signer (S3 key limit).
pub const MAX_KEY_PATTERN_LEN: usize = 1024;

const MAX_EXTENSION_LEN: usize = 16;

/// Returns the extension of `filename` (without the dot), preserving case.
/// The name must be non-empty and end in a recognizable extension.
pub fn file_extension(filename: &str) -> Result<&str, BrokerError> {
    let name = base_name(filename);
    if name.trim().is_empty() {
        return Err(BrokerError::invalid("Filename must not be empty"));
    }

    let (_, extension) = name
        .rsplit_once('.')
        .ok_or_else(|| BrokerError::invalid(format!("Filename '{}' has no extension", name)))?;

    if extension.is_empty()
        || extension.len() > MAX_EXTENSION_LEN
        || !extension.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(BrokerError::invalid(format!(
            "Filename '{}' has no recognizable extension",
            name
        )));
    }

    Ok(extension)
}

/// Builds a filesystem-safe staging prefix from the original name's stem,
/// padded to [`MIN_STAGING_PREFIX_LEN`].
pub fn staging_prefix(filename: &str) -> String {
    let stem = base_name(filename).split('.').next().unwrap_or("");
    let mut prefix: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(32)
        .collect();

    while prefix.len() < MIN_STAGING_PREFIX_LEN {
        prefix.push('_');
    }
    prefix
}

/// Validates a target key pattern before it is handed to the signer.
pub fn validate_key_pattern(pattern: &str) -> Result<(), BrokerError> {
    if pattern.trim().is_empty() {
        return Err(BrokerError::invalid("Target key pattern must not be empty"));
    }
    if pattern.len() > MAX_KEY_PATTERN_LEN {
        return Err(BrokerError::invalid(format!(
            "Target key pattern exceeds {} bytes",
            MAX_KEY_PATTERN_LEN
        )));
    }
    if pattern.starts_with('/') {
        return Err(BrokerError::invalid(
            "Target key pattern must not start with '/'",
        ));
    }
    if pattern.split('/').any(|segment| segment == "..") {
        return Err(BrokerError::invalid(
            "Target key pattern must not contain '..' segments",
        ));
    }
    if pattern.chars().any(|c| c.is_control()) {
        return Err(BrokerError::invalid(
            "Target key pattern must not contain control characters",
        ));
    }
    Ok(())
}

// Only the final path component of a client-supplied name is meaningful.
fn base_name(filename: &str) -> &str {
    let normalized = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    Path::new(normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_extension_is_preserved() {
        assert_eq!(file_extension("photo.png").unwrap(), "png");
        assert_eq!(file_extension("archive.tar.GZ").unwrap(), "GZ");
        assert_eq!(file_extension("a.png").unwrap(), "png");
        assert_eq!(file_extension("../../etc/report.pdf").unwrap(), "pdf");
    }

    #[test]
    fn test_invalid_filenames() {
        for name in ["", "   ", "README", "trailing.", "weird.p n g", "x.exe;rm"] {
            let err = file_extension(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest, "name: {:?}", name);
        }
    }

    #[test]
    fn test_short_names_are_padded() {
        assert_eq!(staging_prefix("a.png"), "a__");
        assert_eq!(staging_prefix(".png"), "___");
        assert_eq!(staging_prefix("photo.png"), "photo");
        assert_eq!(staging_prefix("my photo (1).jpg"), "myphoto1");
    }

    #[test]
    fn test_key_pattern_validation() {
        assert!(validate_key_pattern("images").is_ok());
        assert!(validate_key_pattern("tenant/images").is_ok());
        assert!(validate_key_pattern("").is_err());
        assert!(validate_key_pattern("  ").is_err());
        assert!(validate_key_pattern("/images").is_err());
        assert!(validate_key_pattern("images/../secrets").is_err());
        assert!(validate_key_pattern("images\n").is_err());
        assert!(validate_key_pattern(&"a".repeat(MAX_KEY_PATTERN_LEN + 1)).is_err());
    }
}
