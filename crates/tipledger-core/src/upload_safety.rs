//! Upload safety validation for incoming screenshot bytes.
//!
//! Runs before fingerprinting. Layers:
//! 1. Size ceiling (screenshots, not scans)
//! 2. Magic-byte image detection via `infer`
//! 3. Filename sanitization for the audit trail
//!
//! A non-image upload is rejected with a structured reason instead of being
//! fed to the recognition oracle.

use crate::defaults::{MAX_FILENAME_LEN, MAX_UPLOAD_BYTES};

/// Image MIME types the engine accepts.
pub const ALLOWED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/heif",
    "image/heic",
];

/// Result of upload safety validation.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub allowed: bool,
    pub block_reason: Option<String>,
    pub detected_type: Option<String>,
}

impl ValidationResult {
    pub fn allowed(detected: impl Into<String>) -> Self {
        Self {
            allowed: true,
            block_reason: None,
            detected_type: Some(detected.into()),
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            block_reason: Some(reason.into()),
            detected_type: None,
        }
    }
}

/// Validate an upload's bytes before any expensive processing.
pub fn validate_upload(data: &[u8]) -> ValidationResult {
    if data.is_empty() {
        return ValidationResult::blocked("empty upload");
    }

    if data.len() > MAX_UPLOAD_BYTES {
        return ValidationResult::blocked(format!(
            "upload exceeds maximum size of {} bytes",
            MAX_UPLOAD_BYTES
        ));
    }

    match infer::get(data) {
        Some(kind) if ALLOWED_IMAGE_TYPES.contains(&kind.mime_type()) => {
            ValidationResult::allowed(kind.mime_type())
        }
        Some(kind) => ValidationResult::blocked(format!(
            "content type {} is not an accepted image format",
            kind.mime_type()
        )),
        None => ValidationResult::blocked("unrecognized content (no image magic bytes)"),
    }
}

/// Sanitize an original filename for storage in the audit trail.
///
/// Strips path components, replaces control characters, and truncates to
/// [`MAX_FILENAME_LEN`]. The filename is only a duplicate-gate heuristic
/// input and display string; it is never used as a filesystem path.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);

    let mut clean: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();

    if clean.len() > MAX_FILENAME_LEN {
        // Cut on a char boundary; truncate panics mid-codepoint.
        let mut cut = MAX_FILENAME_LEN;
        while !clean.is_char_boundary(cut) {
            cut -= 1;
        }
        clean.truncate(cut);
    }
    if clean.is_empty() {
        clean.push_str("upload");
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal valid PNG header (magic + IHDR start).
    fn png_bytes() -> Vec<u8> {
        let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R']);
        data.extend_from_slice(&[0; 16]);
        data
    }

    #[test]
    fn test_png_upload_allowed() {
        let result = validate_upload(&png_bytes());
        assert!(result.allowed);
        assert_eq!(result.detected_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_empty_upload_blocked() {
        let result = validate_upload(&[]);
        assert!(!result.allowed);
    }

    #[test]
    fn test_non_image_blocked() {
        // A PDF is a recognized type, just not a screenshot.
        let mut data = b"%PDF-1.7\n".to_vec();
        data.resize(64, 0);
        let result = validate_upload(&data);
        assert!(!result.allowed);
        assert!(result.block_reason.unwrap().contains("not an accepted image"));
    }

    #[test]
    fn test_garbage_blocked() {
        let result = validate_upload(b"just some text, definitely not an image");
        assert!(!result.allowed);
        assert!(result.block_reason.unwrap().contains("no image magic"));
    }

    #[test]
    fn test_oversized_blocked() {
        let mut data = png_bytes();
        data.resize(MAX_UPLOAD_BYTES + 1, 0);
        let result = validate_upload(&data);
        assert!(!result.allowed);
        assert!(result.block_reason.unwrap().contains("maximum size"));
    }

    #[test]
    fn test_sanitize_strips_paths_and_controls() {
        assert_eq!(sanitize_filename("/tmp/../screens/trip.png"), "trip.png");
        assert_eq!(sanitize_filename("C:\\Users\\x\\trip.png"), "trip.png");
        assert_eq!(sanitize_filename("tr\nip.png"), "tr_ip.png");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "a".repeat(MAX_FILENAME_LEN + 50);
        assert_eq!(sanitize_filename(&long).len(), MAX_FILENAME_LEN);
    }
}
