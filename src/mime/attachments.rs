//! Attachment policy (§4.1 "Attachment policies (hard rules)").

use uuid::Uuid;

const DANGEROUS_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "pif", "scr", "vbs", "js", "jar", "msi", "dll", "sys", "scf",
    "lnk", "reg", "ps1",
];

const ALLOWED_EXTENSIONS: &[&str] = &[
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "rtf", "csv",
    // images
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "tiff", "heic",
    // audio/video
    "mp3", "wav", "ogg", "m4a", "mp4", "mov", "avi", "mkv", "webm",
    // archives
    "zip", "rar", "7z", "tar", "gz",
    // calendar / vcard
    "ics", "vcf",
    // source / text
    "txt", "md", "json", "xml", "log",
    // mail containers
    "eml", "msg",
];

const WINDOWS_RESERVED_STEMS: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const MAX_ATTACHMENT_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentRejection {
    UnsafePath,
    DangerousExtension,
    ExtensionNotAllowed,
    TooLarge,
}

/// Validates a candidate attachment's declared filename and size against the
/// hard rules in §4.1. Returns `Ok(extension)` (lowercased, without the dot)
/// on acceptance.
pub fn validate(original_filename: &str, size: u64) -> Result<String, AttachmentRejection> {
    let trimmed = original_filename.trim();

    if trimmed.contains(['<', '>', ':', '"', '|', '?', '*'])
        || trimmed.contains('\0')
        || trimmed.contains("..")
        || trimmed.starts_with('/')
        || trimmed.starts_with('\\')
    {
        return Err(AttachmentRejection::UnsafePath);
    }

    let stem = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
        .split('.')
        .next()
        .unwrap_or("");
    if WINDOWS_RESERVED_STEMS
        .iter()
        .any(|r| r.eq_ignore_ascii_case(stem))
    {
        return Err(AttachmentRejection::UnsafePath);
    }

    let ext = trimmed
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();

    if ext.is_empty() {
        return Err(AttachmentRejection::ExtensionNotAllowed);
    }
    if DANGEROUS_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AttachmentRejection::DangerousExtension);
    }
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AttachmentRejection::ExtensionNotAllowed);
    }
    if size > MAX_ATTACHMENT_BYTES {
        return Err(AttachmentRejection::TooLarge);
    }

    Ok(ext)
}

/// `<cleaned_email_uid>_<8-hex-uuid><original_ext>` (§4.1).
pub fn stored_filename(email_uid: &str, ext: &str) -> String {
    let cleaned: String = email_uid
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    format!("{cleaned}_{suffix}.{ext}")
}

/// `attachments/user_<user_id>/<stored_filename>` (§6 persisted state layout).
pub fn stored_path(user_id: i64, stored_filename: &str) -> String {
    format!("attachments/user_{user_id}/{stored_filename}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_windows_reserved_stem() {
        assert_eq!(validate("CON.txt", 10), Err(AttachmentRejection::UnsafePath));
    }

    #[test]
    fn rejects_parent_traversal() {
        assert_eq!(
            validate("..\\x.pdf", 10),
            Err(AttachmentRejection::UnsafePath)
        );
    }

    #[test]
    fn rejects_dangerous_extension() {
        assert_eq!(
            validate("report.exe", 10),
            Err(AttachmentRejection::DangerousExtension)
        );
    }

    #[test]
    fn accepts_pdf_at_exactly_the_cap() {
        assert!(validate("report.pdf", 50 * 1024 * 1024).is_ok());
    }

    #[test]
    fn rejects_pdf_one_byte_over_the_cap() {
        assert_eq!(
            validate("report.pdf", 50 * 1024 * 1024 + 1),
            Err(AttachmentRejection::TooLarge)
        );
    }

    #[test]
    fn rejects_empty_extension() {
        assert_eq!(
            validate("README", 10),
            Err(AttachmentRejection::ExtensionNotAllowed)
        );
    }
}
