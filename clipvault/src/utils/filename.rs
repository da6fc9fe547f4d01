//! File name handling for uploaded media.
//!
//! Upload names come from the uploader and are never trusted as paths. Only
//! the final path component survives, reduced to characters that are valid on
//! every platform.

/// Characters that are invalid in Windows filenames.
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Longest extension accepted from an upload name.
const MAX_EXTENSION_LEN: usize = 5;

/// Reduce an uploaded file name to a safe single path component.
///
/// Directory parts are dropped, control and reserved characters become `_`
/// (collapsed), leading/trailing dots and spaces are trimmed, and an empty
/// result becomes `upload`.
pub fn sanitize_upload_name(input: &str) -> String {
    let base = input.rsplit(['/', '\\']).next().unwrap_or(input);

    let mut result = String::with_capacity(base.len());
    let mut last_was_replacement = false;
    for c in base.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lowercase ASCII extension of an upload name, if it looks like one.
pub fn upload_extension(file_name: &str) -> Option<String> {
    let name = sanitize_upload_name(file_name);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
