//! Upload filename validation and sanitization.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::models::ALLOWED_EXTENSIONS;

/// Prefix for every image object key.
pub const KEY_PREFIX: &str = "images";

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("valid filename pattern"));

/// Lowercased extension after the final dot, if any.
pub fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Whether the name ends in one of [`ALLOWED_EXTENSIONS`], ignoring case.
pub fn has_allowed_extension(filename: &str) -> bool {
    extension(filename).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// Reduce an uploaded filename to a safe single-extension name.
///
/// Keeps only the final path component, folds accented letters to their
/// ASCII base, keeps characters in `[A-Za-z0-9_.-]`, turns whitespace
/// into `_`, joins every dot-separated
/// part before the extension with `_` and lowercases the extension.
/// An empty stem becomes `image`.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();

    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) => (stem, clean(ext).replace('.', "").to_ascii_lowercase()),
        None => (base, String::new()),
    };

    let stem = clean(stem).replace('.', "_");
    let stem = stem.trim_matches(|c: char| c == '_' || c == '-');
    let stem = if stem.is_empty() { "image" } else { stem };

    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{ext}")
    }
}

/// Object key for a sanitized filename.
pub fn storage_key(sanitized: &str) -> String {
    format!("{KEY_PREFIX}/{sanitized}")
}

fn clean(part: &str) -> String {
    let folded: String = part.nfkd().filter(char::is_ascii).collect();
    let spaced = WHITESPACE.replace_all(folded.trim(), "_");
    UNSAFE_CHARS.replace_all(&spaced, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_extensions() {
        assert!(has_allowed_extension("photo.png"));
        assert!(has_allowed_extension("Photo.JPG"));
        assert!(has_allowed_extension("scan.TiFf"));
        assert!(has_allowed_extension("archive.tar.gif"));
        assert!(!has_allowed_extension("malware.exe"));
        assert!(!has_allowed_extension("png"));
        assert!(!has_allowed_extension("image.png.exe"));
        assert!(!has_allowed_extension(""));
    }

    #[test]
    fn test_sanitize_spaces_and_case() {
        let name = sanitize_filename("My Photo.JPG");
        assert_eq!(name, "My_Photo.jpg");
        let pattern = Regex::new(r"^[A-Za-z0-9_]+\.jpg$").unwrap();
        assert!(pattern.is_match(&name));
    }

    #[test]
    fn test_sanitize_collapses_extra_dots() {
        assert_eq!(sanitize_filename("a.b.c.png"), "a_b_c.png");
        assert_eq!(sanitize_filename("report.final.v2.jpeg"), "report_final_v2.jpeg");
        assert_eq!(sanitize_filename("plain.gif"), "plain.gif");
    }

    #[test]
    fn test_sanitize_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd.png"), "passwd.png");
        assert_eq!(sanitize_filename("C:\\Users\\me\\scan 01.bmp"), "scan_01.bmp");
        assert_eq!(sanitize_filename("/abs/path/x.tiff"), "x.tiff");
    }

    #[test]
    fn test_sanitize_drops_unsafe_characters() {
        assert_eq!(sanitize_filename("re$ume<1>.png"), "reume1.png");
        assert_eq!(sanitize_filename(".png"), "image.png");
        assert_eq!(sanitize_filename("???.png"), "image.png");
    }

    #[test]
    fn test_sanitize_folds_accents() {
        assert_eq!(sanitize_filename("café menu.png"), "cafe_menu.png");
        assert_eq!(sanitize_filename("Ünïcödé.PNG"), "Unicode.png");
        assert_eq!(sanitize_filename("ﬁle.jpg"), "file.jpg");
        assert_eq!(sanitize_filename("日本.png"), "image.png");
    }

    #[test]
    fn test_storage_key() {
        assert_eq!(storage_key("a_b_c.png"), "images/a_b_c.png");
    }
}
