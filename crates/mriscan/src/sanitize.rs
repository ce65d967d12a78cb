//! Helpers for turning client-supplied names into safe file names, and for
//! keeping full paths out of span attributes.

use std::path::Path;

const FALLBACK_NAME: &str = "upload";

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Reduces a client file name to its final path component, dropping
/// control characters. Names that end up empty or are `.`/`..` become
/// `upload`.
pub fn sanitize_filename(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Splits `name` into stem and extension (with the dot), for appending
/// `_N` suffixes before the extension.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(dot_pos) if dot_pos > 0 => (&name[..dot_pos], Some(&name[dot_pos..])),
        _ => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/srv/data/uploads/Glioma/scan.png")),
            "scan.png"
        );
    }

    #[test]
    fn test_redact_path_no_filename() {
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\scans\\brain.jpg"), "brain.jpg");
        assert_eq!(sanitize_filename("plain.png"), "plain.png");
    }

    #[test]
    fn test_sanitize_falls_back_for_empty_names() {
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("dir/"), "upload");
        assert_eq!(sanitize_filename(".."), "upload");
        assert_eq!(sanitize_filename("\u{0}\n"), "upload");
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("scan.png"), ("scan", Some(".png")));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", Some(".gz")));
        assert_eq!(split_extension("noext"), ("noext", None));
        assert_eq!(split_extension(".hidden"), (".hidden", None));
    }
}
