use anyhow::{Result, anyhow};
use std::path::Path;

/// Extension that marks an upload as a zip container
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Longest display name kept for a project, in bytes
pub const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Lowercased extension of a file name, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_lowercase())
}

/// True when the declared name carries the archive extension (any case).
pub fn is_archive_name(name: &str) -> bool {
    extension_of(name).as_deref() == Some(ARCHIVE_EXTENSION)
}

/// Reduces a client supplied file name to a safe display name.
pub fn sanitize_filename(filename: &str) -> Result<String> {
    // Browsers on some platforms send full paths
    let last = filename.rsplit(['/', '\\']).next().unwrap_or("");
    let name = last.trim().trim_matches('"');

    if name.is_empty() || name == "." || name == ".." {
        return Err(anyhow!(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        }));
    }

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path components stripped from upload name: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > MAX_FILENAME_LEN {
        let mut end = MAX_FILENAME_LEN;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    if sanitized.starts_with('.') {
        return Err(anyhow!(ValidationError {
            code: "HIDDEN_FILE",
            message: "Hidden files (starting with '.') are not allowed".to_string(),
        }));
    }

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("terrain.ZIP").as_deref(), Some("zip"));
        assert_eq!(extension_of("dem.tar.TIF").as_deref(), Some("tif"));
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn test_is_archive_name() {
        assert!(is_archive_name("terrain.zip"));
        assert!(is_archive_name("TERRAIN.Zip"));
        assert!(!is_archive_name("terrain.tif"));
        assert!(!is_archive_name("zip"));
    }

    #[test]
    fn test_sanitize_strips_paths() {
        assert_eq!(
            sanitize_filename("C:\\Users\\me\\terrain.zip").unwrap(),
            "terrain.zip"
        );
        assert_eq!(sanitize_filename("../../etc/dem.tif").unwrap(), "dem.tif");
    }

    #[test]
    fn test_sanitize_replaces_reserved_chars() {
        assert_eq!(sanitize_filename("a:b*c?.zip").unwrap(), "a_b_c_.zip");
    }

    #[test]
    fn test_sanitize_rejects_empty_and_hidden() {
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename(".hidden.zip").is_err());
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let long = format!("{}.zip", "é".repeat(200));
        let sanitized = sanitize_filename(&long).unwrap();
        assert!(sanitized.len() <= MAX_FILENAME_LEN);
        assert!(sanitized.is_char_boundary(sanitized.len()));
    }
}
