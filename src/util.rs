//! Shared utility functions for the storyline crate.

use chrono::Utc;
use std::path::Path;

use crate::errors::PipelineError;

/// Find the outermost JSON object in agent output that may be wrapped in
/// log lines. Braces inside string literals are not counted.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Directory-safe key for a story id. Distinct ids always map to distinct keys.
///
/// ASCII letters, digits, `-`, `_` and `.` are kept; every other byte is
/// percent-encoded, `%` included. Keys that would be `.` or `..` are encoded
/// too, so a story directory never resolves to its parent.
pub fn story_slug(story_id: &str) -> String {
    let mut key = String::with_capacity(story_id.len());
    for byte in story_id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => key.push(byte as char),
            _ => key.push_str(&format!("%{:02X}", byte)),
        }
    }
    if key == "." || key == ".." {
        key = key.replace('.', "%2E");
    }
    key
}

/// Filename-safe timestamp with a short random suffix, e.g.
/// `20260101T120000.123Z-1a2b3c4d`. Two reports written in the same
/// millisecond still get distinct names.
pub fn file_stamp() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"), &id[..8])
}

/// Write a file, creating parent directories first.
pub async fn write_file(path: &Path, content: impl AsRef<[u8]>) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| PipelineError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|source| PipelineError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })
}

/// Read a file to a string, mapping failures to `PipelineError::ReadFailed`.
pub async fn read_file(path: &Path) -> Result<String, PipelineError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| PipelineError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_with_prefix() {
        let text = r#"Here is the JSON: {"success": true}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"success": true}"#.to_string()));
    }

    #[test]
    fn test_extract_json_object_nested_with_suffix() {
        let text = r#"{"fields": {"complexity": "SIMPLE"}} trailing log line"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"fields": {"complexity": "SIMPLE"}}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_ignores_braces_in_strings() {
        let text = r#"reply: {"error": "unexpected '}' at line 3", "success": false} done"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"error": "unexpected '}' at line 3", "success": false}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object(r#"{"unclosed": 1"#), None);
    }

    #[test]
    fn test_story_slug_encodes_separators() {
        assert_eq!(story_slug("STORY-9"), "STORY-9");
        assert_eq!(story_slug("epic/1: auth"), "epic%2F1%3A%20auth");
        assert_eq!(story_slug("v1.2_rc"), "v1.2_rc");
    }

    #[test]
    fn test_story_slug_is_injective_for_lookalikes() {
        let ids = ["TEAM/42", "TEAM_42", "TEAM%2F42", "TEAM 42", "TEAM:42"];
        let keys: std::collections::HashSet<_> = ids.iter().map(|id| story_slug(id)).collect();
        assert_eq!(keys.len(), ids.len());
    }

    #[test]
    fn test_story_slug_never_yields_dot_dirs() {
        assert_eq!(story_slug("."), "%2E");
        assert_eq!(story_slug(".."), "%2E%2E");
        assert_eq!(story_slug("..."), "...");
        assert_ne!(story_slug(".."), story_slug("%2E%2E"));
    }

    #[test]
    fn test_file_stamp_is_unique_and_path_safe() {
        let a = file_stamp();
        let b = file_stamp();
        assert_ne!(a, b);
        assert!(!a.contains(':'));
        assert!(!a.contains('/'));
    }

    #[tokio::test]
    async fn test_write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        write_file(&path, "hello").await.unwrap();
        assert_eq!(read_file(&path).await.unwrap(), "hello");
    }
}
