//! The machine-checkable subset of checklist rule text.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static CONTAINS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bcontains\s+["']([^"']+)["']"#).unwrap());
static MINIMUM_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmin(imum)?[-_\s]size\s*:?\s*(\d+)").unwrap());
static DIRECTORY_EXISTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bdir(ectory)?[-_\s]exists\b").unwrap());
static FILE_EXISTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bfile[-_\s]exists\b").unwrap());
static NOT_EMPTY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bnot[-_\s]empty\b").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    FileExists,
    DirectoryExists,
    NotEmpty,
    Contains(String),
    MinimumSize(u64),
}

/// Recognize a rule in free-form text. `None` means a human has to check it.
pub fn parse_rule(text: &str) -> Option<Rule> {
    if let Some(caps) = CONTAINS.captures(text) {
        return Some(Rule::Contains(caps[1].to_string()));
    }
    if let Some(caps) = MINIMUM_SIZE.captures(text) {
        return caps[2].parse().ok().map(Rule::MinimumSize);
    }
    if DIRECTORY_EXISTS.is_match(text) {
        return Some(Rule::DirectoryExists);
    }
    if FILE_EXISTS.is_match(text) {
        return Some(Rule::FileExists);
    }
    if NOT_EMPTY.is_match(text) {
        return Some(Rule::NotEmpty);
    }
    None
}

impl Rule {
    /// Check one target path; the error names what was wrong.
    pub async fn check(&self, path: &Path) -> Result<(), String> {
        let shown = path.display();
        match self {
            Rule::FileExists => match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() => Ok(()),
                _ => Err(format!("{} is not a file", shown)),
            },
            Rule::DirectoryExists => match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_dir() => Ok(()),
                _ => Err(format!("{} is not a directory", shown)),
            },
            Rule::NotEmpty => {
                let meta = tokio::fs::metadata(path)
                    .await
                    .map_err(|_| format!("{} does not exist", shown))?;
                let empty = if meta.is_dir() {
                    let mut entries = tokio::fs::read_dir(path)
                        .await
                        .map_err(|e| format!("cannot list {}: {}", shown, e))?;
                    entries.next_entry().await.ok().flatten().is_none()
                } else {
                    meta.len() == 0
                };
                if empty {
                    Err(format!("{} is empty", shown))
                } else {
                    Ok(())
                }
            }
            Rule::Contains(needle) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| format!("cannot read {}: {}", shown, e))?;
                if content.contains(needle.as_str()) {
                    Ok(())
                } else {
                    Err(format!("{} does not contain \"{}\"", shown, needle))
                }
            }
            Rule::MinimumSize(min) => {
                let meta = tokio::fs::metadata(path)
                    .await
                    .map_err(|_| format!("{} does not exist", shown))?;
                if meta.len() >= *min {
                    Ok(())
                } else {
                    Err(format!("{} is {} bytes, expected at least {}", shown, meta.len(), min))
                }
            }
        }
    }
}
