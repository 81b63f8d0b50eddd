use std::collections::BTreeSet;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};

const SEP: char = '/';

/// Removes every character outside `[A-Za-z0-9_]`, whitespace, `.` and `-`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '.' | '-'))
        .collect()
}

/// Destination of an upload: folder plus sanitized file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetPath {
    folder: String,
    file_name: String,
}

impl TargetPath {
    #[must_use]
    pub fn new(folder: &str, file_name: &str) -> Self {
        Self {
            folder: folder.trim_matches(SEP).to_owned(),
            file_name: sanitize_file_name(file_name),
        }
    }

    #[must_use]
    pub fn folder(&self) -> &str {
        &self.folder
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// True when nothing survived sanitizing the file name.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_name.trim().is_empty()
    }

    /// Object key inside the bucket.
    #[must_use]
    pub fn key(&self) -> String {
        if self.folder.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}{SEP}{}", self.folder, self.file_name)
        }
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Object id used in URLs: standard base64 of the raw key.
#[must_use]
pub fn encode_object_id(key: &str) -> String {
    STANDARD.encode(key.as_bytes())
}

/// Inverse of [`encode_object_id`]. URL-safe base64 is accepted as well and
/// surrounding whitespace of the decoded key is trimmed.
#[must_use]
pub fn decode_object_id(id: &str) -> Option<String> {
    let id = id.trim();
    let bytes = STANDARD.decode(id).or_else(|_| URL_SAFE.decode(id)).ok()?;
    let key = String::from_utf8(bytes).ok()?;
    let key = key.trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_owned())
    }
}

/// Every folder prefix of every key, sorted and without duplicates.
///
/// `a/b/c.txt` contributes `a` and `a/b`; keys without a separator contribute nothing.
#[must_use]
pub fn folders_of<'a, I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut folders = BTreeSet::new();
    for key in keys {
        let parts: Vec<&str> = key.split(SEP).collect();
        let mut folder = String::new();
        for (i, part) in parts.iter().take(parts.len().saturating_sub(1)).enumerate() {
            if i > 0 {
                folder.push(SEP);
            }
            folder.push_str(part);
            folders.insert(folder.clone());
        }
    }
    folders.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("report.pdf", "report.pdf")]
    #[case("my report (final).pdf", "my report final.pdf")]
    #[case("../../etc/passwd", "....etcpasswd")]
    #[case("naïve-ünïcode_1.txt", "nave-ncode_1.txt")]
    #[case("a/b\\c", "abc")]
    #[case("", "")]
    #[trace]
    fn sanitize(#[case] name: &str, #[case] expected: &str) {
        // Arrange

        // Act
        let sanitized = sanitize_file_name(name);

        // Assert
        assert_eq!(sanitized, expected);
    }

    #[rstest]
    #[case("", "a.txt", "a.txt")]
    #[case("docs", "a.txt", "docs/a.txt")]
    #[case("/docs/", "a.txt", "docs/a.txt")]
    #[case("docs/2024", "a?.txt", "docs/2024/a.txt")]
    #[trace]
    fn target_key(#[case] folder: &str, #[case] name: &str, #[case] expected: &str) {
        // Arrange
        let target = TargetPath::new(folder, name);

        // Act
        let key = target.key();

        // Assert
        assert_eq!(key, expected);
        assert_eq!(target.to_string(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("???")]
    #[case("   ")]
    #[trace]
    fn target_empty_after_sanitizing(#[case] name: &str) {
        // Arrange

        // Act
        let target = TargetPath::new("docs", name);

        // Assert
        assert!(target.is_empty());
    }

    #[rstest]
    #[case("docs/a.txt")]
    #[case("photos/2024/holiday?.jpg")]
    #[case("plain")]
    #[trace]
    fn object_id_round_trips(#[case] key: &str) {
        // Arrange
        let id = encode_object_id(key);

        // Act
        let decoded = decode_object_id(&id);

        // Assert
        assert_eq!(decoded.as_deref(), Some(key));
    }

    #[test]
    fn object_id_accepts_url_safe_alphabet() {
        // Arrange
        let id = URL_SAFE.encode("a>?b".as_bytes());

        // Act
        let decoded = decode_object_id(&id);

        // Assert
        assert_eq!(decoded.as_deref(), Some("a>?b"));
    }

    #[rstest]
    #[case("not base64!")]
    #[case("")]
    #[case("ICAg")]
    #[trace]
    fn object_id_rejects_invalid(#[case] id: &str) {
        // Arrange

        // Act
        let decoded = decode_object_id(id);

        // Assert
        assert!(decoded.is_none());
    }

    #[test]
    fn folders_are_sorted_prefixes() {
        // Arrange
        let keys = ["b/c/d.txt", "a.txt", "b/e.txt", "a/x.bin", "b/c/f.txt"];

        // Act
        let folders = folders_of(keys);

        // Assert
        assert_eq!(folders, vec!["a", "b", "b/c"]);
    }

    #[test]
    fn folders_of_nothing() {
        // Arrange
        let keys: [&str; 0] = [];

        // Act
        let folders = folders_of(keys);

        // Assert
        assert!(folders.is_empty());
    }
}
