use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use mailbadger::address::normalize_domain;

// Where local parts come from: a wordlist on disk or an inline value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputSource {
    Inline(String),
    File(PathBuf),
}

impl InputSource {
    // Detect whether the input is a path to an existing file or an inline value
    pub fn new(input: &str) -> io::Result<Self> {
        if let Ok(metadata) = std::fs::metadata(input) {
            if metadata.is_file() {
                return Ok(Self::File(PathBuf::from(input)));
            }
            if metadata.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{input} is a directory, not a file"),
                ));
            }
        }
        Ok(Self::Inline(input.to_string()))
    }

    // Raw entries, before any cleanup against the domain
    pub fn load_values(&self) -> io::Result<Vec<String>> {
        match self {
            Self::Inline(value) => Ok(value
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect()),
            Self::File(path) => read_values_from_file(path),
        }
    }
}

// Read values from a file, skipping empty lines and comments
pub fn read_values_from_file(path: &Path) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut values = Vec::new();

    for line in reader.lines() {
        let value = line?;
        let trimmed = value.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            values.push(trimmed.to_string());
        }
    }

    Ok(values)
}

/// Reduce entries to local parts for `domain`.
///
/// `alice@example.com` becomes `alice` when `domain` is `example.com`
/// (case-insensitive). Duplicates are dropped, keeping the first occurrence.
pub fn local_parts_for(values: Vec<String>, domain: &str) -> Vec<String> {
    let suffix = format!("@{}", normalize_domain(domain));
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|value| {
            let lower = value.to_ascii_lowercase();
            if lower.ends_with(&suffix) {
                value[..value.len() - suffix.len()].to_string()
            } else {
                value
            }
        })
        .filter(|local| !local.is_empty() && seen.insert(local.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_values_split_on_commas() {
        let source = InputSource::new("alice, bob,,carol").unwrap();
        assert!(matches!(source, InputSource::Inline(_)));
        assert_eq!(source.load_values().unwrap(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn wordlist_skips_blank_lines_and_comments() {
        let path = std::env::temp_dir().join(format!("mailbadger-users-{}.txt", std::process::id()));
        std::fs::write(&path, "# staff\nalice\n\n  bob  \n#carol\n").unwrap();

        let source = InputSource::new(path.to_str().unwrap()).unwrap();
        assert_eq!(source, InputSource::File(path.clone()));
        assert_eq!(source.load_values().unwrap(), vec!["alice", "bob"]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn directories_are_rejected() {
        let dir = std::env::temp_dir();
        assert!(InputSource::new(dir.to_str().unwrap()).is_err());
    }

    #[test]
    fn domain_suffix_stripped_and_duplicates_dropped() {
        let values = vec![
            "alice".to_string(),
            "Bob@Example.com".to_string(),
            "alice@example.com".to_string(),
            "carol@other.org".to_string(),
            "@example.com".to_string(),
        ];
        assert_eq!(
            local_parts_for(values, "example.com"),
            vec!["alice", "Bob", "carol@other.org"]
        );
    }

    #[test]
    fn domain_spelling_does_not_defeat_suffix_stripping() {
        let values = vec!["alice@example.com".to_string(), "Bob@Example.COM".to_string()];
        assert_eq!(local_parts_for(values.clone(), "example.com."), vec!["alice", "Bob"]);
        assert_eq!(local_parts_for(values, "@Example.COM"), vec!["alice", "Bob"]);
    }
}
