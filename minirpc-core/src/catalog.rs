//! Extension catalog parsing
//!
//! A catalog is line oriented text with one `name = implementation-id` binding
//! per line. `#` starts a comment that runs to the end of the line.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory, relative to a search path, that holds one catalog file per capability
pub const EXTENSION_DIR: &str = "extensions";

/// One parsed `name = implementation-id` binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub implementation: String,
}

/// Where catalog text for a capability comes from
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// Catalog text compiled into a binary, for one capability
    Embedded { capability: String, text: String },
    /// Directory scanned for `extensions/<capability>` files
    Directory(PathBuf),
}

impl CatalogSource {
    /// Read the catalog this source holds for `capability`, if any
    pub fn read(&self, capability: &str) -> Option<(String, String)> {
        match self {
            CatalogSource::Embedded { capability: cap, text } if cap == capability => {
                Some((format!("builtin:{}", cap), text.clone()))
            }
            CatalogSource::Embedded { .. } => None,
            CatalogSource::Directory(dir) => {
                let path = catalog_path(dir, capability);
                match std::fs::read_to_string(&path) {
                    Ok(text) => Some((path.display().to_string(), text)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => {
                        warn!("Failed to read extension catalog {}: {}", path.display(), e);
                        None
                    }
                }
            }
        }
    }
}

/// Path of the catalog file for `capability` under `dir`
pub fn catalog_path(dir: &Path, capability: &str) -> PathBuf {
    dir.join(EXTENSION_DIR).join(capability)
}

/// Parse catalog text, skipping blank lines, comments and malformed lines
pub fn parse_catalog(text: &str, origin: &str) -> Vec<CatalogEntry> {
    let mut entries = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        }
        .trim();

        if line.is_empty() {
            continue;
        }

        let Some((name, implementation)) = line.split_once('=') else {
            warn!("{}:{}: ignoring catalog line without '=': {}", origin, index + 1, line);
            continue;
        };

        let name = name.trim();
        let implementation = implementation.trim();
        if name.is_empty() || implementation.is_empty() {
            warn!("{}:{}: ignoring incomplete catalog binding: {}", origin, index + 1, line);
            continue;
        }

        entries.push(CatalogEntry {
            name: name.to_string(),
            implementation: implementation.to_string(),
        });
    }

    debug!("Parsed {} catalog entries from {}", entries.len(), origin);
    entries
}

/// Merge entries into a catalog map; later bindings of a name replace earlier ones
pub fn merge_entries(catalog: &mut HashMap<String, String>, entries: Vec<CatalogEntry>) {
    for entry in entries {
        catalog.insert(entry.name, entry.implementation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comments_and_blanks() {
        let text = "\
# serializers
json = minirpc::JsonSerializer   # text

  bincode=minirpc::BincodeSerializer
";
        let entries = parse_catalog(text, "test");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "json");
        assert_eq!(entries[0].implementation, "minirpc::JsonSerializer");
        assert_eq!(entries[1].name, "bincode");
        assert_eq!(entries[1].implementation, "minirpc::BincodeSerializer");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let entries = parse_catalog("no-equals-here\n= missing-name\nname =\nok = impl\n", "test");
        assert_eq!(entries, vec![CatalogEntry { name: "ok".into(), implementation: "impl".into() }]);
    }

    #[test]
    fn test_value_may_contain_equals() {
        let entries = parse_catalog("weird = a=b\n", "test");
        assert_eq!(entries[0].implementation, "a=b");
    }

    #[test]
    fn test_last_binding_wins() {
        let mut catalog = HashMap::new();
        merge_entries(&mut catalog, parse_catalog("gzip = first\n", "a"));
        merge_entries(&mut catalog, parse_catalog("gzip = second\n", "b"));
        assert_eq!(catalog.get("gzip").map(String::as_str), Some("second"));
    }

    #[test]
    fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(EXTENSION_DIR)).unwrap();
        std::fs::write(catalog_path(dir.path(), "compress"), "gzip = x\n").unwrap();

        let source = CatalogSource::Directory(dir.path().to_path_buf());
        let (origin, text) = source.read("compress").unwrap();
        assert!(origin.ends_with("compress"));
        assert_eq!(text, "gzip = x\n");
        assert!(source.read("serializer").is_none());
    }

    #[test]
    fn test_embedded_source_matches_capability() {
        let source = CatalogSource::Embedded {
            capability: "serializer".into(),
            text: "json = j\n".into(),
        };
        assert!(source.read("serializer").is_some());
        assert!(source.read("compress").is_none());
    }
}
