//! Snapshot index format.
//!
//! A snapshot's index is its `src/contrib/PACKAGES` file: Debian-control
//! style stanzas separated by blank lines, one stanza per package. The parser
//! folds continuation lines, unions the `Depends`/`Imports`/`LinkingTo`
//! fields into a single dependency list, and drops version constraints --
//! the snapshot is pinned, so every name maps to exactly one version and
//! constraints carry no information.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::hash::{DigestError, Sha256Digest};
use crate::types::{PackageName, Version};

/// Continuation lines in a stanza start with whitespace; fold them into the
/// preceding field value.
static LINE_FIXER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]+").expect("valid regex"));

/// `Key: value` pairs after folding.
static KEY_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([A-Za-z0-9]+):[ \t]*(.+)$").expect("valid regex"));

/// Package identifiers inside a dependency field. Two characters minimum,
/// which also skips the bare `R` version requirement that leads most
/// `Depends` fields.
static PKG_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9_.]+").expect("valid regex"));

/// Errors produced while parsing a `PACKAGES` index.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    /// A stanza is missing a required field.
    #[error("stanza for '{stanza}' is missing required field '{field}'")]
    MissingField {
        /// Best-effort identification of the offending stanza.
        stanza: String,
        /// The absent field name.
        field: &'static str,
    },

    /// A stanza carries a malformed `Sha256` field.
    #[error("invalid digest for package '{package}': {source}")]
    InvalidDigest {
        /// The package whose digest failed validation.
        package: String,
        #[source]
        source: DigestError,
    },

    /// The index contained no package stanzas at all.
    #[error("index contains no package stanzas")]
    Empty,
}

/// One package's entry in the snapshot index. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Package name.
    pub name: PackageName,
    /// The single version this snapshot carries for the package.
    pub version: Version,
    /// Union of `Depends`, `Imports`, and `LinkingTo`, in first-occurrence
    /// order, without duplicates or built-in packages.
    pub depends: Vec<PackageName>,
    /// Whether the package contains native code (`NeedsCompilation: yes`).
    pub needs_compilation: bool,
    /// Subdirectory under `src/contrib/` holding the archive, when the
    /// stanza carries a `Path` field.
    pub path: Option<String>,
    /// SHA-256 of the source archive, when the snapshot publishes one.
    pub sha256: Option<Sha256Digest>,
}

impl IndexEntry {
    /// Parse a single folded-or-unfolded stanza.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MissingField`] when `Package` or `Version` is
    /// absent and [`ParseError::InvalidDigest`] for a malformed `Sha256`.
    pub fn from_stanza(raw: &str) -> Result<Self, ParseError> {
        let folded = LINE_FIXER.replace_all(raw, " ");

        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
        for caps in KEY_VALUE.captures_iter(&folded) {
            let (_, [key, value]) = caps.extract();
            fields.insert(key, value.trim());
        }

        let name = fields.get("Package").ok_or_else(|| ParseError::MissingField {
            stanza: first_line(raw),
            field: "Package",
        })?;
        let version = fields.get("Version").ok_or_else(|| ParseError::MissingField {
            stanza: (*name).to_string(),
            field: "Version",
        })?;

        let mut depends = Vec::new();
        for field in ["Depends", "Imports", "LinkingTo"] {
            if let Some(value) = fields.get(field) {
                for m in PKG_NAME.find_iter(value) {
                    let dep = PackageName::new(m.as_str());
                    if !crate::is_builtin(dep.as_str()) && !depends.contains(&dep) {
                        depends.push(dep);
                    }
                }
            }
        }

        let sha256 = match fields.get("Sha256") {
            Some(raw_digest) => {
                Some(
                    Sha256Digest::parse(raw_digest).map_err(|source| ParseError::InvalidDigest {
                        package: (*name).to_string(),
                        source,
                    })?,
                )
            }
            None => None,
        };

        Ok(Self {
            name: PackageName::new(name),
            version: Version::new(version),
            depends,
            needs_compilation: fields.get("NeedsCompilation").copied() == Some("yes"),
            path: fields.get("Path").map(|p| (*p).to_string()),
            sha256,
        })
    }

    /// `{name}_{version}`, the stem of every archive name for this package.
    pub fn full_name(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }

    /// File name of the source archive in the snapshot.
    pub fn source_filename(&self) -> String {
        format!("{}.tar.gz", self.full_name())
    }

    /// Path of the source archive relative to the repository root, honouring
    /// a `Path` subdirectory when present.
    pub fn source_path(&self) -> String {
        match &self.path {
            Some(sub) => format!("src/contrib/{}/{}", sub.trim_matches('/'), self.source_filename()),
            None => format!("src/contrib/{}", self.source_filename()),
        }
    }
}

/// The parsed package index of one pinned snapshot, frozen for the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageIndex {
    entries: BTreeMap<PackageName, IndexEntry>,
}

impl PackageIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a full `PACKAGES` file.
    ///
    /// Stanzas that do not begin with `Package:` (repository preamble,
    /// trailing noise) are skipped, matching the tolerant behaviour of R's
    /// own `available.packages`. When the same name appears twice the later
    /// stanza wins.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Empty`] when no stanza parses, or the first
    /// stanza-level error encountered.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let normalized = text.replace("\r\n", "\n");

        let mut index = Self::new();
        for stanza in normalized.split("\n\n") {
            let stanza = stanza.trim_start_matches('\n');
            if !stanza.starts_with("Package:") {
                continue;
            }
            index.upsert(IndexEntry::from_stanza(stanza)?);
        }

        if index.is_empty() {
            return Err(ParseError::Empty);
        }
        Ok(index)
    }

    /// Insert an entry, replacing any previous entry with the same name.
    pub fn upsert(&mut self, entry: IndexEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Look up a package by name.
    pub fn find(&self, name: &str) -> Option<&IndexEntry> {
        self.entries.get(name)
    }

    /// Number of packages in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no packages.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }
}

fn first_line(raw: &str) -> String {
    raw.lines().next().unwrap_or("<empty>").to_string()
}
