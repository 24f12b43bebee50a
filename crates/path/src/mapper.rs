//! Catalog → local path mapping.
//!
//! The media catalog reports paths as *it* sees them (inside its container,
//! on another host, ...). A [`MappingRule`] rewrites a catalog prefix into
//! the matching local mount. Mapping is a pure function of the input and the
//! rule set: no filesystem access happens here.

use crate::error::{ErrorKind, Result};
use crate::validate::{DEFAULT_MAX_LENGTH, check_length, validate, validate_root};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Rewrites paths under `plex_root` to the same relative path under
/// `local_root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    plex_root: PathBuf,
    local_root: PathBuf,
}
impl MappingRule {
    /// Both roots must be absolute and free of `..` segments. They are
    /// normalized on construction.
    pub fn new(plex_root: impl AsRef<Path>, local_root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            plex_root: validate_root(plex_root.as_ref())?,
            local_root: validate_root(local_root.as_ref())?,
        })
    }

    pub fn plex_root(&self) -> &Path {
        &self.plex_root
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Number of components in the catalog prefix, used to pick the most
    /// specific rule.
    fn specificity(&self) -> usize {
        self.plex_root.components().count()
    }

    fn rewrite(&self, path: &Path) -> Option<PathBuf> {
        // Component-wise: "/plex/movies2" is not under "/plex/movies".
        let relative = path.strip_prefix(&self.plex_root).ok()?;
        Some(match relative.as_os_str().is_empty() {
            true => self.local_root.clone(),
            false => self.local_root.join(relative),
        })
    }
}

/// The outcome of [`PathMapper::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Absolute, normalized local path.
    pub path: PathBuf,
    /// `false` when no rule matched and the path was passed through as-is.
    pub mapped: bool,
}

/// Resolves catalog-reported paths into validated local paths, across one
/// primary rule and any number of additional (mirrored) rules.
#[derive(Debug, Clone)]
pub struct PathMapper {
    primary: MappingRule,
    /// All rules (primary included), most specific first.
    rules: Vec<MappingRule>,
    max_length: usize,
}
impl PathMapper {
    /// Builds a mapper, rejecting rule sets where two rules share a
    /// `local_root` (the reverse direction would be ambiguous).
    pub fn new(primary: MappingRule, additional: impl IntoIterator<Item = MappingRule>) -> Result<Self> {
        let mut rules = vec![primary.clone()];
        for rule in additional {
            if rules.iter().any(|existing| existing.local_root == rule.local_root) {
                exn::bail!(ErrorKind::AmbiguousRule(rule.local_root));
            }
            rules.push(rule);
        }
        // Stable sort keeps configuration order as the tie-breaker.
        rules.sort_by_key(|rule| std::cmp::Reverse(rule.specificity()));
        Ok(Self { primary, rules, max_length: DEFAULT_MAX_LENGTH })
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn primary(&self) -> &MappingRule {
        &self.primary
    }

    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    /// Validates `reported` and rewrites it with the longest matching rule.
    ///
    /// Relative inputs are anchored at the primary rule's catalog root first.
    /// Unmatched absolute paths are returned unchanged with
    /// [`mapped`](ResolvedPath::mapped) set to `false`; some deployments see
    /// the same paths as the catalog does.
    ///
    /// ```
    /// use plexcache_path::{MappingRule, PathMapper};
    /// use std::path::Path;
    ///
    /// let rule = MappingRule::new("/plex", "/mediasource").unwrap();
    /// let mapper = PathMapper::new(rule, []).unwrap();
    /// let resolved = mapper.resolve("/plex/movies/x.mkv").unwrap();
    /// assert_eq!(resolved.path, Path::new("/mediasource/movies/x.mkv"));
    /// assert!(resolved.mapped);
    /// assert!(!mapper.resolve("/unmapped/y.mkv").unwrap().mapped);
    /// ```
    pub fn resolve(&self, reported: &str) -> Result<ResolvedPath> {
        let validated = match validate(reported, self.max_length) {
            Ok(path) => path,
            Err(e) => {
                let kind: &ErrorKind = &e;
                if kind.is_security_violation() {
                    warn!(path = reported, error = %kind, "Rejected suspicious catalog path");
                }
                return Err(e);
            },
        };
        let absolute = match validated.is_absolute() {
            true => validated,
            false => self.primary.plex_root.join(validated),
        };
        let resolved = match self.rules.iter().find_map(|rule| rule.rewrite(&absolute)) {
            Some(path) => ResolvedPath { path, mapped: true },
            None => {
                debug!(path = %absolute.display(), "No mapping rule matched; passing path through");
                ResolvedPath { path: absolute, mapped: false }
            },
        };
        check_length(&resolved.path, self.max_length)?;
        Ok(resolved)
    }
}
