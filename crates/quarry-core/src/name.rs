//! Target name parsing, matching and ordering
//!
//! A target name is the textual identifier of an artifact:
//! `prefix:path/mask`. The prefix selects an artifact kind, the path is the
//! concrete filesystem-like part, and the trailing mask (if any) turns the
//! name into a pattern. Registered patterns are kept sorted so that the most
//! specific one is always tried first:
//!
//! ```text
//! [ "aa:test/", "aa:test/*", "aa:test/**/*", "aa:", "bb:",
//!   "compile:test/test/a", "compile:test/**/*", "compile:", "test/com" ]
//! ```

use crate::artifact::Customizer;
use crate::error::{BuildError, BuildResult};
use crate::kind::KindRegistry;
use glob::{MatchOptions, Pattern};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Parsed, comparable, matchable form of a textual target identifier.
///
/// Immutable value type. Equality covers prefix, suffix, path, mask and
/// kind; an attached customizer never participates in equality so it cannot
/// perturb cache keys.
#[derive(Clone)]
pub struct TargetName {
    raw: String,
    prefix: Option<String>,
    suffix: Option<String>,
    path: Option<String>,
    mask: Option<String>,
    literal_separator: bool,
    kind: Option<String>,
    pattern: Option<Pattern>,
    customizer: Option<Customizer>,
}

impl TargetName {
    /// Parse a raw target name without resolving a kind from its prefix.
    pub fn parse(raw: &str) -> BuildResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BuildError::name_format(raw, "name is empty"));
        }

        let (prefix, rest) = split_prefix(raw);
        let suffix = if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        };

        let mut path = None;
        let mut mask = None;
        if let Some(suffix) = suffix.as_deref() {
            if let Some(portion) = path_portion(suffix) {
                let (p, m) = split_mask(portion);
                path = p.map(clean_path);
                mask = m.map(str::to_string);
            }
        }

        // a bare `*` mask with no path is the one case where the glob is
        // allowed to cross `/` boundaries
        let literal_separator = mask.as_deref() != Some("*") || path.is_some();

        let pattern = match (&mask, &suffix) {
            (Some(_), Some(suffix)) => Some(Pattern::new(suffix).map_err(|e| {
                BuildError::name_format(raw, format!("invalid mask: {e}"))
            })?),
            _ => None,
        };

        Ok(Self {
            raw: raw.to_string(),
            prefix: prefix.map(str::to_string),
            suffix,
            path,
            mask,
            literal_separator,
            kind: None,
            pattern,
            customizer: None,
        })
    }

    /// Parse a raw target name, deriving the kind from the prefix when the
    /// prefix text names a registered artifact kind. Unresolved prefixes are
    /// tolerated and leave the kind unset.
    pub fn parse_in(raw: &str, kinds: &KindRegistry) -> BuildResult<Self> {
        let mut name = Self::parse(raw)?;
        if let Some(prefix) = &name.prefix {
            let id = &prefix[..prefix.len() - 1];
            if kinds.lookup(id).is_some() {
                name.kind = Some(id.to_string());
            }
        }
        Ok(name)
    }

    /// Parse a raw target name with an explicitly required kind.
    pub fn with_kind(raw: &str, kinds: &KindRegistry, kind: &str) -> BuildResult<Self> {
        kinds.get(kind)?;
        let mut name = Self::parse(raw)?;
        name.kind = Some(kind.to_string());
        Ok(name)
    }

    /// Build a target name from a kind alone, using its default target name.
    pub fn of_kind(kinds: &KindRegistry, kind: &str) -> BuildResult<Self> {
        let descriptor = kinds.get(kind)?;
        let raw = descriptor
            .default_name()
            .ok_or_else(|| BuildError::MissingName {
                kind: kind.to_string(),
            })?;
        let mut name = Self::parse(raw)?;
        name.kind = Some(kind.to_string());
        Ok(name)
    }

    /// Attach a one-off configuration block to this name.
    pub fn with_customizer(mut self, customizer: Customizer) -> Self {
        self.customizer = Some(customizer);
        self
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn mask(&self) -> Option<&str> {
        self.mask.as_deref()
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn customizer(&self) -> Option<&Customizer> {
        self.customizer.as_ref()
    }

    /// A name with a mask is a pattern; without one it is exact.
    pub fn is_pattern(&self) -> bool {
        self.mask.is_some()
    }

    /// Whether the path lives in the reserved environment namespace.
    pub fn is_env_path(&self) -> bool {
        self.path
            .as_deref()
            .map_or(false, |p| p.starts_with(".env/"))
    }

    /// Match a concrete name against this (possibly masked) name.
    ///
    /// A masked pattern never matches across the `.env/` namespace boundary:
    /// a broad glob must not accidentally capture environment artifacts.
    pub fn matches(&self, concrete: &TargetName) -> bool {
        if self.prefix != concrete.prefix {
            return false;
        }
        if self.mask.is_some() {
            let Some(suffix) = concrete.suffix.as_deref() else {
                return false;
            };
            if self.is_env_path() != concrete.is_env_path() {
                return false;
            }
            self.glob_matches(suffix)
        } else {
            self.suffix == concrete.suffix
        }
    }

    /// Rebase the path portion relative to `base`, when it lies under it.
    pub fn relative_to(&self, base: &Path) -> TargetName {
        let Some(path) = self.path.as_deref() else {
            return self.clone();
        };
        let base = base.to_string_lossy();
        let Some(rel) = relative_path(path, &base) else {
            return self.clone();
        };
        let raw = compose(self.prefix.as_deref(), Some(&rel), self.mask.as_deref());
        match Self::parse(&raw) {
            Ok(mut name) => {
                name.kind = self.kind.clone();
                name.customizer = self.customizer.clone();
                name
            }
            Err(_) => self.clone(),
        }
    }

    fn glob_matches(&self, s: &str) -> bool {
        self.pattern
            .as_ref()
            .map_or(false, |p| p.matches_with(s, self.match_options()))
    }

    fn match_options(&self) -> MatchOptions {
        MatchOptions {
            case_sensitive: true,
            require_literal_separator: self.literal_separator,
            // dot-matching: `*` matches leading dots
            require_literal_leading_dot: false,
        }
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetName")
            .field("prefix", &self.prefix)
            .field("suffix", &self.suffix)
            .field("path", &self.path)
            .field("mask", &self.mask)
            .field("kind", &self.kind)
            .finish()
    }
}

impl PartialEq for TargetName {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix
            && self.suffix == other.suffix
            && self.path == other.path
            && self.mask == other.mask
            && self.kind == other.kind
    }
}

impl Eq for TargetName {}

impl Hash for TargetName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.prefix.hash(state);
        self.suffix.hash(state);
        self.path.hash(state);
        self.mask.hash(state);
        self.kind.hash(state);
    }
}

impl PartialOrd for TargetName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Specificity order: prefixed names before unprefixed, bare prefixes after
/// any pattern under the same prefix, and a pattern that glob-contains
/// another name sorts after it (less specific last).
impl Ord for TargetName {
    fn cmp(&self, other: &Self) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        if self.prefix == other.prefix {
            match (self.suffix.as_deref(), other.suffix.as_deref()) {
                (a, b) if a == b => self.kind.cmp(&other.kind),
                (_, None) => Ordering::Less,
                (None, _) => Ordering::Greater,
                (Some(a), Some(b)) => {
                    if self.mask.is_some() {
                        if self.glob_matches(b) {
                            Ordering::Greater
                        } else {
                            Ordering::Less
                        }
                    } else if other.mask.is_some() {
                        if other.glob_matches(a) {
                            Ordering::Less
                        } else {
                            Ordering::Greater
                        }
                    } else {
                        self.raw
                            .cmp(&other.raw)
                            .then_with(|| self.kind.cmp(&other.kind))
                    }
                }
            }
        } else {
            match (&self.prefix, &other.prefix) {
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (a, b) => a.cmp(b).then_with(|| self.raw.cmp(&other.raw)),
            }
        }
    }
}

/// Split a leading kind prefix (two or more word characters followed by a
/// colon) from the rest of the name.
fn split_prefix(raw: &str) -> (Option<&str>, &str) {
    if let Some(i) = raw.find(':') {
        if i >= 2
            && raw[..i]
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return (Some(&raw[..=i]), &raw[i + 1..]);
        }
    }
    (None, raw)
}

/// Extract the filesystem-path-like portion of a suffix: the trailing run of
/// non-colon characters, optionally including a single-letter drive spec.
fn path_portion(suffix: &str) -> Option<&str> {
    match suffix.rfind(':') {
        None => Some(suffix),
        Some(i) => {
            let tail = &suffix[i + 1..];
            if tail.is_empty() {
                return None;
            }
            let bytes = suffix.as_bytes();
            let drive = i >= 1
                && bytes[i - 1].is_ascii_alphabetic()
                && (i == 1 || !bytes[i - 2].is_ascii_alphabetic());
            if drive {
                Some(&suffix[i - 1..])
            } else {
                Some(tail)
            }
        }
    }
}

/// Split the trailing glob mask off a path portion at the first glob
/// metacharacter.
fn split_mask(portion: &str) -> (Option<&str>, Option<&str>) {
    match portion.find(['[', ']', '?', '*', '{', '}']) {
        None => (Some(portion), None),
        Some(0) => (None, Some(portion)),
        Some(i) => (Some(&portion[..i]), Some(&portion[i..])),
    }
}

/// Lexically normalize a path: collapse `.` and `..`, drop duplicate and
/// trailing separators.
pub(crate) fn clean_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(&last) if last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Rebuild a raw name from its parts.
fn compose(prefix: Option<&str>, path: Option<&str>, mask: Option<&str>) -> String {
    let mut name = match (path, mask) {
        (Some(p), Some(m)) => format!("{p}/{m}"),
        (Some(p), None) => p.to_string(),
        (None, Some(m)) => m.to_string(),
        (None, None) => String::new(),
    };
    if let Some(prefix) = prefix {
        name = format!("{prefix}{name}");
    }
    name
}

/// Path relative to `base`, when `path` lies strictly under it.
fn relative_path(path: &str, base: &str) -> Option<String> {
    let base = base.strip_suffix('/').unwrap_or(base);
    if path.starts_with('/') != base.starts_with('/') {
        return None;
    }
    let rest = path.strip_prefix(base)?.strip_prefix('/')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}
