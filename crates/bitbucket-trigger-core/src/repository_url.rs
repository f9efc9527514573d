//! Loose repository URL comparison.
//!
//! Job configurations and push notifications rarely spell a repository URL
//! the same way: hosts differ in case, clone URLs carry a `.git` suffix or a
//! trailing slash, and Bitbucket Server serves clone URLs under an extra
//! `/scm/` path segment. [`loosely_matches`] treats all of these as the same
//! repository. A false positive costs one extra poll; a false negative loses
//! the push.
//!
//! # Examples
//!
//! ```rust
//! use bitbucket_trigger_core::repository_url::{loosely_matches, RepositoryReference};
//!
//! let configured: RepositoryReference = "ssh://git@bitbucket.example.com:7999/ir/iridium-parent.git"
//!     .parse()
//!     .unwrap();
//! let notified = RepositoryReference::parse("https://bitbucket.example.com/scm/ir/iridium-parent").unwrap();
//!
//! assert!(loosely_matches(&configured, &notified));
//! ```

use std::fmt;
use std::str::FromStr;
use url::Url;

/// Host and path of a repository URL.
///
/// Accepts standard URLs (`https://`, `ssh://`, `git://`, ...) as well as the
/// scp-like form `[user@]host:path` used for SSH remotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryReference {
    host: String,
    path: String,
}

impl RepositoryReference {
    /// Parse a repository URL.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryUrlError`] when the string is neither a URL with a
    /// host nor an scp-like `host:path` reference.
    pub fn parse(raw: &str) -> Result<Self, RepositoryUrlError> {
        let raw = raw.trim();

        if raw.contains("://") {
            let url = Url::parse(raw).map_err(|source| RepositoryUrlError::InvalidUrl {
                url: raw.to_string(),
                source,
            })?;
            return Self::from_url(&url);
        }

        Self::parse_scp_like(raw)
    }

    /// Build a reference from an already parsed URL.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryUrlError::MissingHost`] when the URL has no host.
    pub fn from_url(url: &Url) -> Result<Self, RepositoryUrlError> {
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| RepositoryUrlError::MissingHost {
                url: url.to_string(),
            })?;

        Ok(Self {
            host: host.to_string(),
            path: url.path().to_string(),
        })
    }

    // `git@bitbucket.org:owner/repo.git`
    fn parse_scp_like(raw: &str) -> Result<Self, RepositoryUrlError> {
        let unsupported = || RepositoryUrlError::UnsupportedFormat {
            url: raw.to_string(),
        };

        let (authority, path) = raw.split_once(':').ok_or_else(unsupported)?;
        let host = authority
            .rsplit_once('@')
            .map_or(authority, |(_, host)| host);

        if host.is_empty()
            || path.is_empty()
            || host.contains(|c: char| c.is_whitespace() || c == '/')
        {
            return Err(unsupported());
        }

        Ok(Self {
            host: host.to_string(),
            path: path.to_string(),
        })
    }

    /// Host as written in the URL.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Path as written in the URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Lower-cased host.
    pub fn normalized_host(&self) -> String {
        self.host.to_ascii_lowercase()
    }

    /// Path with slashes, `.git` and `/scm/` segments normalized away.
    pub fn normalized_path(&self) -> String {
        normalize_path(&self.path)
    }

    /// See [`loosely_matches`].
    pub fn loosely_matches(&self, other: &Self) -> bool {
        loosely_matches(self, other)
    }
}

impl FromStr for RepositoryReference {
    type Err = RepositoryUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.path)
    }
}

/// Whether two references identify the same repository.
///
/// Hosts are compared case-insensitively. Paths are normalized with
/// [`normalize_path`] and then compared exactly.
pub fn loosely_matches(lhs: &RepositoryReference, rhs: &RepositoryReference) -> bool {
    lhs.host.eq_ignore_ascii_case(&rhs.host) && lhs.normalized_path() == rhs.normalized_path()
}

/// Normalize a repository path for comparison.
///
/// In order: strip one leading `/`, strip one trailing `/`, strip a trailing
/// `.git`, then collapse every `/scm/` segment to `/`. A leading `scm/`
/// segment counts as well, so `/scm/IR/repo` and `/IR/repo` normalize alike.
pub fn normalize_path(path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    let path = path.strip_suffix('/').unwrap_or(path);
    let path = path.strip_suffix(".git").unwrap_or(path);

    let collapsed = format!("/{path}").replace("/scm/", "/");
    collapsed
        .strip_prefix('/')
        .unwrap_or(collapsed.as_str())
        .to_string()
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while parsing a repository URL.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryUrlError {
    #[error("Invalid repository URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Repository URL '{url}' has no host")]
    MissingHost { url: String },

    #[error("Unsupported repository URL format: '{url}'")]
    UnsupportedFormat { url: String },
}

impl RepositoryUrlError {
    /// Parse failures never succeed on retry.
    pub fn is_transient(&self) -> bool {
        false
    }

    /// Get error category for monitoring
    pub fn error_category(&self) -> crate::ErrorCategory {
        crate::ErrorCategory::Permanent
    }
}

#[cfg(test)]
#[path = "repository_url_tests.rs"]
mod tests;
