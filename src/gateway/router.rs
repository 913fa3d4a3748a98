//! Longest-prefix route table
//!
//! Routes are literal path prefixes. A lookup picks the longest stored key
//! that is a prefix of the request path; an exact-match entry additionally
//! requires the key to equal the whole path. A matched entry without a
//! handler is "not implemented", which the dispatcher keeps distinct from
//! "not found".
//!
//! The table is built once at startup and shared read-only behind an `Arc`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::handler::Handler;
use crate::error::{ApiError, ErrorKind};

/// Route table construction errors
#[derive(Error, Debug)]
pub enum RouteError {
    /// Path registered twice
    #[error("duplicate route: {0}")]
    Duplicate(String),

    /// Path does not start with `/`
    #[error("route path must start with '/': {0:?}")]
    InvalidPath(String),
}

/// One registered route
#[derive(Clone)]
pub struct RouteEntry {
    /// Literal path prefix
    pub path: String,
    /// `None` marks a reserved, not yet implemented route
    pub handler: Option<Arc<dyn Handler>>,
    /// Only match when the request path equals `path`
    pub exact_match: bool,
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("path", &self.path)
            .field("implemented", &self.handler.is_some())
            .field("exact_match", &self.exact_match)
            .finish()
    }
}

/// Ordered collection of routes
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, RouteEntry>,
}

impl RouteTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Registering the same path twice is an error.
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        handler: Option<Arc<dyn Handler>>,
        exact_match: bool,
    ) -> Result<(), RouteError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(RouteError::InvalidPath(path));
        }
        if self.routes.contains_key(&path) {
            return Err(RouteError::Duplicate(path));
        }
        self.routes.insert(
            path.clone(),
            RouteEntry {
                path,
                handler,
                exact_match,
            },
        );
        Ok(())
    }

    /// Entry whose key is the longest prefix of `path`.
    ///
    /// Returns `None` when nothing matches, or when the longest match is an
    /// exact-match entry whose key differs from `path`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<(&str, &RouteEntry)> {
        let entry = (1..=path.len())
            .rev()
            .filter(|&end| path.is_char_boundary(end))
            .find_map(|end| self.routes.get(&path[..end]))?;

        if entry.exact_match && entry.path != path {
            return None;
        }
        Some((entry.path.as_str(), entry))
    }

    /// [`Self::lookup`] mapped onto the request error taxonomy
    pub fn resolve(&self, path: &str) -> Result<(&str, &Arc<dyn Handler>), ApiError> {
        let (matched, entry) = self
            .lookup(path)
            .ok_or_else(|| ApiError::new(ErrorKind::RouteNotFound))?;
        let handler = entry
            .handler
            .as_ref()
            .ok_or_else(|| ApiError::new(ErrorKind::RouteNotImplemented))?;
        Ok((matched, handler))
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered routes in key order
    pub fn entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }
}
