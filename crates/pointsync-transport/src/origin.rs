//! Connection origin policies.
//!
//! The server consults an [`OriginPolicy`] with the request's `Origin`
//! header before upgrading, so the accept rule is configuration rather than
//! a hardcoded default.

use std::fmt;
use std::sync::Arc;

/// Decides whether a connection from the given origin may be accepted.
pub trait OriginPolicy: Send + Sync + fmt::Debug {
    /// Check an origin. `None` means the request carried no `Origin` header.
    fn allows(&self, origin: Option<&str>) -> bool;
}

/// Accept every connection regardless of origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnyOrigin;

impl OriginPolicy for AllowAnyOrigin {
    fn allows(&self, _origin: Option<&str>) -> bool {
        true
    }
}

/// Accept only connections whose origin is on a fixed list.
///
/// Matching is case-insensitive and ignores a trailing `/`. Requests without
/// an `Origin` header are rejected.
#[derive(Debug, Clone)]
pub struct AllowListedOrigins {
    origins: Vec<String>,
}

impl AllowListedOrigins {
    /// Create a policy from a list of origins such as `https://example.com`.
    #[must_use]
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            origins: origins
                .into_iter()
                .map(|o| normalize(o.as_ref()))
                .collect(),
        }
    }
}

impl OriginPolicy for AllowListedOrigins {
    fn allows(&self, origin: Option<&str>) -> bool {
        match origin {
            Some(origin) => {
                let origin = normalize(origin);
                self.origins.iter().any(|allowed| *allowed == origin)
            }
            None => false,
        }
    }
}

/// Build a policy from a configured allow-list. An empty list accepts any
/// origin.
#[must_use]
pub fn from_allow_list(origins: &[String]) -> Arc<dyn OriginPolicy> {
    if origins.is_empty() {
        Arc::new(AllowAnyOrigin)
    } else {
        Arc::new(AllowListedOrigins::new(origins))
    }
}

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}
