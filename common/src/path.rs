//! Addresses of objects and prefixes in S3.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::{EmrError, Result};

const SCHEME: &str = "s3";

/// A bucket and key pair, e.g. `s3://bucket/some/key`.
///
/// The key never starts with `/`. An empty key addresses the bucket root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S3Path {
    bucket: String,
    key: String,
}

impl S3Path {
    /// Construct a path from a bucket and key.
    ///
    /// Leading slashes are stripped from the key.
    pub fn new(bucket: impl Into<String>, key: impl AsRef<str>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.as_ref().trim_start_matches('/').to_string(),
        }
    }

    /// Retrieves the bucket and key for a given path. The path should contain
    /// the s3 protocol.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: &str| EmrError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        // `Url` silently drops surrounding whitespace and embedded tabs or
        // newlines, which would shift the raw key below.
        if path.trim() != path || path.chars().any(char::is_control) {
            return Err(invalid("surrounding whitespace or control characters"));
        }

        let url = Url::parse(path).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != SCHEME {
            return Err(invalid("protocol of path is not S3"));
        }

        let bucket = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing bucket"))?;

        // `Url` percent-encodes the path, so take the key from the raw input.
        let rest = &path[SCHEME.len() + "://".len()..];
        let key = rest.split_once('/').map(|(_, key)| key).unwrap_or("");

        Ok(Self::new(bucket, key))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a path segment and re-parse the result.
    pub fn join(&self, segment: &str) -> Result<Self> {
        let base = self.to_string();
        let joined = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            segment.trim_start_matches('/')
        );
        Self::parse(&joined)
    }

    /// Address of another key in the same bucket.
    pub fn with_key(&self, key: &str) -> Self {
        Self::new(self.bucket.clone(), key)
    }
}

impl fmt::Display for S3Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", SCHEME, self.bucket, self.key)
    }
}

impl FromStr for S3Path {
    type Err = EmrError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
