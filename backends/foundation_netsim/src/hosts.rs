//! Virtual hostnames intercepted by a fake server.

use core::fmt;

use crate::errors::{NetsimError, NetsimResult};

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Ordered, non-empty set of validated hostnames.
///
/// Hostnames are stored lowercase without a trailing dot, duplicates are
/// dropped keeping the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSet(Vec<String>);

// -- Constructors

impl HostSet {
    /// Builds a host set, validating every hostname.
    ///
    /// # Errors
    ///
    /// Returns [`NetsimError::InvalidHost`] when the set would be empty or
    /// when any entry is not a valid DNS name.
    pub fn new<I, S>(hosts: I) -> NetsimResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for host in hosts {
            let host = normalize(host.as_ref());
            if !is_valid_hostname(&host) {
                return Err(NetsimError::InvalidHost(host));
            }
            if !normalized.contains(&host) {
                normalized.push(host);
            }
        }

        if normalized.is_empty() {
            return Err(NetsimError::InvalidHost(String::new()));
        }

        Ok(Self(normalized))
    }
}

// -- Getters

impl HostSet {
    #[must_use]
    pub fn contains(&self, host: &str) -> bool {
        let host = normalize(host);
        self.0.iter().any(|item| *item == host)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false, a host set cannot be built empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for HostSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Lowercases and strips a single trailing dot (fully-qualified form).
pub(crate) fn normalize(host: &str) -> String {
    host.strip_suffix('.').unwrap_or(host).to_ascii_lowercase()
}

fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > MAX_HOSTNAME_LEN {
        return false;
    }

    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}
