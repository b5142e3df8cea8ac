//! Point lookups against the reputation store.

use crate::config::{AllowlistEntry, Config, Settings};
use crate::normalize::normalize;
use crate::store::ReputationStore;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Answer returned to lookup callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not listed by any feed, allowlisted, or not an IP at all.
    Benign,
    /// Listed by at least one feed within the staleness window.
    Malicious,
}

impl Verdict {
    /// Wire form of the verdict.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Benign => "benign",
            Verdict::Malicious => "malicious",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous "is this IP known-bad?" query surface.
///
/// Never fails: anything that is not a listed, canonical IP is benign.
pub struct LookupService {
    store: Arc<ReputationStore>,
    allowlist: Vec<AllowlistEntry>,
    settings: Settings,
}

impl LookupService {
    /// Create a lookup service over `store`.
    pub fn new(store: Arc<ReputationStore>, config: &Config) -> Self {
        Self {
            store,
            allowlist: config.parse_allowlist(),
            settings: config.settings.clone(),
        }
    }

    /// Classify a caller-supplied IP string.
    pub fn check(&self, candidate: &str) -> Verdict {
        if !self.settings.enabled {
            debug!("IOC reputation lookups disabled globally");
            return Verdict::Benign;
        }

        let ip = match normalize(candidate) {
            Some(ip) => ip,
            None => {
                debug!(len = candidate.len(), "Lookup input is not an IP address");
                return Verdict::Benign;
            }
        };

        if self.is_allowlisted(&ip) {
            debug!(ip = %ip, "IP is allowlisted");
            return Verdict::Benign;
        }

        if self.store.lookup(&ip) {
            if self.settings.log_malicious {
                info!(ip = %ip, "Malicious IP matched");
            }
            Verdict::Malicious
        } else {
            if self.settings.log_benign {
                debug!(ip = %ip, "IP not listed");
            }
            Verdict::Benign
        }
    }

    /// Check if an IP is in the allowlist.
    fn is_allowlisted(&self, ip: &IpAddr) -> bool {
        self.allowlist.iter().any(|entry| entry.contains(ip))
    }
}
