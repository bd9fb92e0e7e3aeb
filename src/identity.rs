//! Tenant identity extraction from the request path.

use crate::error::ConfigError;
use regex::Regex;
use uuid::Uuid;

/// Name of the capture group that, when present, holds the tenant id.
pub const TENANT_GROUP: &str = "tenant";

/// The caller behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Tenant id, always a valid UUID.
    pub tenant: Uuid,
    /// The full pattern match; used as the usage-telemetry key.
    pub request_key: String,
}

impl Identity {
    /// Canonical (lowercase, hyphenated) tenant id.
    pub fn tenant_id(&self) -> String {
        self.tenant.hyphenated().to_string()
    }
}

/// Compiled identity-extraction pattern.
///
/// The tenant id is taken from the `tenant` named group, else from capture
/// group 1, else from the whole match.
#[derive(Debug, Clone)]
pub struct IdentityPattern {
    regex: Regex,
}

impl IdentityPattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern)
            .map_err(|e| ConfigError::Invalid { field: "pattern", reason: e.to_string() })?;
        Ok(Self { regex })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Run the pattern against `path`. `None` means the request must be rejected.
    pub fn extract(&self, path: &str) -> Option<Identity> {
        let caps = self.regex.captures(path)?;
        let whole = caps.get(0)?;
        let candidate = caps
            .name(TENANT_GROUP)
            .or_else(|| caps.get(1))
            .unwrap_or(whole)
            .as_str();
        let tenant = Uuid::parse_str(candidate).ok()?;
        Some(Identity { tenant, request_key: whole.as_str().to_string() })
    }
}
