//! Internal-only capability gating the zero-cost override.
//!
//! A caller can only pass a credits override if it also holds an
//! [`InternalAuthority`]. HTTP handlers obtain one exclusively through
//! [`InternalAuthority::from_bearer`]; system job kinds use
//! [`InternalAuthority::system`].

use crate::webhook_token::constant_time_eq;

/// Proof that the current operation is running on behalf of the system,
/// not an end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalAuthority {
    origin: AuthorityOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityOrigin {
    /// Presented the configured internal API secret.
    Secret,
    /// Constructed by an internal code path (system-initiated job).
    System,
}

impl InternalAuthority {
    /// Verify a presented bearer secret against the configured one.
    ///
    /// Returns `None` when no secret is configured, so internal access is
    /// disabled by default.
    pub fn from_bearer(configured: Option<&str>, presented: &str) -> Option<Self> {
        let configured = configured.filter(|s| !s.is_empty())?;
        constant_time_eq(configured.as_bytes(), presented.as_bytes()).then_some(Self {
            origin: AuthorityOrigin::Secret,
        })
    }

    /// Authority for jobs the system initiates itself.
    pub fn system() -> Self {
        Self {
            origin: AuthorityOrigin::System,
        }
    }

    pub fn origin(&self) -> AuthorityOrigin {
        self.origin
    }
}
