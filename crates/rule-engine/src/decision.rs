use thiserror::Error;

use crate::schema::Permission;

/// The outcome of checking one operation against the rule tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// The permission that was checked.
    pub permission: Permission,
    /// The checked path, rendered with `/` separators.
    pub path: String,
    pub allowed: bool,
    /// What kind of directive produced the outcome.
    pub basis: Basis,
    /// Human-readable reason explaining the decision.
    pub reason: String,
}

/// Where a [`Decision`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    /// Security is disabled; everything is permitted.
    SecurityDisabled,
    /// A boolean directive, set on the node or inherited (or the default).
    Boolean,
    /// An expression directive was evaluated.
    Expression,
    /// The governing directive could not be used.
    Malformed,
}

/// Returned by a checkpoint that does not grant the permission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no {permission} permission")]
pub struct PermissionDenied {
    pub permission: Permission,
}

impl Decision {
    /// Convenience constructor for the security-disabled allow.
    pub fn disabled(permission: Permission, path: impl Into<String>) -> Self {
        Self {
            permission,
            path: path.into(),
            allowed: true,
            basis: Basis::SecurityDisabled,
            reason: "security is disabled".to_string(),
        }
    }

    pub fn from_bool(permission: Permission, path: impl Into<String>, allowed: bool) -> Self {
        Self {
            permission,
            path: path.into(),
            allowed,
            basis: Basis::Boolean,
            reason: format!("{} directive is {allowed}", permission.directive_key()),
        }
    }

    pub fn from_expression(
        permission: Permission,
        path: impl Into<String>,
        source: &str,
        allowed: bool,
    ) -> Self {
        let outcome = if allowed { "granted" } else { "refused" };
        Self {
            permission,
            path: path.into(),
            allowed,
            basis: Basis::Expression,
            reason: format!("expression `{source}` {outcome} access"),
        }
    }

    /// A malformed directive always denies.
    pub fn malformed(permission: Permission, path: impl Into<String>, reason: &str) -> Self {
        Self {
            permission,
            path: path.into(),
            allowed: false,
            basis: Basis::Malformed,
            reason: format!("malformed {} directive: {reason}", permission.directive_key()),
        }
    }

    /// `Ok(())` when allowed, otherwise the denial for this permission.
    pub fn into_result(self) -> Result<(), PermissionDenied> {
        if self.allowed {
            Ok(())
        } else {
            Err(PermissionDenied {
                permission: self.permission,
            })
        }
    }
}
