use crate::error::{AppError, Result};
use crate::models::User;

/// Privileged operations. Every admin handler names the one it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ManageCatalog,
    ManageInventory,
    ViewSales,
    ManageUsers,
    ViewDashboard,
}

impl Capability {
    fn requires_two_factor(self) -> bool {
        matches!(self, Capability::ManageUsers | Capability::ViewDashboard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    NotAdmin,
    TwoFactorRequired,
}

impl DenialReason {
    pub fn message(self) -> &'static str {
        match self {
            DenialReason::NotAdmin => "Admins only",
            DenialReason::TwoFactorRequired => "Admins only with 2FA enabled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Granted,
    Denied(DenialReason),
}

impl Authorization {
    pub fn is_granted(self) -> bool {
        self == Authorization::Granted
    }

    /// Turn a denial into `Forbidden`.
    pub fn require(self) -> Result<()> {
        match self {
            Authorization::Granted => Ok(()),
            Authorization::Denied(reason) => Err(AppError::Forbidden(reason.message().into())),
        }
    }
}

pub fn authorize(user: &User, capability: Capability) -> Authorization {
    if !user.is_admin {
        return Authorization::Denied(DenialReason::NotAdmin);
    }
    if capability.requires_two_factor() && !user.two_factor_enabled {
        return Authorization::Denied(DenialReason::TwoFactorRequired);
    }
    Authorization::Granted
}
