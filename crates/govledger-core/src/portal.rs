//! Seeded human-arbitration portals.

use crate::error::LedgerError;

pub const HUMAN_AUTHORITY_EXCEPTION_PROCESS: &str = "HumanAuthorityExceptionProcess";
pub const GOVERNANCE_CHANGE_PORTAL: &str = "GovernanceChangePortal";
pub const RELEASE_APPROVAL_PORTAL: &str = "ReleaseApprovalPortal";

pub const SEEDED_PORTALS: [&str; 3] = [
    HUMAN_AUTHORITY_EXCEPTION_PROCESS,
    GOVERNANCE_CHANGE_PORTAL,
    RELEASE_APPROVAL_PORTAL,
];

pub fn is_seeded_portal(portal_id: &str) -> bool {
    SEEDED_PORTALS.contains(&portal_id)
}

pub fn validate_portal(portal_id: &str) -> Result<(), LedgerError> {
    if is_seeded_portal(portal_id) {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "unknown portal '{}'; expected one of: {}",
            portal_id,
            SEEDED_PORTALS.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_portals_are_accepted() {
        for portal in SEEDED_PORTALS {
            assert!(validate_portal(portal).is_ok());
        }
    }

    #[test]
    fn near_misses_are_rejected() {
        assert!(!is_seeded_portal("ReleasePortal"));
        assert!(!is_seeded_portal("releaseapprovalportal"));
        assert!(validate_portal("").is_err());
    }
}
