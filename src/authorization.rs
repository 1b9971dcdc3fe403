//! Role-based access rules.
//!
//! Every protected route resolves the authenticated caller into a [`Caller`]
//! and asks this module which rows it may see:
//! - admin → the whole platform
//! - doctor → patients assigned to them and the analyses they recorded
//! - patient → records owned by their own account
//!
//! The per-doctor dashboard has its own cascade, checked in order:
//! 1. Patient role → DENY
//! 2. Requested id defaults to the caller's own id
//! 3. Malformed id → INVALID
//! 4. No doctor with that id → NOT FOUND
//! 5. Doctor asking for another doctor → DENY
//! 6. Admin → any doctor

use rusqlite::Connection;
use uuid::Uuid;

use crate::analytics::Scope;
use crate::db::{get_doctor, RecordScope};
use crate::models::enums::Role;
use crate::models::User;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// The authenticated principal behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: Uuid,
    pub role: Role,
}

/// Why a doctor dashboard was released, for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessReason {
    /// Doctor viewing their own dashboard.
    OwnDashboard,
    /// Admin viewing any doctor.
    Administrator,
}

/// Outcome of a successful dashboard check.
#[derive(Debug, Clone)]
pub struct DoctorAccess {
    pub doctor: User,
    pub reason: AccessReason,
}

// ═══════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    #[error("Role '{0}' is not allowed to perform this action")]
    RoleDenied(Role),
    #[error("Invalid doctor id: {0}")]
    InvalidDoctorId(String),
    #[error("Doctor not found")]
    DoctorNotFound,
    #[error("Doctors may only view their own analytics")]
    OtherDoctor,
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

// ═══════════════════════════════════════════════════════════
// Scopes
// ═══════════════════════════════════════════════════════════

/// Rows of `patients` / `retinal_analyses` visible to the caller.
pub fn record_scope(caller: &Caller) -> RecordScope {
    match caller.role {
        Role::Admin => RecordScope::All,
        Role::Doctor => RecordScope::AssignedTo(caller.id),
        Role::Patient => RecordScope::OwnedBy(caller.id),
    }
}

/// Aggregation scope for clinician dashboards. Patients have none.
pub fn analytics_scope(caller: &Caller) -> Option<Scope> {
    match caller.role {
        Role::Admin => Some(Scope::Platform),
        Role::Doctor => Some(Scope::Doctor(caller.id)),
        Role::Patient => None,
    }
}

/// Fail unless the caller's role is one of `allowed`.
pub fn require_role(caller: &Caller, allowed: &[Role]) -> Result<(), AuthorizationError> {
    if allowed.contains(&caller.role) {
        Ok(())
    } else {
        Err(AuthorizationError::RoleDenied(caller.role))
    }
}

// ═══════════════════════════════════════════════════════════
// Doctor dashboard check
// ═══════════════════════════════════════════════════════════

/// Resolve which doctor's dashboard the caller may see.
///
/// `requested` is the raw path segment, `None` when the route was called
/// without one.
pub fn check_doctor_access(
    conn: &Connection,
    caller: &Caller,
    requested: Option<&str>,
) -> Result<DoctorAccess, AuthorizationError> {
    // Rule 1: patients never see clinician dashboards
    require_role(caller, &[Role::Doctor, Role::Admin])?;

    // Rules 2-3: default to self, reject malformed ids
    let doctor_id = match requested {
        None => caller.id,
        Some(raw) => Uuid::parse_str(raw)
            .map_err(|_| AuthorizationError::InvalidDoctorId(raw.to_string()))?,
    };

    // Rule 4: existence before ownership
    let doctor = get_doctor(conn, &doctor_id)?.ok_or(AuthorizationError::DoctorNotFound)?;

    // Rules 5-6
    match caller.role {
        Role::Admin => Ok(DoctorAccess {
            doctor,
            reason: AccessReason::Administrator,
        }),
        Role::Doctor if doctor.id == caller.id => Ok(DoctorAccess {
            doctor,
            reason: AccessReason::OwnDashboard,
        }),
        Role::Doctor => Err(AuthorizationError::OtherDoctor),
        Role::Patient => Err(AuthorizationError::RoleDenied(caller.role)),
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::db::repository::fixtures::seed_user;

    fn caller(user: &User) -> Caller {
        Caller {
            id: user.id,
            role: user.role,
        }
    }

    #[test]
    fn scopes_follow_role() {
        let id = Uuid::new_v4();
        let admin = Caller { id, role: Role::Admin };
        let doctor = Caller { id, role: Role::Doctor };
        let patient = Caller { id, role: Role::Patient };

        assert_eq!(record_scope(&admin), RecordScope::All);
        assert_eq!(record_scope(&doctor), RecordScope::AssignedTo(id));
        assert_eq!(record_scope(&patient), RecordScope::OwnedBy(id));

        assert_eq!(analytics_scope(&admin), Some(Scope::Platform));
        assert_eq!(analytics_scope(&doctor), Some(Scope::Doctor(id)));
        assert_eq!(analytics_scope(&patient), None);
    }

    #[test]
    fn require_role_rejects_others() {
        let patient = Caller { id: Uuid::new_v4(), role: Role::Patient };
        assert!(require_role(&patient, &[Role::Patient]).is_ok());
        assert!(matches!(
            require_role(&patient, &[Role::Admin]),
            Err(AuthorizationError::RoleDenied(Role::Patient))
        ));
    }

    #[test]
    fn doctor_defaults_to_own_dashboard() {
        let conn = open_memory_database().unwrap();
        let doctor = seed_user(&conn, "Dr A", Role::Doctor);

        let access = check_doctor_access(&conn, &caller(&doctor), None).unwrap();
        assert_eq!(access.doctor.id, doctor.id);
        assert_eq!(access.reason, AccessReason::OwnDashboard);

        let explicit = doctor.id.to_string();
        let access = check_doctor_access(&conn, &caller(&doctor), Some(&explicit)).unwrap();
        assert_eq!(access.doctor.id, doctor.id);
    }

    #[test]
    fn doctor_cannot_view_another_doctor() {
        let conn = open_memory_database().unwrap();
        let a = seed_user(&conn, "Dr A", Role::Doctor);
        let b = seed_user(&conn, "Dr B", Role::Doctor);

        let result = check_doctor_access(&conn, &caller(&a), Some(&b.id.to_string()));
        assert!(matches!(result, Err(AuthorizationError::OtherDoctor)));
    }

    #[test]
    fn unknown_doctor_is_not_found_before_ownership() {
        let conn = open_memory_database().unwrap();
        let a = seed_user(&conn, "Dr A", Role::Doctor);
        let missing = Uuid::new_v4().to_string();

        let result = check_doctor_access(&conn, &caller(&a), Some(&missing));
        assert!(matches!(result, Err(AuthorizationError::DoctorNotFound)));
    }

    #[test]
    fn non_doctor_id_is_not_found() {
        let conn = open_memory_database().unwrap();
        let admin = seed_user(&conn, "Root", Role::Admin);
        let patient = seed_user(&conn, "Pat", Role::Patient);

        let result = check_doctor_access(&conn, &caller(&admin), Some(&patient.id.to_string()));
        assert!(matches!(result, Err(AuthorizationError::DoctorNotFound)));
        // An admin's own id is not a doctor either
        let result = check_doctor_access(&conn, &caller(&admin), None);
        assert!(matches!(result, Err(AuthorizationError::DoctorNotFound)));
    }

    #[test]
    fn malformed_id_is_rejected() {
        let conn = open_memory_database().unwrap();
        let a = seed_user(&conn, "Dr A", Role::Doctor);

        let result = check_doctor_access(&conn, &caller(&a), Some("not-a-uuid"));
        assert!(matches!(result, Err(AuthorizationError::InvalidDoctorId(_))));
    }

    #[test]
    fn patient_is_denied_first() {
        let conn = open_memory_database().unwrap();
        let doctor = seed_user(&conn, "Dr A", Role::Doctor);
        let patient = seed_user(&conn, "Pat", Role::Patient);

        // Denied even with a malformed or valid id
        for requested in [None, Some("garbage".to_string()), Some(doctor.id.to_string())] {
            let result = check_doctor_access(&conn, &caller(&patient), requested.as_deref());
            assert!(matches!(result, Err(AuthorizationError::RoleDenied(Role::Patient))));
        }
    }

    #[test]
    fn admin_may_view_any_doctor() {
        let conn = open_memory_database().unwrap();
        let admin = seed_user(&conn, "Root", Role::Admin);
        let doctor = seed_user(&conn, "Dr A", Role::Doctor);

        let access = check_doctor_access(&conn, &caller(&admin), Some(&doctor.id.to_string())).unwrap();
        assert_eq!(access.doctor.id, doctor.id);
        assert_eq!(access.reason, AccessReason::Administrator);
    }
}
