//! Request middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Rate limiter: reject early, save resources
//! 2. Auth validator: bearer JWT, injects `AuthUser`
//! 3. Audit logger: logs after auth, has the user id
//! 4. Role gate: per route group (`require_admin`, `require_clinician`)

pub mod audit;
pub mod auth;
pub mod rate;
pub mod roles;
