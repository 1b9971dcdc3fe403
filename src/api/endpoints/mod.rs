//! API endpoint handlers, one module per resource.

pub mod analysis;
pub mod analytics;
pub mod auth;
pub mod doctors;
pub mod health;
pub mod patients;
pub mod training;
