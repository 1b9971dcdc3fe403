use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::parse_uuid;
use crate::db::{format_timestamp, is_constraint_violation, parse_timestamp, DatabaseError};
use crate::models::enums::Role;
use crate::models::{NewUser, User};

const USER_COLUMNS: &str =
    "id, name, email, password_hash, role, specialty, department, is_active, created_at";

struct UserRow {
    id: String,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    specialty: Option<String>,
    department: Option<String>,
    is_active: bool,
    created_at: String,
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
        specialty: row.get(5)?,
        department: row.get(6)?,
        is_active: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn user_from_row(row: UserRow) -> Result<User, DatabaseError> {
    Ok(User {
        id: parse_uuid("users.id", &row.id)?,
        name: row.name,
        email: row.email,
        password_hash: row.password_hash,
        role: Role::from_str(&row.role)?,
        specialty: row.specialty,
        department: row.department,
        is_active: row.is_active,
        created_at: parse_timestamp("users.created_at", &row.created_at)?,
    })
}

/// Insert a new account. Email uniqueness is case-insensitive.
pub fn insert_user(
    conn: &Connection,
    new: &NewUser,
    created_at: DateTime<Utc>,
) -> Result<User, DatabaseError> {
    let user = User {
        id: Uuid::new_v4(),
        name: new.name.clone(),
        email: new.email.trim().to_string(),
        password_hash: new.password_hash.clone(),
        role: new.role,
        specialty: new.specialty.clone(),
        department: new.department.clone(),
        is_active: true,
        created_at,
    };

    conn.execute(
        "INSERT INTO users (id, name, email, password_hash, role, specialty, department, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
        params![
            user.id.to_string(),
            user.name,
            user.email,
            user.password_hash,
            user.role.as_str(),
            user.specialty,
            user.department,
            format_timestamp(&user.created_at),
        ],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            DatabaseError::ConstraintViolation(format!("email already registered: {}", user.email))
        } else {
            DatabaseError::Sqlite(e)
        }
    })?;

    Ok(user)
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id.to_string()],
            user_row,
        )
        .optional()?;
    row.map(user_from_row).transpose()
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 COLLATE NOCASE"),
            params![email.trim()],
            user_row,
        )
        .optional()?;
    row.map(user_from_row).transpose()
}

/// Fetch a user only if they hold the doctor role.
pub fn get_doctor(conn: &Connection, id: &Uuid) -> Result<Option<User>, DatabaseError> {
    Ok(get_user(conn, id)?.filter(|u| u.role == Role::Doctor))
}

/// Doctor listing entry with their current patient load.
#[derive(Debug, Clone, Serialize)]
pub struct DoctorSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub specialty: Option<String>,
    pub department: Option<String>,
    pub patient_count: i64,
}

/// Active doctors, alphabetical by name.
pub fn list_doctors(conn: &Connection) -> Result<Vec<DoctorSummary>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.email, u.specialty, u.department, COUNT(p.id)
         FROM users u
         LEFT JOIN patients p ON p.doctor_id = u.id
         WHERE u.role = 'doctor' AND u.is_active = 1
         GROUP BY u.id
         ORDER BY u.name ASC",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, i64>(5)?,
        ))
    })?;

    let mut doctors = Vec::new();
    for row in rows {
        let (id, name, email, specialty, department, patient_count) = row?;
        doctors.push(DoctorSummary {
            id: parse_uuid("users.id", &id)?,
            name,
            email,
            specialty,
            department,
            patient_count,
        });
    }
    Ok(doctors)
}
