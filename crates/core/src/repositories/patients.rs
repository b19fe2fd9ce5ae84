//! Patient registration and lookup.
//!
//! Patients, staff and technicians share one table, distinguished by role
//! flags. Addresses are optional side data: a missing address is reported as
//! `None`, never as an error.

use crate::db::Database;
use crate::error::{LabError, LabResult};
use crate::models::{convert_rows, Address, NewAddress, NewPatient, Patient, PatientMatch, PatientRow};
use crate::validation::search_pattern;

const PATIENT_COLUMNS: &str = "id, name, cpf, rg, sex, phone, birth_date, is_staff, is_admin, \
     is_doctor, is_patient, active, created_at, updated_at";

/// Service for patient records.
#[derive(Clone, Debug)]
pub struct PatientService {
    db: Database,
}

impl PatientService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers a new patient and returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns `LabError::InvalidInput` when the CPF is already registered.
    pub async fn create_patient(&self, new: NewPatient) -> LabResult<Patient> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM patients WHERE cpf = ?1")
            .bind(new.cpf.as_str())
            .fetch_optional(self.db.pool())
            .await?;
        if existing.is_some() {
            return Err(LabError::InvalidInput(format!(
                "CPF {} is already registered",
                new.cpf.formatted()
            )));
        }

        let id = sqlx::query(
            "INSERT INTO patients
                (name, cpf, rg, sex, phone, birth_date, is_staff, is_admin, is_doctor, is_patient)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(new.name.as_str())
        .bind(new.cpf.as_str())
        .bind(&new.rg)
        .bind(new.sex.as_str())
        .bind(&new.phone)
        .bind(&new.birth_date)
        .bind(new.is_staff)
        .bind(new.is_admin)
        .bind(new.is_doctor)
        .bind(new.is_patient)
        .execute(self.db.pool())
        .await?
        .last_insert_rowid();

        tracing::info!(patient_id = id, "patient registered");
        self.get_patient(id).await
    }

    pub async fn get_patient(&self, id: i64) -> LabResult<Patient> {
        let row: Option<PatientRow> =
            sqlx::query_as(&format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1"))
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;

        row.ok_or_else(|| LabError::not_found("patient", id))?
            .try_into()
    }

    /// Replaces the editable fields of a patient.
    pub async fn update_patient(&self, id: i64, update: NewPatient) -> LabResult<Patient> {
        let clash: Option<i64> =
            sqlx::query_scalar("SELECT id FROM patients WHERE cpf = ?1 AND id <> ?2")
                .bind(update.cpf.as_str())
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;
        if clash.is_some() {
            return Err(LabError::InvalidInput(format!(
                "CPF {} belongs to another patient",
                update.cpf.formatted()
            )));
        }

        let affected = sqlx::query(
            "UPDATE patients
             SET name = ?1, cpf = ?2, rg = ?3, sex = ?4, phone = ?5, birth_date = ?6,
                 is_staff = ?7, is_admin = ?8, is_doctor = ?9, is_patient = ?10,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?11",
        )
        .bind(update.name.as_str())
        .bind(update.cpf.as_str())
        .bind(&update.rg)
        .bind(update.sex.as_str())
        .bind(&update.phone)
        .bind(&update.birth_date)
        .bind(update.is_staff)
        .bind(update.is_admin)
        .bind(update.is_doctor)
        .bind(update.is_patient)
        .bind(id)
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(LabError::not_found("patient", id));
        }
        self.get_patient(id).await
    }

    /// Lists active people who are not staff, ordered by name.
    pub async fn list_patients(&self) -> LabResult<Vec<Patient>> {
        self.list_active(false).await
    }

    /// Lists active staff members (technicians, doctors, admins) by name.
    pub async fn list_staff(&self) -> LabResult<Vec<Patient>> {
        self.list_active(true).await
    }

    async fn list_active(&self, staff: bool) -> LabResult<Vec<Patient>> {
        let rows: Vec<PatientRow> = sqlx::query_as(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patients WHERE active = 1 AND is_staff = ?1 ORDER BY name"
        ))
        .bind(staff)
        .fetch_all(self.db.pool())
        .await?;
        convert_rows(rows)
    }

    /// Case-insensitive substring search on the patient name.
    ///
    /// An empty fragment matches nothing.
    pub async fn search_by_name(&self, fragment: &str) -> LabResult<Vec<PatientMatch>> {
        let Some(pattern) = search_pattern(fragment) else {
            return Ok(Vec::new());
        };

        let matches = sqlx::query_as(
            "SELECT id, name, cpf FROM patients
             WHERE name LIKE ?1 ESCAPE '\\'
             ORDER BY name",
        )
        .bind(pattern)
        .fetch_all(self.db.pool())
        .await?;
        Ok(matches)
    }

    pub async fn add_address(&self, patient_id: i64, new: NewAddress) -> LabResult<Address> {
        self.get_patient(patient_id).await?;

        let id = sqlx::query(
            "INSERT INTO addresses
                (patient_id, street, number, complement, district, postal_code, city, state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(patient_id)
        .bind(new.street.as_str())
        .bind(&new.number)
        .bind(&new.complement)
        .bind(new.district.as_str())
        .bind(&new.postal_code)
        .bind(&new.city)
        .bind(&new.state)
        .execute(self.db.pool())
        .await?
        .last_insert_rowid();

        let address = sqlx::query_as("SELECT * FROM addresses WHERE id = ?1")
            .bind(id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(address)
    }

    /// First registered address of a patient, if any.
    pub async fn primary_address(&self, patient_id: i64) -> LabResult<Option<Address>> {
        let address = sqlx::query_as(
            "SELECT * FROM addresses WHERE patient_id = ?1 ORDER BY id LIMIT 1",
        )
        .bind(patient_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(address)
    }
}
