use lab_types::{CpfError, TextError};

#[derive(Debug, thiserror::Error)]
pub enum LabError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("exam {exam_id} has no pricing plan to bill")]
    MissingPrice { exam_id: i64 },
    #[error("invalid stored price {value:?}: {source}")]
    InvalidPrice {
        value: String,
        #[source]
        source: rust_decimal::Error,
    },
    #[error("sequence space exhausted for partition {partition}")]
    SequenceExhausted { partition: String },
    #[error("unknown {kind} value {value:?}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("text error: {0}")]
    Text(#[from] TextError),
    #[error("CPF error: {0}")]
    Cpf(#[from] CpfError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("database migrations timed out")]
    MigrationTimeout,
    #[error("failed to create database directory: {0}")]
    DatabaseDirCreation(std::io::Error),

    #[error("failed to render PDF: {0}")]
    Pdf(String),
}

impl LabError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

pub type LabResult<T> = std::result::Result<T, LabError>;
