//! Constants used throughout the lab core crate.

/// Database URL used when `DATABASE_URL` is not configured.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://lab.db";

/// Default size of the SQLite connection pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Upper bound accepted for `LAB_DB_MAX_CONNECTIONS`.
pub const MAX_MAX_CONNECTIONS: u32 = 64;

/// Letterhead used on generated documents when no clinic name is configured.
pub const DEFAULT_CLINIC_NAME: &str = "Laboratório de Análises Clínicas";

/// Number of digits in the daily arrival-queue counter (`DDMMYYYY` + counter).
pub const QUEUE_COUNTER_DIGITS: usize = 4;

/// Number of digits in the monthly exam-code counter (`MMYYYY` + counter).
pub const EXAM_CODE_COUNTER_DIGITS: usize = 6;

/// Counter scope for arrival-queue sequences.
pub const QUEUE_COUNTER_SCOPE: &str = "queue";

/// Counter scope for exam codes.
pub const EXAM_COUNTER_SCOPE: &str = "exam";

/// Search replies used by the live-search endpoints when nothing matches.
pub const NO_PATIENT_FOUND: &str = "Nenhum paciente encontrado";
pub const NO_EXAM_FOUND: &str = "Nenhum exame encontrado";
pub const NO_ORDER_FOUND: &str = "Nenhum atendimento encontrado";
