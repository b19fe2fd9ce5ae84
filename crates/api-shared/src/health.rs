use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Liveness payload returned by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Health check shared by every lab API surface.
#[derive(Clone, Debug, Default)]
pub struct HealthService;

impl HealthService {
    pub fn new() -> Self {
        Self
    }

    /// Reports the service as alive. No dependencies are probed.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "Lab is alive".into(),
        }
    }
}
