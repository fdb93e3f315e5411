use crate::dto::HealthRes;

/// Health check shared by every HTTP entry point.
#[derive(Clone, Debug, Default)]
pub struct HealthService;

impl HealthService {
    pub fn new() -> Self {
        Self
    }

    /// Report the service as alive.
    ///
    /// Storage is not checked here; a locked or missing database surfaces on the first real request.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "HMS is alive".into(),
        }
    }
}
