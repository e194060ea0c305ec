use keydrop_domain::services::TelemetryGuard;
use keydrop_storage::SeaOrmStorage;

/// Shared state behind the health and metrics endpoints.
#[derive(Clone)]
pub struct AppState {
    storage: SeaOrmStorage,
    telemetry: TelemetryGuard,
}

impl AppState {
    pub fn new(storage: SeaOrmStorage, telemetry: TelemetryGuard) -> Self {
        Self { storage, telemetry }
    }

    pub fn storage(&self) -> &SeaOrmStorage {
        &self.storage
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }
}
