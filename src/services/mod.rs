/// OpenAPI documentation generation.
pub mod documentation;
/// Game mutations under the per-game lock.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Long-poll on game versions.
pub mod polling_service;
/// Storage connection supervision and degraded mode.
pub mod storage_supervisor;
