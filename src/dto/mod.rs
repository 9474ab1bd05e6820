//! Request and response payloads of the HTTP API.

/// Game requests and views.
pub mod game;
/// Health check payloads.
pub mod health;
/// Long-poll query and answer.
pub mod poll;
/// Shared validation rules.
pub mod validation;
