//! Core bot wiring.

pub mod dispatcher;

pub use dispatcher::{AppState, build_dispatcher};
