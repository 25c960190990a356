// ============================================================================
// src/cmd/mod.rs – command subsystem root
// ============================================================================
pub mod doctor; // permission-log-sink doctor
pub mod serve; // permission-log-sink serve
pub mod submit; // permission-log-sink log
pub mod verify; // permission-log-sink verify
