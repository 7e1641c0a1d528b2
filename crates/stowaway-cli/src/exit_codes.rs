//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.
//! Per-chart and per-image failures of a mirror run never change the exit
//! code; they are listed in the run summary.

#![allow(dead_code)]

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Configuration error - settings file missing, unreadable or invalid
pub const CONFIG_ERROR: i32 = 2;

/// Input document error - manifests directory missing, values file invalid
pub const DOCUMENT_ERROR: i32 = 3;

/// Tool error - helm, docker, aws or trivy could not do what was asked
pub const TOOL_ERROR: i32 = 4;

/// IO error - file not found, permission denied, report not writable
pub const IO_ERROR: i32 = 5;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
