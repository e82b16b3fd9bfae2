//! Exit codes for the CLI

#![allow(dead_code)]

/// Success
pub const SUCCESS: i32 = 0;

/// General error, or a build that recorded errors
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// External tool failed
pub const TOOL_ERROR: i32 = 3;

/// Expected output missing
pub const RESOURCE_ERROR: i32 = 4;

/// Cache error
pub const CACHE_ERROR: i32 = 5;

/// Internal error
pub const INTERNAL_ERROR: i32 = 70;

/// User cancelled
pub const CANCELLED: i32 = 130;
