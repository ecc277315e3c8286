//! # Pulsepoint
//!
//! Client-side reactive runtime for server-rendered pages.
//!
//! This crate re-exports [`pulsepoint_reactive`]; see that crate for the
//! module overview.
//!
//! ## Feature Flags
//!
//! - `debug-hooks` - per-effect and per-subscription debug logging (debug builds only)
//! - `tracing-json` - JSON log output through `tracing-subscriber`

pub use pulsepoint_reactive::*;
