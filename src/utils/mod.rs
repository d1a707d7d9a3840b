//! # Utility Modules
//!
//! Supporting utilities for string encoding, logging, and metrics.
//!
//! ## Components
//! - **Mutf8**: modified UTF-8 used for every string and name on the wire
//! - **Logging**: structured logging configuration
//! - **Metrics**: thread-safe observability counters

pub mod logging;
pub mod metrics;
pub mod mutf8;
