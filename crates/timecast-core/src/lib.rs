//! Core types: timezone-aware fire times, tracing setup

pub mod time;
pub mod tracing;

pub use time::{
    FireAt, TimeError, from_unix_seconds, now_in, parse_datetime, parse_timezone, time_until,
    to_unix_seconds,
};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
