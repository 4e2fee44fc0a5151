//! A pluggable clock.
//!
//! Tests substitute a fixed or steppable clock so that expiry sweeps, secret
//! rotation, and session lifetimes are deterministic.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// The number of milliseconds since the Unix epoch.
pub type EpochMillis = u64;

/// A function that returns the current time.
///
/// Cloning a `NowFn` is cheap: it is a reference-counted pointer to the
/// underlying closure.
#[derive(Clone)]
pub struct NowFn(Arc<dyn Fn() -> EpochMillis + Send + Sync>);

impl NowFn {
    /// Constructs a `NowFn` from a closure.
    pub fn new<F>(f: F) -> NowFn
    where
        F: Fn() -> EpochMillis + Send + Sync + 'static,
    {
        NowFn(Arc::new(f))
    }

    /// Returns the current time, in milliseconds since the Unix epoch.
    pub fn now(&self) -> EpochMillis {
        (self.0)()
    }

    /// Returns the current time as a [`DateTime<Utc>`].
    pub fn now_datetime(&self) -> DateTime<Utc> {
        epoch_to_datetime(self.now())
    }
}

impl std::fmt::Debug for NowFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NowFn")
    }
}

/// The real system clock.
pub fn system_time() -> NowFn {
    NowFn::new(|| {
        Utc::now()
            .timestamp_millis()
            .try_into()
            .expect("system time is after the epoch")
    })
}

/// Converts milliseconds since the epoch to a [`DateTime<Utc>`].
pub fn epoch_to_datetime(millis: EpochMillis) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis.try_into().expect("millis fits in i64"))
        .expect("valid timestamp")
}
