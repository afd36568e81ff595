use chrono::{DateTime, Utc};

/// A source of time for condition transition timestamps. The controller takes a `Clock` as an
/// injected dependency so that tests can drive condition transitions deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock used by the running controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
