pub(crate) const RELEASE: i32 = 0;
pub(crate) const PRESS: i32 = 1;
pub(crate) const EV_KEY: i32 = 1;

/// Default tapping term in milliseconds
pub(crate) const TAPPING_TERM: u16 = 200;
/// Default idle poll in milliseconds, drives pending tap dance resolution
pub(crate) const TICK: u16 = 20;
