//! Test suites for the Arbor service process.

mod dispatch_behaviour;
mod support;
