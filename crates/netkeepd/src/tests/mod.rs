//! Test suites for the netkeep server.

pub(crate) mod support;
