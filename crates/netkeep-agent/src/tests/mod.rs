//! Test suites for the agent.

pub(crate) mod support;
