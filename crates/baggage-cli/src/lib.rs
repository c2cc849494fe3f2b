//! Baggage CLI library: command implementations shared by the `baggage`
//! binary and the integration tests.

pub mod commands;
