//! conveyord — the Conveyor daemon.
//!
//! The binary in `main.rs` parses the command line and installs tracing;
//! the modes it runs live here so they can be driven from tests.

pub mod swap_route;
