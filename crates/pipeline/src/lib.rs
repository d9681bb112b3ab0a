//! Fan-out execution pipeline.
//!
//! - [`connection::with_connection`]: acquire, use, and release one
//!   connection.
//! - [`executor::execute_statement`]: run and time the statement.
//! - [`FanOutCoordinator`]: drive every requested instance and collect
//!   ordered outcomes into a [`fanout_core::outcome::RunReport`].

pub mod connection;
pub mod coordinator;
pub mod executor;

pub use coordinator::FanOutCoordinator;
