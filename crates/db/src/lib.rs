//! Postgres driver for the fan-out pipeline.
//!
//! - [`PgConnector`] implements [`fanout_core::connector::InstanceConnector`]
//!   over a dedicated sqlx `PgConnection` per instance.
//! - [`bind::bind_request`] turns a statement request into a parameterized
//!   sqlx query.

pub mod bind;
pub mod connector;

pub use connector::{PgConnector, PgConnectorConfig};
