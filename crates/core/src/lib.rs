//! Domain types for running one write statement across many database
//! instances: identifiers, parameters, the instance registry, per-instance
//! outcomes, and the connector trait drivers implement.

pub mod connector;
pub mod error;
pub mod outcome;
pub mod registry;
pub mod types;
