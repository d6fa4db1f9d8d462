//! Client side of the OpenFlow controller REST API.
//!
//! - [`ControllerClient`]: notification calls made by the agent and plugin
//! - [`RestController`]: HTTP implementation
//! - [`NoopController`]: accepts everything, for controller-less setups
//! - [`tolerate`] / [`ignore_not_found`]: idempotent-call helpers

pub mod client;
pub mod error;
pub mod rest;

pub use client::{best_effort, ignore_not_found, tolerate, ControllerClient, NoopController};
pub use error::{ControllerError, ControllerResult};
pub use rest::RestController;
