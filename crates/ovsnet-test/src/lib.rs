//! Test infrastructure for ovsnet.
//!
//! - [`FakeBridge`]: in-memory bridge with ports, tags and flows
//! - [`RecordingController`]: controller client that records calls
//! - [`RedisTestEnv`]: containerized Redis for store integration tests
//! - [`StoreVerifier`]: assertion helpers over store state
//! - [`fixtures`]: identifiers and record builders

pub mod fake_bridge;
pub mod fixtures;
mod recording_controller;
mod redis_env;
mod verification;

pub use fake_bridge::{FakeBridge, FakePort, Flow};
pub use recording_controller::{ControllerCall, ControllerResponse, RecordingController};
pub use redis_env::RedisTestEnv;
pub use verification::{StoreVerifier, VerificationError, VerifyResult};
