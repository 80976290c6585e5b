//! Behavioral tests for the relay.
//!
//! - `harness.rs`   - Scripted transport, in-memory broker, recording client
//! - `delivery.rs`  - Retry state machine timing and outcomes
//! - `connector.rs` - Broker connection retry
//! - `relay.rs`     - Acknowledgment, shutdown, and close ordering
//! - `wire.rs`      - REST client against a local HTTP server
