//! Controller/agent coordination for a distributed load-test fleet.
//!
//! A controller dispatches tests to agent groups over a message queue, steers
//! running tests through control messages kept in object storage, and reads
//! per-test status records the agents write back. Agents hold a keepalive on
//! their group's scale queue while busy and sync plan and result files
//! through object storage.
//!
//! [`context::FleetContext`] wires the pieces together for one process; the
//! queue and storage backends sit behind the [`queue::QueueApi`] and
//! [`storage::ObjectStoreApi`] traits, with in-memory versions for local runs
//! and tests.
pub mod access;
pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod logger;
pub mod message;
pub mod plan;
pub mod poll;
pub mod queue;
pub mod retry;
pub mod scale;
pub mod storage;
pub mod sync;
pub mod test_id;

#[cfg(feature = "aws")]
mod aws;

#[cfg(test)]
mod test_support;
