//! Tether Core - relay-mediated PAKE handshakes
//!
//! Two parties who share nothing but a low-entropy password (or nothing
//! at all, for SETUP) bootstrap trust over a single untrusted text slot.
//!
//! - `codec`: `(command, tree)` envelopes as one line of text
//! - `shape`: typed decoders for envelope trees
//! - `pake`: the boundary around the key-exchange primitive
//! - `retry`: the polling budget
//! - `workflow`: LOGIN, SETUP and DEV phase machines

pub mod codec;
pub mod config;
pub mod error;
pub mod pake;
pub mod records;
pub mod retry;
pub mod sealed;
pub mod shape;
pub mod workflow;

pub use codec::{decode, encode, Envelope, Node, Tree};
pub use config::{Config, ConfigError};
pub use error::{HandshakeError, RejectCode, Result};
pub use pake::{PakeClient, PakeServer, SimulatedPake, PAKE_ITERATIONS};
pub use records::{InstallationRecord, Trio};
pub use retry::RetryPolicy;
pub use sealed::SealedSlots;
pub use workflow::{Orchestrator, PhaseOutput, PhaseRequest, Services, Settings, WorkflowPhase};
