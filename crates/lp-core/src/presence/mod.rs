//! Presence decision model: published state, fingerprints, activity payloads
//! and the synchronization state machine.

pub mod activity;
pub mod fingerprint;
pub mod state;
pub mod sync_machine;

pub use activity::{ActivityOptions, ActivityPayload, ActivityTimestamps};
pub use fingerprint::Fingerprint;
pub use state::{ConnectionStatus, PresenceState, PublishMode};
pub use sync_machine::{PublishPlan, SyncDecision, SyncMachine, SyncOptions};
