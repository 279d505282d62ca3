/*!
 * Core backup engine: worker pools, control plane and the orchestrator
 */

pub mod checksum;
pub mod control;
pub mod copy;
pub mod delete;
pub mod engine;
pub mod events;
pub mod manifest;
pub mod paths;
pub mod tree;
pub mod treefile;
pub mod workload;

pub use control::{ControlBus, ControlState};
pub use engine::Backupper;
pub use events::{EngineEvent, EventPublisher, EventSubscriber, ExitCode};
pub use manifest::{DigestMap, DigestRecord};
pub use tree::{EntryKind, Tree};
