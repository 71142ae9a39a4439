//! Dev-server supervisor
//!
//! - `machine`: pure state machine (messages in, actions out)
//! - `driver`: async task executing actions against the sandbox
//! - `report`: failure reports carried in snapshots and events

pub mod driver;
pub mod machine;
pub mod report;

pub use driver::{Supervisor, SupervisorEvent};
pub use machine::{
    DevServerMachine, Generation, PreviewUrls, ReadySlot, SupervisorAction, SupervisorMessage,
    SupervisorSnapshot,
};
pub use report::{FailureKind, FailureReport};
