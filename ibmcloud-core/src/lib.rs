//! IBM Cloud reconciler core
//!
//! Bridges synchronous CRUD calls against a cloud API with an asynchronous
//! provisioning backend: issue the call, then poll until the object settles.

pub mod client;
pub mod differ;
pub mod error;
pub mod poller;
pub mod reconciler;
pub mod resource;

pub use client::{
    BoxFuture, DataSource, RemoteClient, ResourceKind, StatusVocabulary, Timeouts, UpdateMode,
};
pub use error::{ClientError, ClientResult, ReconcileError, ReconcileResult};
pub use poller::{OperationContext, PollConfig, PollResult, StatePoller, StatusSets};
pub use reconciler::{ReadOutcome, Reconciler};
pub use resource::{Attributes, LifecycleStatus, Observation, ResourceRecord, Value};
