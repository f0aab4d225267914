//! Routing of realtime events that assume the sender is in a room
//!
//! This module provides:
//! - The event dispatcher (validation and routing as data)
//! - Collaborator seams for message persistence and activity bookkeeping
//! - The per-connection deferred lane that runs collaborator calls off the
//!   socket's receive loop

mod collaborators;
mod dispatcher;
mod lane;

pub use collaborators::{
    ActivityTracker, ChatDraft, ChatRecord, CollaboratorError, InMemoryActivityTracker,
    InMemoryMessageStore, MessageStore,
};
pub use dispatcher::{Dispatch, EventDispatcher};
pub use lane::{Collaborators, DeferredJob, DeferredLane, SubmitError};
