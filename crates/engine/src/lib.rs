//! # Casebook Engine
//!
//! Runtime core of the casebook capture system: the form state store and its
//! pure reducer, the lifecycle state machine, session orchestration with
//! autosave, the reference/cardinality resolver and the persistence
//! collaborator contract.
//!
//! The engine is event-driven and single-owner: one [`session::FormSession`]
//! owns one form instance's state, all state transitions are synchronous,
//! and all I/O goes through the async [`store::FormStore`] trait. Rendering
//! layers read [`state::FormState`] and the symbolic
//! [`machine::LifecycleState`]; they never mutate state directly.

pub mod machine;
pub mod memory;
pub mod references;
pub mod session;
pub mod state;
pub mod store;

pub use machine::{
    Clock, FailureNotice, LifecycleEvent, LifecycleMachine, LifecycleState, SystemClock,
    AUTOSAVE_IDLE_SECONDS,
};
pub use memory::MemoryStore;
pub use references::{CardinalityRejection, ReferenceBundle};
pub use session::{FormSession, SessionConfig, SubmitOutcome};
pub use state::{FormState, Transition, ValidationError, ValidationKind};
pub use store::{
    Draft, FormStore, RecordIdentity, StoreError, Submission, SubmissionField, Template,
};

/// Errors returned by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Fatal metadata load failure; the lifecycle machine is in `error`.
    #[error("form metadata load failed: {0}")]
    Load(#[source] store::StoreError),

    /// An event was dispatched in a state that does not accept it.
    #[error(transparent)]
    InvalidTransition(#[from] machine::TransitionRejected),

    #[error("schema error: {0}")]
    Schema(#[from] casebook_schema::SchemaError),

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("failed to encode form values: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A session operation ran before `initialize` completed.
    #[error("form session is not initialized")]
    NotInitialized,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
