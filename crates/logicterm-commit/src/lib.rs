//! # Logicterm Commit
//!
//! Commit and write coordination for versioned terminology components.
//!
//! A [`CommitEngine`] tracks which concepts and sememes hold uncommitted
//! versions, writes them through injected persistence services behind a
//! bounded [`WritePermitPool`], runs [`ChangeChecker`]s before commits and
//! fans [`CommitRecord`]s out to [`ChangeListener`]s.
//!
//! ```text
//!  add_uncommitted ──► permit ──► write task ──► checks ──► listeners
//!                                     │
//!  commit ──► drain permits ──► checks ──► stamp + write ──► CommitRecord
//! ```
//!
//! Engine state (sequences, stamps, uncommitted sets, stamp aliases and
//! comments) is loaded from and saved to three flat files in the configured
//! data directory; see [`persistence`].

pub mod checkers;
pub mod config;
pub mod engine;
pub mod error;
pub mod listeners;
pub mod logic_graph;
pub mod model;
pub mod permits;
pub mod persistence;
pub mod record;
pub mod services;
pub mod stamp;
pub mod stamp_maps;
pub mod tracking;


pub use checkers::{Alert, AlertType, ChangeChecker, CheckPhase, LogicGraphChecker};
pub use config::CommitConfig;
pub use engine::{CommitEngine, WriteTicket};
pub use error::{CommitError, Result};
pub use listeners::{ChangeListener, ListenerRegistry};
pub use logic_graph::{prepare_logic_graph_version, LogicGraphUpdate};
pub use model::{
    Chronology, Component, ComponentKind, ConceptChronology, ConceptVersion, EditCoordinate,
    SememeChronology, SememePayload, SememeVersion, Stamp, Status,
};
pub use permits::{WriteCompletionService, WritePermitPool};
pub use persistence::CommitState;
pub use record::CommitRecord;
pub use services::{
    Collaborators, ConceptService, IdentifierService, MemoryConceptService,
    MemoryIdentifierService, MemorySememeService, SememeService,
};
pub use stamp::StampSequencer;
pub use stamp_maps::{StampAliasMap, StampCommentMap};
pub use tracking::{UncommittedSet, UncommittedSnapshot, UncommittedTracker};
