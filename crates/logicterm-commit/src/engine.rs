//! The commit engine.
//!
//! Components move from not tracked, to uncommitted (with or without checks),
//! to committed. Uncommitted writes run asynchronously behind the write-permit
//! pool; a global commit drains that pool first, so it never observes a
//! half-written component.

use crate::checkers::{Alert, AlertType, ChangeChecker, CheckPhase};
use crate::config::CommitConfig;
use crate::error::{CommitError, Result};
use crate::listeners::{ChangeListener, ListenerRegistry};
use crate::model::{Component, ComponentKind, EditCoordinate, Stamp};
use crate::permits::{WriteCompletionService, WritePermitPool};
use crate::persistence::{self, CommitState};
use crate::record::CommitRecord;
use crate::services::Collaborators;
use crate::stamp::StampSequencer;
use crate::stamp_maps::{StampAliasMap, StampCommentMap};
use crate::tracking::{UncommittedSet, UncommittedSnapshot, UncommittedTracker};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use logicterm_logic::Nid;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const NO_COMMIT_YET: i64 = -1;

/// `Alert::checker` for alerts raised by the engine itself.
const WRITE_ALERT_SOURCE: &str = "write";
const COMMIT_ALERT_SOURCE: &str = "commit";

/// Handle to a scheduled uncommitted write.
#[derive(Debug)]
pub struct WriteTicket {
    nid: Nid,
    handle: JoinHandle<Result<Vec<Alert>>>,
}

impl WriteTicket {
    pub fn nid(&self) -> Nid {
        self.nid
    }

    /// Wait for the write (and its checks) to finish. Yields the alerts the
    /// checks raised.
    pub async fn wait(self) -> Result<Vec<Alert>> {
        self.handle.await?
    }
}

struct EngineInner {
    config: CommitConfig,
    collaborators: Collaborators,
    checkers: DashMap<Uuid, Arc<dyn ChangeChecker>>,
    listeners: ListenerRegistry,
    tracker: UncommittedTracker,
    permits: WritePermitPool,
    concept_writer: WriteCompletionService,
    sememe_writer: WriteCompletionService,
    alerts: Mutex<Vec<Alert>>,
    stamps: StampSequencer,
    aliases: StampAliasMap,
    comments: StampCommentMap,
    database_sequence: AtomicU64,
    last_commit_time: AtomicI64,
    commit_lock: tokio::sync::Mutex<()>,
}

impl EngineInner {
    fn sequence_of(&self, kind: ComponentKind, nid: Nid) -> u32 {
        match kind {
            ComponentKind::Concept => self.collaborators.identifiers.concept_sequence(nid),
            ComponentKind::Sememe => self.collaborators.identifiers.sememe_sequence(nid),
        }
    }

    fn nid_of(&self, kind: ComponentKind, sequence: u32) -> Option<Nid> {
        match kind {
            ComponentKind::Concept => self.collaborators.identifiers.concept_nid(sequence),
            ComponentKind::Sememe => self.collaborators.identifiers.sememe_nid(sequence),
        }
    }

    fn load_component(&self, kind: ComponentKind, sequence: u32) -> Option<Component> {
        let nid = self.nid_of(kind, sequence)?;
        match kind {
            ComponentKind::Concept => self.collaborators.concepts.concept(nid).map(Component::Concept),
            ComponentKind::Sememe => self.collaborators.sememes.sememe(nid).map(Component::Sememe),
        }
    }

    fn run_checkers(&self, component: &Component, phase: CheckPhase) -> Vec<Alert> {
        let checkers: Vec<_> = self.checkers.iter().map(|c| Arc::clone(c.value())).collect();
        let mut alerts = Vec::new();
        for checker in checkers {
            checker.check(component, &mut alerts, phase);
        }
        alerts
    }

    async fn persist(&self, component: Component) -> Result<()> {
        let nid = component.nid();
        let outcome = match component {
            Component::Concept(concept) => {
                let service = Arc::clone(&self.collaborators.concepts);
                self.concept_writer
                    .run(move || service.write_concept(&concept))
                    .await?
            }
            Component::Sememe(sememe) => {
                let service = Arc::clone(&self.collaborators.sememes);
                self.sememe_writer
                    .run(move || service.write_sememe(&sememe))
                    .await?
            }
        };
        outcome.map_err(|source| CommitError::Persistence { nid, source })
    }

    /// A commit time strictly after the previous one.
    fn next_commit_time(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut previous = self.last_commit_time.load(Ordering::SeqCst);
        loop {
            let next = now.max(previous.saturating_add(1));
            match self.last_commit_time.compare_exchange(
                previous,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }

    fn record_stamps(&self, record: &mut CommitRecord, stamps: &BTreeSet<Stamp>) {
        for stamp in stamps {
            let sequence = self.stamps.sequence_for(*stamp);
            record.stamps_in_commit.insert(sequence);
            if let Some(comment) = &record.comment {
                self.comments.set_comment(sequence, Some(comment.clone()));
            }
            for alias in self.aliases.aliases(sequence) {
                record.stamp_aliases.push((sequence, alias));
            }
        }
    }
}

/// Tracks uncommitted components and coordinates their writes and commits.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CommitEngine {
    inner: Arc<EngineInner>,
}

impl CommitEngine {
    /// A fresh engine with empty state.
    pub fn new(config: CommitConfig, collaborators: Collaborators) -> Self {
        Self::from_state(config, collaborators, CommitState::default(), Vec::new(), Vec::new())
    }

    /// An engine resuming from the state files in `config.data_dir`.
    /// Missing files mean empty state.
    pub fn load(config: CommitConfig, collaborators: Collaborators) -> Result<Self> {
        let dir = config.data_dir.clone();
        let state = persistence::read_commit_state(&dir)?.unwrap_or_default();
        let aliases = persistence::read_alias_map(&dir)?;
        let comments = persistence::read_comment_map(&dir)?;
        info!(
            data_dir = %dir.display(),
            database_sequence = state.database_sequence,
            uncommitted = state.uncommitted.len(),
            "loaded commit state"
        );
        Ok(Self::from_state(config, collaborators, state, aliases, comments))
    }

    fn from_state(
        config: CommitConfig,
        collaborators: Collaborators,
        state: CommitState,
        aliases: Vec<(u32, u32)>,
        comments: Vec<(u32, String)>,
    ) -> Self {
        let inner = EngineInner {
            permits: WritePermitPool::new(config.write_permits),
            concept_writer: WriteCompletionService::new("concept-writer", config.writer_threads),
            sememe_writer: WriteCompletionService::new("sememe-writer", config.writer_threads),
            config,
            collaborators,
            checkers: DashMap::new(),
            listeners: ListenerRegistry::new(),
            tracker: UncommittedTracker::from_snapshot(state.uncommitted),
            alerts: Mutex::new(Vec::new()),
            stamps: StampSequencer::from_stamps(state.stamps),
            aliases: StampAliasMap::from_entries(aliases),
            comments: StampCommentMap::from_entries(comments),
            database_sequence: AtomicU64::new(state.database_sequence),
            last_commit_time: AtomicI64::new(state.last_commit_time.unwrap_or(NO_COMMIT_YET)),
            commit_lock: tokio::sync::Mutex::new(()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    // ========================================================================
    // Registries
    // ========================================================================

    /// Returns the handle for [`Self::remove_checker`].
    pub fn add_checker(&self, checker: Arc<dyn ChangeChecker>) -> Uuid {
        let handle = Uuid::new_v4();
        self.inner.checkers.insert(handle, checker);
        handle
    }

    pub fn remove_checker(&self, handle: Uuid) -> bool {
        self.inner.checkers.remove(&handle).is_some()
    }

    pub fn add_change_listener(&self, listener: Arc<dyn ChangeListener>) {
        self.inner.listeners.add(listener);
    }

    pub fn remove_change_listener(&self, listener_uuid: Uuid) -> bool {
        self.inner.listeners.remove(listener_uuid)
    }

    // ========================================================================
    // Uncommitted writes
    // ========================================================================

    /// Track `component` for checked commit and schedule its write.
    pub async fn add_uncommitted(&self, component: impl Into<Component>) -> Result<WriteTicket> {
        self.schedule(component.into(), true).await
    }

    /// Track `component` without checks and schedule its write.
    pub async fn add_uncommitted_no_checks(
        &self,
        component: impl Into<Component>,
    ) -> Result<WriteTicket> {
        self.schedule(component.into(), false).await
    }

    async fn schedule(&self, component: Component, checks: bool) -> Result<WriteTicket> {
        let permit = self.inner.permits.acquire().await?;

        let kind = component.kind();
        let nid = component.nid();
        let sequence = self.inner.sequence_of(kind, nid);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            // Tracking changes only once the write has landed, so a batch
            // commit never loads a component that was not stored.
            if let Err(err) = inner.persist(component.clone()).await {
                warn!(nid, error = %err, "uncommitted write failed");
                inner.alerts.lock().push(Alert {
                    alert_type: AlertType::Error,
                    component_nid: nid,
                    checker: WRITE_ALERT_SOURCE.to_string(),
                    description: format!("write failed, component not tracked: {err}"),
                });
                return Err(err);
            }
            if component.has_uncommitted() {
                inner.tracker.track(UncommittedSet::of(kind, checks), sequence);
            } else {
                inner.tracker.untrack(kind, sequence);
            }
            let alerts = if checks {
                inner.run_checkers(&component, CheckPhase::AddUncommitted)
            } else {
                Vec::new()
            };
            if !alerts.is_empty() {
                inner.alerts.lock().extend(alerts.iter().cloned());
            }
            inner.listeners.notify_change(&component);
            Ok::<_, CommitError>(alerts)
        });
        Ok(WriteTicket { nid, handle })
    }

    /// Drop the uncommitted versions `coordinate`'s author made.
    ///
    /// A component that was tracked is re-added through the checked path so
    /// its tracking reflects what is left; `None` when it was not tracked.
    pub async fn cancel(
        &self,
        component: impl Into<Component>,
        coordinate: EditCoordinate,
    ) -> Result<Option<WriteTicket>> {
        let mut component = component.into();
        let dropped = component.cancel_versions(coordinate.author);
        let kind = component.kind();
        let sequence = self.inner.sequence_of(kind, component.nid());
        debug!(nid = component.nid(), dropped, "cancelled uncommitted versions");

        if self.inner.tracker.tracked_in(kind, sequence).is_none() {
            return Ok(None);
        }
        Ok(Some(self.add_uncommitted(component).await?))
    }

    // ========================================================================
    // Commits
    // ========================================================================

    /// Commit the versions of `component` authored by `coordinate`.
    ///
    /// Returns `Ok(None)` when a checker raised an error alert; the alerts are
    /// kept in [`Self::alerts`] and tracking is left as it was.
    pub async fn commit_component(
        &self,
        component: impl Into<Component>,
        coordinate: EditCoordinate,
        comment: Option<String>,
    ) -> Result<Option<CommitRecord>> {
        let mut component = component.into();
        let alerts = self.inner.run_checkers(&component, CheckPhase::Commit);
        let vetoed = alerts.iter().any(Alert::is_error);
        self.inner.alerts.lock().extend(alerts);
        if vetoed {
            warn!(nid = component.nid(), "commit vetoed by checker");
            return Ok(None);
        }

        let time = self.inner.next_commit_time();
        let stamps = component.commit_versions(Some(coordinate.author), time);
        let kind = component.kind();
        let sequence = self.inner.sequence_of(kind, component.nid());
        {
            let _permit = self.inner.permits.acquire().await?;
            self.inner.persist(component.clone()).await?;
        }
        if !component.has_uncommitted() {
            self.inner.tracker.untrack(kind, sequence);
        }

        let mut record = CommitRecord::new(timestamp(time), comment);
        self.inner.record_stamps(&mut record, &stamps);
        match kind {
            ComponentKind::Concept => record.concepts_in_commit.insert(sequence),
            ComponentKind::Sememe => record.sememes_in_commit.insert(sequence),
        };
        info!(nid = component.nid(), stamps = stamps.len(), "committed component");
        self.inner.listeners.notify_commit(&record);
        Ok(Some(record))
    }

    /// Commit every tracked component.
    ///
    /// Waits for all scheduled writes and clears previous alerts. Tracked
    /// components missing from the store are dropped with a warning alert.
    /// `Ok(None)` when a checker vetoed the batch; the database sequence only
    /// advances for batches that commit.
    pub async fn commit(&self, comment: Option<String>) -> Result<Option<CommitRecord>> {
        self.commit_batch(None, comment).await
    }

    /// Commit the uncommitted versions `coordinate`'s author made across every
    /// tracked component. Other authors' versions stay uncommitted and tracked.
    pub async fn commit_author(
        &self,
        coordinate: EditCoordinate,
        comment: Option<String>,
    ) -> Result<Option<CommitRecord>> {
        self.commit_batch(Some(coordinate.author), comment).await
    }

    async fn commit_batch(
        &self,
        author: Option<Nid>,
        comment: Option<String>,
    ) -> Result<Option<CommitRecord>> {
        let _exclusive = self.inner.commit_lock.lock().await;
        self.inner.permits.drain().await?;
        self.inner.alerts.lock().clear();

        let snapshot = self.inner.tracker.snapshot();
        let mut pending = Vec::with_capacity(snapshot.len() as usize);
        let mut alerts = Vec::new();
        for (set, sequence) in snapshot.entries() {
            let kind = set.kind();
            let Some(component) = self.inner.load_component(kind, sequence) else {
                warn!(kind = kind.name(), sequence, "tracked component missing from store");
                self.inner.tracker.untrack(kind, sequence);
                alerts.push(Alert {
                    alert_type: AlertType::Warning,
                    component_nid: self.inner.nid_of(kind, sequence).unwrap_or_default(),
                    checker: COMMIT_ALERT_SOURCE.to_string(),
                    description: format!(
                        "no stored {} for sequence {sequence}, dropped from uncommitted set",
                        kind.name()
                    ),
                });
                continue;
            };
            pending.push((set, sequence, component));
        }

        for (set, _, component) in &pending {
            if set.with_checks() {
                alerts.extend(self.inner.run_checkers(component, CheckPhase::Commit));
            }
        }
        let vetoed = alerts.iter().any(Alert::is_error);
        self.inner.alerts.lock().extend(alerts);
        if vetoed {
            warn!(components = pending.len(), "batch commit vetoed by checker");
            return Ok(None);
        }

        let time = self.inner.next_commit_time();
        let mut record = CommitRecord::new(timestamp(time), comment);
        for (set, sequence, mut component) in pending {
            let stamps = component.commit_versions(author, time);
            if !stamps.is_empty() {
                self.inner.persist(component.clone()).await?;
                self.inner.record_stamps(&mut record, &stamps);
                match set.kind() {
                    ComponentKind::Concept => record.concepts_in_commit.insert(sequence),
                    ComponentKind::Sememe => record.sememes_in_commit.insert(sequence),
                };
            }
            if !component.has_uncommitted() {
                self.inner.tracker.untrack(set.kind(), sequence);
            }
        }

        let database_sequence = self.inner.database_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            database_sequence,
            concepts = record.concepts_in_commit.len(),
            sememes = record.sememes_in_commit.len(),
            stamps = record.stamps_in_commit.len(),
            "commit complete"
        );
        self.inner.listeners.notify_commit(&record);
        Ok(Some(record))
    }

    // ========================================================================
    // Stamp aliases and comments
    // ========================================================================

    pub fn add_stamp_alias(&self, stamp: u32, alias: u32, comment: Option<String>) {
        self.inner.aliases.add_alias(stamp, alias);
        if comment.is_some() {
            self.inner.comments.set_comment(alias, comment);
        }
    }

    pub fn stamp_aliases(&self, stamp: u32) -> BTreeSet<u32> {
        self.inner.aliases.aliases(stamp)
    }

    pub fn set_comment(&self, stamp: u32, comment: Option<String>) {
        self.inner.comments.set_comment(stamp, comment);
    }

    pub fn comment(&self, stamp: u32) -> Option<String> {
        self.inner.comments.comment(stamp)
    }

    pub fn stamp(&self, stamp_sequence: u32) -> Option<Stamp> {
        self.inner.stamps.stamp(stamp_sequence)
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.alerts.lock().clone()
    }

    pub fn uncommitted(&self) -> UncommittedSnapshot {
        self.inner.tracker.snapshot()
    }

    /// The uncommitted set holding the component, if it is tracked.
    pub fn uncommitted_set(&self, kind: ComponentKind, nid: Nid) -> Option<UncommittedSet> {
        let sequence = self.inner.sequence_of(kind, nid);
        self.inner.tracker.tracked_in(kind, sequence)
    }

    pub fn sequence_of(&self, kind: ComponentKind, nid: Nid) -> u32 {
        self.inner.sequence_of(kind, nid)
    }

    pub fn database_sequence(&self) -> u64 {
        self.inner.database_sequence.load(Ordering::SeqCst)
    }

    pub fn last_commit_time(&self) -> Option<DateTime<Utc>> {
        let time = self.inner.last_commit_time.load(Ordering::SeqCst);
        (time != NO_COMMIT_YET).then(|| timestamp(time))
    }

    pub fn config(&self) -> &CommitConfig {
        &self.inner.config
    }

    pub fn commit_state(&self) -> CommitState {
        let time = self.inner.last_commit_time.load(Ordering::SeqCst);
        CommitState {
            database_sequence: self.database_sequence(),
            last_commit_time: (time != NO_COMMIT_YET).then_some(time),
            stamps: self.inner.stamps.snapshot(),
            uncommitted: self.uncommitted(),
        }
    }

    /// Wait for scheduled writes, then write the state files when configured to.
    pub async fn shutdown(&self) -> Result<()> {
        let _exclusive = self.inner.commit_lock.lock().await;
        self.inner.permits.drain().await?;
        if !self.inner.config.persist_on_shutdown {
            return Ok(());
        }
        let dir = &self.inner.config.data_dir;
        std::fs::create_dir_all(dir)?;
        persistence::write_commit_state(dir, &self.commit_state())?;
        persistence::write_alias_map(dir, &self.inner.aliases.entries())?;
        persistence::write_comment_map(dir, &self.inner.comments.entries())?;
        info!(data_dir = %dir.display(), "persisted commit state");
        Ok(())
    }
}

fn timestamp(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
