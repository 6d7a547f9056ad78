//! Integration tests across the logic and commit crates
//!
//! These tests follow a concept definition through its lifecycle:
//! - building a logical expression and storing it as a logic-graph sememe
//! - deciding on new versions with the isomorphism solvers
//! - committing through the engine, with checks, listeners and restarts
//!
//! Run with: cargo test --test integration_tests

use logicterm_commit::{
    prepare_logic_graph_version, Chronology, Collaborators, CommitConfig, CommitEngine,
    CommitRecord, ConceptChronology, EditCoordinate, LogicGraphChecker, LogicGraphUpdate,
    MemoryConceptService, MemoryIdentifierService, MemorySememeService, SememeChronology,
    SememePayload, SememeService, Stamp, Status,
};
use logicterm_logic::{IsomorphismConfig, LogicalExpression, LogicalExpressionBuilder, SolverKind};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use uuid::Uuid;

const PNEUMONITIS: i32 = -1001;
const DEFINITION: i32 = -2001;
const EL_PROFILE: i32 = -3001;

const DISORDER: i32 = -64572001;
const FINDING_SITE: i32 = -363698007;
const ASSOCIATED_MORPHOLOGY: i32 = -116676008;
const LUNG: i32 = -39607008;
const INFLAMMATION: i32 = -23583003;

const EDITOR: EditCoordinate = EditCoordinate {
    author: -10,
    module: -20,
    path: -30,
};

fn pneumonitis(with_morphology: bool) -> LogicalExpression {
    let mut b = LogicalExpressionBuilder::new(PNEUMONITIS);
    let disorder = b.concept(DISORDER);
    let lung = b.concept(LUNG);
    let site = b.some_role(FINDING_SITE, lung);
    let mut conjuncts = vec![disorder, site];
    if with_morphology {
        let inflammation = b.concept(INFLAMMATION);
        conjuncts.push(b.some_role(ASSOCIATED_MORPHOLOGY, inflammation));
    }
    let and = b.and(&conjuncts);
    b.necessary_set(&[and]);
    b.build().expect("valid definition")
}

struct Repository {
    engine: CommitEngine,
    sememes: Arc<MemorySememeService>,
}

fn repository(config: CommitConfig) -> Repository {
    let sememes = Arc::new(MemorySememeService::default());
    let collaborators = Collaborators {
        concepts: Arc::new(MemoryConceptService::default()),
        sememes: sememes.clone(),
        identifiers: Arc::new(MemoryIdentifierService::default()),
    };
    let engine = CommitEngine::new(config, collaborators);
    engine.add_checker(Arc::new(LogicGraphChecker));
    Repository { engine, sememes }
}

/// Stage `definition` as a new logic-graph version when it differs from the
/// last committed one. Returns the staged sememe, or `None` when unchanged.
fn stage_definition(
    repo: &Repository,
    definition: &LogicalExpression,
    solver: SolverKind,
) -> Option<SememeChronology> {
    let mut sememe = repo
        .sememes
        .sememe(DEFINITION)
        .unwrap_or_else(|| SememeChronology::new(DEFINITION, Uuid::new_v4(), EL_PROFILE, PNEUMONITIS));
    let last = sememe.latest_logic_graph().unwrap();
    let update = prepare_logic_graph_version(
        last.as_ref(),
        definition,
        &IsomorphismConfig::with_solver(solver),
    )
    .unwrap();
    match update {
        LogicGraphUpdate::Unchanged => None,
        LogicGraphUpdate::NewVersion { data, .. } => {
            sememe.add_version(
                Stamp::uncommitted(Status::Active, EDITOR),
                SememePayload::LogicGraph { data },
            );
            Some(sememe)
        }
    }
}

// ============================================================================
// Logic-graph versioning
// ============================================================================

#[tokio::test]
async fn test_definition_versions_through_commits() {
    for solver in [SolverKind::BottomUp, SolverKind::PathHash] {
        let repo = repository(CommitConfig::default());

        let v1 = pneumonitis(false);
        let staged = stage_definition(&repo, &v1, solver).expect("first version");
        let alerts = repo.engine.add_uncommitted(staged).await.unwrap().wait().await.unwrap();
        assert!(alerts.is_empty());
        let first = repo.engine.commit(Some("initial".into())).await.unwrap().unwrap();
        assert_eq!(first.sememes_in_commit.len(), 1);

        let stored = repo.sememes.sememe(DEFINITION).unwrap();
        assert_eq!(stored.latest_logic_graph().unwrap(), Some(v1.clone()));

        // Re-staging the same definition is a no-op.
        assert!(stage_definition(&repo, &pneumonitis(false), solver).is_none());

        let v2 = pneumonitis(true);
        let staged = stage_definition(&repo, &v2, solver).expect("changed definition");
        repo.engine.add_uncommitted(staged).await.unwrap().wait().await.unwrap();
        let second = repo.engine.commit(None).await.unwrap().unwrap();
        assert!(second.commit_time > first.commit_time);

        let stored = repo.sememes.sememe(DEFINITION).unwrap();
        assert_eq!(stored.versions.len(), 2);
        assert!(!stored.has_uncommitted());
        let latest = stored.latest_logic_graph().unwrap().unwrap();
        assert_eq!(latest, v2);
        assert!(latest.contains_concept(INFLAMMATION));
        assert_eq!(repo.engine.database_sequence(), 2);
    }
}

#[test]
fn test_new_version_reuses_previous_node_indices() {
    let previous = pneumonitis(false);
    let update =
        prepare_logic_graph_version(Some(&previous), &pneumonitis(true), &IsomorphismConfig::default())
            .unwrap();
    let LogicGraphUpdate::NewVersion {
        expression,
        additions,
        deletions,
        ..
    } = update
    else {
        panic!("expected a new version");
    };
    assert_eq!((additions, deletions), (1, 0));
    // Every node of the previous version keeps its index and payload.
    for node in previous.nodes() {
        let kept = expression.node(node.index()).unwrap();
        assert_eq!(kept.kind(), node.kind());
    }
}

#[tokio::test]
async fn test_corrupt_definition_vetoes_the_commit() {
    let repo = repository(CommitConfig::default());
    let mut sememe = SememeChronology::new(DEFINITION, Uuid::new_v4(), EL_PROFILE, PNEUMONITIS);
    let mut data = pneumonitis(false)
        .to_data(logicterm_logic::NodeCodec::internal())
        .unwrap();
    data.truncate(2);
    sememe.add_version(
        Stamp::uncommitted(Status::Active, EDITOR),
        SememePayload::LogicGraph { data },
    );

    let alerts = repo.engine.add_uncommitted(sememe).await.unwrap().wait().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(repo.engine.commit(None).await.unwrap().is_none());
    assert_eq!(repo.engine.uncommitted().sememes_with_checks.len(), 1);
    assert!(repo.engine.alerts().iter().any(|a| a.component_nid == DEFINITION));
}

// ============================================================================
// Listeners and restarts
// ============================================================================

struct CommitLog {
    uuid: Uuid,
    records: Mutex<Vec<CommitRecord>>,
}

impl logicterm_commit::ChangeListener for CommitLog {
    fn listener_uuid(&self) -> Uuid {
        self.uuid
    }

    fn handle_commit(&self, record: &CommitRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_concept_and_definition_commit_together() {
    let repo = repository(CommitConfig::default());
    let log = Arc::new(CommitLog {
        uuid: Uuid::new_v4(),
        records: Default::default(),
    });
    repo.engine.add_change_listener(log.clone());

    let mut concept = ConceptChronology::new(PNEUMONITIS, Uuid::new_v4());
    concept.add_version(Stamp::uncommitted(Status::Active, EDITOR));
    let definition = stage_definition(&repo, &pneumonitis(true), SolverKind::BottomUp).unwrap();

    let a = repo.engine.add_uncommitted(concept).await.unwrap();
    let b = repo.engine.add_uncommitted(definition).await.unwrap();
    a.wait().await.unwrap();
    b.wait().await.unwrap();

    let record = repo.engine.commit(Some("new concept".into())).await.unwrap().unwrap();
    assert_eq!(record.concepts_in_commit.len(), 1);
    assert_eq!(record.sememes_in_commit.len(), 1);
    // Both versions share one stamp.
    assert_eq!(record.stamps_in_commit.len(), 1);
    assert_eq!(*log.records.lock().unwrap(), vec![record]);
}

#[tokio::test]
async fn test_uncommitted_definition_survives_restart() {
    let dir = tempdir().unwrap();
    let config = CommitConfig::in_dir(dir.path());
    let collaborators = Collaborators::in_memory();

    let engine = CommitEngine::new(config.clone(), collaborators.clone());
    let mut sememe = SememeChronology::new(DEFINITION, Uuid::new_v4(), EL_PROFILE, PNEUMONITIS);
    sememe.add_version(
        Stamp::uncommitted(Status::Active, EDITOR),
        SememePayload::LogicGraph {
            data: pneumonitis(true)
                .to_data(logicterm_logic::NodeCodec::internal())
                .unwrap(),
        },
    );
    engine.add_uncommitted(sememe).await.unwrap();
    engine.shutdown().await.unwrap();

    let restarted = CommitEngine::load(config, collaborators.clone()).unwrap();
    assert_eq!(restarted.uncommitted().sememes_with_checks.len(), 1);
    let record = restarted.commit(None).await.unwrap().unwrap();
    assert_eq!(record.sememes_in_commit.len(), 1);
    assert!(restarted.uncommitted().is_empty());

    let stored = collaborators.sememes.sememe(DEFINITION).unwrap();
    assert_eq!(stored.latest_logic_graph().unwrap(), Some(pneumonitis(true)));
}
