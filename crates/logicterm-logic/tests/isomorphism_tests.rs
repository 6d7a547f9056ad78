//! Diff and merge scenarios between two versions of a definition.

use logicterm_logic::{
    find_isomorphisms_batch, ConceptIdentity, IsomorphismConfig, LogicError, LogicalExpression,
    LogicalExpressionBuilder, MemoryConceptIdentity, NodeCodec, NodeKind, NodeSemantic, SolverKind,
};
use uuid::Uuid;

const DISORDER: i32 = 64572001;
const FINDING_SITE: i32 = 363698007;
const ASSOCIATED_MORPHOLOGY: i32 = 116676008;
const HEART: i32 = 80891009;
const LUNG: i32 = 39607008;
const INFLAMMATION: i32 = 23583003;

fn pneumonitis(nid: i32, site: i32, with_morphology: bool) -> LogicalExpression {
    let mut b = LogicalExpressionBuilder::new(nid);
    let disorder = b.concept(DISORDER);
    let site = b.concept(site);
    let finding_site = b.some_role(FINDING_SITE, site);
    let mut conjuncts = vec![disorder, finding_site];
    if with_morphology {
        let morphology = b.concept(INFLAMMATION);
        conjuncts.push(b.some_role(ASSOCIATED_MORPHOLOGY, morphology));
    }
    let and = b.and(&conjuncts);
    b.necessary_set(&[and]);
    b.build().unwrap()
}

fn both_solvers() -> [IsomorphismConfig; 2] {
    [
        IsomorphismConfig::with_solver(SolverKind::BottomUp),
        IsomorphismConfig::with_solver(SolverKind::PathHash),
    ]
}

#[test]
fn identical_definitions_map_one_to_one() {
    let reference = pneumonitis(1, LUNG, true);
    let comparison = pneumonitis(2, LUNG, true);
    for config in both_solvers() {
        let result = reference.find_isomorphisms(&comparison, &config).unwrap();
        assert!(result.equivalent(), "{}", result.solver());
        assert_eq!(result.solution().mapped_count(), reference.node_count());
        assert_eq!(result.comparison_to_reference().len(), comparison.node_count());
        assert_eq!(result.isomorphic_expression(), &comparison);
        assert!(result.merged_deletion_roots().is_empty());
    }
}

#[test]
fn added_role_group_is_one_addition_root() {
    let reference = pneumonitis(1, LUNG, true);
    let comparison = pneumonitis(1, LUNG, false);
    for config in both_solvers() {
        let result = reference.find_isomorphisms(&comparison, &config).unwrap();
        assert_eq!(result.addition_roots().len(), 1, "{}", result.solver());
        let added = *result.addition_roots().iter().next().unwrap();
        assert_eq!(
            reference.node(added).unwrap().kind(),
            &NodeKind::RoleSome {
                role_type: ASSOCIATED_MORPHOLOGY
            }
        );
        assert!(result.deletion_roots().is_empty());

        // New nodes land after the comparison's slots in the isomorphic expression.
        let isomorphic_root = *result.isomorphic_addition_roots().iter().next().unwrap();
        assert!(isomorphic_root >= comparison.slot_count());
        assert_eq!(result.isomorphic_expression().node_count(), reference.node_count());
    }
}

#[test]
fn changed_site_is_reported_on_both_sides_and_merged() {
    let reference = pneumonitis(1, LUNG, false);
    let comparison = pneumonitis(1, HEART, false);
    for config in both_solvers() {
        let result = reference.find_isomorphisms(&comparison, &config).unwrap();
        assert!(!result.equivalent());
        assert_eq!(result.addition_roots().len(), 1, "{}", result.solver());
        assert_eq!(result.deletion_roots().len(), 1, "{}", result.solver());

        let merged = result.merged_expression();
        assert!(merged.contains_concept(LUNG));
        assert!(merged.contains_concept(HEART));
        merged.validate().unwrap();
        for root in result.merged_deletion_roots() {
            assert!(*root >= reference.slot_count());
        }
    }
}

#[test]
fn external_round_trip_translates_identifiers() {
    let reference = pneumonitis(1, LUNG, true);
    let identity = MemoryConceptIdentity::new();
    for nid in reference.referenced_concepts() {
        identity.register(nid, &[Uuid::new_v4()]);
    }

    let data = reference.to_data(NodeCodec::external(&identity)).unwrap();
    let decoded = LogicalExpression::from_data(1, &data, NodeCodec::external(&identity)).unwrap();
    assert_eq!(decoded, reference);
    assert_eq!(decoded.referenced_concepts(), reference.referenced_concepts());

    // Another system knows the same identifiers under different nids.
    let other = MemoryConceptIdentity::new();
    for nid in reference.referenced_concepts() {
        let uuids = identity.uuids_for_nid(nid).unwrap();
        other.register(nid + 1_000, &uuids);
    }
    let translated = LogicalExpression::from_data(1, &data, NodeCodec::external(&other)).unwrap();
    assert!(translated.contains_concept(LUNG + 1_000));
    assert!(!translated.contains_concept(LUNG));
}

#[test]
fn from_data_rejects_dangling_children() {
    let codec = NodeCodec::internal();
    let data = vec![codec.encode_node(&NodeKind::Root, &[4]).unwrap()];
    assert!(matches!(
        LogicalExpression::from_data(1, &data, codec),
        Err(LogicError::DanglingChild { parent: 0, child: 4 })
    ));
}

#[test]
fn json_interchange_round_trips() {
    let reference = pneumonitis(1, LUNG, true);
    let json = serde_json::to_string(&reference).unwrap();
    let parsed: LogicalExpression = serde_json::from_str(&json).unwrap();
    parsed.validate().unwrap();
    assert_eq!(parsed, reference);
    assert_eq!(parsed.nodes_of_semantic(NodeSemantic::RoleSome).len(), 2);
}

#[test]
fn batch_matches_sequential_results() {
    let pairs = vec![
        (pneumonitis(1, LUNG, true), pneumonitis(1, LUNG, true)),
        (pneumonitis(2, LUNG, true), pneumonitis(2, LUNG, false)),
        (pneumonitis(3, LUNG, false), pneumonitis(3, HEART, false)),
    ];
    let config = IsomorphismConfig::default();
    let batch = find_isomorphisms_batch(&pairs, &config);
    for ((reference, comparison), batched) in pairs.iter().zip(batch) {
        let batched = batched.unwrap();
        let sequential = reference.find_isomorphisms(comparison, &config).unwrap();
        assert_eq!(batched.addition_roots(), sequential.addition_roots());
        assert_eq!(batched.deletion_roots(), sequential.deletion_roots());
        assert_eq!(batched.solution(), sequential.solution());
    }
}
