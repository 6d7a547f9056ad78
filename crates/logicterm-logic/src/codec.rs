//! Binary node-array codec.
//!
//! Each node serializes to its own byte record:
//!
//! ```text
//! [format version: u8][semantic: u8][child count: u16 LE][child index: u16 LE]*[payload]
//! ```
//!
//! and an expression serializes to the records of its occupied slots in index
//! order (holes are compacted away). Payload layout per semantic:
//!
//! - roles: role type
//! - feature: feature type, measure semantic, operator byte
//! - template: template, assemblage
//! - concept: concept
//! - property pattern implication: u16 count, pattern concepts, implication
//! - literals: natural little-endian encoding (instants as i64 seconds + u32 nanos,
//!   strings as u32 length + UTF-8)
//! - substitutions: field spec as a length-prefixed string
//!
//! Concept identifiers are written either as the local `i32` nid (internal
//! data) or as a `u8` count followed by 16-byte UUIDs (external data). The
//! external form goes through a [`ConceptIdentity`] lookup so expressions can
//! move between systems with different nid spaces.

use crate::error::{LogicError, Result};
use crate::expression::{CommitState, LogicalExpression};
use crate::node::{
    ConcreteDomainOperator, LiteralValue, LogicNode, Nid, NodeKind, NodeSemantic,
    SubstitutionFieldSpec, SubstitutionKind,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::convert::Infallible;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, Ordering};
use uuid::Uuid;

/// Version byte written at the head of every node record.
pub const FORMAT_VERSION: u8 = 1;

/// How concept identifiers are addressed inside node records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSource {
    /// Local integer nids.
    Internal,
    /// Universal identifiers, resolved through a [`ConceptIdentity`].
    External,
}

/// Maps local nids to the universal identifiers of the same component.
pub trait ConceptIdentity: Send + Sync {
    fn uuids_for_nid(&self, nid: Nid) -> Option<Vec<Uuid>>;
    fn nid_for_uuids(&self, uuids: &[Uuid]) -> Option<Nid>;
}

/// In-memory identity table.
#[derive(Debug)]
pub struct MemoryConceptIdentity {
    by_nid: DashMap<Nid, Vec<Uuid>>,
    by_uuid: DashMap<Uuid, Nid>,
    next_nid: AtomicI32,
}

impl Default for MemoryConceptIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConceptIdentity {
    pub fn new() -> Self {
        Self {
            by_nid: DashMap::new(),
            by_uuid: DashMap::new(),
            next_nid: AtomicI32::new(1),
        }
    }

    /// Associate an existing nid with one or more identifiers.
    pub fn register(&self, nid: Nid, uuids: &[Uuid]) {
        for uuid in uuids {
            self.by_uuid.insert(*uuid, nid);
        }
        self.by_nid.entry(nid).or_default().extend_from_slice(uuids);
        self.next_nid.fetch_max(nid.saturating_add(1), Ordering::Relaxed);
    }

    /// Nid for `uuid`, allocating a fresh one the first time it is seen.
    pub fn nid_for_uuid(&self, uuid: Uuid) -> Nid {
        if let Some(nid) = self.by_uuid.get(&uuid) {
            return *nid;
        }
        let nid = *self
            .by_uuid
            .entry(uuid)
            .or_insert_with(|| self.next_nid.fetch_add(1, Ordering::Relaxed));
        self.by_nid.entry(nid).or_insert_with(|| vec![uuid]);
        nid
    }

    pub fn len(&self) -> usize {
        self.by_nid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_nid.is_empty()
    }
}

impl ConceptIdentity for MemoryConceptIdentity {
    fn uuids_for_nid(&self, nid: Nid) -> Option<Vec<Uuid>> {
        self.by_nid.get(&nid).map(|uuids| uuids.clone())
    }

    fn nid_for_uuids(&self, uuids: &[Uuid]) -> Option<Nid> {
        uuids.iter().find_map(|uuid| self.by_uuid.get(uuid).map(|nid| *nid))
    }
}

/// Encoder/decoder for one addressing mode.
#[derive(Clone, Copy)]
pub struct NodeCodec<'a> {
    identity: Option<&'a dyn ConceptIdentity>,
}

impl std::fmt::Debug for NodeCodec<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCodec")
            .field("data_source", &self.data_source())
            .finish()
    }
}

impl NodeCodec<'static> {
    pub fn internal() -> Self {
        Self { identity: None }
    }
}

impl<'a> NodeCodec<'a> {
    pub fn external(identity: &'a dyn ConceptIdentity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    pub fn data_source(&self) -> DataSource {
        if self.identity.is_some() {
            DataSource::External
        } else {
            DataSource::Internal
        }
    }

    /// Encode one node; `children` are the (already remapped) child indices.
    pub fn encode_node(&self, kind: &NodeKind, children: &[usize]) -> Result<Vec<u8>> {
        let semantic = kind.semantic();
        self.check_supported(semantic)?;
        let mut out = Vec::with_capacity(16);
        out.push(FORMAT_VERSION);
        out.push(semantic.to_byte());
        let count = u16::try_from(children.len())
            .map_err(|_| LogicError::malformed("node has more than 65535 children"))?;
        out.extend_from_slice(&count.to_le_bytes());
        for child in children {
            let child = u16::try_from(*child).map_err(|_| {
                LogicError::malformed(format!("child index {child} does not fit a node record"))
            })?;
            out.extend_from_slice(&child.to_le_bytes());
        }
        let mut sink = PayloadSink {
            write_nid: &mut |out: &mut Vec<u8>, nid: Nid| self.write_nid(out, nid),
            write_len: checked_len,
        };
        write_payload(&mut out, kind, &mut sink)?;
        Ok(out)
    }

    /// Decode one node record into a node placed at `index`.
    pub fn decode_node(&self, index: usize, bytes: &[u8]) -> Result<LogicNode> {
        let mut reader = Reader::new(bytes);
        let version = reader.u8()?;
        if version != FORMAT_VERSION {
            return Err(LogicError::FormatVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }
        let semantic = NodeSemantic::from_byte(reader.u8()?)?;
        self.check_supported(semantic)?;
        let count = reader.u16()? as usize;
        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            children.push(reader.u16()? as usize);
        }
        let kind = self.read_payload(semantic, &mut reader)?;
        reader.finish()?;
        Ok(LogicNode::new(index, kind, children))
    }

    fn check_supported(&self, semantic: NodeSemantic) -> Result<()> {
        // Substitution field specs are local to the authoring system.
        if semantic.is_substitution() && self.data_source() == DataSource::External {
            return Err(LogicError::UnsupportedDataSource {
                semantic,
                data_source: DataSource::External,
            });
        }
        Ok(())
    }

    fn write_nid(&self, out: &mut Vec<u8>, nid: Nid) -> Result<()> {
        match self.identity {
            None => {
                out.extend_from_slice(&nid.to_le_bytes());
                Ok(())
            }
            Some(identity) => {
                let uuids = identity
                    .uuids_for_nid(nid)
                    .filter(|uuids| !uuids.is_empty())
                    .ok_or(LogicError::UnknownNid(nid))?;
                let count = u8::try_from(uuids.len()).map_err(|_| {
                    LogicError::malformed(format!("nid {nid} has more than 255 identifiers"))
                })?;
                out.push(count);
                for uuid in uuids {
                    out.extend_from_slice(uuid.as_bytes());
                }
                Ok(())
            }
        }
    }

    fn read_nid(&self, reader: &mut Reader<'_>) -> Result<Nid> {
        match self.identity {
            None => reader.i32(),
            Some(identity) => {
                let count = reader.u8()? as usize;
                let mut uuids = Vec::with_capacity(count);
                for _ in 0..count {
                    uuids.push(reader.uuid()?);
                }
                identity
                    .nid_for_uuids(&uuids)
                    .ok_or(LogicError::UnknownUuids(uuids))
            }
        }
    }

    fn read_payload(&self, semantic: NodeSemantic, reader: &mut Reader<'_>) -> Result<NodeKind> {
        let kind = match semantic {
            NodeSemantic::Root => NodeKind::Root,
            NodeSemantic::NecessarySet => NodeKind::NecessarySet,
            NodeSemantic::SufficientSet => NodeKind::SufficientSet,
            NodeSemantic::PropertySet => NodeKind::PropertySet,
            NodeSemantic::And => NodeKind::And,
            NodeSemantic::Or => NodeKind::Or,
            NodeSemantic::DisjointWith => NodeKind::DisjointWith,
            NodeSemantic::RoleAll => NodeKind::RoleAll {
                role_type: self.read_nid(reader)?,
            },
            NodeSemantic::RoleSome => NodeKind::RoleSome {
                role_type: self.read_nid(reader)?,
            },
            NodeSemantic::Feature => NodeKind::Feature {
                feature_type: self.read_nid(reader)?,
                measure_semantic: self.read_nid(reader)?,
                operator: ConcreteDomainOperator::from_byte(reader.u8()?)?,
            },
            NodeSemantic::Template => NodeKind::Template {
                template: self.read_nid(reader)?,
                assemblage: self.read_nid(reader)?,
            },
            NodeSemantic::Concept => NodeKind::Concept {
                concept: self.read_nid(reader)?,
            },
            NodeSemantic::PropertyPatternImplication => {
                let count = reader.u16()? as usize;
                let mut pattern = Vec::with_capacity(count);
                for _ in 0..count {
                    pattern.push(self.read_nid(reader)?);
                }
                NodeKind::PropertyPatternImplication {
                    pattern,
                    implication: self.read_nid(reader)?,
                }
            }
            NodeSemantic::LiteralBoolean => {
                NodeKind::Literal(LiteralValue::Boolean(reader.u8()? != 0))
            }
            NodeSemantic::LiteralDouble => {
                NodeKind::Literal(LiteralValue::Double(f64::from_bits(reader.u64()?)))
            }
            NodeSemantic::LiteralInstant => {
                let seconds = reader.i64()?;
                let nanos = reader.u32()?;
                let instant = DateTime::<Utc>::from_timestamp(seconds, nanos).ok_or_else(|| {
                    LogicError::malformed(format!("instant {seconds}s {nanos}ns is out of range"))
                })?;
                NodeKind::Literal(LiteralValue::Instant(instant))
            }
            NodeSemantic::LiteralInteger => NodeKind::Literal(LiteralValue::Integer(reader.i32()?)),
            NodeSemantic::LiteralString => NodeKind::Literal(LiteralValue::String(reader.string()?)),
            NodeSemantic::SubstitutionBoolean
            | NodeSemantic::SubstitutionConcept
            | NodeSemantic::SubstitutionDouble
            | NodeSemantic::SubstitutionInstant
            | NodeSemantic::SubstitutionInteger
            | NodeSemantic::SubstitutionString => {
                let kind = SubstitutionKind::from_semantic(semantic)
                    .ok_or(LogicError::UnsupportedSemantic(semantic.to_byte()))?;
                NodeKind::Substitution {
                    kind,
                    field: SubstitutionFieldSpec(reader.string()?),
                }
            }
        };
        Ok(kind)
    }
}

/// Where a payload writes its variable-length fields and concept ids. Node
/// records use checked narrow prefixes; node identities never fail.
struct PayloadSink<'a, E> {
    write_nid: &'a mut dyn FnMut(&mut Vec<u8>, Nid) -> std::result::Result<(), E>,
    write_len: fn(&mut Vec<u8>, usize, LengthField) -> std::result::Result<(), E>,
}

#[derive(Debug, Clone, Copy)]
enum LengthField {
    Pattern,
    String,
}

fn checked_len(out: &mut Vec<u8>, len: usize, field: LengthField) -> Result<()> {
    match field {
        LengthField::Pattern => {
            let len = u16::try_from(len)
                .map_err(|_| LogicError::malformed("property pattern longer than 65535"))?;
            out.extend_from_slice(&len.to_le_bytes());
        }
        LengthField::String => {
            let len = u32::try_from(len)
                .map_err(|_| LogicError::malformed("string payload longer than u32::MAX"))?;
            out.extend_from_slice(&len.to_le_bytes());
        }
    }
    Ok(())
}

fn wide_len(out: &mut Vec<u8>, len: usize, _field: LengthField) -> std::result::Result<(), Infallible> {
    out.extend_from_slice(&(len as u64).to_le_bytes());
    Ok(())
}

fn write_payload<E>(
    out: &mut Vec<u8>,
    kind: &NodeKind,
    sink: &mut PayloadSink<'_, E>,
) -> std::result::Result<(), E> {
    match kind {
        NodeKind::Root
        | NodeKind::NecessarySet
        | NodeKind::SufficientSet
        | NodeKind::PropertySet
        | NodeKind::And
        | NodeKind::Or
        | NodeKind::DisjointWith => {}
        NodeKind::RoleAll { role_type } | NodeKind::RoleSome { role_type } => {
            (sink.write_nid)(out, *role_type)?;
        }
        NodeKind::Feature {
            feature_type,
            measure_semantic,
            operator,
        } => {
            (sink.write_nid)(out, *feature_type)?;
            (sink.write_nid)(out, *measure_semantic)?;
            out.push(*operator as u8);
        }
        NodeKind::Template {
            template,
            assemblage,
        } => {
            (sink.write_nid)(out, *template)?;
            (sink.write_nid)(out, *assemblage)?;
        }
        NodeKind::Concept { concept } => (sink.write_nid)(out, *concept)?,
        NodeKind::PropertyPatternImplication {
            pattern,
            implication,
        } => {
            (sink.write_len)(out, pattern.len(), LengthField::Pattern)?;
            for nid in pattern {
                (sink.write_nid)(out, *nid)?;
            }
            (sink.write_nid)(out, *implication)?;
        }
        NodeKind::Literal(value) => match value {
            LiteralValue::Boolean(v) => out.push(u8::from(*v)),
            LiteralValue::Double(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
            LiteralValue::Instant(v) => {
                out.extend_from_slice(&v.timestamp().to_le_bytes());
                out.extend_from_slice(&v.timestamp_subsec_nanos().to_le_bytes());
            }
            LiteralValue::Integer(v) => out.extend_from_slice(&v.to_le_bytes()),
            LiteralValue::String(v) => write_string(out, v, sink.write_len)?,
        },
        NodeKind::Substitution { field, .. } => write_string(out, field.field(), sink.write_len)?,
    }
    Ok(())
}

fn write_string<E>(
    out: &mut Vec<u8>,
    value: &str,
    write_len: fn(&mut Vec<u8>, usize, LengthField) -> std::result::Result<(), E>,
) -> std::result::Result<(), E> {
    write_len(out, value.len(), LengthField::String)?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Semantic byte followed by the payload with internal nids and wide length
/// prefixes: the identity of a node without its children.
pub(crate) fn identity_bytes(kind: &NodeKind) -> Vec<u8> {
    let mut out = vec![kind.semantic().to_byte()];
    let mut sink = PayloadSink {
        write_nid: &mut |out: &mut Vec<u8>, nid: Nid| -> std::result::Result<(), Infallible> {
            out.extend_from_slice(&nid.to_le_bytes());
            Ok(())
        },
        write_len: wide_len,
    };
    match write_payload(&mut out, kind, &mut sink) {
        Ok(()) => out,
        Err(never) => match never {},
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.offset.checked_add(n).filter(|end| *end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.offset..end];
                self.offset = end;
                Ok(slice)
            }
            None => Err(LogicError::Truncated {
                offset: self.offset,
                len: self.bytes.len(),
            }),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn uuid(&mut self) -> Result<Uuid> {
        Ok(Uuid::from_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        Ok(String::from_utf8(self.take(len)?.to_vec())?)
    }

    fn finish(&self) -> Result<()> {
        let trailing = self.bytes.len() - self.offset;
        if trailing > 0 {
            return Err(LogicError::TrailingBytes { trailing });
        }
        Ok(())
    }
}

// ============================================================================
// Expression-level encoding
// ============================================================================

impl LogicalExpression {
    /// Serialize to one record per node, compacting holes.
    pub fn to_data(&self, codec: NodeCodec<'_>) -> Result<Vec<Vec<u8>>> {
        let mut remap = vec![None; self.slot_count()];
        for (new_index, node) in self.nodes().enumerate() {
            remap[node.index()] = Some(new_index);
        }
        self.nodes()
            .map(|node| {
                let children = node
                    .children()
                    .iter()
                    .map(|child| {
                        remap
                            .get(*child)
                            .copied()
                            .flatten()
                            .ok_or(LogicError::DanglingChild {
                                parent: node.index(),
                                child: *child,
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                codec.encode_node(node.kind(), &children)
            })
            .collect()
    }

    /// Rebuild an expression from node records. Exactly one record may be a
    /// `Root`; the result is marked committed.
    pub fn from_data(
        concept_nid: Nid,
        data: &[Vec<u8>],
        codec: NodeCodec<'_>,
    ) -> Result<LogicalExpression> {
        let mut expression = LogicalExpression::new(concept_nid);
        for (index, record) in data.iter().enumerate() {
            let node = codec.decode_node(index, record)?;
            if node.semantic() == NodeSemantic::Root {
                if let Some(first) = expression.root() {
                    return Err(LogicError::DuplicateRoot {
                        first,
                        second: index,
                    });
                }
            }
            for child in node.children() {
                if *child >= data.len() {
                    return Err(LogicError::DanglingChild {
                        parent: index,
                        child: *child,
                    });
                }
            }
            expression.push_node(node);
        }
        if expression.root().is_none() {
            return Err(LogicError::MissingRoot);
        }
        expression.check_acyclic()?;
        expression.commit_state = CommitState::Committed;
        Ok(expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_version_mismatch() {
        let codec = NodeCodec::internal();
        let mut record = codec.encode_node(&NodeKind::Root, &[]).unwrap();
        record[0] = FORMAT_VERSION + 1;
        assert!(matches!(
            codec.decode_node(0, &record),
            Err(LogicError::FormatVersion { found, expected }) if found == FORMAT_VERSION + 1 && expected == FORMAT_VERSION
        ));
    }

    #[test]
    fn truncated_and_trailing_records_fail() {
        let codec = NodeCodec::internal();
        let record = codec
            .encode_node(&NodeKind::Concept { concept: 42 }, &[])
            .unwrap();
        assert!(matches!(
            codec.decode_node(0, &record[..record.len() - 1]),
            Err(LogicError::Truncated { .. })
        ));

        let mut padded = record.clone();
        padded.push(0);
        assert!(matches!(
            codec.decode_node(0, &padded),
            Err(LogicError::TrailingBytes { trailing: 1 })
        ));
    }

    #[test]
    fn external_records_carry_uuids() {
        let identity = MemoryConceptIdentity::new();
        let uuid = Uuid::new_v4();
        identity.register(7, &[uuid]);

        let codec = NodeCodec::external(&identity);
        let record = codec
            .encode_node(&NodeKind::RoleSome { role_type: 7 }, &[3])
            .unwrap();
        // version, semantic, count, one child, uuid count, one uuid
        assert_eq!(record.len(), 1 + 1 + 2 + 2 + 1 + 16);

        let node = codec.decode_node(1, &record).unwrap();
        assert_eq!(node.kind(), &NodeKind::RoleSome { role_type: 7 });
        assert_eq!(node.children(), &[3]);
    }

    #[test]
    fn external_unknown_nid_is_an_error() {
        let identity = MemoryConceptIdentity::new();
        let codec = NodeCodec::external(&identity);
        assert!(matches!(
            codec.encode_node(&NodeKind::Concept { concept: 99 }, &[]),
            Err(LogicError::UnknownNid(99))
        ));
    }

    #[test]
    fn external_substitutions_are_unsupported() {
        let identity = MemoryConceptIdentity::new();
        let codec = NodeCodec::external(&identity);
        let kind = NodeKind::Substitution {
            kind: SubstitutionKind::Concept,
            field: SubstitutionFieldSpec::new("finding"),
        };
        assert!(matches!(
            codec.encode_node(&kind, &[]),
            Err(LogicError::UnsupportedDataSource { .. })
        ));
    }

    #[test]
    fn literal_payloads_round_trip() {
        let codec = NodeCodec::internal();
        let instant = DateTime::<Utc>::from_timestamp(1_700_000_000, 123).unwrap();
        for value in [
            LiteralValue::Boolean(true),
            LiteralValue::Double(-2.5),
            LiteralValue::Instant(instant),
            LiteralValue::Integer(-17),
            LiteralValue::String("mg/dL".to_string()),
        ] {
            let kind = NodeKind::Literal(value);
            let record = codec.encode_node(&kind, &[]).unwrap();
            assert_eq!(codec.decode_node(0, &record).unwrap().kind(), &kind);
        }
    }

    #[test]
    fn identity_allocates_stable_nids() {
        let identity = MemoryConceptIdentity::new();
        let uuid = Uuid::new_v4();
        let nid = identity.nid_for_uuid(uuid);
        assert_eq!(identity.nid_for_uuid(uuid), nid);
        assert_eq!(identity.uuids_for_nid(nid), Some(vec![uuid]));
        assert_eq!(identity.len(), 1);
    }

    #[test]
    fn second_root_record_is_rejected() {
        let codec = NodeCodec::internal();
        let data = vec![
            codec.encode_node(&NodeKind::Root, &[1]).unwrap(),
            codec.encode_node(&NodeKind::Root, &[]).unwrap(),
        ];
        assert!(matches!(
            LogicalExpression::from_data(-1, &data, codec),
            Err(LogicError::DuplicateRoot { first: 0, second: 1 })
        ));
    }

    #[test]
    fn identity_bytes_separate_variable_length_payloads() {
        let short = NodeKind::PropertyPatternImplication {
            pattern: vec![1, 2],
            implication: 3,
        };
        let long = NodeKind::PropertyPatternImplication {
            pattern: vec![1, 2, 3],
            implication: 3,
        };
        assert_ne!(identity_bytes(&short), identity_bytes(&long));
        assert_eq!(identity_bytes(&short), identity_bytes(&short.clone()));

        let text = NodeKind::Literal(LiteralValue::String("lung".into()));
        let bytes = identity_bytes(&text);
        assert_eq!(bytes[0], NodeSemantic::LiteralString.to_byte());
        assert_eq!(&bytes[1..9], &4u64.to_le_bytes());
        assert_eq!(&bytes[9..], b"lung");
    }
}
