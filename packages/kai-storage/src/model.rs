//! The node/edge graph model (§3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{node_id, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Module,
    Symbol,
    Snapshot,
    ChangeSet,
    ChangeType,
    Workspace,
    Review,
    ReviewComment,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "File",
            NodeKind::Module => "Module",
            NodeKind::Symbol => "Symbol",
            NodeKind::Snapshot => "Snapshot",
            NodeKind::ChangeSet => "ChangeSet",
            NodeKind::ChangeType => "ChangeType",
            NodeKind::Workspace => "Workspace",
            NodeKind::Review => "Review",
            NodeKind::ReviewComment => "ReviewComment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "File" => NodeKind::File,
            "Module" => NodeKind::Module,
            "Symbol" => NodeKind::Symbol,
            "Snapshot" => NodeKind::Snapshot,
            "ChangeSet" => NodeKind::ChangeSet,
            "ChangeType" => NodeKind::ChangeType,
            "Workspace" => NodeKind::Workspace,
            "Review" => NodeKind::Review,
            "ReviewComment" => NodeKind::ReviewComment,
            _ => return None,
        })
    }

    /// Identity-addressed kinds mint a random id and allow payload mutation;
    /// everything else is content-addressed (§3.1).
    pub fn is_identity_addressed(&self) -> bool {
        matches!(
            self,
            NodeKind::Workspace | NodeKind::Review | NodeKind::ReviewComment
        )
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored node. For content-addressed kinds, `id` is always
/// `node_id(kind, payload)`; the canonical bytes that produced it are kept
/// alongside so a later re-hash never has to re-serialize a parsed struct
/// (§9 "Dynamic payload typing").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub payload: Value,
    pub created_at: i64,
}

impl Node {
    /// Build a content-addressed node, deriving its id from `(kind, payload)`.
    pub fn new_content_addressed(kind: NodeKind, payload: Value, created_at: i64) -> Self {
        debug_assert!(!kind.is_identity_addressed());
        let id = node_id(kind.as_str(), &payload);
        Self {
            id,
            kind,
            payload,
            created_at,
        }
    }

    pub fn new_identity_addressed(
        kind: NodeKind,
        id: NodeId,
        payload: Value,
        created_at: i64,
    ) -> Self {
        debug_assert!(kind.is_identity_addressed());
        Self {
            id,
            kind,
            payload,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    HasFile,
    Contains,
    DefinesIn,
    Modifies,
    Has,
    Affects,
    BasedOn,
    HeadAt,
    HasChangeSet,
    Imports,
    Tests,
    Calls,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::HasFile => "HAS_FILE",
            EdgeType::Contains => "CONTAINS",
            EdgeType::DefinesIn => "DEFINES_IN",
            EdgeType::Modifies => "MODIFIES",
            EdgeType::Has => "HAS",
            EdgeType::Affects => "AFFECTS",
            EdgeType::BasedOn => "BASED_ON",
            EdgeType::HeadAt => "HEAD_AT",
            EdgeType::HasChangeSet => "HAS_CHANGESET",
            EdgeType::Imports => "IMPORTS",
            EdgeType::Tests => "TESTS",
            EdgeType::Calls => "CALLS",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "HAS_FILE" => EdgeType::HasFile,
            "CONTAINS" => EdgeType::Contains,
            "DEFINES_IN" => EdgeType::DefinesIn,
            "MODIFIES" => EdgeType::Modifies,
            "HAS" => EdgeType::Has,
            "AFFECTS" => EdgeType::Affects,
            "BASED_ON" => EdgeType::BasedOn,
            "HEAD_AT" => EdgeType::HeadAt,
            "HAS_CHANGESET" => EdgeType::HasChangeSet,
            "IMPORTS" => EdgeType::Imports,
            "TESTS" => EdgeType::Tests,
            "CALLS" => EdgeType::Calls,
            _ => return None,
        })
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed, typed edge. Identity is the 4-tuple `(src, type, dst, at)` —
/// `at` scopes the edge to a Snapshot or ChangeSet so the same relation can
/// recur across many contexts without conflation (§3.2, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub src: NodeId,
    pub edge_type: EdgeType,
    pub dst: NodeId,
    pub at: Option<NodeId>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_round_trips_through_str() {
        for k in [
            NodeKind::File,
            NodeKind::Module,
            NodeKind::Symbol,
            NodeKind::Snapshot,
            NodeKind::ChangeSet,
            NodeKind::ChangeType,
            NodeKind::Workspace,
            NodeKind::Review,
            NodeKind::ReviewComment,
        ] {
            assert_eq!(NodeKind::from_str(k.as_str()), Some(k));
        }
    }

    #[test]
    fn identity_addressing_matches_spec_kinds() {
        assert!(NodeKind::Workspace.is_identity_addressed());
        assert!(NodeKind::Review.is_identity_addressed());
        assert!(NodeKind::ReviewComment.is_identity_addressed());
        assert!(!NodeKind::File.is_identity_addressed());
        assert!(!NodeKind::Snapshot.is_identity_addressed());
    }

    #[test]
    fn edge_type_round_trips_through_str() {
        for e in [
            EdgeType::HasFile,
            EdgeType::Contains,
            EdgeType::DefinesIn,
            EdgeType::Modifies,
            EdgeType::Has,
            EdgeType::Affects,
            EdgeType::BasedOn,
            EdgeType::HeadAt,
            EdgeType::HasChangeSet,
            EdgeType::Imports,
            EdgeType::Tests,
            EdgeType::Calls,
        ] {
            assert_eq!(EdgeType::from_str(e.as_str()), Some(e));
        }
    }
}
