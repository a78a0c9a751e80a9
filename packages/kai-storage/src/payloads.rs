//! Typed payload contracts (§3.3). Each struct is the strongly-typed shape
//! of a kind's `payload` field; construct one of these and serialize it with
//! `crate::canonical::to_canonical_value` rather than hand-building a
//! `serde_json::Value`, so an integer field can never drift into a float.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePayload {
    pub path: String,
    pub lang: String,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulePayload {
    pub name: String,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRange {
    pub start: [u32; 2],
    pub end: [u32; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolPayload {
    #[serde(rename = "fqName")]
    pub fq_name: String,
    pub kind: String,
    #[serde(rename = "fileId")]
    pub file_id: String,
    pub range: SymbolRange,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineFileMeta {
    pub path: String,
    pub lang: String,
    #[serde(rename = "fileId")]
    pub file_id: String,
    #[serde(rename = "contentDigest")]
    pub content_digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    #[serde(rename = "sourceType")]
    pub source_type: String,
    #[serde(rename = "sourceRef")]
    pub source_ref: String,
    #[serde(rename = "fileCount")]
    pub file_count: i64,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "fileDigests")]
    pub file_digests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<InlineFileMeta>>,
    /// Set only for merge-produced snapshots (§4.6.3 step 4).
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "integratedFrom")]
    pub integrated_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "targetSnapshot")]
    pub target_snapshot: Option<String>,
    /// Legacy snapshots may carry `gitRef` instead of `sourceRef` (§3.3);
    /// accepted on read, never written.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "gitRef")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSetPayload {
    pub base: String,
    pub head: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub intent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRangeEvidence {
    pub path: String,
    pub start: [u32; 2],
    pub end: [u32; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(rename = "fileRanges")]
    pub file_ranges: Vec<FileRangeEvidence>,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeTypePayload {
    pub category: String,
    pub evidence: Evidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Active,
    Shelved,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspacePayload {
    pub name: String,
    #[serde(rename = "baseSnapshot")]
    pub base_snapshot: String,
    #[serde(rename = "headSnapshot")]
    pub head_snapshot: String,
    pub status: WorkspaceStatus,
    #[serde(rename = "openChangeSets")]
    pub open_change_sets: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::to_canonical_value;

    #[test]
    fn snapshot_payload_round_trips_integers() {
        let p = SnapshotPayload {
            source_type: "dir".into(),
            source_ref: "/tmp/repo".into(),
            file_count: 3,
            created_at: 1_700_000_000_000,
            file_digests: vec!["ab".into()],
            files: None,
            integrated_from: None,
            target_snapshot: None,
            git_ref: None,
        };
        let v = to_canonical_value(&p);
        assert_eq!(v["fileCount"], serde_json::json!(3));
        assert!(v["fileCount"].is_i64());
    }

    #[test]
    fn legacy_git_ref_accepted_on_read() {
        let json = serde_json::json!({
            "sourceType": "git",
            "gitRef": "refs/heads/main",
            "sourceRef": "",
            "fileCount": 0,
            "createdAt": 0,
            "fileDigests": []
        });
        let p: SnapshotPayload = serde_json::from_value(json).unwrap();
        assert_eq!(p.git_ref.as_deref(), Some("refs/heads/main"));
    }
}
