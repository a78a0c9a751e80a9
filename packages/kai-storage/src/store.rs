//! The embedded graph + blob store (C2, §4.2).
//!
//! One [`SqliteStore`] per repository. Writes are serialized through a
//! single [`rusqlite::Connection`] guarded by a `Mutex`; a [`Tx`] holds the
//! mutex guard for its whole lifetime, so any two transactions — on one
//! thread or several — are strictly ordered by whoever acquires the guard
//! first (§5 "single writer, many readers", simplified here to "single
//! writer, one connection").

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use crate::canonical::{blob_hash, canonical_json, node_id, NodeId};
use crate::error::{ErrorKind, Result, StorageError};
use crate::model::{Edge, EdgeType, Node, NodeKind};
use crate::schema::{SCHEMA, NO_CONTEXT};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// A handle to an in-progress transaction. Dropping it without calling
/// [`Tx::commit`] rolls it back.
pub struct Tx<'s> {
    guard: MutexGuard<'s, Connection>,
    committed: bool,
}

impl<'s> Tx<'s> {
    pub fn commit(mut self) -> Result<()> {
        self.guard.execute_batch("COMMIT")?;
        self.committed = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.guard.execute_batch("ROLLBACK")?;
        self.committed = true; // prevent double-rollback in Drop
        Ok(())
    }

    fn conn(&self) -> &Connection {
        &self.guard
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.guard.execute_batch("ROLLBACK");
        }
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn begin_tx(&self) -> Result<Tx<'_>> {
        let guard = self.conn.lock().expect("store mutex poisoned");
        guard.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Tx {
            guard,
            committed: false,
        })
    }

    // -- Node operations -----------------------------------------------

    /// Insert a content-addressed node if not already present. Idempotent:
    /// a second insert with an equal payload is a no-op and returns the
    /// same id (§3.1, invariant 4).
    pub fn insert_node(&self, tx: &Tx, kind: NodeKind, payload: Value, created_at: i64) -> Result<NodeId> {
        debug_assert!(!kind.is_identity_addressed());
        let id = node_id(kind.as_str(), &payload);
        let canonical = canonical_json(&payload);
        let payload_text = serde_json::to_string(&payload)?;
        tx.conn().execute(
            "INSERT OR IGNORE INTO nodes (id, kind, payload, canonical_bytes, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.as_slice(), kind.as_str(), payload_text, canonical, created_at],
        )?;
        Ok(id)
    }

    /// Insert an identity-addressed node with an externally minted id
    /// (Workspace/Review/ReviewComment).
    pub fn insert_identity_node(
        &self,
        tx: &Tx,
        kind: NodeKind,
        id: NodeId,
        payload: Value,
        created_at: i64,
    ) -> Result<()> {
        debug_assert!(kind.is_identity_addressed());
        let payload_text = serde_json::to_string(&payload)?;
        tx.conn().execute(
            "INSERT INTO nodes (id, kind, payload, canonical_bytes, created_at) VALUES (?1, ?2, ?3, NULL, ?4)",
            params![id.as_slice(), kind.as_str(), payload_text, created_at],
        )?;
        Ok(())
    }

    /// Mutate the payload of an identity-addressed node. Fails for
    /// content-addressed kinds.
    pub fn update_payload(&self, tx: &Tx, id: &NodeId, payload: Value) -> Result<()> {
        let existing = self.get_node_tx(tx, id)?;
        if !existing.kind.is_identity_addressed() {
            return Err(StorageError::new(
                ErrorKind::CorruptStore,
                format!("cannot mutate payload of content-addressed node {}", crate::canonical::hex(id)),
            ));
        }
        let payload_text = serde_json::to_string(&payload)?;
        tx.conn().execute(
            "UPDATE nodes SET payload = ?1 WHERE id = ?2",
            params![payload_text, id.as_slice()],
        )?;
        Ok(())
    }

    pub fn get_node(&self, id: &NodeId) -> Result<Node> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Self::get_node_conn(&conn, id)
    }

    fn get_node_tx(&self, tx: &Tx, id: &NodeId) -> Result<Node> {
        Self::get_node_conn(tx.conn(), id)
    }

    fn get_node_conn(conn: &Connection, id: &NodeId) -> Result<Node> {
        conn.query_row(
            "SELECT id, kind, payload, created_at FROM nodes WHERE id = ?1",
            params![id.as_slice()],
            Self::row_to_node,
        )
        .optional()?
        .ok_or_else(|| StorageError::not_found(format!("node not found: {}", crate::canonical::hex(id))))
    }

    pub fn get_nodes_by_kind(&self, kind: NodeKind) -> Result<Vec<Node>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, kind, payload, created_at FROM nodes WHERE kind = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![kind.as_str()], Self::row_to_node)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
        let id_bytes: Vec<u8> = row.get(0)?;
        let kind_str: String = row.get(1)?;
        let payload_text: String = row.get(2)?;
        let created_at: i64 = row.get(3)?;
        let mut id = [0u8; 32];
        id.copy_from_slice(&id_bytes);
        let kind = NodeKind::from_str(&kind_str).unwrap_or(NodeKind::File);
        let payload: Value = serde_json::from_str(&payload_text).unwrap_or(Value::Null);
        Ok(Node {
            id,
            kind,
            payload,
            created_at,
        })
    }

    /// Re-derive a content-addressed node's id from its stored canonical
    /// bytes and compare against the stored id (invariant 1 / `CorruptStore`).
    pub fn verify_integrity(&self, id: &NodeId) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let row: Option<(String, Vec<u8>)> = conn
            .query_row(
                "SELECT kind, canonical_bytes FROM nodes WHERE id = ?1 AND canonical_bytes IS NOT NULL",
                params![id.as_slice()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        if let Some((kind, canonical_bytes)) = row {
            let mut hasher = blake3::Hasher::new();
            hasher.update(kind.as_bytes());
            hasher.update(b"\n");
            hasher.update(&canonical_bytes);
            let recomputed = *hasher.finalize().as_bytes();
            if &recomputed != id {
                return Err(StorageError::corrupt_store(format!(
                    "node {} re-hashes to a different id",
                    crate::canonical::hex(id)
                )));
            }
        }
        Ok(())
    }

    // -- Edge operations -------------------------------------------------

    pub fn insert_edge(
        &self,
        tx: &Tx,
        src: &NodeId,
        edge_type: EdgeType,
        dst: &NodeId,
        at: Option<&NodeId>,
        created_at: i64,
    ) -> Result<()> {
        let at_bytes = at.copied().unwrap_or(NO_CONTEXT);
        tx.conn().execute(
            "INSERT OR IGNORE INTO edges (src, edge_type, dst, at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![src.as_slice(), edge_type.as_str(), dst.as_slice(), at_bytes.as_slice(), created_at],
        )?;
        Ok(())
    }

    pub fn delete_edge(&self, tx: &Tx, src: &NodeId, edge_type: EdgeType, dst: &NodeId) -> Result<()> {
        tx.conn().execute(
            "DELETE FROM edges WHERE src = ?1 AND edge_type = ?2 AND dst = ?3",
            params![src.as_slice(), edge_type.as_str(), dst.as_slice()],
        )?;
        Ok(())
    }

    /// `HEAD_AT` is a singleton per workspace (invariant 3): inserting a new
    /// one atomically removes any prior edge of that type from `src`.
    pub fn set_singleton_edge(
        &self,
        tx: &Tx,
        src: &NodeId,
        edge_type: EdgeType,
        dst: &NodeId,
        created_at: i64,
    ) -> Result<()> {
        tx.conn().execute(
            "DELETE FROM edges WHERE src = ?1 AND edge_type = ?2",
            params![src.as_slice(), edge_type.as_str()],
        )?;
        self.insert_edge(tx, src, edge_type, dst, None, created_at)
    }

    pub fn get_edges(&self, src: &NodeId, edge_type: EdgeType) -> Result<Vec<Edge>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT src, edge_type, dst, at, created_at FROM edges WHERE src = ?1 AND edge_type = ?2 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![src.as_slice(), edge_type.as_str()], Self::row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_edges_to(&self, dst: &NodeId, edge_type: EdgeType) -> Result<Vec<Edge>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT src, edge_type, dst, at, created_at FROM edges WHERE dst = ?1 AND edge_type = ?2 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![dst.as_slice(), edge_type.as_str()], Self::row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_edges_by_context(&self, at: &NodeId, edge_type: EdgeType) -> Result<Vec<Edge>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT src, edge_type, dst, at, created_at FROM edges WHERE at = ?1 AND edge_type = ?2 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![at.as_slice(), edge_type.as_str()], Self::row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_edges_by_context_and_dst(
        &self,
        at: &NodeId,
        edge_type: EdgeType,
        dst: &NodeId,
    ) -> Result<Vec<Edge>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT src, edge_type, dst, at, created_at FROM edges WHERE at = ?1 AND edge_type = ?2 AND dst = ?3 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![at.as_slice(), edge_type.as_str(), dst.as_slice()], Self::row_to_edge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<Edge> {
        let src: Vec<u8> = row.get(0)?;
        let edge_type: String = row.get(1)?;
        let dst: Vec<u8> = row.get(2)?;
        let at: Vec<u8> = row.get(3)?;
        let created_at: i64 = row.get(4)?;
        let mut src_id = [0u8; 32];
        src_id.copy_from_slice(&src);
        let mut dst_id = [0u8; 32];
        dst_id.copy_from_slice(&dst);
        let mut at_id = [0u8; 32];
        at_id.copy_from_slice(&at);
        Ok(Edge {
            src: src_id,
            edge_type: EdgeType::from_str(&edge_type).unwrap_or(EdgeType::Has),
            dst: dst_id,
            at: if at_id == NO_CONTEXT { None } else { Some(at_id) },
            created_at,
        })
    }

    // -- Blob operations ---------------------------------------------------

    /// Write-once by digest; a duplicate write of identical bytes is a no-op.
    pub fn write_blob(&self, tx: &Tx, bytes: &[u8]) -> Result<String> {
        let digest = crate::canonical::hex(&blob_hash(bytes));
        tx.conn().execute(
            "INSERT OR IGNORE INTO blobs (digest, bytes) VALUES (?1, ?2)",
            params![digest, bytes],
        )?;
        Ok(digest)
    }

    pub fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT bytes FROM blobs WHERE digest = ?1",
            params![digest],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| StorageError::blob_missing(digest))
    }

    // -- Refs & slugs --------------------------------------------------

    pub fn set_ref(&self, tx: &Tx, name: &str, id: &NodeId, kind: NodeKind, now: i64) -> Result<()> {
        let existing_created: Option<i64> = tx
            .conn()
            .query_row(
                "SELECT created_at FROM refs WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        let created_at = existing_created.unwrap_or(now);
        tx.conn().execute(
            "INSERT INTO refs (name, target_id, target_kind, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET target_id = excluded.target_id, target_kind = excluded.target_kind, updated_at = excluded.updated_at",
            params![name, id.as_slice(), kind.as_str(), created_at, now],
        )?;
        debug!(name, "ref updated");
        Ok(())
    }

    pub fn get_ref(&self, name: &str) -> Result<(NodeId, NodeKind)> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let row: Option<(Vec<u8>, String)> = conn
            .query_row(
                "SELECT target_id, target_kind FROM refs WHERE name = ?1",
                params![name],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let (id_bytes, kind_str) = row.ok_or_else(|| StorageError::not_found(format!("ref not found: {name}")))?;
        let mut id = [0u8; 32];
        id.copy_from_slice(&id_bytes);
        let kind = NodeKind::from_str(&kind_str)
            .ok_or_else(|| StorageError::corrupt_store(format!("ref {name} has unknown kind {kind_str}")))?;
        Ok((id, kind))
    }

    pub fn list_refs(&self, kind: Option<NodeKind>) -> Result<Vec<(String, NodeId, NodeKind)>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT name, target_id, target_kind FROM refs ORDER BY name")?;
        let rows = stmt
            .query_map(params![], |r| {
                let name: String = r.get(0)?;
                let id_bytes: Vec<u8> = r.get(1)?;
                let kind_str: String = r.get(2)?;
                Ok((name, id_bytes, kind_str))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut out = Vec::new();
        for (name, id_bytes, kind_str) in rows {
            let Some(k) = NodeKind::from_str(&kind_str) else { continue };
            if let Some(filter) = kind {
                if filter != k {
                    continue;
                }
            }
            let mut id = [0u8; 32];
            id.copy_from_slice(&id_bytes);
            out.push((name, id, k));
        }
        Ok(out)
    }

    pub fn delete_ref(&self, tx: &Tx, name: &str) -> Result<()> {
        tx.conn().execute("DELETE FROM refs WHERE name = ?1", params![name])?;
        Ok(())
    }

    pub fn set_slug(&self, tx: &Tx, id: &NodeId, slug: &str) -> Result<()> {
        tx.conn().execute(
            "INSERT INTO slugs (target_id, slug) VALUES (?1, ?2)
             ON CONFLICT(target_id) DO UPDATE SET slug = excluded.slug",
            params![id.as_slice(), slug],
        )?;
        Ok(())
    }

    pub fn get_slug(&self, id: &NodeId) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT slug FROM slugs WHERE target_id = ?1",
            params![id.as_slice()],
            |r| r.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn resolve_slug(&self, slug: &str) -> Result<Option<NodeId>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let id_bytes: Option<Vec<u8>> = conn
            .query_row("SELECT target_id FROM slugs WHERE slug = ?1", params![slug], |r| r.get(0))
            .optional()?;
        Ok(id_bytes.map(|b| {
            let mut id = [0u8; 32];
            id.copy_from_slice(&b);
            id
        }))
    }

    // -- Logs ---------------------------------------------------------

    /// Assign the next `seq` for `kind` and record it, atomically within `tx`.
    pub fn append_log(&self, tx: &Tx, kind: NodeKind, id: &NodeId) -> Result<i64> {
        let next_seq: i64 = tx
            .conn()
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM logs WHERE kind = ?1",
                params![kind.as_str()],
                |r| r.get(0),
            )?;
        tx.conn().execute(
            "INSERT INTO logs (kind, seq, id) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), next_seq, id.as_slice()],
        )?;
        Ok(next_seq)
    }

    pub fn latest_log(&self, kind: NodeKind) -> Result<Option<NodeId>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let id_bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT id FROM logs WHERE kind = ?1 ORDER BY seq DESC LIMIT 1",
                params![kind.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id_bytes.map(|b| {
            let mut id = [0u8; 32];
            id.copy_from_slice(&b);
            id
        }))
    }

    pub fn log_at(&self, kind: NodeKind, seq: i64) -> Result<Option<NodeId>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let id_bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT id FROM logs WHERE kind = ?1 AND seq = ?2",
                params![kind.as_str(), seq],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id_bytes.map(|b| {
            let mut id = [0u8; 32];
            id.copy_from_slice(&b);
            id
        }))
    }

    pub fn log_len(&self, kind: NodeKind) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM logs WHERE kind = ?1",
            params![kind.as_str()],
            |r| r.get(0),
        )
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::node_id;
    use serde_json::json;

    #[test]
    fn insert_node_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let p = json!({"path": "a.rs", "lang": "rust", "digest": "x"});
        let id1 = store.insert_node(&tx, NodeKind::File, p.clone(), 1).unwrap();
        let id2 = store.insert_node(&tx, NodeKind::File, p.clone(), 2).unwrap();
        tx.commit().unwrap();
        assert_eq!(id1, id2);
        assert_eq!(id1, node_id("File", &p));

        let count: i64 = {
            let conn = store.conn.lock().unwrap();
            conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0)).unwrap()
        };
        assert_eq!(count, 1);
    }

    #[test]
    fn rollback_discards_writes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let p = json!({"path": "a.rs", "lang": "rust", "digest": "x"});
        let id = store.insert_node(&tx, NodeKind::File, p, 1).unwrap();
        tx.rollback().unwrap();

        let err = store.get_node(&id).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn dropping_tx_without_commit_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = {
            let tx = store.begin_tx().unwrap();
            let p = json!({"path": "a.rs", "lang": "rust", "digest": "x"});
            store.insert_node(&tx, NodeKind::File, p, 1).unwrap()
            // tx dropped here without commit
        };
        assert!(store.get_node(&id).is_err());
    }

    #[test]
    fn edge_insertion_is_idempotent_per_context() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let a = store
            .insert_node(&tx, NodeKind::Snapshot, json!({"sourceType":"dir","sourceRef":"x","fileCount":0,"createdAt":1,"fileDigests":[]}), 1)
            .unwrap();
        let b = store
            .insert_node(&tx, NodeKind::File, json!({"path":"a.rs","lang":"rust","digest":"d"}), 1)
            .unwrap();
        store.insert_edge(&tx, &a, EdgeType::HasFile, &b, None, 1).unwrap();
        store.insert_edge(&tx, &a, EdgeType::HasFile, &b, None, 1).unwrap();
        tx.commit().unwrap();

        let edges = store.get_edges(&a, EdgeType::HasFile).unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn singleton_edge_replaces_prior() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let ws = [1u8; 32];
        store
            .insert_identity_node(&tx, NodeKind::Workspace, ws, json!({"name":"w"}), 1)
            .unwrap();
        let s1 = store
            .insert_node(&tx, NodeKind::Snapshot, json!({"sourceType":"dir","sourceRef":"1","fileCount":0,"createdAt":1,"fileDigests":[]}), 1)
            .unwrap();
        let s2 = store
            .insert_node(&tx, NodeKind::Snapshot, json!({"sourceType":"dir","sourceRef":"2","fileCount":0,"createdAt":2,"fileDigests":[]}), 1)
            .unwrap();
        store.set_singleton_edge(&tx, &ws, EdgeType::HeadAt, &s1, 1).unwrap();
        store.set_singleton_edge(&tx, &ws, EdgeType::HeadAt, &s2, 2).unwrap();
        tx.commit().unwrap();

        let edges = store.get_edges(&ws, EdgeType::HeadAt).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].dst, s2);
    }

    #[test]
    fn write_blob_is_idempotent_and_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let d1 = store.write_blob(&tx, b"hello").unwrap();
        let d2 = store.write_blob(&tx, b"hello").unwrap();
        tx.commit().unwrap();
        assert_eq!(d1, d2);
        assert_eq!(store.read_blob(&d1).unwrap(), b"hello");
    }

    #[test]
    fn read_missing_blob_errors() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.read_blob(&"00".repeat(32)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BlobMissing);
    }

    #[test]
    fn refs_update_in_place_and_preserve_created_at() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let a = store
            .insert_node(&tx, NodeKind::Snapshot, json!({"sourceType":"dir","sourceRef":"1","fileCount":0,"createdAt":1,"fileDigests":[]}), 1)
            .unwrap();
        let b = store
            .insert_node(&tx, NodeKind::Snapshot, json!({"sourceType":"dir","sourceRef":"2","fileCount":0,"createdAt":2,"fileDigests":[]}), 1)
            .unwrap();
        store.set_ref(&tx, "snap.latest", &a, NodeKind::Snapshot, 100).unwrap();
        store.set_ref(&tx, "snap.latest", &b, NodeKind::Snapshot, 200).unwrap();
        tx.commit().unwrap();

        let (resolved, kind) = store.get_ref("snap.latest").unwrap();
        assert_eq!(resolved, b);
        assert_eq!(kind, NodeKind::Snapshot);
    }

    #[test]
    fn logs_assign_monotonic_seq() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let a = store
            .insert_node(&tx, NodeKind::Snapshot, json!({"sourceType":"dir","sourceRef":"1","fileCount":0,"createdAt":1,"fileDigests":[]}), 1)
            .unwrap();
        let b = store
            .insert_node(&tx, NodeKind::Snapshot, json!({"sourceType":"dir","sourceRef":"2","fileCount":0,"createdAt":2,"fileDigests":[]}), 1)
            .unwrap();
        let seq1 = store.append_log(&tx, NodeKind::Snapshot, &a).unwrap();
        let seq2 = store.append_log(&tx, NodeKind::Snapshot, &b).unwrap();
        tx.commit().unwrap();

        assert_eq!(seq1, 1);
        assert_eq!(seq2, 2);
        assert_eq!(store.latest_log(NodeKind::Snapshot).unwrap(), Some(b));
        assert_eq!(store.log_at(NodeKind::Snapshot, 1).unwrap(), Some(a));
    }

    #[test]
    fn update_payload_rejects_content_addressed_nodes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let p = json!({"path":"a.rs","lang":"rust","digest":"x"});
        let id = store.insert_node(&tx, NodeKind::File, p, 1).unwrap();
        let err = store.update_payload(&tx, &id, json!({"path":"b.rs","lang":"rust","digest":"y"})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptStore);
    }

    #[test]
    fn update_payload_mutates_identity_addressed_nodes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let ws = [7u8; 32];
        store
            .insert_identity_node(&tx, NodeKind::Workspace, ws, json!({"status": "active"}), 1)
            .unwrap();
        store.update_payload(&tx, &ws, json!({"status": "shelved"})).unwrap();
        tx.commit().unwrap();

        let node = store.get_node(&ws).unwrap();
        assert_eq!(node.payload["status"], json!("shelved"));
    }

    #[test]
    fn verify_integrity_detects_tampering() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = store.begin_tx().unwrap();
        let p = json!({"path":"a.rs","lang":"rust","digest":"x"});
        let id = store.insert_node(&tx, NodeKind::File, p, 1).unwrap();
        tx.commit().unwrap();
        assert!(store.verify_integrity(&id).is_ok());

        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE nodes SET payload = '{\"path\":\"tampered\"}' WHERE id = ?1",
                params![id.as_slice()],
            )
            .unwrap();
        }
        assert!(store.verify_integrity(&id).is_err());
    }
}
