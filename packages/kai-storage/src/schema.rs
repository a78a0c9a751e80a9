//! On-disk schema for the embedded graph/blob store (§4.2, §6.1).

/// Edges have an optional `at` context (§3.2). SQLite's `UNIQUE`/primary-key
/// machinery treats every `NULL` as distinct from every other `NULL`, which
/// would break idempotent insertion for context-free edge types. Edges
/// without a context store this sentinel instead of `NULL`.
pub const NO_CONTEXT: [u8; 32] = [0u8; 32];

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id              BLOB PRIMARY KEY,
    kind            TEXT NOT NULL,
    payload         TEXT NOT NULL,
    canonical_bytes BLOB,
    created_at      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind);

CREATE TABLE IF NOT EXISTS edges (
    src         BLOB NOT NULL,
    edge_type   TEXT NOT NULL,
    dst         BLOB NOT NULL,
    at          BLOB NOT NULL,
    created_at  INTEGER NOT NULL,
    PRIMARY KEY (src, edge_type, dst, at),
    FOREIGN KEY (src) REFERENCES nodes(id),
    FOREIGN KEY (dst) REFERENCES nodes(id)
);

CREATE INDEX IF NOT EXISTS idx_edges_src_type ON edges(src, edge_type);
CREATE INDEX IF NOT EXISTS idx_edges_dst_type ON edges(dst, edge_type);
CREATE INDEX IF NOT EXISTS idx_edges_context ON edges(at, edge_type);

CREATE TABLE IF NOT EXISTS blobs (
    digest TEXT PRIMARY KEY,
    bytes  BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS refs (
    name        TEXT PRIMARY KEY,
    target_id   BLOB NOT NULL,
    target_kind TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS slugs (
    target_id BLOB PRIMARY KEY,
    slug      TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS logs (
    kind TEXT NOT NULL,
    seq  INTEGER NOT NULL,
    id   BLOB NOT NULL,
    PRIMARY KEY (kind, seq)
);
"#;
