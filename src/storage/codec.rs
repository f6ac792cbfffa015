//! Storage format codecs.
//!
//! A format codec turns the logical structures of a store (commits, table
//! snapshot roots, tables, the ref table, the store config) into chunks and
//! back. The set of formats is closed; the manifest's format tag selects one.
//!
//! - [`FormatVersion::V1`]: loose layout. Every chunk is pretty-printed JSON
//!   and every row is its own chunk, referenced from its table chunk.
//! - [`FormatVersion::V2`]: packed layout. Chunks carry a 5 byte header
//!   (`RDB2` + kind) followed by compact JSON, and rows are stored inline in
//!   their table chunk.
//!
//! The same logical value therefore hashes differently under each format,
//! which is why migration has to translate every reachable id.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::chunks::ChunkStore;
use crate::storage::commit::{CommitMeta, CommitRecord};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::manifest::StoreConfig;
use crate::storage::refs::RefTable;
use crate::storage::row::{check_columns, RootValue, Row, TableData};
use crate::storage::types::{BranchName, ChunkId, CommitId, RefName, RootId, RowKey, TableName};

/// storage format version tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatVersion {
    #[serde(rename = "__REVDB_1__")]
    V1,
    #[serde(rename = "__REVDB_2__")]
    V2,
}

impl FormatVersion {
    /// format used for new stores
    pub const LATEST: FormatVersion = FormatVersion::V2;

    /// the tag written into manifests
    pub fn code(self) -> &'static str {
        match self {
            FormatVersion::V1 => "__REVDB_1__",
            FormatVersion::V2 => "__REVDB_2__",
        }
    }

    pub fn parse(code: &str) -> StorageResult<Self> {
        match code {
            "__REVDB_1__" | "v1" | "1" => Ok(FormatVersion::V1),
            "__REVDB_2__" | "v2" | "2" => Ok(FormatVersion::V2),
            other => Err(StorageError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn codec(self) -> &'static dyn FormatCodec {
        match self {
            FormatVersion::V1 => &LooseJsonCodec,
            FormatVersion::V2 => &PackedCodec,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Encoding of the structural units of one storage format.
pub trait FormatCodec: Send + Sync {
    fn format(&self) -> FormatVersion;

    fn encode_commit(&self, commit: &CommitRecord) -> StorageResult<Vec<u8>>;
    fn decode_commit(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<CommitRecord>;

    fn encode_root(&self, root: &RootValue) -> StorageResult<Vec<u8>>;
    fn decode_root(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<RootValue>;

    /// write a table, including any row chunks the layout needs
    fn write_table(&self, chunks: &dyn ChunkStore, table: &TableData) -> StorageResult<ChunkId>;
    /// read a table, following any row chunks the layout uses
    fn read_table(&self, chunks: &dyn ChunkStore, id: ChunkId) -> StorageResult<TableData>;

    fn encode_refs(&self, refs: &RefTable) -> StorageResult<Vec<u8>>;
    fn decode_refs(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<RefTable>;

    fn encode_config(&self, config: &StoreConfig) -> StorageResult<Vec<u8>>;
    fn decode_config(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<StoreConfig>;
}

fn corrupted(id: ChunkId, format: FormatVersion, reason: impl fmt::Display) -> StorageError {
    StorageError::CorruptedChunk {
        id,
        format,
        reason: reason.to_string(),
    }
}

// ==================== V1: loose JSON ====================

/// Pretty JSON, one chunk per row.
pub struct LooseJsonCodec;

/// the tagged document every non-row V1 chunk decodes to
#[derive(Serialize, Deserialize)]
#[serde(tag = "_kind", rename_all = "snake_case")]
enum LooseDoc {
    Commit {
        parents: Vec<CommitId>,
        root: RootId,
        author_name: String,
        author_email: String,
        timestamp: DateTime<Utc>,
        message: String,
    },
    Root {
        tables: BTreeMap<TableName, ChunkId>,
    },
    Table {
        rows: BTreeMap<RowKey, ChunkId>,
    },
    Refs {
        refs: BTreeMap<RefName, ChunkId>,
    },
    Config {
        default_branch: BranchName,
    },
}

impl LooseDoc {
    fn kind(&self) -> &'static str {
        match self {
            LooseDoc::Commit { .. } => "commit",
            LooseDoc::Root { .. } => "root",
            LooseDoc::Table { .. } => "table",
            LooseDoc::Refs { .. } => "refs",
            LooseDoc::Config { .. } => "config",
        }
    }
}

/// uses `_` prefix for metadata fields to avoid conflicts with user columns
#[derive(Serialize, Deserialize)]
struct LooseRow {
    #[serde(rename = "_pk")]
    pk: RowKey,
    #[serde(rename = "_version")]
    version: u64,
    #[serde(rename = "_created_at")]
    created_at: String,
    #[serde(rename = "_updated_at")]
    updated_at: String,
    #[serde(flatten)]
    data: BTreeMap<String, Value>,
}

impl LooseJsonCodec {
    fn encode(doc: &LooseDoc) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(doc)?)
    }

    fn decode(id: ChunkId, bytes: &[u8], expected: &str) -> StorageResult<LooseDoc> {
        let doc: LooseDoc =
            serde_json::from_slice(bytes).map_err(|e| corrupted(id, FormatVersion::V1, e))?;
        if doc.kind() != expected {
            return Err(corrupted(
                id,
                FormatVersion::V1,
                format!("expected {} chunk, found {}", expected, doc.kind()),
            ));
        }
        Ok(doc)
    }

    /// user columns share the object with the metadata fields
    fn encode_row(row: &Row) -> StorageResult<Vec<u8>> {
        check_columns(&row.data)?;
        let json = LooseRow {
            pk: row.key.clone(),
            version: row.version,
            created_at: row.created_at.clone(),
            updated_at: row.updated_at.clone(),
            data: row.data.clone(),
        };
        Ok(serde_json::to_vec_pretty(&json)?)
    }

    /// validates that the primary key in the chunk matches the table entry
    fn decode_row(id: ChunkId, bytes: &[u8], expected_key: &RowKey) -> StorageResult<Row> {
        let json: LooseRow =
            serde_json::from_slice(bytes).map_err(|e| corrupted(id, FormatVersion::V1, e))?;
        if &json.pk != expected_key {
            return Err(corrupted(
                id,
                FormatVersion::V1,
                format!(
                    "primary key mismatch: table entry says '{}' but content has '{}'",
                    expected_key, json.pk
                ),
            ));
        }
        Ok(Row {
            key: json.pk,
            version: json.version,
            created_at: json.created_at,
            updated_at: json.updated_at,
            data: json.data,
        })
    }
}

impl FormatCodec for LooseJsonCodec {
    fn format(&self) -> FormatVersion {
        FormatVersion::V1
    }

    fn encode_commit(&self, commit: &CommitRecord) -> StorageResult<Vec<u8>> {
        Self::encode(&LooseDoc::Commit {
            parents: commit.parents.clone(),
            root: commit.root,
            author_name: commit.meta.author_name.clone(),
            author_email: commit.meta.author_email.clone(),
            timestamp: commit.meta.timestamp,
            message: commit.meta.message.clone(),
        })
    }

    fn decode_commit(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<CommitRecord> {
        match Self::decode(id, bytes, "commit")? {
            LooseDoc::Commit {
                parents,
                root,
                author_name,
                author_email,
                timestamp,
                message,
            } => Ok(CommitRecord {
                parents,
                root,
                meta: CommitMeta {
                    author_name,
                    author_email,
                    timestamp,
                    message,
                },
            }),
            other => Err(corrupted(id, FormatVersion::V1, format!("unexpected {}", other.kind()))),
        }
    }

    fn encode_root(&self, root: &RootValue) -> StorageResult<Vec<u8>> {
        Self::encode(&LooseDoc::Root {
            tables: root.tables.clone(),
        })
    }

    fn decode_root(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<RootValue> {
        match Self::decode(id, bytes, "root")? {
            LooseDoc::Root { tables } => Ok(RootValue { tables }),
            other => Err(corrupted(id, FormatVersion::V1, format!("unexpected {}", other.kind()))),
        }
    }

    fn write_table(&self, chunks: &dyn ChunkStore, table: &TableData) -> StorageResult<ChunkId> {
        let mut rows = BTreeMap::new();
        for row in table.iter() {
            let id = chunks.put(&Self::encode_row(row)?)?;
            rows.insert(row.key.clone(), id);
        }
        chunks.put(&Self::encode(&LooseDoc::Table { rows })?)
    }

    fn read_table(&self, chunks: &dyn ChunkStore, id: ChunkId) -> StorageResult<TableData> {
        let bytes = chunks.get(id)?;
        let entries = match Self::decode(id, &bytes, "table")? {
            LooseDoc::Table { rows } => rows,
            other => return Err(corrupted(id, FormatVersion::V1, format!("unexpected {}", other.kind()))),
        };

        let mut table = TableData::new();
        for (key, row_id) in entries {
            let row = Self::decode_row(row_id, &chunks.get(row_id)?, &key)?;
            table.rows.insert(key, row);
        }
        Ok(table)
    }

    fn encode_refs(&self, refs: &RefTable) -> StorageResult<Vec<u8>> {
        Self::encode(&LooseDoc::Refs {
            refs: refs.entries().map(|(name, id)| (name.clone(), id)).collect(),
        })
    }

    fn decode_refs(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<RefTable> {
        match Self::decode(id, bytes, "refs")? {
            LooseDoc::Refs { refs } => Ok(RefTable::from_entries(refs)),
            other => Err(corrupted(id, FormatVersion::V1, format!("unexpected {}", other.kind()))),
        }
    }

    fn encode_config(&self, config: &StoreConfig) -> StorageResult<Vec<u8>> {
        Self::encode(&LooseDoc::Config {
            default_branch: config.default_branch.clone(),
        })
    }

    fn decode_config(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<StoreConfig> {
        match Self::decode(id, bytes, "config")? {
            LooseDoc::Config { default_branch } => Ok(StoreConfig { default_branch }),
            other => Err(corrupted(id, FormatVersion::V1, format!("unexpected {}", other.kind()))),
        }
    }
}

// ==================== V2: packed ====================

/// Header-tagged compact JSON, rows inline.
pub struct PackedCodec;

const PACKED_MAGIC: &[u8; 4] = b"RDB2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum PackedKind {
    Commit = b'c',
    Root = b'r',
    Table = b't',
    Refs = b'f',
    Config = b'g',
}

#[derive(Serialize, Deserialize)]
struct PackedCommit {
    p: Vec<CommitId>,
    r: RootId,
    a: (String, String),
    t: DateTime<Utc>,
    m: String,
}

#[derive(Serialize, Deserialize)]
struct PackedRoot {
    t: BTreeMap<TableName, ChunkId>,
}

/// (key, version, created_at, updated_at, columns)
type PackedRow = (RowKey, u64, String, String, BTreeMap<String, Value>);

#[derive(Serialize, Deserialize)]
struct PackedTable {
    rows: Vec<PackedRow>,
}

#[derive(Serialize, Deserialize)]
struct PackedRefs {
    refs: Vec<(RefName, ChunkId)>,
}

#[derive(Serialize, Deserialize)]
struct PackedConfig {
    default_branch: BranchName,
}

impl PackedCodec {
    fn encode<T: Serialize>(kind: PackedKind, value: &T) -> StorageResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(PACKED_MAGIC);
        bytes.push(kind as u8);
        serde_json::to_writer(&mut bytes, value)?;
        Ok(bytes)
    }

    fn decode<T: DeserializeOwned>(id: ChunkId, bytes: &[u8], kind: PackedKind) -> StorageResult<T> {
        let body = match bytes {
            [m0, m1, m2, m3, k, body @ ..] if [*m0, *m1, *m2, *m3] == *PACKED_MAGIC => {
                if *k != kind as u8 {
                    return Err(corrupted(
                        id,
                        FormatVersion::V2,
                        format!("expected {:?} chunk, found kind byte {:#04x}", kind, k),
                    ));
                }
                body
            }
            _ => return Err(corrupted(id, FormatVersion::V2, "missing packed chunk header")),
        };
        serde_json::from_slice(body).map_err(|e| corrupted(id, FormatVersion::V2, e))
    }
}

impl FormatCodec for PackedCodec {
    fn format(&self) -> FormatVersion {
        FormatVersion::V2
    }

    fn encode_commit(&self, commit: &CommitRecord) -> StorageResult<Vec<u8>> {
        Self::encode(
            PackedKind::Commit,
            &PackedCommit {
                p: commit.parents.clone(),
                r: commit.root,
                a: (commit.meta.author_name.clone(), commit.meta.author_email.clone()),
                t: commit.meta.timestamp,
                m: commit.meta.message.clone(),
            },
        )
    }

    fn decode_commit(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<CommitRecord> {
        let packed: PackedCommit = Self::decode(id, bytes, PackedKind::Commit)?;
        Ok(CommitRecord {
            parents: packed.p,
            root: packed.r,
            meta: CommitMeta {
                author_name: packed.a.0,
                author_email: packed.a.1,
                timestamp: packed.t,
                message: packed.m,
            },
        })
    }

    fn encode_root(&self, root: &RootValue) -> StorageResult<Vec<u8>> {
        Self::encode(PackedKind::Root, &PackedRoot { t: root.tables.clone() })
    }

    fn decode_root(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<RootValue> {
        let packed: PackedRoot = Self::decode(id, bytes, PackedKind::Root)?;
        Ok(RootValue { tables: packed.t })
    }

    fn write_table(&self, chunks: &dyn ChunkStore, table: &TableData) -> StorageResult<ChunkId> {
        let rows = table
            .iter()
            .map(|row| {
                (
                    row.key.clone(),
                    row.version,
                    row.created_at.clone(),
                    row.updated_at.clone(),
                    row.data.clone(),
                )
            })
            .collect();
        chunks.put(&Self::encode(PackedKind::Table, &PackedTable { rows })?)
    }

    fn read_table(&self, chunks: &dyn ChunkStore, id: ChunkId) -> StorageResult<TableData> {
        let packed: PackedTable = Self::decode(id, &chunks.get(id)?, PackedKind::Table)?;
        let mut table = TableData::new();
        for (key, version, created_at, updated_at, data) in packed.rows {
            let row = Row {
                key: key.clone(),
                version,
                created_at,
                updated_at,
                data,
            };
            if table.rows.insert(key.clone(), row).is_some() {
                return Err(corrupted(id, FormatVersion::V2, format!("duplicate row key {}", key)));
            }
        }
        Ok(table)
    }

    fn encode_refs(&self, refs: &RefTable) -> StorageResult<Vec<u8>> {
        Self::encode(
            PackedKind::Refs,
            &PackedRefs {
                refs: refs.entries().map(|(name, id)| (name.clone(), id)).collect(),
            },
        )
    }

    fn decode_refs(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<RefTable> {
        let packed: PackedRefs = Self::decode(id, bytes, PackedKind::Refs)?;
        Ok(RefTable::from_entries(packed.refs))
    }

    fn encode_config(&self, config: &StoreConfig) -> StorageResult<Vec<u8>> {
        Self::encode(
            PackedKind::Config,
            &PackedConfig {
                default_branch: config.default_branch.clone(),
            },
        )
    }

    fn decode_config(&self, id: ChunkId, bytes: &[u8]) -> StorageResult<StoreConfig> {
        let packed: PackedConfig = Self::decode(id, bytes, PackedKind::Config)?;
        Ok(StoreConfig {
            default_branch: packed.default_branch,
        })
    }
}
