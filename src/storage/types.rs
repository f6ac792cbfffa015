//! core type-safe wrappers for the storage layer.

use std::fmt;
use std::str::FromStr;

use git2::{ObjectType, Oid};
use serde::{Deserialize, Serialize};

/// Content hash of a chunk.
///
/// The hash is the Git blob object id of the chunk bytes, so the Git-backed
/// store and the in-memory store agree on every address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId(pub(crate) Oid);

impl ChunkId {
    /// length of a full hex id
    pub const HEX_LEN: usize = 40;

    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// compute the address of `bytes` without storing them
    pub fn for_bytes(bytes: &[u8]) -> Result<Self, git2::Error> {
        Oid::hash_object(ObjectType::Blob, bytes).map(Self)
    }

    /// parse a full 40 character hex id
    pub fn from_hex(hex: &str) -> Result<Self, InvalidNameError> {
        if hex.len() != Self::HEX_LEN || !is_hex(hex) {
            return Err(InvalidNameError::InvalidHash(hex.to_string()));
        }
        Oid::from_str(hex)
            .map(Self)
            .map_err(|_| InvalidNameError::InvalidHash(hex.to_string()))
    }

    /// short form of the id
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ChunkId {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> Self {
        id.to_hex()
    }
}

/// Address of an encoded commit.
///
/// Keeps commit ids and root ids apart at compile time even though both are
/// chunk hashes underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub(crate) ChunkId);

impl CommitId {
    pub(crate) fn new(chunk: ChunkId) -> Self {
        Self(chunk)
    }

    pub fn chunk(&self) -> ChunkId {
        self.0
    }

    /// parse CommitId from a full hex string
    pub fn from_hex(hex: &str) -> Result<Self, InvalidNameError> {
        ChunkId::from_hex(hex).map(Self)
    }

    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of an encoded table snapshot root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootId(pub(crate) ChunkId);

impl RootId {
    pub(crate) fn new(chunk: ChunkId) -> Self {
        Self(chunk)
    }

    pub fn chunk(&self) -> ChunkId {
        self.0
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A validated table name.
///
/// Valid names:
/// - 1-64 characters
/// - Alphanumeric, underscores, hyphens only
/// - Must start with a letter or underscore
/// - Cannot be reserved names (_schema, _meta, etc.)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// reserved table names that can't be used
    const RESERVED: &'static [&'static str] = &["_schema", "_meta", "_system", "_refs"];

    /// create a new TableName, validating the input
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        let Some(first_char) = name.chars().next() else {
            return Err(InvalidNameError::Empty);
        };

        if name.len() > 64 {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            return Err(InvalidNameError::InvalidStart(first_char));
        }

        for (i, c) in name.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        if Self::RESERVED.contains(&name.to_lowercase().as_str()) {
            return Err(InvalidNameError::Reserved(name.to_string()));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TableName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TableName> for String {
    fn from(name: TableName) -> Self {
        name.0
    }
}

/// A validated row key (primary key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RowKey(String);

impl RowKey {
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    fn validate(key: &str) -> Result<(), InvalidNameError> {
        if key.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if key.len() > 128 {
            return Err(InvalidNameError::TooLong(key.len()));
        }

        for (i, c) in key.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generate a new ULID-based row key.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RowKey {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RowKey> for String {
    fn from(key: RowKey) -> Self {
        key.0
    }
}

/// Characters that would make a ref name ambiguous with revision syntax.
const REF_FORBIDDEN: &[char] = &['~', '^', ':', '?', '*', '[', '\\', ' ', '\t', '@', '\''];

fn validate_ref_name(name: &str) -> Result<(), InvalidNameError> {
    if name.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if name.len() > 255 {
        return Err(InvalidNameError::TooLong(name.len()));
    }
    if name.contains("..")
        || name.contains("//")
        || name.ends_with('/')
        || name.starts_with('/')
        || name.starts_with('-')
        || name.ends_with(".lock")
    {
        return Err(InvalidNameError::InvalidPath(name.to_string()));
    }
    if let Some((position, c)) = name
        .chars()
        .enumerate()
        .find(|(_, c)| REF_FORBIDDEN.contains(c) || c.is_control())
    {
        return Err(InvalidNameError::InvalidCharacter { char: c, position });
    }
    Ok(())
}

/// a branch name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// the initial default branch name
    pub const MAIN: &'static str = "main";

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self(name))
    }

    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    /// get the full ref path (e.g., "refs/heads/main")
    pub fn as_ref_path(&self) -> String {
        format!("{}{}", RefName::HEADS, self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchName> for String {
    fn from(name: BranchName) -> Self {
        name.0
    }
}

/// a tag name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagName(String);

impl TagName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fully qualified entry name in the ref table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RefName {
    Branch(BranchName),
    Tag(TagName),
    WorkingSet(BranchName),
}

impl RefName {
    pub const HEADS: &'static str = "refs/heads/";
    pub const TAGS: &'static str = "refs/tags/";
    pub const WORKING_SETS: &'static str = "refs/workingSets/";

    pub fn is_branch(&self) -> bool {
        matches!(self, RefName::Branch(_))
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefName::Branch(b) => write!(f, "{}{}", Self::HEADS, b),
            RefName::Tag(t) => write!(f, "{}{}", Self::TAGS, t),
            RefName::WorkingSet(b) => write!(f, "{}{}", Self::WORKING_SETS, b),
        }
    }
}

impl FromStr for RefName {
    type Err = InvalidNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix(Self::HEADS) {
            Ok(RefName::Branch(BranchName::new(name)?))
        } else if let Some(name) = s.strip_prefix(Self::TAGS) {
            Ok(RefName::Tag(TagName::new(name)?))
        } else if let Some(name) = s.strip_prefix(Self::WORKING_SETS) {
            Ok(RefName::WorkingSet(BranchName::new(name)?))
        } else {
            Err(InvalidNameError::InvalidPath(s.to_string()))
        }
    }
}

impl TryFrom<String> for RefName {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RefName> for String {
    fn from(name: RefName) -> Self {
        name.to_string()
    }
}

/// author/committer info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// default signature for store maintenance commits
    pub fn revdb() -> Self {
        Self::new("revdb", "revdb@localhost")
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::revdb()
    }
}

/// error type for invalid names (tables, rows, refs, hashes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidStart(char),
    InvalidCharacter { char: char, position: usize },
    Reserved(String),
    InvalidPath(String),
    InvalidHash(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidStart(c) => write!(f, "name cannot start with '{}'", c),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
            Self::Reserved(name) => write!(f, "'{}' is a reserved name", name),
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
            Self::InvalidHash(hash) => write!(f, "invalid hash: '{}'", hash),
        }
    }
}

impl std::error::Error for InvalidNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_valid() {
        assert!(TableName::new("users").is_ok());
        assert!(TableName::new("user_accounts").is_ok());
        assert!(TableName::new("User123").is_ok());
        assert!(TableName::new("_private").is_ok());
        assert!(TableName::new("my-table").is_ok());
    }

    #[test]
    fn test_table_name_invalid() {
        assert!(TableName::new("").is_err());
        assert!(TableName::new("123users").is_err());
        assert!(TableName::new("users/admin").is_err());
        assert!(TableName::new("_schema").is_err());
        assert!(TableName::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_branch_names() {
        assert!(BranchName::new("feature/login").is_ok());
        assert!(BranchName::new("main").is_ok());
        assert!(BranchName::new("").is_err());
        assert!(BranchName::new("a..b").is_err());
        assert!(BranchName::new("main~1").is_err());
        assert!(BranchName::new("x^").is_err());
        assert!(BranchName::new("-d").is_err());
        assert!(BranchName::new("trailing/").is_err());
        assert_eq!(BranchName::main().as_ref_path(), "refs/heads/main");
    }

    #[test]
    fn test_ref_name_paths() {
        let branch: RefName = "refs/heads/feature/x".parse().unwrap();
        assert_eq!(branch, RefName::Branch(BranchName::new("feature/x").unwrap()));

        let tag: RefName = "refs/tags/v1".parse().unwrap();
        assert_eq!(tag.to_string(), "refs/tags/v1");

        let ws: RefName = "refs/workingSets/main".parse().unwrap();
        assert_eq!(ws, RefName::WorkingSet(BranchName::main()));

        assert!("heads/main".parse::<RefName>().is_err());
    }

    #[test]
    fn test_chunk_id_hex() {
        let id = ChunkId::for_bytes(b"hello").unwrap();
        let parsed = ChunkId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 7);

        assert!(ChunkId::from_hex("abc").is_err());
        assert!(ChunkId::from_hex(&"z".repeat(40)).is_err());
    }

    #[test]
    fn test_chunk_id_matches_git_blob_id() {
        // `git hash-object` of "hello" with no trailing newline
        let id = ChunkId::for_bytes(b"hello").unwrap();
        assert_eq!(id.to_hex(), "b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0");
    }

    #[test]
    fn test_row_key_generate() {
        let key1 = RowKey::generate();
        let key2 = RowKey::generate();
        assert_ne!(key1, key2);
        assert_eq!(key1.as_str().len(), 26);
    }
}
