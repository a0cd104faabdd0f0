//! Change events, resume tokens and stream identity.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// A JSON document as delivered by the change feed.
///
/// Key order is preserved so that serialized documents keep their source
/// layout.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// The kind of mutation a change event describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// A new document was inserted.
    Insert,
    /// A document was updated in place.
    Update,
    /// A document was replaced.
    Replace,
    /// A document was deleted.
    Delete,
    /// The stream can no longer continue (collection dropped or renamed).
    Invalidate,
    /// Any operation this crate does not model.
    Other(String),
}

impl OperationType {
    /// Returns the feed's name for this operation.
    pub fn as_str(&self) -> &str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Replace => "replace",
            OperationType::Delete => "delete",
            OperationType::Invalidate => "invalidate",
            OperationType::Other(name) => name,
        }
    }

    /// Returns true for inserts.
    pub fn is_insert(&self) -> bool {
        matches!(self, OperationType::Insert)
    }
}

impl FromStr for OperationType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "insert" => OperationType::Insert,
            "update" => OperationType::Update,
            "replace" => OperationType::Replace,
            "delete" => OperationType::Delete,
            "invalidate" => OperationType::Invalidate,
            other => OperationType::Other(other.to_string()),
        })
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque position in the feed's total order.
///
/// Tokens are compared only for equality; their ordering is defined by the
/// feed, not by their bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ResumeToken(Vec<u8>);

impl ResumeToken {
    /// Wraps raw token bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parses a lowercase or uppercase hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() % 2 != 0 {
            return None;
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
            .collect::<Option<Vec<u8>>>()?;
        Some(Self(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the token, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Hex encoding of the token.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResumeToken({})", self.to_hex())
    }
}

/// A single event from the change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// The mutation kind.
    pub operation: OperationType,
    /// The post-image of the document (present for inserts).
    pub full_document: Option<Document>,
    /// Position of this event in the feed.
    pub resume_token: ResumeToken,
    /// Time the mutation was committed on the source.
    pub cluster_time: DateTime<Utc>,
}

impl ChangeEvent {
    /// Creates an insert event.
    pub fn insert(token: ResumeToken, document: Document, cluster_time: DateTime<Utc>) -> Self {
        Self {
            operation: OperationType::Insert,
            full_document: Some(document),
            resume_token: token,
            cluster_time,
        }
    }

    /// Creates an event of any kind without a document.
    pub fn without_document(
        operation: OperationType,
        token: ResumeToken,
        cluster_time: DateTime<Utc>,
    ) -> Self {
        Self {
            operation,
            full_document: None,
            resume_token: token,
            cluster_time,
        }
    }
}

/// Identifies one watched collection: `database.collection`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    database: String,
    collection: String,
}

impl StreamId {
    /// Creates a stream identity.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Parses `database.collection`; the collection may itself contain dots.
    pub fn parse(s: &str) -> Option<Self> {
        let (database, collection) = s.split_once('.')?;
        if database.is_empty() || collection.is_empty() {
            return None;
        }
        Some(Self::new(database, collection))
    }

    /// Database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// A file-name-safe key for per-stream storage.
    pub fn storage_key(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names() {
        assert_eq!("insert".parse::<OperationType>().unwrap(), OperationType::Insert);
        assert_eq!(
            "drop".parse::<OperationType>().unwrap(),
            OperationType::Other("drop".into())
        );
        assert_eq!(OperationType::Delete.to_string(), "delete");
        assert!(!OperationType::Update.is_insert());
    }

    #[test]
    fn token_hex() {
        let token = ResumeToken::from_bytes(vec![0x00, 0xab, 0xff]);
        assert_eq!(token.to_string(), "00abff");
        assert_eq!(ResumeToken::from_hex("00ABff"), Some(token));
        assert_eq!(ResumeToken::from_hex("abc"), None);
        assert_eq!(ResumeToken::from_hex("zz"), None);
    }

    #[test]
    fn stream_id_parse() {
        let id = StreamId::parse("shop.orders.archive").unwrap();
        assert_eq!(id.database(), "shop");
        assert_eq!(id.collection(), "orders.archive");
        assert_eq!(id.to_string(), "shop.orders.archive");
        assert!(StreamId::parse("nodot").is_none());
        assert!(StreamId::parse(".orders").is_none());
    }

    #[test]
    fn storage_key_is_file_safe() {
        let id = StreamId::new("my db", "a/b");
        assert_eq!(id.storage_key(), "my_db.a_b");
    }
}
