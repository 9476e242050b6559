//! Wire format for the `_bulk` endpoint: newline-delimited action/metadata
//! lines interleaved with document body lines, and the response models.

use std::collections::HashMap;
use std::io::Read;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_with::skip_serializing_none;

use crate::error::IndexerError;

/// Operation kind requested for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Index,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Index => "index",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// Delete emits only the metadata line; everything else carries a body.
    pub fn has_body(&self) -> bool {
        !matches!(self, Action::Delete)
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "index" => Ok(Action::Index),
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(format!(
                "unknown bulk action '{other}' (expected index, create, update or delete)"
            )),
        }
    }
}

/// Byte source for a document body.
///
/// Owned bytes are the common case; a boxed reader allows streaming sources
/// whose read failure is reported through the item's result handler without
/// aborting the rest of the batch.
pub enum DocumentBody {
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send>),
}

impl DocumentBody {
    pub(crate) fn into_bytes(self) -> std::io::Result<Vec<u8>> {
        match self {
            DocumentBody::Bytes(bytes) => Ok(bytes),
            DocumentBody::Reader(mut reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }
}

impl std::fmt::Debug for DocumentBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            DocumentBody::Reader(_) => f.debug_tuple("Reader").finish(),
        }
    }
}

impl From<Vec<u8>> for DocumentBody {
    fn from(bytes: Vec<u8>) -> Self {
        DocumentBody::Bytes(bytes)
    }
}

impl From<String> for DocumentBody {
    fn from(text: String) -> Self {
        DocumentBody::Bytes(text.into_bytes())
    }
}

impl From<&str> for DocumentBody {
    fn from(text: &str) -> Self {
        DocumentBody::Bytes(text.as_bytes().to_vec())
    }
}

impl From<&serde_json::Value> for DocumentBody {
    fn from(value: &serde_json::Value) -> Self {
        DocumentBody::Bytes(value.to_string().into_bytes())
    }
}

/// Resolved identity of an enqueued item, kept until its response arrives
/// and handed to the result handler.
#[derive(Debug, Clone)]
pub struct ItemMeta {
    pub action: Action,
    pub index: String,
    pub document_id: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct MetaFields<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: Option<&'a str>,
}

/// One action/metadata line, e.g. `{"index":{"_index":"test","_id":"1"}}`.
/// The outer key is the action name, so serialization is a one-entry map.
struct ActionMeta<'a> {
    action: Action,
    fields: MetaFields<'a>,
}

impl Serialize for ActionMeta<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.action.as_str(), &self.fields)?;
        map.end()
    }
}

/// Appends one item to `buf` in wire order: metadata line, then the body
/// line for actions that take one. Both lines are newline-terminated.
///
/// On error nothing useful is in `buf` past its previous length; the caller
/// truncates back.
pub fn encode_item(
    buf: &mut Vec<u8>,
    meta: &ItemMeta,
    body: Option<DocumentBody>,
) -> Result<(), IndexerError> {
    let line = ActionMeta {
        action: meta.action,
        fields: MetaFields {
            index: &meta.index,
            id: meta.document_id.as_deref(),
        },
    };
    serde_json::to_writer(&mut *buf, &line)?;
    buf.push(b'\n');

    if meta.action.has_body() {
        let body = body.ok_or(IndexerError::MissingBody(meta.action))?;
        let bytes = body.into_bytes().map_err(IndexerError::BodyRead)?;
        buf.extend_from_slice(&bytes);
        if !bytes.ends_with(b"\n") {
            buf.push(b'\n');
        }
    }
    Ok(())
}

/// Top-level `_bulk` response. `items` preserves request order, which is
/// what positional dispatch relies on.
#[derive(Debug, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkResponseItem>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkResponseItem {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub document_id: String,
    #[serde(default)]
    pub status: u16,
    pub result: Option<String>,
    pub error: Option<ErrorCause>,
}

impl BulkResponseItem {
    pub fn is_success(&self) -> bool {
        self.status < 300
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorCause {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(meta: &ItemMeta, body: Option<DocumentBody>) -> String {
        let mut buf = Vec::new();
        encode_item(&mut buf, meta, body).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn index_item_emits_meta_and_body_lines() {
        let meta = ItemMeta {
            action: Action::Index,
            index: "test".into(),
            document_id: Some("1".into()),
        };
        let wire = encoded(&meta, Some(r#"{"title":"Test"}"#.into()));
        assert_eq!(
            wire,
            "{\"index\":{\"_index\":\"test\",\"_id\":\"1\"}}\n{\"title\":\"Test\"}\n"
        );
    }

    #[test]
    fn missing_id_is_omitted_from_metadata() {
        let meta = ItemMeta {
            action: Action::Create,
            index: "docs".into(),
            document_id: None,
        };
        let wire = encoded(&meta, Some("{}".into()));
        assert_eq!(wire, "{\"create\":{\"_index\":\"docs\"}}\n{}\n");
    }

    #[test]
    fn delete_item_has_no_body_line() {
        let meta = ItemMeta {
            action: Action::Delete,
            index: "test".into(),
            document_id: Some("42".into()),
        };
        let wire = encoded(&meta, None);
        assert_eq!(wire, "{\"delete\":{\"_index\":\"test\",\"_id\":\"42\"}}\n");
    }

    #[test]
    fn body_with_trailing_newline_is_not_doubled() {
        let meta = ItemMeta {
            action: Action::Index,
            index: "test".into(),
            document_id: None,
        };
        let wire = encoded(&meta, Some("{\"a\":1}\n".into()));
        assert!(wire.ends_with("{\"a\":1}\n"));
        assert!(!wire.ends_with("\n\n"));
    }

    #[test]
    fn index_without_body_is_an_error() {
        let meta = ItemMeta {
            action: Action::Index,
            index: "test".into(),
            document_id: None,
        };
        let mut buf = Vec::new();
        let err = encode_item(&mut buf, &meta, None).unwrap_err();
        assert!(matches!(err, IndexerError::MissingBody(Action::Index)));
    }

    #[test]
    fn reader_body_is_drained() {
        let meta = ItemMeta {
            action: Action::Index,
            index: "test".into(),
            document_id: None,
        };
        let reader: Box<dyn Read + Send> = Box::new(std::io::Cursor::new(b"{\"b\":2}".to_vec()));
        let wire = encoded(&meta, Some(DocumentBody::Reader(reader)));
        assert!(wire.ends_with("{\"b\":2}\n"));
    }

    #[test]
    fn action_round_trips_through_str() {
        for action in [Action::Index, Action::Create, Action::Update, Action::Delete] {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert!("upsert".parse::<Action>().is_err());
    }

    #[test]
    fn parses_bulk_response_items_in_order() {
        let raw = r#"{
            "took": 30,
            "errors": true,
            "items": [
                {"index": {"_index": "test", "_id": "1", "result": "created", "status": 201}},
                {"index": {"_index": "test", "_id": "2", "status": 429,
                           "error": {"type": "circuit_breaking_exception", "reason": "too busy"}}}
            ]
        }"#;
        let response: BulkResponse = serde_json::from_str(raw).unwrap();
        assert!(response.errors);
        assert_eq!(response.items.len(), 2);

        let first = response.items[0].get("index").unwrap();
        assert!(first.is_success());
        assert_eq!(first.result.as_deref(), Some("created"));

        let second = response.items[1].get("index").unwrap();
        assert!(!second.is_success());
        let cause = second.error.as_ref().unwrap();
        assert_eq!(cause.kind, "circuit_breaking_exception");
        assert_eq!(cause.reason, "too busy");
    }
}
