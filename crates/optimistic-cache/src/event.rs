//! Inbound state-change events.
//!
//! Events arrive on the wire as `{ type, meta, payload }` and are parsed into
//! the closed [`Event`] union before they reach the reducer.

use std::sync::mpsc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mutation::Mutation;
use crate::types::{CollectionPath, Document, DocumentId, OrderedKey, QueryDescriptor};
use crate::CacheError;

/// Handle through which a mutation reports its outcome.
#[derive(Debug, Clone)]
pub struct Completion {
    sender: mpsc::Sender<Result<(), CacheError>>,
}

impl Completion {
    /// Creates a handle and the receiver the caller waits on.
    pub fn channel() -> (Self, mpsc::Receiver<Result<(), CacheError>>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }

    pub fn resolve(&self) {
        // A dropped receiver means nobody is waiting.
        let _ = self.sender.send(Ok(()));
    }

    pub fn reject(&self, error: CacheError) {
        let _ = self.sender.send(Err(error));
    }
}

/// Position change reported alongside a document change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderHint {
    #[serde(default)]
    pub old_index: i64,
    pub new_index: i64,
}

/// A state-change event.
#[derive(Debug, Clone)]
pub enum Event {
    /// Confirmed bulk result for a query (listener snapshot or one-shot get).
    ListenerResponse {
        query: QueryDescriptor,
        data: Option<IndexMap<DocumentId, Document>>,
        ordered: Vec<OrderedKey>,
        from_cache: bool,
    },
    /// A listener was attached; resolve locally until the server answers.
    ListenerAttached { query: QueryDescriptor },
    /// A listener was detached.
    ListenerDetached {
        query: QueryDescriptor,
        preserve_cache: Option<bool>,
    },
    /// A document was confirmed added or modified.
    DocumentChanged {
        query: QueryDescriptor,
        doc: DocumentId,
        data: Document,
        reorder: Option<ReorderHint>,
    },
    /// A document was confirmed removed or deleted.
    DocumentRemoved {
        query: QueryDescriptor,
        doc: DocumentId,
    },
    /// A speculative partial write.
    OptimisticWrite {
        collection: CollectionPath,
        doc: DocumentId,
        data: Document,
    },
    /// A speculative delete.
    OptimisticRemove {
        collection: CollectionPath,
        doc: DocumentId,
    },
    /// A mutation was sent to the server.
    MutationStart {
        mutation: Mutation,
        timestamp: Value,
        completion: Option<Completion>,
    },
    /// The server rejected a mutation.
    MutationFailed {
        targets: Vec<OrderedKey>,
        error: String,
        completion: Option<Completion>,
    },
}

impl Event {
    /// Parses a wire event from JSON text.
    pub fn from_json(text: &str) -> Result<Self, CacheError> {
        let wire: WireEvent = serde_json::from_str(text)
            .map_err(|e| CacheError::MalformedEvent(format!("invalid event: {e}")))?;
        Self::from_wire(wire)
    }

    /// Parses an already-decoded wire event.
    pub fn from_value(value: Value) -> Result<Self, CacheError> {
        let wire: WireEvent = serde_json::from_value(value)
            .map_err(|e| CacheError::MalformedEvent(format!("invalid event: {e}")))?;
        Self::from_wire(wire)
    }

    /// Converts a wire event into the typed union.
    pub fn from_wire(wire: WireEvent) -> Result<Self, CacheError> {
        let WireEvent {
            kind,
            meta,
            payload,
        } = wire;

        let event = match kind {
            EventKind::ListenerResponse | EventKind::GetSuccess => {
                let query = query(&meta)?;
                let data = documents(payload.get("data"))?;
                let ordered = match payload.get("ordered") {
                    Some(Value::Array(items)) => ordered_keys(&query.collection, items)?,
                    Some(Value::Null) | None => data
                        .as_ref()
                        .map(|docs| {
                            docs.keys()
                                .map(|id| (query.collection.clone(), id.clone()))
                                .collect()
                        })
                        .unwrap_or_default(),
                    Some(other) => {
                        return Err(CacheError::MalformedEvent(format!(
                            "payload.ordered is not an array: {other}"
                        )))
                    }
                };
                let from_cache = payload
                    .get("fromCache")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Self::ListenerResponse {
                    query,
                    data,
                    ordered,
                    from_cache,
                }
            }
            EventKind::SetListener => Self::ListenerAttached {
                query: query(&meta)?,
            },
            EventKind::UnsetListener => Self::ListenerDetached {
                query: query(&meta)?,
                preserve_cache: payload.get("preserveCache").and_then(Value::as_bool),
            },
            EventKind::DocumentAdded | EventKind::DocumentModified => {
                let query = query(&meta)?;
                let doc = doc_id(&meta)?;
                let data = object(payload.get("data"), "payload.data")?;
                let reorder = payload
                    .get("ordered")
                    .and_then(|hint| serde_json::from_value(hint.clone()).ok());
                Self::DocumentChanged {
                    query,
                    doc,
                    data,
                    reorder,
                }
            }
            EventKind::DocumentRemoved | EventKind::DeleteSuccess => Self::DocumentRemoved {
                query: query(&meta)?,
                doc: doc_id(&meta)?,
            },
            EventKind::OptimisticAdded | EventKind::OptimisticModified => Self::OptimisticWrite {
                collection: query(&meta)?.collection,
                doc: doc_id(&meta)?,
                data: object(payload.get("data"), "payload.data")?,
            },
            EventKind::OptimisticRemoved => Self::OptimisticRemove {
                collection: query(&meta)?.collection,
                doc: doc_id(&meta)?,
            },
            EventKind::MutateStart => {
                let data = payload.get("data").ok_or_else(|| {
                    CacheError::MalformedEvent("mutation start without payload.data".to_string())
                })?;
                Self::MutationStart {
                    mutation: Mutation::from_json(data)?,
                    timestamp: meta.get("timestamp").cloned().unwrap_or(Value::Null),
                    completion: None,
                }
            }
            EventKind::MutateFailure => {
                let mut targets: Vec<OrderedKey> = Vec::new();
                if let (Some(collection), Some(doc)) = (
                    meta.get("collection").and_then(Value::as_str),
                    meta.get("doc").and_then(Value::as_str),
                ) {
                    targets.push((collection.into(), doc.into()));
                }
                if let Some(mutation) = payload
                    .get("data")
                    .and_then(|data| Mutation::from_json(data).ok())
                {
                    for key in mutation.static_targets() {
                        if !targets.contains(&key) {
                            targets.push(key);
                        }
                    }
                }
                let error = match payload.get("error") {
                    Some(Value::String(message)) => message.clone(),
                    Some(Value::Object(err)) => err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("mutation failed")
                        .to_string(),
                    _ => "mutation failed".to_string(),
                };
                Self::MutationFailed {
                    targets,
                    error,
                    completion: None,
                }
            }
        };
        Ok(event)
    }

    /// Attaches a completion handle to a mutation event.
    pub fn with_completion(mut self, handle: Completion) -> Self {
        match &mut self {
            Self::MutationStart { completion, .. } | Self::MutationFailed { completion, .. } => {
                *completion = Some(handle);
            }
            _ => {}
        }
        self
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ListenerResponse { .. } => "listener_response",
            Self::ListenerAttached { .. } => "listener_attached",
            Self::ListenerDetached { .. } => "listener_detached",
            Self::DocumentChanged { .. } => "document_changed",
            Self::DocumentRemoved { .. } => "document_removed",
            Self::OptimisticWrite { .. } => "optimistic_write",
            Self::OptimisticRemove { .. } => "optimistic_remove",
            Self::MutationStart { .. } => "mutation_start",
            Self::MutationFailed { .. } => "mutation_failed",
        }
    }
}

/// Wire event type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ListenerResponse,
    GetSuccess,
    SetListener,
    UnsetListener,
    DocumentAdded,
    DocumentModified,
    DocumentRemoved,
    DeleteSuccess,
    OptimisticAdded,
    OptimisticModified,
    OptimisticRemoved,
    MutateStart,
    #[serde(
        alias = "ADD_FAILURE",
        alias = "SET_FAILURE",
        alias = "UPDATE_FAILURE",
        alias = "DELETE_FAILURE"
    )]
    MutateFailure,
}

/// A wire event before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub payload: Value,
}

fn query(meta: &Value) -> Result<QueryDescriptor, CacheError> {
    if meta.get("collection").and_then(Value::as_str).is_none() {
        return Err(CacheError::MalformedEvent(
            "missing meta.collection".to_string(),
        ));
    }
    serde_json::from_value(meta.clone())
        .map_err(|e| CacheError::MalformedEvent(format!("invalid query in meta: {e}")))
}

fn doc_id(meta: &Value) -> Result<DocumentId, CacheError> {
    meta.get("doc")
        .and_then(Value::as_str)
        .map(DocumentId::from)
        .ok_or_else(|| CacheError::MalformedEvent("missing meta.doc".to_string()))
}

fn object(value: Option<&Value>, what: &str) -> Result<Document, CacheError> {
    match value {
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(CacheError::MalformedEvent(format!(
            "{what} is not an object: {other}"
        ))),
        None => Err(CacheError::MalformedEvent(format!("missing {what}"))),
    }
}

fn documents(value: Option<&Value>) -> Result<Option<IndexMap<DocumentId, Document>>, CacheError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(
            map.iter()
                .filter_map(|(id, doc)| {
                    doc.as_object()
                        .map(|doc| (DocumentId::from(id.as_str()), doc.clone()))
                })
                .collect(),
        )),
        Some(other) => Err(CacheError::MalformedEvent(format!(
            "payload.data is not an object: {other}"
        ))),
    }
}

/// Accepts documents (`{id, path?}`), `[path, id]` pairs, or bare ids.
fn ordered_keys(collection: &CollectionPath, items: &[Value]) -> Result<Vec<OrderedKey>, CacheError> {
    items
        .iter()
        .map(|item| match item {
            Value::String(id) => Ok((collection.clone(), DocumentId::from(id.as_str()))),
            Value::Array(pair) => match pair.as_slice() {
                [Value::String(path), Value::String(id)] => {
                    Ok((path.as_str().into(), id.as_str().into()))
                }
                _ => Err(CacheError::MalformedEvent(format!(
                    "invalid ordered entry: {item}"
                ))),
            },
            Value::Object(doc) => {
                let id = doc.get("id").and_then(Value::as_str).ok_or_else(|| {
                    CacheError::MalformedEvent(format!("ordered entry without id: {item}"))
                })?;
                let path = doc
                    .get("path")
                    .and_then(Value::as_str)
                    .map(CollectionPath::from)
                    .unwrap_or_else(|| collection.clone());
                Ok((path, DocumentId::from(id)))
            }
            _ => Err(CacheError::MalformedEvent(format!(
                "invalid ordered entry: {item}"
            ))),
        })
        .collect()
}
