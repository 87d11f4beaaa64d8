//! Generic document-store shapes: snapshots and change events.

use serde::{Deserialize, Serialize};

/// Top-level fields of a stored JSON document.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// One document of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

/// A point-in-time read of a whole collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub revision_id: i64,
    pub taken_at: String,
    pub documents: Vec<Document>,
}

/// A mutation published by the store after it has been committed.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Added {
        collection: String,
        id: String,
        fields: Fields,
    },
    /// `previous` holds the document as it was before the update.
    Changed {
        collection: String,
        id: String,
        fields: Fields,
        previous: Fields,
    },
    /// `fields` holds the document as it was before deletion.
    Removed {
        collection: String,
        id: String,
        fields: Fields,
    },
}

impl StoreEvent {
    pub fn collection(&self) -> &str {
        match self {
            StoreEvent::Added { collection, .. }
            | StoreEvent::Changed { collection, .. }
            | StoreEvent::Removed { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            StoreEvent::Added { id, .. }
            | StoreEvent::Changed { id, .. }
            | StoreEvent::Removed { id, .. } => id,
        }
    }

    pub fn fields(&self) -> &Fields {
        match self {
            StoreEvent::Added { fields, .. }
            | StoreEvent::Changed { fields, .. }
            | StoreEvent::Removed { fields, .. } => fields,
        }
    }

    /// The document before this event, for updates.
    pub fn previous(&self) -> Option<&Fields> {
        match self {
            StoreEvent::Changed { previous, .. } => Some(previous),
            _ => None,
        }
    }
}
