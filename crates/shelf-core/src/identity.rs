//! Object identities.
//!
//! An [`Identity`] names one logical remote object: its class plus either a
//! placeholder local id (before the first save) or the id the server handed
//! out. Two identities are equal iff both parts match.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use ulid::Ulid;

/// The id half of an identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectId {
    /// Placeholder assigned before the object is first saved.
    Local(String),
    /// Id assigned by the server.
    Server(String),
}

impl ObjectId {
    /// Generate a fresh local id.
    pub fn new_local() -> Self {
        ObjectId::Local(format!("local{}", Ulid::new().to_string().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            ObjectId::Local(id) | ObjectId::Server(id) => id,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ObjectId::Local(_))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stable key for one logical remote object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    class_name: String,
    id: ObjectId,
}

impl Identity {
    pub fn new(class_name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            class_name: class_name.into(),
            id,
        }
    }

    /// An identity for an object the server already knows.
    pub fn server(class_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(class_name, ObjectId::Server(id.into()))
    }

    /// An identity with a caller-chosen local id.
    pub fn local(class_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(class_name, ObjectId::Local(id.into()))
    }

    /// An identity with a freshly generated local id.
    pub fn new_local(class_name: impl Into<String>) -> Self {
        Self::new(class_name, ObjectId::new_local())
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn is_local(&self) -> bool {
        self.id.is_local()
    }

    /// The same class with a server-assigned id.
    pub fn with_server_id(&self, id: impl Into<String>) -> Self {
        Self::server(self.class_name.clone(), id)
    }

    /// Pointer value referencing this object, as stored in attributes.
    pub fn pointer(&self) -> Value {
        json!({
            "__type": "Pointer",
            "className": self.class_name,
            "objectId": self.id.as_str(),
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class_name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_needs_both_parts() {
        assert_eq!(Identity::server("Item", "1"), Identity::server("Item", "1"));
        assert_ne!(Identity::server("Item", "1"), Identity::server("Other", "1"));
        assert_ne!(Identity::server("Item", "1"), Identity::local("Item", "1"));
    }

    #[test]
    fn test_new_local_ids_are_unique() {
        let a = Identity::new_local("Item");
        let b = Identity::new_local("Item");

        assert!(a.is_local());
        assert!(a.id().as_str().starts_with("local"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_with_server_id() {
        let local = Identity::local("Item", "local7");
        let saved = local.with_server_id("srv99");

        assert!(!saved.is_local());
        assert_eq!(saved.class_name(), "Item");
        assert_eq!(saved.to_string(), "Item:srv99");
    }

    #[test]
    fn test_pointer() {
        let pointer = Identity::server("Item", "srv99").pointer();
        assert_eq!(pointer["__type"], "Pointer");
        assert_eq!(pointer["className"], "Item");
        assert_eq!(pointer["objectId"], "srv99");
    }
}
