//! Client - Traits abstracting remote object operations
//!
//! A RemoteClient exposes create/get/update/delete for one resource kind of
//! a cloud API. It is responsible for turning attribute maps into actual API
//! calls and for classifying failures as not-found, transient or permanent.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ClientResult;
use crate::resource::{Attributes, LifecycleStatus, Observation};

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Static description of a resource or data source kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKind {
    /// Kind name (e.g., "ibm_is_floating_ip")
    pub name: &'static str,
    pub description: &'static str,
    pub timeouts: Timeouts,
}

/// Default per-operation timeouts of a resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(600),
            update: Duration::from_secs(600),
            delete: Duration::from_secs(600),
        }
    }
}

/// How an update call completes on the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// The call returns once the change is applied
    Synchronous,
    /// The call returns immediately and the object passes through an updating state
    Asynchronous,
}

/// Raw status strings a remote API reports for each lifecycle phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusVocabulary {
    pub pending: Vec<String>,
    pub available: Vec<String>,
    pub updating: Vec<String>,
    pub deleting: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

impl StatusVocabulary {
    /// Map a raw status onto a lifecycle phase, if it is known
    pub fn lifecycle(&self, status: &str) -> Option<LifecycleStatus> {
        let table = [
            (&self.pending, LifecycleStatus::Pending),
            (&self.available, LifecycleStatus::Available),
            (&self.updating, LifecycleStatus::Updating),
            (&self.deleting, LifecycleStatus::Deleting),
            (&self.deleted, LifecycleStatus::Deleted),
            (&self.failed, LifecycleStatus::Failed),
        ];
        table
            .into_iter()
            .find(|(set, _)| set.iter().any(|s| s.eq_ignore_ascii_case(status)))
            .map(|(_, phase)| phase)
    }

    pub fn statuses(&self, phase: LifecycleStatus) -> &[String] {
        match phase {
            LifecycleStatus::Pending => &self.pending,
            LifecycleStatus::Available => &self.available,
            LifecycleStatus::Updating => &self.updating,
            LifecycleStatus::Deleting => &self.deleting,
            LifecycleStatus::Deleted => &self.deleted,
            LifecycleStatus::Failed => &self.failed,
        }
    }
}

/// CRUD interface over one kind of remote object
///
/// Implementations must report a missing object as `ClientError::NotFound`
/// so callers can tell it apart from a failed fetch.
pub trait RemoteClient: Send + Sync {
    /// Kind handled by this client
    fn kind(&self) -> ResourceKind;

    fn vocabulary(&self) -> StatusVocabulary;

    fn update_mode(&self) -> UpdateMode {
        UpdateMode::Asynchronous
    }

    /// Create an object from its spec, returning its identifier
    fn create(&self, spec: &Attributes) -> BoxFuture<'_, ClientResult<String>>;

    /// Fetch the current state of an object
    fn get(&self, id: &str) -> BoxFuture<'_, ClientResult<Observation>>;

    /// Apply a partial change to an object
    fn update(&self, id: &str, patch: &Attributes) -> BoxFuture<'_, ClientResult<()>>;

    /// Request deletion of an object
    fn delete(&self, id: &str) -> BoxFuture<'_, ClientResult<()>>;
}

/// RemoteClient implementation for Box<dyn RemoteClient>
/// This enables dynamic dispatch for clients
impl RemoteClient for Box<dyn RemoteClient> {
    fn kind(&self) -> ResourceKind {
        (**self).kind()
    }

    fn vocabulary(&self) -> StatusVocabulary {
        (**self).vocabulary()
    }

    fn update_mode(&self) -> UpdateMode {
        (**self).update_mode()
    }

    fn create(&self, spec: &Attributes) -> BoxFuture<'_, ClientResult<String>> {
        (**self).create(spec)
    }

    fn get(&self, id: &str) -> BoxFuture<'_, ClientResult<Observation>> {
        (**self).get(id)
    }

    fn update(&self, id: &str, patch: &Attributes) -> BoxFuture<'_, ClientResult<()>> {
        (**self).update(id, patch)
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, ClientResult<()>> {
        (**self).delete(id)
    }
}

impl<C: RemoteClient + ?Sized> RemoteClient for Arc<C> {
    fn kind(&self) -> ResourceKind {
        (**self).kind()
    }

    fn vocabulary(&self) -> StatusVocabulary {
        (**self).vocabulary()
    }

    fn update_mode(&self) -> UpdateMode {
        (**self).update_mode()
    }

    fn create(&self, spec: &Attributes) -> BoxFuture<'_, ClientResult<String>> {
        (**self).create(spec)
    }

    fn get(&self, id: &str) -> BoxFuture<'_, ClientResult<Observation>> {
        (**self).get(id)
    }

    fn update(&self, id: &str, patch: &Attributes) -> BoxFuture<'_, ClientResult<()>> {
        (**self).update(id, patch)
    }

    fn delete(&self, id: &str) -> BoxFuture<'_, ClientResult<()>> {
        (**self).delete(id)
    }
}

/// Read-only lookup (a data source)
pub trait DataSource: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Resolve a query into a set of computed attributes
    fn read(&self, query: &Attributes) -> BoxFuture<'_, ClientResult<Attributes>>;
}

impl DataSource for Box<dyn DataSource> {
    fn kind(&self) -> ResourceKind {
        (**self).kind()
    }

    fn read(&self, query: &Attributes) -> BoxFuture<'_, ClientResult<Attributes>> {
        (**self).read(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    struct MockClient;

    impl RemoteClient for MockClient {
        fn kind(&self) -> ResourceKind {
            ResourceKind {
                name: "mock",
                description: "mock object",
                timeouts: Timeouts::default(),
            }
        }

        fn vocabulary(&self) -> StatusVocabulary {
            StatusVocabulary {
                available: vec!["available".to_string()],
                ..Default::default()
            }
        }

        fn create(&self, _spec: &Attributes) -> BoxFuture<'_, ClientResult<String>> {
            Box::pin(async { Ok("mock-id-123".to_string()) })
        }

        fn get(&self, id: &str) -> BoxFuture<'_, ClientResult<Observation>> {
            let id = id.to_string();
            Box::pin(async move { Err(ClientError::not_found(id)) })
        }

        fn update(&self, _id: &str, _patch: &Attributes) -> BoxFuture<'_, ClientResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn delete(&self, _id: &str) -> BoxFuture<'_, ClientResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn boxed_client_dispatches() {
        let client: Box<dyn RemoteClient> = Box::new(MockClient);
        assert_eq!(client.kind().name, "mock");
        assert_eq!(client.update_mode(), UpdateMode::Asynchronous);
        let id = client.create(&Attributes::new()).await.unwrap();
        assert_eq!(id, "mock-id-123");
        assert!(client.get(&id).await.unwrap_err().is_not_found());
    }

    #[test]
    fn vocabulary_lookup_ignores_case() {
        let vocabulary = StatusVocabulary {
            pending: vec!["pending".to_string()],
            available: vec!["available".to_string()],
            failed: vec!["failed".to_string()],
            ..Default::default()
        };
        assert_eq!(
            vocabulary.lifecycle("AVAILABLE"),
            Some(LifecycleStatus::Available)
        );
        assert_eq!(vocabulary.lifecycle("failed"), Some(LifecycleStatus::Failed));
        assert_eq!(vocabulary.lifecycle(""), None);
    }
}
