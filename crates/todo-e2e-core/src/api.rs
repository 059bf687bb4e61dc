//! Client side of the TODO service's HTTP contract.
//!
//! - `GET    /api/todos`        → `[{id, text}, ...]`, order unspecified
//! - `POST   /api/todos`        ← `{"text": ...}`
//! - `DELETE /api/todos?id=<id>` removes one item
//!
//! A `404` on delete is treated as success: the item is already gone,
//! which is what a cleanup wants.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::SutError;
use crate::model::{TodoId, TodoItem};

pub const TODOS_PATH: &str = "/api/todos";

/// The read/write/delete surface of the shared collection.
///
/// Implementations must be shareable across threads: cleanup issues its
/// deletes concurrently.
pub trait TodoApi: Send + Sync {
    /// Read the whole shared collection.
    ///
    /// # Errors
    ///
    /// Returns a [`SutError`] when the service cannot be reached or replies
    /// with something other than a list of items.
    fn list(&self) -> Result<Vec<TodoItem>, SutError>;

    /// Create one item with the given text.
    ///
    /// # Errors
    ///
    /// Returns a [`SutError`] when the service rejects the write.
    fn create(&self, text: &str) -> Result<(), SutError>;

    /// Remove one item by id.
    ///
    /// # Errors
    ///
    /// Returns a [`SutError`] when the service cannot be reached or rejects
    /// the delete.
    fn delete(&self, id: &TodoId) -> Result<(), SutError>;
}

impl<T: TodoApi + ?Sized> TodoApi for &T {
    fn list(&self) -> Result<Vec<TodoItem>, SutError> {
        (**self).list()
    }

    fn create(&self, text: &str) -> Result<(), SutError> {
        (**self).create(text)
    }

    fn delete(&self, id: &TodoId) -> Result<(), SutError> {
        (**self).delete(id)
    }
}

impl<T: TodoApi + ?Sized> TodoApi for Arc<T> {
    fn list(&self) -> Result<Vec<TodoItem>, SutError> {
        (**self).list()
    }

    fn create(&self, text: &str) -> Result<(), SutError> {
        (**self).create(text)
    }

    fn delete(&self, id: &TodoId) -> Result<(), SutError> {
        (**self).delete(id)
    }
}

/// [`TodoApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTodoApi {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpTodoApi {
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Fetch a path as text, e.g. the rendered home page.
    ///
    /// # Errors
    ///
    /// Returns a [`SutError`] on transport failure, non-2xx status, or a body
    /// that is not valid text.
    pub fn get_text(&self, path: &str) -> Result<String, SutError> {
        let operation = format!("GET {path}");
        let response = self
            .agent
            .get(&self.url(path))
            .call()
            .map_err(|err| classify(&operation, err))?;
        response.into_string().map_err(|err| SutError::Decode {
            operation,
            message: err.to_string(),
        })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SutError> {
        let operation = format!("GET {path}");
        let response = self
            .agent
            .get(&self.url(path))
            .set("Accept", "application/json")
            .call()
            .map_err(|err| classify(&operation, err))?;
        response.into_json::<T>().map_err(|err| SutError::Decode {
            operation,
            message: err.to_string(),
        })
    }
}

impl TodoApi for HttpTodoApi {
    fn list(&self) -> Result<Vec<TodoItem>, SutError> {
        let items: Vec<TodoItem> = self.get_json(TODOS_PATH)?;
        trace!(count = items.len(), "listed todos");
        Ok(items)
    }

    fn create(&self, text: &str) -> Result<(), SutError> {
        let operation = format!("POST {TODOS_PATH}");
        self.agent
            .post(&self.url(TODOS_PATH))
            .send_json(serde_json::json!({ "text": text }))
            .map_err(|err| classify(&operation, err))?;
        Ok(())
    }

    fn delete(&self, id: &TodoId) -> Result<(), SutError> {
        let operation = format!("DELETE {TODOS_PATH}?id={id}");
        match self
            .agent
            .delete(&self.url(TODOS_PATH))
            .query("id", id.as_str())
            .call()
        {
            Ok(_) | Err(ureq::Error::Status(404, _)) => Ok(()),
            Err(err) => Err(classify(&operation, err)),
        }
    }
}

fn classify(operation: &str, err: ureq::Error) -> SutError {
    match err {
        ureq::Error::Status(status, _) => SutError::Status {
            operation: operation.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => SutError::Transport {
            operation: operation.to_string(),
            message: transport.to_string(),
        },
    }
}
