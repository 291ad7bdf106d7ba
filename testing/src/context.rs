//! In-memory user context store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thoughtflow_core::context::{ContextError, UserContext, UserContextStore};
use thoughtflow_core::thought::UserId;

/// HashMap-backed `UserContextStore`. Unknown users are `Ok(None)`, like
/// the production store.
pub struct InMemoryContextStore {
    contexts: Mutex<HashMap<String, UserContext>>,
}

impl InMemoryContextStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or replace a user's context.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[allow(clippy::unwrap_used)]
    pub fn insert(&self, context: UserContext) {
        self.contexts
            .lock()
            .unwrap()
            .insert(context.user_id.as_str().to_string(), context);
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserContextStore for InMemoryContextStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<UserContext>, ContextError> {
        Ok(self
            .contexts
            .lock()
            .map_err(|_| ContextError::Load("context lock poisoned".to_string()))?
            .get(user_id.as_str())
            .cloned())
    }
}
