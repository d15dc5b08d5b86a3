use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::RepositoryError;
use crate::handlers::Handlers;
use crate::models::ModelPreference;

impl Handlers {
    pub async fn fetch_call_history(&self, user_id: Uuid, limit: u32) -> Result<Value, RepositoryError> {
        let history = self.repository.fetch_call_history(user_id, limit).await?;
        Ok(json!({ "calls": history }))
    }

    pub async fn set_model_preference(
        &self,
        user_id: Uuid,
        preference: ModelPreference,
    ) -> Result<Value, RepositoryError> {
        let raw = match preference {
            ModelPreference::Lip => "lip",
            ModelPreference::Audio => "audio",
        };
        self.repository.set_model_preference(user_id, raw).await?;
        Ok(Value::Null)
    }
}
