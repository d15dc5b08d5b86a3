use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::ValidationError;
use crate::handlers::Handlers;

impl Handlers {
    pub async fn get_contacts(&self, user_id: Uuid) -> Result<Value, ValidationError> {
        let contacts = self.repository.list_contacts(user_id).await?;
        Ok(json!({ "contacts": contacts }))
    }

    pub async fn add_contact(
        &self,
        owner_id: Uuid,
        contact_username: &str,
    ) -> Result<Value, ValidationError> {
        let contact = self
            .repository
            .find_user_by_username(contact_username)
            .await?
            .ok_or(ValidationError::UnknownUsername)?;

        if contact.id == owner_id {
            return Err(ValidationError::SelfContact);
        }

        let already_exists = self.repository.contact_exists(owner_id, contact.id).await?;

        self.repository.add_contact(owner_id, contact.id).await?;

        Ok(json!({
            "user_id": contact.id,
            "username": contact.username,
            "name": contact.name,
            "already_existed": already_exists,
        }))
    }
}
