//! Free-text notes attached to parts.

use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, ModelTrait, Set};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::auth::AuthUser;
use crate::entities::{part_note, stage};
use crate::errors::ServiceError;
use crate::services::parts::find_part;

pub const EMPTY_NOTE_MESSAGE: &str = "Ошибка: This field is required.";
pub const FOREIGN_NOTE_MESSAGE: &str = "Вы можете изменять только свои примечания.";

#[derive(Debug, Clone, Deserialize)]
pub struct NoteInput {
    #[serde(default)]
    pub text: String,
    pub stage_id: Option<i32>,
}

fn note_text(text: &str) -> Result<String, ServiceError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ServiceError::ValidationError(EMPTY_NOTE_MESSAGE.into()));
    }
    Ok(text.to_string())
}

#[derive(Clone)]
pub struct NoteService {
    db: Arc<DatabaseConnection>,
}

impl NoteService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_note(&self, note_id: i32) -> Result<part_note::Model, ServiceError> {
        part_note::Entity::find_by_id(note_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Примечание {} не найдено", note_id)))
    }

    #[instrument(skip(self, input, author))]
    pub async fn add_note(
        &self,
        part_id: &str,
        input: NoteInput,
        author: &AuthUser,
    ) -> Result<part_note::Model, ServiceError> {
        let text = note_text(&input.text)?;
        find_part(&*self.db, part_id).await?;
        if let Some(stage_id) = input.stage_id {
            stage::Entity::find_by_id(stage_id)
                .one(&*self.db)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| ServiceError::NotFound(format!("Этап {} не найден", stage_id)))?;
        }

        let note = part_note::ActiveModel {
            part_id: Set(part_id.to_string()),
            user_id: Set(author.user_id),
            stage_id: Set(input.stage_id),
            text: Set(text),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(note_id = note.id, part_id, "Note added");
        Ok(note)
    }

    /// Only the author may edit a note.
    #[instrument(skip(self, input, editor))]
    pub async fn edit_note(
        &self,
        note_id: i32,
        input: NoteInput,
        editor: &AuthUser,
    ) -> Result<part_note::Model, ServiceError> {
        let note = self.find_note(note_id).await?;
        if note.user_id != editor.user_id {
            return Err(ServiceError::Forbidden(FOREIGN_NOTE_MESSAGE.into()));
        }
        let text = note_text(&input.text)?;

        let mut active: part_note::ActiveModel = note.into();
        active.text = Set(text);
        active.update(&*self.db).await.map_err(ServiceError::db_error)
    }

    /// Authors delete their own notes; administrators may delete any.
    #[instrument(skip(self, actor))]
    pub async fn delete_note(&self, note_id: i32, actor: &AuthUser) -> Result<String, ServiceError> {
        let note = self.find_note(note_id).await?;
        if note.user_id != actor.user_id && !actor.is_admin() {
            return Err(ServiceError::Forbidden(FOREIGN_NOTE_MESSAGE.into()));
        }
        let part_id = note.part_id.clone();
        note.delete(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        info!(note_id, part_id = %part_id, "Note deleted");
        Ok(part_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn blank_text_is_rejected() {
        assert_matches!(
            note_text("   "),
            Err(ServiceError::ValidationError(msg)) if msg == EMPTY_NOTE_MESSAGE
        );
        assert_eq!(note_text("  резец затупился ").unwrap(), "резец затупился");
    }
}
