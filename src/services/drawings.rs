//! Drawing files stored under the instance folder.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::utils::create_safe_file_name;

#[derive(Debug, Clone)]
pub struct DrawingStore {
    dir: PathBuf,
}

impl DrawingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name a drawing of `part_id` is stored under. The token keeps part ids that sanitize
    /// to the same text from overwriting each other's drawings.
    pub fn file_name_for(part_id: &str, token: &str, original_name: &str) -> String {
        let original = Path::new(original_name)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(original_name);
        create_safe_file_name(&format!("{}_{}_{}", part_id, token, original))
    }

    fn resolve(&self, file_name: &str) -> Result<PathBuf, ServiceError> {
        if file_name.is_empty()
            || file_name.contains(['/', '\\'])
            || file_name == "."
            || file_name == ".."
        {
            return Err(ServiceError::InvalidInput(format!(
                "Недопустимое имя файла: {}",
                file_name
            )));
        }
        Ok(self.dir.join(file_name))
    }

    /// Writes the drawing and returns the stored file name.
    pub async fn save(
        &self,
        part_id: &str,
        original_name: &str,
        content: &[u8],
    ) -> Result<String, ServiceError> {
        let token = Uuid::new_v4().simple().to_string();
        let file_name = Self::file_name_for(part_id, &token[..8], original_name);
        let path = self.resolve(&file_name)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, content).await?;
        info!(part_id, file = %file_name, bytes = content.len(), "Drawing stored");
        Ok(file_name)
    }

    pub async fn read(&self, file_name: &str) -> Result<Vec<u8>, ServiceError> {
        let path = self.resolve(file_name)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ServiceError::NotFound(format!(
                "Файл {} не найден",
                file_name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes a stored drawing; a missing file is not an error.
    pub async fn remove(&self, file_name: &str) -> Result<(), ServiceError> {
        let path = self.resolve(file_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(file = %file_name, "Drawing already missing on disk");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn stored_names_are_safe() {
        assert_eq!(
            DrawingStore::file_name_for("АСЦБ/01", "1a2b3c4d", "../../etc/чертеж?.pdf"),
            "АСЦБ_01_1a2b3c4d_чертеж_.pdf"
        );
    }

    #[tokio::test]
    async fn save_read_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DrawingStore::new(tmp.path().join("drawings"));

        let name = store.save("P-1", "plan.pdf", b"%PDF").await.unwrap();
        assert!(name.starts_with("P-1_"));
        assert!(name.ends_with("_plan.pdf"));
        assert_eq!(store.read(&name).await.unwrap(), b"%PDF");

        store.remove(&name).await.unwrap();
        assert_matches!(store.read(&name).await, Err(ServiceError::NotFound(_)));
        // Removing twice is fine.
        store.remove(&name).await.unwrap();
    }

    #[tokio::test]
    async fn colliding_part_ids_keep_separate_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DrawingStore::new(tmp.path());

        let first = store.save("A/1", "plan.pdf", b"first").await.unwrap();
        let second = store.save("A:1", "plan.pdf", b"second").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.read(&first).await.unwrap(), b"first");
        assert_eq!(store.read(&second).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DrawingStore::new(tmp.path());
        assert_matches!(
            store.read("../secret").await,
            Err(ServiceError::InvalidInput(_))
        );
    }
}
