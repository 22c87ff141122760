//! A library kept in a JSON file.
//!
//! The whole file is rewritten after every change. Fine for a test tool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use sync_engine::LocalLibrary;
use sync_types::{SyncError, SyncableBook};
use tokio::sync::Mutex;

/// Books stored as a JSON array, in manifest order.
#[derive(Debug)]
pub struct JsonLibrary {
    path: PathBuf,
    books: Mutex<Vec<SyncableBook>>,
}

impl JsonLibrary {
    /// Open `path`, starting empty if it does not exist.
    pub async fn open(path: &Path) -> Result<Self> {
        let books = if path.exists() {
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("{} is not a valid library", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            books: Mutex::new(books),
        })
    }

    /// Snapshot of the books.
    pub async fn books(&self) -> Vec<SyncableBook> {
        self.books.lock().await.clone()
    }

    /// Add or replace books from another JSON file. Returns how many were
    /// imported.
    pub async fn import(&self, source: &Path) -> Result<usize> {
        let contents = tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let incoming: Vec<SyncableBook> = serde_json::from_str(&contents)
            .with_context(|| format!("{} is not a list of books", source.display()))?;
        for book in &incoming {
            book.validate()
                .with_context(|| format!("book '{}' is invalid", book.id))?;
        }

        let mut books = self.books.lock().await;
        for book in &incoming {
            upsert(&mut books, book.clone());
        }
        self.persist(&books).await?;
        Ok(incoming.len())
    }

    async fn persist(&self, books: &[SyncableBook]) -> Result<(), SyncError> {
        let contents = serde_json::to_string_pretty(books)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| SyncError::Storage(format!("{}: {}", self.path.display(), e)))
    }
}

fn upsert(books: &mut Vec<SyncableBook>, book: SyncableBook) {
    match books.iter_mut().find(|b| b.id == book.id) {
        Some(existing) => *existing = book,
        None => books.push(book),
    }
}

#[async_trait]
impl LocalLibrary for JsonLibrary {
    async fn get_local_manifest(&self) -> Result<Vec<SyncableBook>, SyncError> {
        Ok(self.books().await)
    }

    async fn apply_remote_item(&self, book: SyncableBook) -> Result<(), SyncError> {
        book.validate()?;
        let mut books = self.books.lock().await;
        upsert(&mut books, book);
        self.persist(&books).await
    }

    async fn delete_local_item(&self, item_id: &str) -> Result<(), SyncError> {
        let mut books = self.books.lock().await;
        books.retain(|b| b.id != item_id);
        self.persist(&books).await
    }
}
