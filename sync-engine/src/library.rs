//! The local library seam.
//!
//! The engine never touches the app's storage schema; it reads the
//! library as a list of [`SyncableBook`]s and writes received books back
//! through [`LocalLibrary`].

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use sync_types::{SyncError, SyncableBook};

/// Read/write access to the local library.
#[async_trait]
pub trait LocalLibrary: Send + Sync {
    /// Every book, in library order.
    async fn get_local_manifest(&self) -> Result<Vec<SyncableBook>, SyncError>;

    /// Store a book received from a peer, replacing any copy with its id.
    async fn apply_remote_item(&self, book: SyncableBook) -> Result<(), SyncError>;

    /// Remove a book. Removing an unknown id is not an error.
    async fn delete_local_item(&self, item_id: &str) -> Result<(), SyncError>;

    /// One book by id.
    async fn get_item(&self, item_id: &str) -> Result<Option<SyncableBook>, SyncError> {
        Ok(self
            .get_local_manifest()
            .await?
            .into_iter()
            .find(|book| book.id == item_id))
    }
}

/// In-memory library keeping insertion order.
///
/// Clones share the same books.
#[derive(Debug, Clone, Default)]
pub struct MemoryLibrary {
    books: Arc<DashMap<String, (u64, SyncableBook)>>,
    next_position: Arc<std::sync::atomic::AtomicU64>,
}

impl MemoryLibrary {
    /// Create an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a library holding `books`.
    pub fn with_books(books: impl IntoIterator<Item = SyncableBook>) -> Self {
        let library = Self::new();
        for book in books {
            library.insert(book);
        }
        library
    }

    /// Insert or replace a book. A replaced book keeps its position.
    pub fn insert(&self, book: SyncableBook) {
        use std::sync::atomic::Ordering;
        self.books
            .entry(book.id.clone())
            .and_modify(|(_, existing)| *existing = book.clone())
            .or_insert_with(|| (self.next_position.fetch_add(1, Ordering::SeqCst), book));
    }

    /// Books in insertion order.
    pub fn books(&self) -> Vec<SyncableBook> {
        let mut books: Vec<_> = self
            .books
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        books.sort_by_key(|(position, _)| *position);
        books.into_iter().map(|(_, book)| book).collect()
    }

    /// Number of books.
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// Whether the library is empty.
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

#[async_trait]
impl LocalLibrary for MemoryLibrary {
    async fn get_local_manifest(&self) -> Result<Vec<SyncableBook>, SyncError> {
        Ok(self.books())
    }

    async fn apply_remote_item(&self, book: SyncableBook) -> Result<(), SyncError> {
        book.validate()?;
        self.insert(book);
        Ok(())
    }

    async fn delete_local_item(&self, item_id: &str) -> Result<(), SyncError> {
        self.books.remove(item_id);
        Ok(())
    }

    async fn get_item(&self, item_id: &str) -> Result<Option<SyncableBook>, SyncError> {
        Ok(self.books.get(item_id).map(|entry| entry.value().1.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::SyncableChapter;

    fn book(id: &str, modified: u64) -> SyncableBook {
        SyncableBook {
            id: id.into(),
            title: format!("Title {}", id),
            author: "Anon".into(),
            last_modified: modified,
            cover_url: None,
            chapters: vec![SyncableChapter {
                id: format!("{}-1", id),
                book_id: id.into(),
                title: "One".into(),
                content: "...".into(),
                index: 1,
            }],
        }
    }

    #[tokio::test]
    async fn manifest_keeps_insertion_order() {
        let library = MemoryLibrary::with_books(vec![book("c", 1), book("a", 1), book("b", 1)]);
        let ids: Vec<_> = library
            .get_local_manifest()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn applying_replaces_in_place() {
        let library = MemoryLibrary::with_books(vec![book("a", 1), book("b", 1)]);
        library.apply_remote_item(book("a", 9)).await.unwrap();

        let books = library.books();
        assert_eq!(books[0].id, "a");
        assert_eq!(books[0].last_modified, 9);
        assert_eq!(library.len(), 2);
    }

    #[tokio::test]
    async fn invalid_books_are_rejected() {
        let library = MemoryLibrary::new();
        let mut bad = book("a", 1);
        bad.chapters[0].book_id = "other".into();
        let err = library.apply_remote_item(bad).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidData(_)));
        assert!(library.is_empty());
    }

    #[tokio::test]
    async fn delete_and_lookup() {
        let library = MemoryLibrary::with_books(vec![book("a", 1)]);
        assert!(library.get_item("a").await.unwrap().is_some());
        library.delete_local_item("a").await.unwrap();
        library.delete_local_item("missing").await.unwrap();
        assert!(library.get_item("a").await.unwrap().is_none());
    }
}
