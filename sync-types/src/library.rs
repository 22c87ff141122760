//! Library items, manifests and conflicts.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{DeviceId, SyncError};

/// A chapter of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableChapter {
    /// Chapter id.
    pub id: String,
    /// Owning book id.
    pub book_id: String,
    /// Chapter title.
    pub title: String,
    /// Chapter text.
    pub content: String,
    /// Position in reading order, unique within the book.
    pub index: u32,
}

/// A book, the unit of transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableBook {
    /// Book id, shared across devices.
    pub id: String,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Epoch milliseconds of the last local change.
    pub last_modified: u64,
    /// Optional cover image URL.
    pub cover_url: Option<String>,
    /// Chapters in reading order.
    pub chapters: Vec<SyncableChapter>,
}

impl SyncableBook {
    /// Check structural invariants before a book is applied locally.
    ///
    /// Chapter indices must be unique and every chapter must belong to
    /// this book.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.id.is_empty() {
            return Err(SyncError::InvalidData("book id is empty".into()));
        }
        let mut seen = HashSet::with_capacity(self.chapters.len());
        for chapter in &self.chapters {
            if chapter.book_id != self.id {
                return Err(SyncError::InvalidData(format!(
                    "chapter {} belongs to book {}, not {}",
                    chapter.id, chapter.book_id, self.id
                )));
            }
            if !seen.insert(chapter.index) {
                return Err(SyncError::InvalidData(format!(
                    "duplicate chapter index {} in book {}",
                    chapter.index, self.id
                )));
            }
        }
        Ok(())
    }

    /// Chapters sorted by reading order.
    pub fn chapters_in_order(&self) -> Vec<&SyncableChapter> {
        let mut chapters: Vec<_> = self.chapters.iter().collect();
        chapters.sort_by_key(|c| c.index);
        chapters
    }

    /// Content hash used in the manifest (hex SHA-256).
    ///
    /// Covers the id, modification time, metadata and every chapter in
    /// reading order, so two copies with equal hashes are interchangeable.
    pub fn content_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.last_modified.to_be_bytes());
        hasher.update(self.title.as_bytes());
        hasher.update([0]);
        hasher.update(self.author.as_bytes());
        hasher.update([0]);
        if let Some(cover) = &self.cover_url {
            hasher.update(cover.as_bytes());
        }
        for chapter in self.chapters_in_order() {
            hasher.update(chapter.index.to_be_bytes());
            hasher.update(chapter.id.as_bytes());
            hasher.update([0]);
            hasher.update(chapter.title.as_bytes());
            hasher.update([0]);
            hasher.update(chapter.content.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Kind of entry in a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncItemType {
    /// A whole book with its chapters.
    Book,
    /// A single chapter.
    Chapter,
    /// Reading history.
    History,
}

/// One entry of a library manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    /// Item id (book id for books).
    pub item_id: String,
    /// Kind of item.
    pub item_type: SyncItemType,
    /// Content hash.
    pub hash: String,
    /// Epoch milliseconds of the last change.
    pub last_modified: u64,
}

impl ManifestItem {
    /// Manifest entry describing `book`.
    pub fn for_book(book: &SyncableBook) -> Self {
        Self {
            item_id: book.id.clone(),
            item_type: SyncItemType::Book,
            hash: book.content_hash(),
            last_modified: book.last_modified,
        }
    }
}

/// The list of items one device holds, exchanged before transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Device that produced the manifest.
    pub device_id: DeviceId,
    /// Epoch milliseconds when it was built.
    pub timestamp: u64,
    /// Items in library order.
    pub items: Vec<ManifestItem>,
}

impl Manifest {
    /// Build a manifest from a list of books, preserving their order.
    pub fn from_books(device_id: DeviceId, timestamp: u64, books: &[SyncableBook]) -> Self {
        Self {
            device_id,
            timestamp,
            items: books.iter().map(ManifestItem::for_book).collect(),
        }
    }
}

/// Both peers hold an item with the same id but different versions.
///
/// The engine never resolves conflicts on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflicting item id.
    pub item_id: String,
    /// Our version.
    pub local_version: ManifestItem,
    /// The peer's version.
    pub remote_version: ManifestItem,
}
