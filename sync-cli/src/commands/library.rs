//! Show and fill the local library.

use anyhow::Result;
use std::path::Path;

use crate::config::Workspace;
use crate::library::JsonLibrary;

/// Print the books in the local library.
pub async fn list(workspace: &Workspace) -> Result<()> {
    let library = JsonLibrary::open(&workspace.library_path()).await?;
    let books = library.books().await;
    if books.is_empty() {
        println!("Library is empty. Add books with: shelf-sync library import <file.json>");
        return Ok(());
    }
    for book in &books {
        println!(
            "  {:<24} {:<32} {:<20} {} chapter(s)",
            book.id,
            book.title,
            book.author,
            book.chapters.len()
        );
    }
    println!();
    println!("{} book(s)", books.len());
    Ok(())
}

/// Import books from a JSON array of books.
pub async fn import(workspace: &Workspace, source: &Path) -> Result<()> {
    let library = JsonLibrary::open(&workspace.library_path()).await?;
    let count = library.import(source).await?;
    println!("Imported {} book(s) from {}.", count, source.display());
    Ok(())
}
