use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Domain failures a collaborator reports. The dispatcher turns these into
/// tool results tagged with [`WorkspaceError::kind`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkspaceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl WorkspaceError {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkspaceError::NotFound(_) => "not_found",
            WorkspaceError::BadRequest(_) => "bad_request",
        }
    }
}

pub type WsResult<T> = Result<T, WorkspaceError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: u64,
    pub book_id: Option<u64>,
    pub title: String,
    pub summary: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterPatch {
    pub title: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryMeta {
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryPatch {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: u64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcebookEntry {
    pub id: u64,
    pub name: String,
    pub category: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPatch {
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
    pub description: String,
}

/// Everything the story tools read and write.
#[async_trait]
pub trait StoryWorkspace: Send + Sync {
    async fn read_chapter(&self, id: u64) -> WsResult<Chapter>;
    async fn write_chapter(&self, id: u64, content: &str) -> WsResult<Chapter>;
    async fn update_chapter(&self, id: u64, patch: ChapterPatch) -> WsResult<Chapter>;
    async fn create_chapter(&self, title: &str, book_id: Option<u64>) -> WsResult<Chapter>;
    async fn delete_chapter(&self, id: u64) -> WsResult<()>;
    async fn list_chapters(&self) -> WsResult<Vec<Chapter>>;

    async fn story(&self) -> WsResult<StoryMeta>;
    async fn update_story(&self, patch: StoryPatch) -> WsResult<StoryMeta>;

    async fn create_book(&self, title: &str) -> WsResult<Book>;
    async fn delete_book(&self, id: u64) -> WsResult<()>;

    async fn search_entries(&self, query: &str, category: Option<&str>) -> WsResult<Vec<SourcebookEntry>>;
    async fn create_entry(&self, name: &str, category: &str, description: &str) -> WsResult<SourcebookEntry>;
    async fn update_entry(&self, id: u64, patch: EntryPatch) -> WsResult<SourcebookEntry>;
    async fn delete_entry(&self, id: u64) -> WsResult<()>;

    async fn list_images(&self) -> WsResult<Vec<Image>>;
    async fn describe_image(&self, name: &str) -> WsResult<Image>;
    async fn create_image(&self, name: &str, description: &str) -> WsResult<Image>;
}

#[derive(Debug, Default)]
struct State {
    story: StoryMeta,
    chapters: BTreeMap<u64, Chapter>,
    books: BTreeMap<u64, Book>,
    entries: BTreeMap<u64, SourcebookEntry>,
    images: BTreeMap<String, Image>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn chapter_mut(&mut self, id: u64) -> WsResult<&mut Chapter> {
        self.chapters
            .get_mut(&id)
            .ok_or_else(|| WorkspaceError::NotFound(format!("chapter {id}")))
    }
}

fn non_empty(field: &str, value: &str) -> WsResult<()> {
    if value.trim().is_empty() {
        return Err(WorkspaceError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

/// In-memory story. Ids are shared across chapters, books and entries.
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    state: RwLock<State>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// A small seeded story for the binary and tests.
    pub fn demo() -> Self {
        let mut state = State {
            story: StoryMeta {
                title: "The Lighthouse Keeper".into(),
                summary: "A keeper finds a letter that should not exist.".into(),
                tags: vec!["mystery".into()],
            },
            ..State::default()
        };
        let book = state.next_id();
        state.books.insert(
            book,
            Book {
                id: book,
                title: "Book One".into(),
            },
        );
        for (title, content) in [
            ("Arrival", "The boat left Mara on the rocks at dusk."),
            ("The Letter", "Under the lamp oil she found an envelope addressed to herself."),
        ] {
            let id = state.next_id();
            state.chapters.insert(
                id,
                Chapter {
                    id,
                    book_id: Some(book),
                    title: title.into(),
                    summary: String::new(),
                    content: content.into(),
                },
            );
        }
        let id = state.next_id();
        state.entries.insert(
            id,
            SourcebookEntry {
                id,
                name: "Mara".into(),
                category: "character".into(),
                description: "The new keeper. Distrusts the sea.".into(),
            },
        );
        state.images.insert(
            "cover.png".into(),
            Image {
                name: "cover.png".into(),
                description: "A lighthouse in fog.".into(),
            },
        );
        Self {
            state: RwLock::new(state),
        }
    }
}

#[async_trait]
impl StoryWorkspace for MemoryWorkspace {
    async fn read_chapter(&self, id: u64) -> WsResult<Chapter> {
        let state = self.state.read().await;
        state
            .chapters
            .get(&id)
            .cloned()
            .ok_or_else(|| WorkspaceError::NotFound(format!("chapter {id}")))
    }

    async fn write_chapter(&self, id: u64, content: &str) -> WsResult<Chapter> {
        let mut state = self.state.write().await;
        let chapter = state.chapter_mut(id)?;
        chapter.content = content.to_string();
        Ok(chapter.clone())
    }

    async fn update_chapter(&self, id: u64, patch: ChapterPatch) -> WsResult<Chapter> {
        if let Some(title) = &patch.title {
            non_empty("title", title)?;
        }
        let mut state = self.state.write().await;
        let chapter = state.chapter_mut(id)?;
        if let Some(title) = patch.title {
            chapter.title = title;
        }
        if let Some(summary) = patch.summary {
            chapter.summary = summary;
        }
        Ok(chapter.clone())
    }

    async fn create_chapter(&self, title: &str, book_id: Option<u64>) -> WsResult<Chapter> {
        non_empty("title", title)?;
        let mut state = self.state.write().await;
        if let Some(book) = book_id
            && !state.books.contains_key(&book)
        {
            return Err(WorkspaceError::NotFound(format!("book {book}")));
        }
        let id = state.next_id();
        let chapter = Chapter {
            id,
            book_id,
            title: title.to_string(),
            summary: String::new(),
            content: String::new(),
        };
        state.chapters.insert(id, chapter.clone());
        Ok(chapter)
    }

    async fn delete_chapter(&self, id: u64) -> WsResult<()> {
        let mut state = self.state.write().await;
        state
            .chapters
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| WorkspaceError::NotFound(format!("chapter {id}")))
    }

    async fn list_chapters(&self) -> WsResult<Vec<Chapter>> {
        Ok(self.state.read().await.chapters.values().cloned().collect())
    }

    async fn story(&self) -> WsResult<StoryMeta> {
        Ok(self.state.read().await.story.clone())
    }

    async fn update_story(&self, patch: StoryPatch) -> WsResult<StoryMeta> {
        if let Some(title) = &patch.title {
            non_empty("title", title)?;
        }
        let mut state = self.state.write().await;
        if let Some(title) = patch.title {
            state.story.title = title;
        }
        if let Some(summary) = patch.summary {
            state.story.summary = summary;
        }
        if let Some(tags) = patch.tags {
            state.story.tags = tags;
        }
        Ok(state.story.clone())
    }

    async fn create_book(&self, title: &str) -> WsResult<Book> {
        non_empty("title", title)?;
        let mut state = self.state.write().await;
        let id = state.next_id();
        let book = Book {
            id,
            title: title.to_string(),
        };
        state.books.insert(id, book.clone());
        Ok(book)
    }

    async fn delete_book(&self, id: u64) -> WsResult<()> {
        let mut state = self.state.write().await;
        if state.books.remove(&id).is_none() {
            return Err(WorkspaceError::NotFound(format!("book {id}")));
        }
        state.chapters.retain(|_, c| c.book_id != Some(id));
        Ok(())
    }

    async fn search_entries(&self, query: &str, category: Option<&str>) -> WsResult<Vec<SourcebookEntry>> {
        let needle = query.to_lowercase();
        let state = self.state.read().await;
        Ok(state
            .entries
            .values()
            .filter(|e| category.is_none_or(|c| e.category.eq_ignore_ascii_case(c)))
            .filter(|e| {
                needle.is_empty()
                    || e.name.to_lowercase().contains(&needle)
                    || e.description.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn create_entry(&self, name: &str, category: &str, description: &str) -> WsResult<SourcebookEntry> {
        non_empty("name", name)?;
        let mut state = self.state.write().await;
        if state.entries.values().any(|e| e.name.eq_ignore_ascii_case(name)) {
            return Err(WorkspaceError::BadRequest(format!("entry {name:?} already exists")));
        }
        let id = state.next_id();
        let entry = SourcebookEntry {
            id,
            name: name.to_string(),
            category: category.to_string(),
            description: description.to_string(),
        };
        state.entries.insert(id, entry.clone());
        Ok(entry)
    }

    async fn update_entry(&self, id: u64, patch: EntryPatch) -> WsResult<SourcebookEntry> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or_else(|| WorkspaceError::NotFound(format!("sourcebook entry {id}")))?;
        if let Some(name) = patch.name {
            non_empty("name", &name)?;
            entry.name = name;
        }
        if let Some(category) = patch.category {
            entry.category = category;
        }
        if let Some(description) = patch.description {
            entry.description = description;
        }
        Ok(entry.clone())
    }

    async fn delete_entry(&self, id: u64) -> WsResult<()> {
        let mut state = self.state.write().await;
        state
            .entries
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| WorkspaceError::NotFound(format!("sourcebook entry {id}")))
    }

    async fn list_images(&self) -> WsResult<Vec<Image>> {
        Ok(self.state.read().await.images.values().cloned().collect())
    }

    async fn describe_image(&self, name: &str) -> WsResult<Image> {
        let state = self.state.read().await;
        state
            .images
            .get(name)
            .cloned()
            .ok_or_else(|| WorkspaceError::NotFound(format!("image {name}")))
    }

    async fn create_image(&self, name: &str, description: &str) -> WsResult<Image> {
        non_empty("name", name)?;
        let mut state = self.state.write().await;
        if state.images.contains_key(name) {
            return Err(WorkspaceError::BadRequest(format!("image {name} already exists")));
        }
        let image = Image {
            name: name.to_string(),
            description: description.to_string(),
        };
        state.images.insert(name.to_string(), image.clone());
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_chapters_and_missing_ids() {
        let ws = MemoryWorkspace::demo();
        let chapters = ws.list_chapters().await.unwrap();
        assert_eq!(chapters.len(), 2);
        let first = ws.read_chapter(chapters[0].id).await.unwrap();
        assert_eq!(first.title, "Arrival");
        assert_eq!(
            ws.read_chapter(999).await.unwrap_err(),
            WorkspaceError::NotFound("chapter 999".into())
        );
    }

    #[tokio::test]
    async fn deleting_a_book_drops_its_chapters() {
        let ws = MemoryWorkspace::new();
        let book = ws.create_book("Two").await.unwrap();
        ws.create_chapter("Opening", Some(book.id)).await.unwrap();
        ws.create_chapter("Loose", None).await.unwrap();
        ws.delete_book(book.id).await.unwrap();
        let left = ws.list_chapters().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].title, "Loose");
        assert!(ws.create_chapter("x", Some(book.id)).await.is_err());
    }

    #[tokio::test]
    async fn entry_search_and_validation() {
        let ws = MemoryWorkspace::demo();
        assert_eq!(ws.search_entries("sea", None).await.unwrap().len(), 1);
        assert!(ws.search_entries("mara", Some("place")).await.unwrap().is_empty());
        let err = ws.create_entry("mara", "character", "").await.unwrap_err();
        assert_eq!(err.kind(), "bad_request");
        let err = ws.create_entry("  ", "place", "").await.unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }
}
