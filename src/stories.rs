//! Story persistence on top of a [`SheetClient`].
//!
//! Stories live in the `Stories` tab, columns A-L, with the header on row 1.
//! A story's id is its position among the data rows plus one, so the story
//! with id `n` sits on sheet row `n + 1`. Ids are recomputed on every read and
//! shift when an earlier story is deleted.

use chrono::Utc;
use log::{error, info};
use std::sync::Arc;

use crate::codec::{STORY_COLUMNS, Story, StoryInput, decode_story_row, encode_story_row, story_header};
use crate::error::StoreError;
use crate::range::SheetRange;
use crate::sheet::SheetClient;

pub const STORIES_TAB: &str = "Stories";

const LAST_COL: u32 = STORY_COLUMNS.len() as u32;

/// Create, read, update and delete stories. Every call goes to the backend;
/// nothing is cached and nothing is retried.
#[derive(Clone)]
pub struct StoryRepository {
    client: Arc<dyn SheetClient>,
    tab: String,
}

impl StoryRepository {
    pub fn new(client: Arc<dyn SheetClient>) -> Self {
        Self::with_tab(client, STORIES_TAB)
    }

    pub fn with_tab(client: Arc<dyn SheetClient>, tab: &str) -> Self {
        StoryRepository {
            client,
            tab: tab.to_string(),
        }
    }

    fn all_range(&self) -> String {
        SheetRange::columns(&self.tab, 1, LAST_COL).to_string()
    }

    fn row_range(&self, row: u32) -> String {
        SheetRange::row(&self.tab, 1, LAST_COL, row).to_string()
    }

    /// All stories in sheet order, with `id = index + 1`.
    ///
    /// # Errors
    /// * Propagates any backend failure
    pub async fn list_stories(&self) -> Result<Vec<Story>, StoreError> {
        let rows = self
            .client
            .fetch_range(&self.all_range())
            .await
            .inspect_err(|e| error!("Error fetching stories: {e}"))?;

        let mut rows = rows.into_iter();
        let Some(header) = rows.next() else {
            return Ok(Vec::new());
        };

        Ok(rows
            .enumerate()
            .map(|(index, row)| {
                let mut story = decode_story_row(&header, &row);
                story.id = index as u64 + 1;
                story
            })
            .collect())
    }

    /// Find a story by its derived id. A non-numeric id simply matches nothing.
    ///
    /// # Errors
    /// * Propagates any backend failure
    pub async fn get_story(&self, id: &str) -> Result<Option<Story>, StoreError> {
        let Ok(id) = id.trim().parse::<u64>() else {
            return Ok(None);
        };

        let stories = self.list_stories().await?;
        Ok(stories.into_iter().find(|s| s.id == id))
    }

    /// Append a story at the end of the tab. Writes the header first when the
    /// tab is completely blank. The new story's id is not reported.
    ///
    /// # Errors
    /// * Propagates any backend failure
    pub async fn create_story(&self, input: &StoryInput) -> Result<(), StoreError> {
        let header_range = self.row_range(1);
        let header = self
            .client
            .fetch_range(&header_range)
            .await
            .inspect_err(|e| error!("Error creating story: {e}"))?;

        let mut rows = Vec::with_capacity(2);
        if header.is_empty() {
            info!("{} tab is blank, writing header row", self.tab);
            rows.push(story_header());
        }
        rows.push(encode_story_row(input, Utc::now()));

        self.client
            .append_rows(&self.all_range(), rows)
            .await
            .inspect_err(|e| error!("Error creating story: {e}"))?;

        Ok(())
    }

    /// Overwrite the full row of story `id`.
    ///
    /// # Errors
    /// * `StoreError::InvalidStoryId` if `id` is not a number or would land on
    ///   the header row; no backend call is made in that case
    /// * `StoreError::NotFound` if no story has that id
    /// * Propagates any backend failure
    pub async fn update_story(&self, id: &str, input: &StoryInput) -> Result<(), StoreError> {
        let row = story_row(id)?;
        let range = self.row_range(row);

        self.ensure_row_exists(&range).await?;

        self.client
            .update_range(&range, vec![encode_story_row(input, Utc::now())])
            .await
            .inspect_err(|e| error!("Error updating story {id}: {e}"))?;

        Ok(())
    }

    /// Delete the row of story `id`. Every later story's id drops by one.
    ///
    /// # Errors
    /// * `StoreError::InvalidStoryId` if `id` is not a number or would land on
    ///   the header row
    /// * `StoreError::NotFound` if no story has that id
    /// * Propagates any backend failure
    pub async fn delete_story(&self, id: &str) -> Result<(), StoreError> {
        let row = story_row(id)?;
        let range = self.row_range(row);

        self.ensure_row_exists(&range).await?;

        let sheet_id = self
            .client
            .sheet_id(&self.tab)
            .await
            .inspect_err(|e| error!("Error deleting story {id}: {e}"))?;

        let start = row as usize - 1;
        self.client
            .delete_rows(sheet_id, start, start + 1)
            .await
            .inspect_err(|e| error!("Error deleting story {id}: {e}"))?;

        Ok(())
    }

    async fn ensure_row_exists(&self, range: &str) -> Result<(), StoreError> {
        let rows = self
            .client
            .fetch_range(range)
            .await
            .inspect_err(|e| error!("Error reading {range}: {e}"))?;

        if rows.is_empty() {
            return Err(StoreError::NotFound("Story"));
        }
        Ok(())
    }
}

/// Sheet row holding story `id`. Row 1 is the header, so valid rows start at 2.
fn story_row(id: &str) -> Result<u32, StoreError> {
    let id: i64 = id.trim().parse().map_err(|_| StoreError::InvalidStoryId)?;
    let row = id + 1;
    if row < 2 {
        return Err(StoreError::InvalidStoryId);
    }
    u32::try_from(row).map_err(|_| StoreError::InvalidStoryId)
}
