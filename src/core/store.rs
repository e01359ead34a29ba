use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::core::models::{
    Character, CharacterId, NewCharacter, NewStory, NewStoryPage, PageId, Profile, Story,
    StoryId, StoryMediaUpdate, StoryPage, UserId,
};

/// Record store for stories, pages, characters and profiles.
///
/// Ownership filters are passed explicitly by the caller; row-level access
/// control is the backend's business.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn insert_story(&self, story: &NewStory) -> Result<Story>;
    async fn update_story_media(&self, story_id: StoryId, update: &StoryMediaUpdate) -> Result<()>;
    async fn set_story_public(&self, story_id: StoryId, is_public: bool) -> Result<()>;
    async fn get_story(&self, story_id: StoryId) -> Result<Option<Story>>;
    /// Newest first.
    async fn list_user_stories(&self, user_id: UserId) -> Result<Vec<Story>>;
    async fn count_user_stories(&self, user_id: UserId) -> Result<usize>;
    /// Newest first.
    async fn list_public_stories(&self, limit: Option<usize>) -> Result<Vec<Story>>;
    /// Removes the story together with all of its pages.
    async fn delete_story(&self, story_id: StoryId) -> Result<()>;

    /// Inserts the whole batch or nothing.
    async fn insert_pages(&self, pages: &[NewStoryPage]) -> Result<Vec<StoryPage>>;
    /// Ordered by page number.
    async fn list_pages(&self, story_id: StoryId) -> Result<Vec<StoryPage>>;
    async fn set_page_audio(&self, page_id: PageId, audio_url: &str) -> Result<()>;

    /// Newest first.
    async fn list_characters(&self, user_id: UserId) -> Result<Vec<Character>>;
    async fn insert_character(&self, character: &NewCharacter) -> Result<Character>;
    async fn delete_character(&self, character_id: CharacterId) -> Result<()>;

    async fn get_profile(&self, user_id: UserId) -> Result<Profile>;
}

/// Atomic credit balance operations.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Returns the new balance. Must refuse a decrement that would go negative.
    async fn decrement_credits(&self, user_id: UserId, amount: u32) -> Result<i64>;
    async fn refund_credits(&self, user_id: UserId, amount: u32) -> Result<i64>;
}

// --- In-memory Implementation ---

/// Operations of [`MemoryStore`] that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertStory,
    UpdateStoryMedia,
    InsertPages,
    DeleteStory,
    SetPageAudio,
    InsertCharacter,
    DecrementCredits,
    RefundCredits,
}

#[derive(Default)]
struct Tables {
    stories: Vec<Story>,
    pages: Vec<StoryPage>,
    characters: Vec<Character>,
    profiles: HashMap<UserId, Profile>,
}

/// Process-local backend used for offline runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing: Mutex<HashSet<StoreOp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_credits(&self, user_id: UserId, credits: i64) {
        let mut tables = self.lock();
        tables.profiles.entry(user_id).or_default().credits = credits;
    }

    pub fn credits(&self, user_id: UserId) -> Option<i64> {
        self.lock().profiles.get(&user_id).map(|p| p.credits)
    }

    pub fn fail_on(&self, op: StoreOp) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(op);
        }
    }

    pub fn story_count(&self) -> usize {
        self.lock().stories.len()
    }

    pub fn page_count(&self) -> usize {
        self.lock().pages.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, op: StoreOp) -> Result<()> {
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.contains(&op) {
            bail!("Injected failure for {:?}", op);
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn insert_story(&self, story: &NewStory) -> Result<Story> {
        self.check(StoreOp::InsertStory)?;
        let row = Story {
            id: Uuid::new_v4(),
            user_id: story.user_id,
            title: story.title.clone(),
            prompt_snapshot: Some(story.prompt_snapshot.clone()),
            with_images: story.with_images,
            narrator_voice_id: Some(story.narrator_voice_id.clone()),
            thumbnail_url: Some(story.thumbnail_url.clone()),
            back_cover_url: None,
            is_public: false,
            created_at: Utc::now(),
            author: None,
        };
        self.lock().stories.push(row.clone());
        Ok(row)
    }

    async fn update_story_media(&self, story_id: StoryId, update: &StoryMediaUpdate) -> Result<()> {
        self.check(StoreOp::UpdateStoryMedia)?;
        let mut tables = self.lock();
        let story = tables
            .stories
            .iter_mut()
            .find(|s| s.id == story_id)
            .ok_or_else(|| anyhow!("Story {} not found", story_id))?;
        story.thumbnail_url = Some(update.thumbnail_url.clone());
        story.back_cover_url = update.back_cover_url.clone();
        Ok(())
    }

    async fn set_story_public(&self, story_id: StoryId, is_public: bool) -> Result<()> {
        let mut tables = self.lock();
        let story = tables
            .stories
            .iter_mut()
            .find(|s| s.id == story_id)
            .ok_or_else(|| anyhow!("Story {} not found", story_id))?;
        story.is_public = is_public;
        Ok(())
    }

    async fn get_story(&self, story_id: StoryId) -> Result<Option<Story>> {
        Ok(self.lock().stories.iter().find(|s| s.id == story_id).cloned())
    }

    async fn list_user_stories(&self, user_id: UserId) -> Result<Vec<Story>> {
        Ok(self
            .lock()
            .stories
            .iter()
            .rev()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn count_user_stories(&self, user_id: UserId) -> Result<usize> {
        Ok(self
            .lock()
            .stories
            .iter()
            .filter(|s| s.user_id == user_id)
            .count())
    }

    async fn list_public_stories(&self, limit: Option<usize>) -> Result<Vec<Story>> {
        Ok(self
            .lock()
            .stories
            .iter()
            .rev()
            .filter(|s| s.is_public)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn delete_story(&self, story_id: StoryId) -> Result<()> {
        self.check(StoreOp::DeleteStory)?;
        let mut tables = self.lock();
        tables.pages.retain(|p| p.story_id != story_id);
        tables.stories.retain(|s| s.id != story_id);
        Ok(())
    }

    async fn insert_pages(&self, pages: &[NewStoryPage]) -> Result<Vec<StoryPage>> {
        self.check(StoreOp::InsertPages)?;
        let mut tables = self.lock();
        for page in pages {
            if !tables.stories.iter().any(|s| s.id == page.story_id) {
                bail!("Story {} does not exist", page.story_id);
            }
            let duplicate = tables
                .pages
                .iter()
                .any(|p| p.story_id == page.story_id && p.page_number == page.page_number);
            if duplicate {
                bail!(
                    "Page {} of story {} already exists",
                    page.page_number,
                    page.story_id
                );
            }
        }
        let rows: Vec<StoryPage> = pages
            .iter()
            .map(|page| StoryPage {
                id: Uuid::new_v4(),
                story_id: page.story_id,
                page_number: page.page_number,
                text_content: page.text_content.clone(),
                image_url: page.image_url.clone(),
                audio_url: None,
            })
            .collect();
        tables.pages.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn list_pages(&self, story_id: StoryId) -> Result<Vec<StoryPage>> {
        let mut pages: Vec<StoryPage> = self
            .lock()
            .pages
            .iter()
            .filter(|p| p.story_id == story_id)
            .cloned()
            .collect();
        pages.sort_by_key(|p| p.page_number);
        Ok(pages)
    }

    async fn set_page_audio(&self, page_id: PageId, audio_url: &str) -> Result<()> {
        self.check(StoreOp::SetPageAudio)?;
        let mut tables = self.lock();
        let page = tables
            .pages
            .iter_mut()
            .find(|p| p.id == page_id)
            .ok_or_else(|| anyhow!("Page {} not found", page_id))?;
        page.audio_url = Some(audio_url.to_string());
        Ok(())
    }

    async fn list_characters(&self, user_id: UserId) -> Result<Vec<Character>> {
        Ok(self
            .lock()
            .characters
            .iter()
            .rev()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_character(&self, character: &NewCharacter) -> Result<Character> {
        self.check(StoreOp::InsertCharacter)?;
        let row = Character {
            id: Uuid::new_v4(),
            user_id: character.user_id,
            name: character.name.clone(),
            description: character.description.clone(),
            image_url: Some(character.image_url.clone()),
            created_at: Utc::now(),
        };
        self.lock().characters.push(row.clone());
        Ok(row)
    }

    async fn delete_character(&self, character_id: CharacterId) -> Result<()> {
        self.lock().characters.retain(|c| c.id != character_id);
        Ok(())
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Profile> {
        self.lock()
            .profiles
            .get(&user_id)
            .cloned()
            .ok_or_else(|| anyhow!("Profile for {} not found", user_id))
    }
}

#[async_trait]
impl CreditLedger for MemoryStore {
    async fn decrement_credits(&self, user_id: UserId, amount: u32) -> Result<i64> {
        self.check(StoreOp::DecrementCredits)?;
        let mut tables = self.lock();
        let profile = tables
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("Profile for {} not found", user_id))?;
        let amount = i64::from(amount);
        if profile.credits < amount {
            bail!(
                "Insufficient credits: balance {}, required {}",
                profile.credits,
                amount
            );
        }
        profile.credits -= amount;
        Ok(profile.credits)
    }

    async fn refund_credits(&self, user_id: UserId, amount: u32) -> Result<i64> {
        self.check(StoreOp::RefundCredits)?;
        let mut tables = self.lock();
        let profile = tables
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("Profile for {} not found", user_id))?;
        profile.credits += i64::from(amount);
        Ok(profile.credits)
    }
}
