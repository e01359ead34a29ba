use anyhow::Result;
use log::{info, warn};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::config::RequestDefaults;
use crate::core::error::LibraryError;
use crate::core::models::{
    GenerationRequest, IllustrationStyle, Profile, Story, StoryId, StoryPage, UserContext,
};
use crate::core::store::ContentStore;

/// A story with its pages in reading order.
#[derive(Debug, Clone)]
pub struct Book {
    pub story: Story,
    pub pages: Vec<StoryPage>,
}

/// What the dashboard shows for a signed-in user.
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub stories: Vec<Story>,
    pub story_count: usize,
    pub latest_sticker: Option<String>,
    pub profile: Profile,
    pub community: Vec<Story>,
}

pub const DASHBOARD_COMMUNITY_LIMIT: usize = 5;
pub const LANDING_COMMUNITY_LIMIT: usize = 4;

pub struct Library {
    store: Arc<dyn ContentStore>,
}

impl Library {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    pub async fn my_stories(&self, user: &UserContext) -> Result<Vec<Story>> {
        self.store.list_user_stories(user.id).await
    }

    pub async fn story_count(&self, user: &UserContext) -> Result<usize> {
        self.store.count_user_stories(user.id).await
    }

    /// First page illustration of the user's newest story.
    pub async fn latest_sticker(&self, user: &UserContext) -> Result<Option<String>> {
        let stories = self.store.list_user_stories(user.id).await?;
        let Some(latest) = stories.first() else {
            return Ok(None);
        };
        let pages = self.store.list_pages(latest.id).await?;
        Ok(pages.into_iter().next().and_then(|p| p.image_url))
    }

    pub async fn dashboard(&self, user: &UserContext) -> Result<Dashboard> {
        let stories = self.my_stories(user).await?;
        let story_count = self.story_count(user).await?;
        let latest_sticker = match self.latest_sticker(user).await {
            Ok(sticker) => sticker,
            Err(e) => {
                warn!("Error fetching sticker: {:#}", e);
                None
            }
        };
        let profile = self.store.get_profile(user.id).await?;
        let community = self
            .community_feed(Some(DASHBOARD_COMMUNITY_LIMIT))
            .await?;
        Ok(Dashboard {
            stories,
            story_count,
            latest_sticker,
            profile,
            community,
        })
    }

    pub async fn publish_story(&self, story_id: StoryId) -> Result<()> {
        self.store.set_story_public(story_id, true).await?;
        info!("Story {} is now visible in the Community Garden", story_id);
        Ok(())
    }

    pub async fn delete_story(&self, story_id: StoryId) -> Result<()> {
        self.store.delete_story(story_id).await?;
        info!("Deleted story {}", story_id);
        Ok(())
    }

    pub async fn community_feed(&self, limit: Option<usize>) -> Result<Vec<Story>> {
        self.store.list_public_stories(limit).await
    }

    pub async fn load_book(&self, story_id: StoryId) -> Result<Book, LibraryError> {
        let story = self
            .store
            .get_story(story_id)
            .await?
            .ok_or(LibraryError::NotFound(story_id))?;
        let pages = self.store.list_pages(story_id).await?;
        Ok(Book { story, pages })
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RemixSnapshot {
    characters: Option<String>,
    setting: Option<String>,
    plot: Option<String>,
    illustration_style: Option<String>,
}

/// Rebuilds a request from a story's prompt snapshot. Only the story idea and
/// style carry over; voice, length and images come from `defaults`.
pub fn remix(story: &Story, defaults: &RequestDefaults) -> GenerationRequest {
    let snapshot = story
        .prompt_snapshot
        .as_deref()
        .and_then(|raw| match serde_json::from_str::<RemixSnapshot>(raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Prompt snapshot of story {} is unreadable: {}", story.id, e);
                None
            }
        })
        .unwrap_or_default();

    let illustration_style = snapshot
        .illustration_style
        .and_then(|s| s.parse::<IllustrationStyle>().ok())
        .unwrap_or(defaults.illustration_style);

    GenerationRequest {
        characters: snapshot.characters.unwrap_or_default(),
        setting: snapshot.setting.unwrap_or_default(),
        plot: snapshot.plot.unwrap_or_default(),
        illustration_style,
        narrator_voice_id: defaults.narrator_voice_id.clone(),
        page_count: defaults.page_count,
        with_images: defaults.with_images,
    }
}
