use futures_util::StreamExt;
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::future::Future;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::core::config::GenerationSettings;
use crate::core::error::GenerationError;
use crate::core::models::{
    GenerationRequest, NewStory, NewStoryPage, StoryId, StoryMediaUpdate, UserContext, UserId,
};
use crate::core::store::{ContentStore, CreditLedger};
use crate::services::functions::{AiFunctions, BackCoverRequest, ImageRequest, StoryDraft};

/// Stage reached by a running generation, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationProgress {
    CreditChecked { remaining: i64 },
    TextReady { title: String, pages: usize },
    StoryCreated { story_id: StoryId },
    ImageProgress { completed: usize, total: usize },
    BackCover { generated: bool },
    Persisted { pages: usize },
    Finalized { story_id: StoryId },
}

impl GenerationProgress {
    pub fn message(&self) -> String {
        match self {
            GenerationProgress::CreditChecked { .. } => "Crafting your unique story...".to_string(),
            GenerationProgress::TextReady { .. } => "Saving your masterpiece...".to_string(),
            GenerationProgress::StoryCreated { .. } => {
                "Bringing pages to life...".to_string()
            }
            GenerationProgress::ImageProgress { completed, total } => {
                format!("Drawing page {} of {}...", completed, total)
            }
            GenerationProgress::BackCover { .. } => "Crafting the perfect ending...".to_string(),
            GenerationProgress::Persisted { .. } => "Putting it all together...".to_string(),
            GenerationProgress::Finalized { .. } => "Your storybook is ready!".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub story_id: StoryId,
    pub title: String,
    pub page_count: usize,
    /// At least one page fell back to the placeholder illustration.
    pub images_degraded: bool,
    pub back_cover_missing: bool,
    pub finalize_failed: bool,
}

/// Turns a [`GenerationRequest`] into a persisted storybook.
///
/// Steps run strictly in order: credit debit, text generation, story row,
/// page illustrations, back cover, page batch insert, thumbnail update.
/// Illustration and back cover failures degrade to placeholders; everything
/// before the page insert is fatal.
pub struct StoryGenerator {
    ledger: Arc<dyn CreditLedger>,
    store: Arc<dyn ContentStore>,
    functions: Arc<dyn AiFunctions>,
    settings: GenerationSettings,
    in_flight: Mutex<HashSet<UserId>>,
    progress: Option<UnboundedSender<GenerationProgress>>,
}

struct InFlightGuard<'a> {
    users: &'a Mutex<HashSet<UserId>>,
    user_id: UserId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.remove(&self.user_id);
    }
}

impl StoryGenerator {
    pub fn new(
        ledger: Arc<dyn CreditLedger>,
        store: Arc<dyn ContentStore>,
        functions: Arc<dyn AiFunctions>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            ledger,
            store,
            functions,
            settings,
            in_flight: Mutex::new(HashSet::new()),
            progress: None,
        }
    }

    pub fn with_progress(mut self, sender: UnboundedSender<GenerationProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    fn emit(&self, event: GenerationProgress) {
        if let Some(sender) = &self.progress {
            // A dropped receiver just means nobody is watching.
            let _ = sender.send(event);
        }
    }

    fn acquire(&self, user_id: UserId) -> Result<InFlightGuard<'_>, GenerationError> {
        let mut users = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !users.insert(user_id) {
            return Err(GenerationError::AlreadyInProgress);
        }
        Ok(InFlightGuard {
            users: &self.in_flight,
            user_id,
        })
    }

    pub async fn generate_story(
        &self,
        request: &GenerationRequest,
        user: &UserContext,
        credit_cost: u32,
    ) -> Result<GenerationOutcome, GenerationError> {
        request.validate()?;
        let _guard = self.acquire(user.id)?;

        info!(
            "Generating {}-page story for {} (images: {}, cost: {})",
            request.page_count, user.id, request.with_images, credit_cost
        );

        let remaining = self
            .ledger
            .decrement_credits(user.id, credit_cost)
            .await
            .map_err(|e| {
                warn!("Credit decrement rejected for {}: {:#}", user.id, e);
                GenerationError::InsufficientCredits(e)
            })?;
        self.emit(GenerationProgress::CreditChecked { remaining });

        let draft = match self.generate_text(request).await {
            Ok(draft) => draft,
            Err(e) => {
                error!("{}", e);
                self.refund_after_text_failure(user, credit_cost).await;
                return Err(e);
            }
        };
        self.emit(GenerationProgress::TextReady {
            title: draft.title.clone(),
            pages: draft.pages.len(),
        });

        let snapshot = request
            .snapshot()
            .map_err(|e| GenerationError::Persistence(e.into()))?;
        let story = self
            .store
            .insert_story(&NewStory {
                user_id: user.id,
                title: draft.title.clone(),
                prompt_snapshot: snapshot,
                with_images: request.with_images,
                narrator_voice_id: request.narrator_voice_id.clone(),
                thumbnail_url: self.settings.thumbnail_placeholder_url.clone(),
            })
            .await
            .map_err(GenerationError::Persistence)?;
        info!("Created story {} \"{}\"", story.id, story.title);
        self.emit(GenerationProgress::StoryCreated { story_id: story.id });

        let (pages, images_degraded) = if request.with_images {
            self.illustrate_pages(request, story.id, &draft.pages).await
        } else {
            (text_only_pages(story.id, &draft.pages), false)
        };

        let back_cover_url = if request.with_images {
            self.generate_back_cover(request, story.id).await
        } else {
            None
        };

        if let Err(e) = self.store.insert_pages(&pages).await {
            error!("Saving pages of story {} failed: {:#}", story.id, e);
            if self.settings.cleanup_orphaned_story {
                if let Err(cleanup) = self.store.delete_story(story.id).await {
                    warn!("Could not remove orphaned story {}: {:#}", story.id, cleanup);
                }
            }
            return Err(GenerationError::Persistence(e));
        }
        self.emit(GenerationProgress::Persisted { pages: pages.len() });

        // The first page's image, real or placeholder, becomes the thumbnail.
        let thumbnail_url = pages
            .first()
            .and_then(|page| page.image_url.clone())
            .unwrap_or_else(|| self.settings.thumbnail_placeholder_url.clone());
        let finalize_failed = match self
            .store
            .update_story_media(
                story.id,
                &StoryMediaUpdate {
                    thumbnail_url,
                    back_cover_url: back_cover_url.clone(),
                },
            )
            .await
        {
            Ok(()) => false,
            Err(e) => {
                warn!(
                    "Could not update story {} with thumbnail and back cover: {:#}",
                    story.id, e
                );
                true
            }
        };
        self.emit(GenerationProgress::Finalized { story_id: story.id });

        if images_degraded {
            warn!("Some illustrations of story {} used placeholders", story.id);
        }

        Ok(GenerationOutcome {
            story_id: story.id,
            title: story.title,
            page_count: pages.len(),
            images_degraded,
            back_cover_missing: request.with_images && back_cover_url.is_none(),
            finalize_failed,
        })
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<StoryDraft, GenerationError> {
        let draft = self
            .functions
            .generate_story(request)
            .await
            .map_err(|e| GenerationError::TextGeneration(format!("{:#}", e)))?;
        if draft.title.trim().is_empty() || draft.pages.is_empty() {
            return Err(GenerationError::TextGeneration(
                "AI failed to generate a valid story. Please try again.".to_string(),
            ));
        }
        if draft.pages.len() != request.page_count as usize {
            if self.settings.enforce_page_count {
                return Err(GenerationError::TextGeneration(format!(
                    "expected {} pages but the story has {}",
                    request.page_count,
                    draft.pages.len()
                )));
            }
            // Pages are numbered 1..=returned count, not 1..=requested.
            warn!(
                "Requested {} pages but the story has {}",
                request.page_count,
                draft.pages.len()
            );
        }
        Ok(draft)
    }

    async fn refund_after_text_failure(&self, user: &UserContext, credit_cost: u32) {
        if !self.settings.refund_on_text_failure {
            return;
        }
        match self.ledger.refund_credits(user.id, credit_cost).await {
            Ok(balance) => info!("Refunded {} credits to {} (balance {})", credit_cost, user.id, balance),
            Err(e) => warn!("Could not refund {} credits to {}: {:#}", credit_cost, user.id, e),
        }
    }

    /// Returns the page rows in page order and whether any page fell back to
    /// the placeholder. With `image_concurrency > 1` calls overlap, but
    /// results are placed by page index.
    async fn illustrate_pages(
        &self,
        request: &GenerationRequest,
        story_id: StoryId,
        texts: &[String],
    ) -> (Vec<NewStoryPage>, bool) {
        let total = texts.len();
        let context = request.context();
        let functions = &self.functions;
        let context_ref = &context;

        let stream = futures_util::stream::iter(texts.iter().enumerate())
            .map(|(i, text)| async move {
                let page_number = i as u32 + 1;
                let image_request = ImageRequest {
                    page_text: text.clone(),
                    story_context: context_ref.clone(),
                    style: request.illustration_style,
                    story_id,
                    page_number,
                };
                match functions.generate_image(&image_request).await {
                    Ok(url) => (i, Some(url)),
                    Err(e) => {
                        warn!(
                            "Could not generate image for page {}. Using a placeholder. Error: {:#}",
                            page_number, e
                        );
                        (i, None)
                    }
                }
            })
            .buffer_unordered(self.settings.image_concurrency.max(1));
        futures_util::pin_mut!(stream);

        let mut image_urls: Vec<Option<String>> = vec![None; total];
        let mut any_failed = false;
        let mut completed = 0;
        while let Some((i, url)) = stream.next().await {
            completed += 1;
            match url {
                Some(url) => image_urls[i] = Some(url),
                None => any_failed = true,
            }
            self.emit(GenerationProgress::ImageProgress { completed, total });
        }

        let pages = texts
            .iter()
            .zip(image_urls)
            .enumerate()
            .map(|(i, (text, url))| NewStoryPage {
                story_id,
                page_number: i as u32 + 1,
                text_content: text.clone(),
                image_url: Some(url.unwrap_or_else(|| self.settings.image_placeholder_url.clone())),
            })
            .collect();
        (pages, any_failed)
    }

    async fn generate_back_cover(&self, request: &GenerationRequest, story_id: StoryId) -> Option<String> {
        let result = self
            .functions
            .generate_back_cover(&BackCoverRequest {
                story_context: request.context(),
                style: request.illustration_style,
                story_id,
            })
            .await;
        let url = match result {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Could not generate back cover image: {:#}", e);
                None
            }
        };
        self.emit(GenerationProgress::BackCover {
            generated: url.is_some(),
        });
        url
    }
}

/// Polls `run` to completion while handing every progress event to
/// `on_event`, including events still queued when `run` finishes.
pub async fn drive_with_progress<F, T>(
    run: F,
    progress: &mut UnboundedReceiver<GenerationProgress>,
    mut on_event: impl FnMut(&GenerationProgress),
) -> T
where
    F: Future<Output = T>,
{
    futures_util::pin_mut!(run);
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            Some(event) = progress.recv() => on_event(&event),
        }
    };
    while let Ok(event) = progress.try_recv() {
        on_event(&event);
    }
    outcome
}

fn text_only_pages(story_id: StoryId, texts: &[String]) -> Vec<NewStoryPage> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| NewStoryPage {
            story_id,
            page_number: i as u32 + 1,
            text_content: text.clone(),
            image_url: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DEFAULT_IMAGE_PLACEHOLDER_URL, DEFAULT_THUMBNAIL_PLACEHOLDER_URL};
    use crate::core::store::{MemoryStore, StoreOp};
    use crate::services::credits::credit_cost;
    use crate::services::functions::{CheckoutRequest, NarrationRequest};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    // Mock AI functions
    #[derive(Default)]
    struct ScriptedFunctions {
        draft: Option<StoryDraft>,
        failing_pages: HashSet<u32>,
        back_cover_fails: bool,
        /// Later pages answer sooner, to shake out completion-order bugs.
        staggered: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFunctions {
        fn with_pages(count: usize) -> Self {
            Self {
                draft: Some(StoryDraft {
                    title: "The Knight and the Glowing Flower".to_string(),
                    pages: (1..=count).map(|n| format!("Page {} text", n)).collect(),
                }),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl AiFunctions for ScriptedFunctions {
        async fn generate_story(&self, _request: &GenerationRequest) -> Result<StoryDraft> {
            self.record("story".to_string());
            self.draft.clone().ok_or_else(|| anyhow!("text service down"))
        }

        async fn generate_image(&self, request: &ImageRequest) -> Result<String> {
            self.record(format!("image:{}", request.page_number));
            if self.staggered {
                let delay = 5 * (10 - request.page_number.min(10)) as u64;
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.failing_pages.contains(&request.page_number) {
                return Err(anyhow!("image service error"));
            }
            Ok(format!("https://img.test/{}/{}.png", request.story_id, request.page_number))
        }

        async fn generate_back_cover(&self, request: &BackCoverRequest) -> Result<String> {
            self.record("back_cover".to_string());
            if self.back_cover_fails {
                return Err(anyhow!("back cover error"));
            }
            Ok(format!("https://img.test/{}/back.png", request.story_id))
        }

        async fn generate_narration(&self, _request: &NarrationRequest) -> Result<String> {
            Err(anyhow!("not used"))
        }

        async fn generate_character_image(&self, _description: &str) -> Result<String> {
            Err(anyhow!("not used"))
        }

        async fn create_checkout_session(&self, _request: &CheckoutRequest) -> Result<String> {
            Err(anyhow!("not used"))
        }
    }

    fn request(page_count: u32, with_images: bool) -> GenerationRequest {
        GenerationRequest {
            characters: "A brave little knight who is afraid of the dark.".to_string(),
            setting: "A medieval fantasy kingdom.".to_string(),
            plot: "The knight must find a glowing flower.".to_string(),
            page_count,
            with_images,
            ..Default::default()
        }
    }

    fn generator(
        store: &Arc<MemoryStore>,
        functions: &Arc<ScriptedFunctions>,
        settings: GenerationSettings,
    ) -> StoryGenerator {
        StoryGenerator::new(store.clone(), store.clone(), functions.clone(), settings)
    }

    fn funded_user(store: &MemoryStore, credits: i64) -> UserContext {
        let user = UserContext::new(Uuid::new_v4());
        store.set_credits(user.id, credits);
        user
    }

    #[tokio::test]
    async fn test_text_only_story_has_no_images() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions::with_pages(6));
        let user = funded_user(&store, 10);
        let req = request(6, false);
        let cost = credit_cost(req.page_count, req.with_images);
        assert_eq!(cost, 2);

        let outcome = generator(&store, &functions, GenerationSettings::default())
            .generate_story(&req, &user, cost)
            .await?;

        let pages = store.list_pages(outcome.story_id).await?;
        assert_eq!(
            pages.iter().map(|p| p.page_number).collect::<Vec<_>>(),
            (1..=6).collect::<Vec<_>>()
        );
        assert!(pages.iter().all(|p| p.image_url.is_none()));
        assert!(!outcome.images_degraded);
        assert!(!outcome.back_cover_missing);
        assert_eq!(functions.calls(), vec!["story".to_string()]);
        assert_eq!(store.credits(user.id), Some(8));

        let story = store.get_story(outcome.story_id).await?.unwrap();
        assert_eq!(story.thumbnail_url.as_deref(), Some(DEFAULT_THUMBNAIL_PLACEHOLDER_URL));
        assert!(story.back_cover_url.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_page_image_falls_back_to_placeholder() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let mut scripted = ScriptedFunctions::with_pages(4);
        scripted.failing_pages.insert(4);
        let functions = Arc::new(scripted);
        let user = funded_user(&store, 10);

        let outcome = generator(&store, &functions, GenerationSettings::default())
            .generate_story(&request(4, true), &user, 2)
            .await?;

        assert!(outcome.images_degraded);
        assert_eq!(outcome.page_count, 4);
        let pages = store.list_pages(outcome.story_id).await?;
        assert_eq!(pages.len(), 4);
        assert!(pages.iter().all(|p| p.image_url.is_some()));
        assert_eq!(
            pages[3].image_url.as_deref(),
            Some(DEFAULT_IMAGE_PLACEHOLDER_URL)
        );
        let real: Vec<_> = pages[..3]
            .iter()
            .filter(|p| p.image_url.as_deref() != Some(DEFAULT_IMAGE_PLACEHOLDER_URL))
            .collect();
        assert_eq!(real.len(), 3);

        let story = store.get_story(outcome.story_id).await?.unwrap();
        assert_eq!(story.thumbnail_url, pages[0].image_url);
        assert!(story.back_cover_url.is_some());
        assert_eq!(store.credits(user.id), Some(8));
        Ok(())
    }

    #[tokio::test]
    async fn test_calls_run_in_page_order() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions::with_pages(4));
        let user = funded_user(&store, 10);

        generator(&store, &functions, GenerationSettings::default())
            .generate_story(&request(4, true), &user, 2)
            .await?;

        assert_eq!(
            functions.calls(),
            vec!["story", "image:1", "image:2", "image:3", "image:4", "back_cover"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_insufficient_credits_stops_before_any_call() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions::with_pages(8));
        let user = funded_user(&store, 3);

        let result = generator(&store, &functions, GenerationSettings::default())
            .generate_story(&request(8, true), &user, 4)
            .await;

        assert!(matches!(result, Err(GenerationError::InsufficientCredits(_))));
        assert!(functions.calls().is_empty());
        assert_eq!(store.story_count(), 0);
        assert_eq!(store.page_count(), 0);
        assert_eq!(store.credits(user.id), Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_request_touches_nothing() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions::with_pages(5));
        let user = funded_user(&store, 10);

        let result = generator(&store, &functions, GenerationSettings::default())
            .generate_story(&request(5, true), &user, 3)
            .await;

        assert!(matches!(result, Err(GenerationError::InvalidRequest(_))));
        assert_eq!(store.credits(user.id), Some(10));
        assert!(functions.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_pages_is_text_failure_without_story() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions {
            draft: Some(StoryDraft {
                title: "Untitled".to_string(),
                pages: vec![],
            }),
            ..Default::default()
        });
        let user = funded_user(&store, 10);

        let result = generator(&store, &functions, GenerationSettings::default())
            .generate_story(&request(4, false), &user, 1)
            .await;

        assert!(matches!(result, Err(GenerationError::TextGeneration(_))));
        assert_eq!(store.story_count(), 0);
        // The debit stands unless refunds are switched on.
        assert_eq!(store.credits(user.id), Some(9));
        Ok(())
    }

    #[tokio::test]
    async fn test_text_failure_refund_when_enabled() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions::default());
        let user = funded_user(&store, 10);
        let settings = GenerationSettings {
            refund_on_text_failure: true,
            ..Default::default()
        };

        let result = generator(&store, &functions, settings)
            .generate_story(&request(4, true), &user, 2)
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("text service down"));
        assert_eq!(store.credits(user.id), Some(10));
        Ok(())
    }

    #[tokio::test]
    async fn test_story_insert_failure_is_fatal() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.fail_on(StoreOp::InsertStory);
        let functions = Arc::new(ScriptedFunctions::with_pages(4));
        let user = funded_user(&store, 10);

        let result = generator(&store, &functions, GenerationSettings::default())
            .generate_story(&request(4, true), &user, 2)
            .await;

        assert!(matches!(result, Err(GenerationError::Persistence(_))));
        assert_eq!(functions.calls(), vec!["story".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_page_insert_failure_leaves_orphan_by_default() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.fail_on(StoreOp::InsertPages);
        let functions = Arc::new(ScriptedFunctions::with_pages(4));
        let user = funded_user(&store, 10);

        let result = generator(&store, &functions, GenerationSettings::default())
            .generate_story(&request(4, true), &user, 2)
            .await;

        assert!(matches!(result, Err(GenerationError::Persistence(_))));
        assert_eq!(store.story_count(), 1);
        assert_eq!(store.page_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_page_insert_failure_cleans_up_when_enabled() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.fail_on(StoreOp::InsertPages);
        let functions = Arc::new(ScriptedFunctions::with_pages(4));
        let user = funded_user(&store, 10);
        let settings = GenerationSettings {
            cleanup_orphaned_story: true,
            ..Default::default()
        };

        let result = generator(&store, &functions, settings)
            .generate_story(&request(4, false), &user, 1)
            .await;

        assert!(result.is_err());
        assert_eq!(store.story_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_finalize_failure_is_not_fatal() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.fail_on(StoreOp::UpdateStoryMedia);
        let functions = Arc::new(ScriptedFunctions::with_pages(4));
        let user = funded_user(&store, 10);

        let outcome = generator(&store, &functions, GenerationSettings::default())
            .generate_story(&request(4, true), &user, 2)
            .await?;

        assert!(outcome.finalize_failed);
        let story = store.get_story(outcome.story_id).await?.unwrap();
        // The row keeps the placeholder it was created with.
        assert_eq!(story.thumbnail_url.as_deref(), Some(DEFAULT_THUMBNAIL_PLACEHOLDER_URL));
        assert_eq!(store.list_pages(outcome.story_id).await?.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_back_cover_failure_degrades_silently() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions {
            back_cover_fails: true,
            ..ScriptedFunctions::with_pages(4)
        });
        let user = funded_user(&store, 10);

        let outcome = generator(&store, &functions, GenerationSettings::default())
            .generate_story(&request(4, true), &user, 2)
            .await?;

        assert!(!outcome.images_degraded);
        assert!(outcome.back_cover_missing);
        let story = store.get_story(outcome.story_id).await?.unwrap();
        assert!(story.back_cover_url.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_parallel_illustrations_keep_page_correspondence() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions {
            staggered: true,
            ..ScriptedFunctions::with_pages(8)
        });
        let user = funded_user(&store, 10);
        let settings = GenerationSettings {
            image_concurrency: 4,
            ..Default::default()
        };

        let outcome = generator(&store, &functions, settings)
            .generate_story(&request(8, true), &user, 4)
            .await?;

        let pages = store.list_pages(outcome.story_id).await?;
        for page in &pages {
            let expected = format!("https://img.test/{}/{}.png", outcome.story_id, page.page_number);
            assert_eq!(page.image_url.as_deref(), Some(expected.as_str()));
            assert_eq!(page.text_content, format!("Page {} text", page.page_number));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_progress_events_in_order() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions::with_pages(4));
        let user = funded_user(&store, 10);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = generator(&store, &functions, GenerationSettings::default())
            .with_progress(tx)
            .generate_story(&request(4, true), &user, 2)
            .await?;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                GenerationProgress::CreditChecked { remaining: 8 },
                GenerationProgress::TextReady {
                    title: "The Knight and the Glowing Flower".to_string(),
                    pages: 4
                },
                GenerationProgress::StoryCreated { story_id: outcome.story_id },
                GenerationProgress::ImageProgress { completed: 1, total: 4 },
                GenerationProgress::ImageProgress { completed: 2, total: 4 },
                GenerationProgress::ImageProgress { completed: 3, total: 4 },
                GenerationProgress::ImageProgress { completed: 4, total: 4 },
                GenerationProgress::BackCover { generated: true },
                GenerationProgress::Persisted { pages: 4 },
                GenerationProgress::Finalized { story_id: outcome.story_id },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_second_generation_for_same_user_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions::default());
        let generator = generator(&store, &functions, GenerationSettings::default());
        let user_id = Uuid::new_v4();

        let guard = generator.acquire(user_id).unwrap();
        assert!(matches!(
            generator.acquire(user_id),
            Err(GenerationError::AlreadyInProgress)
        ));
        assert!(generator.acquire(Uuid::new_v4()).is_ok());
        drop(guard);
        assert!(generator.acquire(user_id).is_ok());
    }

    #[tokio::test]
    async fn test_drive_with_progress_sees_every_event() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions::with_pages(4));
        let user = funded_user(&store, 10);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generator = generator(&store, &functions, GenerationSettings::default()).with_progress(tx);

        let mut seen = Vec::new();
        let outcome = drive_with_progress(
            generator.generate_story(&request(4, true), &user, 2),
            &mut rx,
            |event| seen.push(event.clone()),
        )
        .await?;

        assert_eq!(seen.len(), 10);
        assert_eq!(
            seen.last(),
            Some(&GenerationProgress::Finalized { story_id: outcome.story_id })
        );
        // The receiver is free again once the run is over.
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_short_story_keeps_returned_pages_by_default() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions::with_pages(3));
        let user = funded_user(&store, 10);

        let outcome = generator(&store, &functions, GenerationSettings::default())
            .generate_story(&request(4, false), &user, 1)
            .await?;

        assert_eq!(outcome.page_count, 3);
        let pages = store.list_pages(outcome.story_id).await?;
        assert_eq!(
            pages.iter().map(|p| p.page_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_short_story_rejected_when_page_count_enforced() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(ScriptedFunctions::with_pages(3));
        let user = funded_user(&store, 10);
        let settings = GenerationSettings {
            enforce_page_count: true,
            refund_on_text_failure: true,
            ..Default::default()
        };

        let result = generator(&store, &functions, settings)
            .generate_story(&request(4, false), &user, 1)
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, GenerationError::TextGeneration(_)));
        assert!(err.to_string().contains("expected 4 pages"));
        assert_eq!(store.story_count(), 0);
        assert_eq!(store.credits(user.id), Some(10));
        Ok(())
    }
}
