use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

use crate::core::error::NarrationError;
use crate::core::models::{PageId, Story, StoryPage, UserContext, DEFAULT_NARRATOR_VOICE_ID};
use crate::core::store::ContentStore;
use crate::services::functions::{AiFunctions, NarrationRequest};

/// Audio playback. Owned by the front-end; the controller only drives it.
pub trait AudioSink: Send {
    /// Loads `url` and starts playing it from the beginning.
    fn play(&mut self, url: &str) -> Result<()>;
    fn resume(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationState {
    Idle,
    Loading(PageId),
    Playing(PageId),
    Paused(PageId),
}

impl NarrationState {
    pub fn page(&self) -> Option<PageId> {
        match self {
            NarrationState::Idle => None,
            NarrationState::Loading(id) | NarrationState::Playing(id) | NarrationState::Paused(id) => {
                Some(*id)
            }
        }
    }
}

pub struct NarrationController<S: AudioSink> {
    sink: S,
    store: Arc<dyn ContentStore>,
    functions: Arc<dyn AiFunctions>,
    state: NarrationState,
}

impl<S: AudioSink> NarrationController<S> {
    pub fn new(sink: S, store: Arc<dyn ContentStore>, functions: Arc<dyn AiFunctions>) -> Self {
        Self {
            sink,
            store,
            functions,
            state: NarrationState::Idle,
        }
    }

    pub fn state(&self) -> NarrationState {
        self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Toggles narration for `page`.
    ///
    /// Pauses if the page is playing, resumes if it is paused, otherwise stops
    /// whatever is playing and starts this page, generating its audio first
    /// when none is cached. The generated URL is written onto `page`.
    pub async fn narrate(
        &mut self,
        page: &mut StoryPage,
        story: &Story,
        user: &UserContext,
    ) -> Result<NarrationState, NarrationError> {
        match self.state {
            NarrationState::Playing(id) if id == page.id => {
                self.sink.pause();
                self.state = NarrationState::Paused(id);
                return Ok(self.state);
            }
            NarrationState::Paused(id) if id == page.id => {
                if let Err(e) = self.sink.resume() {
                    self.state = NarrationState::Idle;
                    return Err(NarrationError::Playback(e));
                }
                self.state = NarrationState::Playing(id);
                return Ok(self.state);
            }
            NarrationState::Idle => {}
            _ => self.sink.stop(),
        }

        self.state = NarrationState::Loading(page.id);

        let audio_url = match page.audio_url.clone() {
            Some(url) => url,
            None => {
                let url = self.generate(page, story, user).await.map_err(|e| {
                    self.state = NarrationState::Idle;
                    e
                })?;
                page.audio_url = Some(url.clone());
                if let Err(e) = self.store.set_page_audio(page.id, &url).await {
                    warn!("Could not save narration for page {}: {:#}", page.id, e);
                }
                url
            }
        };

        if let Err(e) = self.sink.play(&audio_url) {
            self.state = NarrationState::Idle;
            return Err(NarrationError::Playback(e));
        }
        self.state = NarrationState::Playing(page.id);
        Ok(self.state)
    }

    async fn generate(
        &self,
        page: &StoryPage,
        story: &Story,
        user: &UserContext,
    ) -> Result<String, NarrationError> {
        info!("Generating narration for page {}", page.page_number);
        let voice_id = story
            .narrator_voice_id
            .clone()
            .unwrap_or_else(|| DEFAULT_NARRATOR_VOICE_ID.to_string());
        self.functions
            .generate_narration(&NarrationRequest {
                page_id: page.id,
                text: page.display_text(&user.locale),
                voice_id,
                user_id: user.id,
            })
            .await
            .map_err(|e| NarrationError::Generation(format!("{:#}", e)))
    }

    pub fn on_ended(&mut self) {
        self.state = NarrationState::Idle;
    }

    pub fn on_playback_error(&mut self) {
        warn!("Narration playback failed");
        self.state = NarrationState::Idle;
    }

    pub fn on_page_flip(&mut self) {
        if self.state != NarrationState::Idle {
            self.sink.stop();
        }
        self.state = NarrationState::Idle;
    }
}
