use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::core::error::GenerationError;

pub type UserId = Uuid;
pub type StoryId = Uuid;
pub type PageId = Uuid;
pub type CharacterId = Uuid;

pub const MIN_PAGE_COUNT: u32 = 4;
pub const MAX_PAGE_COUNT: u32 = 124;

pub const DEFAULT_NARRATOR_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NarratorVoice {
    pub id: &'static str,
    pub label: &'static str,
}

pub const NARRATOR_VOICES: [NarratorVoice; 11] = [
    NarratorVoice { id: "21m00Tcm4TlvDq8ikWAM", label: "Rachel (Calm, American)" },
    NarratorVoice { id: "29vD33N1CtxCmqQRPO9B", label: "Drew (Clear, American)" },
    NarratorVoice { id: "2EiwWnXFnvU5JabPnv8n", label: "Fin (Storyteller, British)" },
    NarratorVoice { id: "5Q0t7uMcjvnagumLfvZi", label: "Paul (Conversational, British)" },
    NarratorVoice { id: "CYw3kZ02Hs0563khs1Fj", label: "Dave (Conversational, American)" },
    NarratorVoice { id: "D38z5RcWu1voky8WS1ja", label: "Sarah (Gentle, American)" },
    NarratorVoice { id: "TxGEqnHWrfWFTfGW9XjX", label: "George (Raspy, British)" },
    NarratorVoice { id: "yoZ06aM5OJVAIjg9GMb7", label: "Emily (Calm, American)" },
    NarratorVoice { id: "z9fAnlkpzviPz146aGWa", label: "Charlotte (Pleasant, British)" },
    NarratorVoice { id: "zcAOhNBS3c14rBihAFp1", label: "Alice (Pleasant, British)" },
    NarratorVoice { id: "KoVIHoyLDrQyd4pGalbs", label: "Liam (Pleasant, American)" },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IllustrationStyle {
    #[default]
    #[serde(rename = "whimsical-watercolor")]
    WhimsicalWatercolor,
    #[serde(rename = "3d-cartoon")]
    Cartoon3d,
    #[serde(rename = "classic-storybook")]
    ClassicStorybook,
    #[serde(rename = "vibrant-anime")]
    VibrantAnime,
    #[serde(rename = "fantasy-art")]
    FantasyArt,
    #[serde(rename = "cinematic")]
    Cinematic,
    #[serde(rename = "line-art")]
    LineArt,
    #[serde(rename = "neon-punk")]
    NeonPunk,
    #[serde(rename = "origami")]
    Origami,
    #[serde(rename = "photographic")]
    Photographic,
    #[serde(rename = "pixel-art")]
    PixelArt,
}

impl IllustrationStyle {
    pub const ALL: [IllustrationStyle; 11] = [
        IllustrationStyle::WhimsicalWatercolor,
        IllustrationStyle::Cartoon3d,
        IllustrationStyle::ClassicStorybook,
        IllustrationStyle::VibrantAnime,
        IllustrationStyle::FantasyArt,
        IllustrationStyle::Cinematic,
        IllustrationStyle::LineArt,
        IllustrationStyle::NeonPunk,
        IllustrationStyle::Origami,
        IllustrationStyle::Photographic,
        IllustrationStyle::PixelArt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IllustrationStyle::WhimsicalWatercolor => "whimsical-watercolor",
            IllustrationStyle::Cartoon3d => "3d-cartoon",
            IllustrationStyle::ClassicStorybook => "classic-storybook",
            IllustrationStyle::VibrantAnime => "vibrant-anime",
            IllustrationStyle::FantasyArt => "fantasy-art",
            IllustrationStyle::Cinematic => "cinematic",
            IllustrationStyle::LineArt => "line-art",
            IllustrationStyle::NeonPunk => "neon-punk",
            IllustrationStyle::Origami => "origami",
            IllustrationStyle::Photographic => "photographic",
            IllustrationStyle::PixelArt => "pixel-art",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            IllustrationStyle::WhimsicalWatercolor => "Whimsical Watercolor (Analog Film)",
            IllustrationStyle::Cartoon3d => "3D Cartoon (3D Model)",
            IllustrationStyle::ClassicStorybook => "Classic Storybook (Comic Book)",
            IllustrationStyle::VibrantAnime => "Vibrant Anime (Digital Art)",
            IllustrationStyle::FantasyArt => "Fantasy Art",
            IllustrationStyle::Cinematic => "Cinematic",
            IllustrationStyle::LineArt => "Line Art",
            IllustrationStyle::NeonPunk => "Neon Punk",
            IllustrationStyle::Origami => "Origami",
            IllustrationStyle::Photographic => "Photographic",
            IllustrationStyle::PixelArt => "Pixel Art",
        }
    }
}

impl fmt::Display for IllustrationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for IllustrationStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        IllustrationStyle::ALL
            .iter()
            .copied()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown illustration style: {}", s))
    }
}

/// Who is asking. Passed explicitly into every service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub id: UserId,
    pub email: Option<String>,
    pub locale: String,
}

impl UserContext {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            email: None,
            locale: "en".to_string(),
        }
    }
}

/// Form input for one generation run. Serialized verbatim as the story's
/// prompt snapshot and as the body of the text generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub characters: String,
    pub setting: String,
    pub plot: String,
    pub illustration_style: IllustrationStyle,
    pub narrator_voice_id: String,
    pub page_count: u32,
    pub with_images: bool,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            characters: String::new(),
            setting: String::new(),
            plot: String::new(),
            illustration_style: IllustrationStyle::default(),
            narrator_voice_id: DEFAULT_NARRATOR_VOICE_ID.to_string(),
            page_count: 8,
            with_images: true,
        }
    }
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if !(MIN_PAGE_COUNT..=MAX_PAGE_COUNT).contains(&self.page_count) {
            return Err(GenerationError::InvalidRequest(format!(
                "page count must be between {} and {}, got {}",
                MIN_PAGE_COUNT, MAX_PAGE_COUNT, self.page_count
            )));
        }
        if self.page_count % 2 != 0 {
            return Err(GenerationError::InvalidRequest(format!(
                "page count must be even, got {}",
                self.page_count
            )));
        }
        for (field, value) in [
            ("characters", &self.characters),
            ("setting", &self.setting),
            ("plot", &self.plot),
        ] {
            if value.trim().is_empty() {
                return Err(GenerationError::InvalidRequest(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }
        Ok(())
    }

    pub fn context(&self) -> StoryContext {
        StoryContext {
            characters: self.characters.clone(),
            setting: self.setting.clone(),
            plot: self.plot.clone(),
        }
    }

    pub fn snapshot(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryContext {
    pub characters: String,
    pub setting: String,
    pub plot: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub user_id: UserId,
    pub title: String,
    #[serde(rename = "prompt_text", default)]
    pub prompt_snapshot: Option<String>,
    #[serde(default)]
    pub with_images: bool,
    #[serde(default)]
    pub narrator_voice_id: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub back_cover_url: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "profiles", default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewStory {
    pub user_id: UserId,
    pub title: String,
    #[serde(rename = "prompt_text")]
    pub prompt_snapshot: String,
    pub with_images: bool,
    pub narrator_voice_id: String,
    pub thumbnail_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoryMediaUpdate {
    pub thumbnail_url: String,
    pub back_cover_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryPage {
    pub id: PageId,
    pub story_id: StoryId,
    pub page_number: u32,
    pub text_content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
}

impl StoryPage {
    pub fn display_text(&self, locale: &str) -> String {
        crate::utils::text::display_text(&self.text_content, locale).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewStoryPage {
    pub story_id: StoryId,
    pub page_number: u32,
    pub text_content: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub user_id: UserId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCharacter {
    pub user_id: UserId,
    pub name: String,
    pub description: String,
    pub image_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub credits: i64,
    #[serde(default)]
    pub creative_streak: i64,
}
