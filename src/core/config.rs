use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::core::models::{IllustrationStyle, UserContext, DEFAULT_NARRATOR_VOICE_ID};

pub const CONFIG_FILE: &str = "config.yml";

pub const DEFAULT_IMAGE_PLACEHOLDER_URL: &str =
    "https://placehold.co/1024x1024/EAD9FF/5C2D91?text=Illustration+Failed";
pub const DEFAULT_THUMBNAIL_PLACEHOLDER_URL: &str =
    "https://placehold.co/1024x1024/EAD9FF/5C2D91?text=AI+Story+Garden";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub backend: BackendConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub generation: GenerationSettings,

    #[serde(default)]
    pub defaults: RequestDefaults,

    #[serde(skip)]
    path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub anon_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub access_token: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            email: None,
            access_token: None,
            locale: default_locale(),
        }
    }
}

impl SessionConfig {
    pub fn is_complete(&self) -> bool {
        self.user_id.is_some() && self.access_token.is_some()
    }

    /// Builds the explicit user context handed to every service call.
    pub fn user(&self) -> Option<UserContext> {
        self.user_id.map(|id| UserContext {
            id,
            email: self.email.clone(),
            locale: self.locale.clone(),
        })
    }
}

/// Knobs for the story generation pipeline.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationSettings {
    #[serde(default = "default_image_placeholder")]
    pub image_placeholder_url: String,
    #[serde(default = "default_thumbnail_placeholder")]
    pub thumbnail_placeholder_url: String,
    /// 1 keeps page illustrations strictly sequential.
    #[serde(default = "default_image_concurrency")]
    pub image_concurrency: usize,
    #[serde(default)]
    pub refund_on_text_failure: bool,
    #[serde(default)]
    pub cleanup_orphaned_story: bool,
    /// Reject a story whose page count differs from the request.
    #[serde(default)]
    pub enforce_page_count: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            image_placeholder_url: default_image_placeholder(),
            thumbnail_placeholder_url: default_thumbnail_placeholder(),
            image_concurrency: default_image_concurrency(),
            refund_on_text_failure: false,
            cleanup_orphaned_story: false,
            enforce_page_count: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestDefaults {
    #[serde(default)]
    pub illustration_style: IllustrationStyle,
    #[serde(default = "default_narrator_voice")]
    pub narrator_voice_id: String,
    #[serde(default = "default_page_count")]
    pub page_count: u32,
    #[serde(default = "default_with_images")]
    pub with_images: bool,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            illustration_style: IllustrationStyle::default(),
            narrator_voice_id: default_narrator_voice(),
            page_count: default_page_count(),
            with_images: default_with_images(),
        }
    }
}

fn default_locale() -> String {
    "en".to_string()
}
fn default_image_placeholder() -> String {
    DEFAULT_IMAGE_PLACEHOLDER_URL.to_string()
}
fn default_thumbnail_placeholder() -> String {
    DEFAULT_THUMBNAIL_PLACEHOLDER_URL.to_string()
}
fn default_image_concurrency() -> usize {
    1
}
fn default_narrator_voice() -> String {
    DEFAULT_NARRATOR_VOICE_ID.to_string()
}
fn default_page_count() -> u32 {
    8
}
fn default_with_images() -> bool {
    true
}

impl Config {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            session: SessionConfig::default(),
            generation: GenerationSettings::default(),
            defaults: RequestDefaults::default(),
            path: None,
        }
    }

    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", CONFIG_FILE);
        }
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Writes back to the file the config was loaded from, or `config.yml`.
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(
            &path,
            "backend:\n  base_url: https://example.supabase.co\n  anon_key: anon\n",
        )?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.backend.base_url, "https://example.supabase.co");
        assert_eq!(config.session.locale, "en");
        assert!(!config.session.is_complete());
        assert_eq!(config.generation.image_concurrency, 1);
        assert!(!config.generation.refund_on_text_failure);
        assert!(!config.generation.cleanup_orphaned_story);
        assert!(!config.generation.enforce_page_count);
        assert_eq!(
            config.generation.image_placeholder_url,
            DEFAULT_IMAGE_PLACEHOLDER_URL
        );
        assert_eq!(config.defaults.page_count, 8);
        assert!(config.defaults.with_images);
        assert_eq!(
            config.defaults.illustration_style,
            IllustrationStyle::WhimsicalWatercolor
        );
        Ok(())
    }

    #[test]
    fn test_save_writes_back_to_loaded_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("custom.yml");
        fs::write(
            &path,
            "backend:\n  base_url: http://localhost:54321\n  anon_key: key\n",
        )?;

        let mut config = Config::load_from(&path)?;
        let user_id = Uuid::new_v4();
        config.session.user_id = Some(user_id);
        config.session.access_token = Some("token".to_string());
        config.defaults.illustration_style = IllustrationStyle::PixelArt;
        config.save()?;

        let reloaded = Config::load_from(&path)?;
        assert!(reloaded.session.is_complete());
        assert_eq!(reloaded.session.user().map(|u| u.id), Some(user_id));
        assert_eq!(
            reloaded.defaults.illustration_style,
            IllustrationStyle::PixelArt
        );

        let raw = fs::read_to_string(&path)?;
        assert!(raw.contains("pixel-art"));
        Ok(())
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.yml");
        fs::write(&path, "backend: [not, a, map]\n")?;

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.yml"));
        Ok(())
    }
}
