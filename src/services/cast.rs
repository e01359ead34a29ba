use anyhow::Result;
use log::info;
use std::sync::Arc;

use crate::core::error::CharacterError;
use crate::core::models::{Character, CharacterId, NewCharacter, UserContext};
use crate::core::store::ContentStore;
use crate::services::functions::AiFunctions;

/// The user's reusable cast of characters.
pub struct CastService {
    store: Arc<dyn ContentStore>,
    functions: Arc<dyn AiFunctions>,
}

impl CastService {
    pub fn new(store: Arc<dyn ContentStore>, functions: Arc<dyn AiFunctions>) -> Self {
        Self { store, functions }
    }

    pub async fn list(&self, user: &UserContext) -> Result<Vec<Character>> {
        self.store.list_characters(user.id).await
    }

    /// Draws the portrait, then saves the character. Unlike story pages there
    /// is no placeholder: a failed portrait aborts the whole creation.
    pub async fn create(
        &self,
        user: &UserContext,
        name: &str,
        description: &str,
    ) -> Result<Character, CharacterError> {
        let name = name.trim();
        let description = description.trim();
        if name.is_empty() || description.is_empty() {
            return Err(CharacterError::MissingDetails);
        }

        let image_url = self
            .functions
            .generate_character_image(description)
            .await
            .map_err(|e| CharacterError::ImageGeneration(format!("{:#}", e)))?;

        let character = self
            .store
            .insert_character(&NewCharacter {
                user_id: user.id,
                name: name.to_string(),
                description: description.to_string(),
                image_url,
            })
            .await
            .map_err(CharacterError::Persistence)?;
        info!("{} has joined the cast of {}", character.name, user.id);
        Ok(character)
    }

    pub async fn delete(&self, character_id: CharacterId) -> Result<()> {
        self.store.delete_character(character_id).await
    }
}

/// Text inserted into a request's `characters` field.
pub fn prompt_for(character: &Character) -> String {
    format!("{}, who is {}", character.name, character.description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::GenerationRequest;
    use crate::core::store::{MemoryStore, StoreOp};
    use crate::services::functions::{
        BackCoverRequest, CheckoutRequest, ImageRequest, NarrationRequest, StoryDraft,
    };
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct PortraitFunctions {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AiFunctions for PortraitFunctions {
        async fn generate_story(&self, _: &GenerationRequest) -> Result<StoryDraft> {
            Err(anyhow!("not used"))
        }
        async fn generate_image(&self, _: &ImageRequest) -> Result<String> {
            Err(anyhow!("not used"))
        }
        async fn generate_back_cover(&self, _: &BackCoverRequest) -> Result<String> {
            Err(anyhow!("not used"))
        }
        async fn generate_narration(&self, _: &NarrationRequest) -> Result<String> {
            Err(anyhow!("not used"))
        }
        async fn generate_character_image(&self, description: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("portrait service down"));
            }
            Ok(format!("https://img.test/{}.png", description.len()))
        }
        async fn create_checkout_session(&self, _: &CheckoutRequest) -> Result<String> {
            Err(anyhow!("not used"))
        }
    }

    fn service(store: &Arc<MemoryStore>, functions: &Arc<PortraitFunctions>) -> CastService {
        CastService::new(store.clone(), functions.clone())
    }

    #[tokio::test]
    async fn test_create_and_list_newest_first() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(PortraitFunctions::default());
        let cast = service(&store, &functions);
        let user = UserContext::new(Uuid::new_v4());

        cast.create(&user, "Bolt", "a curious robot who talks to animals").await?;
        let willow = cast.create(&user, " Willow ", "a young witch").await?;

        assert_eq!(willow.name, "Willow");
        assert!(willow.image_url.is_some());
        let listed = cast.list(&user).await?;
        assert_eq!(
            listed.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["Willow", "Bolt"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_portrait_failure_aborts_creation() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(PortraitFunctions {
            fail: true,
            ..Default::default()
        });
        let cast = service(&store, &functions);
        let user = UserContext::new(Uuid::new_v4());

        let err = cast.create(&user, "Inky", "a shy octopus").await.unwrap_err();

        assert!(matches!(err, CharacterError::ImageGeneration(_)));
        assert!(cast.list(&user).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_details_skip_generation() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(PortraitFunctions::default());
        let cast = service(&store, &functions);
        let user = UserContext::new(Uuid::new_v4());

        let err = cast.create(&user, "Inky", "  ").await.unwrap_err();

        assert!(matches!(err, CharacterError::MissingDetails));
        assert_eq!(functions.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_failure_is_reported() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.fail_on(StoreOp::InsertCharacter);
        let functions = Arc::new(PortraitFunctions::default());
        let cast = service(&store, &functions);
        let user = UserContext::new(Uuid::new_v4());

        let err = cast.create(&user, "Inky", "a shy octopus").await.unwrap_err();
        assert!(matches!(err, CharacterError::Persistence(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_and_prompt() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let functions = Arc::new(PortraitFunctions::default());
        let cast = service(&store, &functions);
        let user = UserContext::new(Uuid::new_v4());

        let inky = cast.create(&user, "Inky", "a shy octopus who loves to paint").await?;
        assert_eq!(prompt_for(&inky), "Inky, who is a shy octopus who loves to paint");

        cast.delete(inky.id).await?;
        assert!(cast.list(&user).await?.is_empty());
        Ok(())
    }
}
