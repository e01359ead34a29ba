use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::core::config::BackendConfig;
use crate::core::models::{
    Character, CharacterId, NewCharacter, NewStory, NewStoryPage, PageId, Profile, Story,
    StoryId, StoryMediaUpdate, StoryPage, UserId,
};
use crate::core::store::{ContentStore, CreditLedger};

const STORY_COLUMNS: &str = "id,user_id,title,prompt_text,with_images,narrator_voice_id,thumbnail_url,back_cover_url,is_public,created_at";
const PUBLIC_STORY_COLUMNS: &str =
    "id,user_id,title,thumbnail_url,is_public,created_at,profiles(username)";
const PAGE_COLUMNS: &str = "id,story_id,page_number,text_content,image_url,audio_url";

/// HTTP client for the hosted backend: PostgREST tables under `/rest/v1`,
/// database functions under `/rest/v1/rpc` and serverless functions under
/// `/functions/v1`.
#[derive(Debug, Clone)]
pub struct RestBackend {
    base_url: Url,
    anon_key: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: Option<String>,
}

impl RestBackend {
    pub fn new(config: &BackendConfig, access_token: Option<String>) -> Result<Self> {
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .with_context(|| format!("Invalid backend url: {}", config.base_url))?;
        Ok(Self {
            base_url,
            anon_key: config.anon_key.clone(),
            access_token,
            client: reqwest::Client::new(),
        })
    }

    fn table_url(&self, table: &str, filters: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.join(&format!("rest/v1/{}", table))?;
        if !filters.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in filters {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.anon_key);
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", token))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
        let resp = builder
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|e| e.error)
                .unwrap_or(body);
            return Err(anyhow!("{} failed ({}): {}", what, status, message));
        }
        debug!("{} succeeded ({} bytes)", what, body.len());
        if body.trim().is_empty() {
            return serde_json::from_value(Value::Null)
                .with_context(|| format!("{} returned an empty body", what));
        }
        serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse {} response: {}", what, body))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let url = self.table_url(table, filters)?;
        self.send(self.request(Method::GET, url), &format!("select {}", table))
            .await
    }

    async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        rows: &B,
    ) -> Result<Vec<T>> {
        let url = self.table_url(table, &[])?;
        let builder = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(rows);
        self.send(builder, &format!("insert {}", table)).await
    }

    async fn patch<B: Serialize + ?Sized>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        body: &B,
    ) -> Result<()> {
        let url = self.table_url(table, filters)?;
        let builder = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=minimal")
            .json(body);
        let _: Value = self.send(builder, &format!("update {}", table)).await?;
        Ok(())
    }

    async fn remove(&self, table: &str, filters: &[(&str, String)]) -> Result<()> {
        let url = self.table_url(table, filters)?;
        let _: Value = self
            .send(self.request(Method::DELETE, url), &format!("delete {}", table))
            .await?;
        Ok(())
    }

    pub async fn rpc<B: Serialize + ?Sized>(&self, name: &str, args: &B) -> Result<Value> {
        let url = self.base_url.join(&format!("rest/v1/rpc/{}", name))?;
        self.send(self.request(Method::POST, url).json(args), &format!("rpc {}", name))
            .await
    }

    /// Invokes a serverless function with a JSON body.
    pub async fn invoke<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        function: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.base_url.join(&format!("functions/v1/{}", function))?;
        debug!("Invoking function {}", function);
        self.send(self.request(Method::POST, url).json(body), function)
            .await
    }
}

fn eq(value: impl ToString) -> String {
    format!("eq.{}", value.to_string())
}

fn single<T>(rows: Vec<T>, what: &str) -> Result<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| anyhow!("{} returned no rows", what))
}

#[async_trait]
impl ContentStore for RestBackend {
    async fn insert_story(&self, story: &NewStory) -> Result<Story> {
        single(self.insert("stories", story).await?, "insert stories")
    }

    async fn update_story_media(&self, story_id: StoryId, update: &StoryMediaUpdate) -> Result<()> {
        self.patch("stories", &[("id", eq(story_id))], update).await
    }

    async fn set_story_public(&self, story_id: StoryId, is_public: bool) -> Result<()> {
        self.patch(
            "stories",
            &[("id", eq(story_id))],
            &json!({ "is_public": is_public }),
        )
        .await
    }

    async fn get_story(&self, story_id: StoryId) -> Result<Option<Story>> {
        let rows: Vec<Story> = self
            .select(
                "stories",
                &[("select", STORY_COLUMNS.to_string()), ("id", eq(story_id))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_user_stories(&self, user_id: UserId) -> Result<Vec<Story>> {
        self.select(
            "stories",
            &[
                ("select", STORY_COLUMNS.to_string()),
                ("user_id", eq(user_id)),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn count_user_stories(&self, user_id: UserId) -> Result<usize> {
        let rows: Vec<Value> = self
            .select(
                "stories",
                &[("select", "id".to_string()), ("user_id", eq(user_id))],
            )
            .await?;
        Ok(rows.len())
    }

    async fn list_public_stories(&self, limit: Option<usize>) -> Result<Vec<Story>> {
        let mut filters = vec![
            ("select", PUBLIC_STORY_COLUMNS.to_string()),
            ("is_public", eq(true)),
            ("order", "created_at.desc".to_string()),
        ];
        if let Some(limit) = limit {
            filters.push(("limit", limit.to_string()));
        }
        self.select("stories", &filters).await
    }

    async fn delete_story(&self, story_id: StoryId) -> Result<()> {
        // The function removes pages and stored media before the story row.
        let _: Value = self
            .invoke("delete-story", &json!({ "storyId": story_id }))
            .await?;
        Ok(())
    }

    async fn insert_pages(&self, pages: &[NewStoryPage]) -> Result<Vec<StoryPage>> {
        self.insert("story_pages", pages).await
    }

    async fn list_pages(&self, story_id: StoryId) -> Result<Vec<StoryPage>> {
        self.select(
            "story_pages",
            &[
                ("select", PAGE_COLUMNS.to_string()),
                ("story_id", eq(story_id)),
                ("order", "page_number.asc".to_string()),
            ],
        )
        .await
    }

    async fn set_page_audio(&self, page_id: PageId, audio_url: &str) -> Result<()> {
        self.patch(
            "story_pages",
            &[("id", eq(page_id))],
            &json!({ "audio_url": audio_url }),
        )
        .await
    }

    async fn list_characters(&self, user_id: UserId) -> Result<Vec<Character>> {
        self.select(
            "characters",
            &[
                ("select", "*".to_string()),
                ("user_id", eq(user_id)),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn insert_character(&self, character: &NewCharacter) -> Result<Character> {
        single(
            self.insert("characters", character).await?,
            "insert characters",
        )
    }

    async fn delete_character(&self, character_id: CharacterId) -> Result<()> {
        self.remove("characters", &[("id", eq(character_id))]).await
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Profile> {
        let rows: Vec<Profile> = self
            .select(
                "profiles",
                &[
                    ("select", "credits,creative_streak".to_string()),
                    ("id", eq(user_id)),
                ],
            )
            .await?;
        single(rows, "select profiles")
    }
}

#[async_trait]
impl CreditLedger for RestBackend {
    async fn decrement_credits(&self, user_id: UserId, amount: u32) -> Result<i64> {
        let value = self
            .rpc(
                "decrement_credits",
                &json!({ "user_id_in": user_id, "amount": amount }),
            )
            .await?;
        match value.as_i64() {
            Some(balance) => Ok(balance),
            None => Ok(self.get_profile(user_id).await?.credits),
        }
    }

    async fn refund_credits(&self, user_id: UserId, amount: u32) -> Result<i64> {
        let value = self
            .rpc(
                "increment_credits",
                &json!({ "user_id_in": user_id, "amount": amount }),
            )
            .await?;
        match value.as_i64() {
            Some(balance) => Ok(balance),
            None => Ok(self.get_profile(user_id).await?.credits),
        }
    }
}
