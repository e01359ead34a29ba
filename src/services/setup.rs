use anyhow::{anyhow, Result};
use inquire::validator::Validation;
use inquire::{Confirm, CustomType, Password, Select, Text};
use uuid::Uuid;

use crate::core::config::Config;
use crate::core::models::{
    GenerationRequest, IllustrationStyle, UserContext, MAX_PAGE_COUNT, MIN_PAGE_COUNT,
    NARRATOR_VOICES,
};

/// Prompts for whatever part of the session is missing and saves it.
pub fn ensure_session(config: &mut Config) -> Result<UserContext> {
    let mut needs_save = false;

    if config.session.user_id.is_none() {
        let user_id = CustomType::<Uuid>::new("Your account id:")
            .with_error_message("Please type a valid UUID")
            .prompt()?;
        config.session.user_id = Some(user_id);
        needs_save = true;
    }
    if config.session.access_token.is_none() {
        let token = Password::new("Access token:")
            .without_confirmation()
            .prompt()?;
        config.session.access_token = Some(token.trim().to_string());
        needs_save = true;
    }
    if config.session.email.is_none() {
        let email = Text::new("Email (optional, used for checkout receipts):").prompt()?;
        let email = email.trim();
        if !email.is_empty() {
            config.session.email = Some(email.to_string());
            needs_save = true;
        }
    }

    if needs_save {
        config.save()?;
        println!("Configuration saved.");
    }

    config
        .session
        .user()
        .ok_or_else(|| anyhow!("No account id configured"))
}

/// Walks through the story form, prefilled from `base`.
pub fn prompt_request(base: GenerationRequest) -> Result<GenerationRequest> {
    let characters = Text::new("Who is in the story?")
        .with_initial_value(&base.characters)
        .with_validator(required)
        .prompt()?;
    let setting = Text::new("Where does it happen?")
        .with_initial_value(&base.setting)
        .with_validator(required)
        .prompt()?;
    let plot = Text::new("What happens?")
        .with_initial_value(&base.plot)
        .with_validator(required)
        .prompt()?;

    let illustration_style = select_style(base.illustration_style)?;
    let narrator_voice_id = select_voice(&base.narrator_voice_id)?;

    let page_count = CustomType::<u32>::new("Number of pages:")
        .with_default(base.page_count)
        .with_validator(|n: &u32| {
            Ok(match page_count_problem(*n) {
                Some(msg) => Validation::Invalid(msg.into()),
                None => Validation::Valid,
            })
        })
        .prompt()?;
    let with_images = Confirm::new("Illustrate every page?")
        .with_default(base.with_images)
        .prompt()?;

    Ok(GenerationRequest {
        characters: characters.trim().to_string(),
        setting: setting.trim().to_string(),
        plot: plot.trim().to_string(),
        illustration_style,
        narrator_voice_id,
        page_count,
        with_images,
    })
}

fn required(value: &str) -> Result<Validation, inquire::CustomUserError> {
    if value.trim().is_empty() {
        Ok(Validation::Invalid("This field cannot be empty".into()))
    } else {
        Ok(Validation::Valid)
    }
}

pub fn select_style(current: IllustrationStyle) -> Result<IllustrationStyle> {
    let cursor = IllustrationStyle::ALL
        .iter()
        .position(|s| *s == current)
        .unwrap_or(0);
    let style = Select::new("Illustration style:", IllustrationStyle::ALL.to_vec())
        .with_starting_cursor(cursor)
        .prompt()?;
    Ok(style)
}

pub fn select_voice(current_id: &str) -> Result<String> {
    let options: Vec<&str> = NARRATOR_VOICES.iter().map(|v| v.label).collect();
    let label = Select::new("Narrator voice:", options)
        .with_starting_cursor(voice_index(current_id))
        .prompt()?;
    NARRATOR_VOICES
        .iter()
        .find(|v| v.label == label)
        .map(|v| v.id.to_string())
        .ok_or_else(|| anyhow!("Unknown narrator voice: {}", label))
}

fn voice_index(voice_id: &str) -> usize {
    NARRATOR_VOICES
        .iter()
        .position(|v| v.id == voice_id)
        .unwrap_or(0)
}

fn page_count_problem(n: u32) -> Option<String> {
    if !(MIN_PAGE_COUNT..=MAX_PAGE_COUNT).contains(&n) {
        Some(format!(
            "Choose between {} and {} pages",
            MIN_PAGE_COUNT, MAX_PAGE_COUNT
        ))
    } else if n % 2 != 0 {
        Some("Stories need an even number of pages".to_string())
    } else {
        None
    }
}
