use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError, Select, Text};
use log::{error, info};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use story_garden::core::config::Config;
use story_garden::core::models::{GenerationRequest, Story, StoryId, StoryPage, UserContext};
use story_garden::core::rest::RestBackend;
use story_garden::services::cast::{self, CastService};
use story_garden::services::credits::{credit_cost, CreditsService, CREDIT_PACKS};
use story_garden::services::functions::EdgeFunctionsClient;
use story_garden::services::generation::{drive_with_progress, GenerationProgress, StoryGenerator};
use story_garden::services::inspiration;
use story_garden::services::library::{self, Library};
use story_garden::services::narration::{AudioSink, NarrationController};
use story_garden::services::setup;

/// Prints what would be played. Audio output is left to a real player.
struct TerminalSink;

impl AudioSink for TerminalSink {
    fn play(&mut self, url: &str) -> Result<()> {
        println!("🔊 Narrating: {}", url);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        println!("🔊 Resumed");
        Ok(())
    }

    fn pause(&mut self) {
        println!("⏸  Paused");
    }

    fn stop(&mut self) {}
}

#[derive(Clone, Copy)]
enum MainMenu {
    CreateStory,
    MyStories,
    CommunityGarden,
    MyCast,
    Credits,
    Quit,
}

impl fmt::Display for MainMenu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MainMenu::CreateStory => "Create a new story",
            MainMenu::MyStories => "My stories",
            MainMenu::CommunityGarden => "Community Garden",
            MainMenu::MyCast => "My cast",
            MainMenu::Credits => "Credits",
            MainMenu::Quit => "Quit",
        })
    }
}

struct App {
    config: Config,
    user: UserContext,
    generator: StoryGenerator,
    progress: UnboundedReceiver<GenerationProgress>,
    library: Library,
    cast: CastService,
    credits: CreditsService,
    narration: NarrationController<TerminalSink>,
    last_idea: Option<&'static str>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with a backend url and anon key.");
            return Err(e);
        }
    };

    let user = setup::ensure_session(&mut config)?;

    let backend = Arc::new(RestBackend::new(
        &config.backend,
        config.session.access_token.clone(),
    )?);
    let functions = Arc::new(EdgeFunctionsClient::new(backend.as_ref().clone()));

    let (tx, rx) = mpsc::unbounded_channel();
    let generator = StoryGenerator::new(
        backend.clone(),
        backend.clone(),
        functions.clone(),
        config.generation.clone(),
    )
    .with_progress(tx);

    let mut app = App {
        user,
        generator,
        progress: rx,
        library: Library::new(backend.clone()),
        cast: CastService::new(backend.clone(), functions.clone()),
        credits: CreditsService::new(backend.clone(), functions.clone()),
        narration: NarrationController::new(TerminalSink, backend.clone(), functions.clone()),
        config,
        last_idea: None,
    };

    app.welcome().await;
    app.run().await
}

impl App {
    async fn welcome(&mut self) {
        match self.library.dashboard(&self.user).await {
            Ok(dashboard) => {
                println!("\n🌱 Welcome back to AI Story Garden!");
                println!(
                    "   {} stories written, {} credits, {} day creative streak",
                    dashboard.story_count, dashboard.profile.credits, dashboard.profile.creative_streak
                );
                if let Some(sticker) = dashboard.latest_sticker {
                    println!("   Latest sticker: {}", sticker);
                }
                if !dashboard.community.is_empty() {
                    println!("   Fresh in the Community Garden:");
                    for story in &dashboard.community {
                        println!("     • {}", story_label(story));
                    }
                }
                let idea = inspiration::wishing_well_idea(None);
                println!("   Wishing Well: {}\n", idea);
                self.last_idea = Some(idea);
            }
            Err(e) => error!("Could not load your dashboard: {:#}", e),
        }
    }

    async fn run(&mut self) -> Result<()> {
        let items = vec![
            MainMenu::CreateStory,
            MainMenu::MyStories,
            MainMenu::CommunityGarden,
            MainMenu::MyCast,
            MainMenu::Credits,
            MainMenu::Quit,
        ];
        loop {
            let choice = match Select::new("What would you like to do?", items.clone()).prompt() {
                Ok(choice) => choice,
                Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                    return Ok(())
                }
                Err(e) => return Err(e.into()),
            };

            let result = match choice {
                MainMenu::CreateStory => self.create_story(None).await,
                MainMenu::MyStories => self.my_stories().await,
                MainMenu::CommunityGarden => self.community_garden().await,
                MainMenu::MyCast => self.my_cast().await,
                MainMenu::Credits => self.buy_credits().await,
                MainMenu::Quit => return Ok(()),
            };

            if let Err(e) = result {
                if is_cancel(&e) {
                    continue;
                }
                error!("{:#}", e);
                println!("Oops! {}", e);
            }
        }
    }

    async fn create_story(&mut self, base: Option<GenerationRequest>) -> Result<()> {
        let base = match base {
            Some(base) => base,
            None => self.pick_starting_point().await?,
        };
        let request = setup::prompt_request(base)?;
        let cost = credit_cost(request.page_count, request.with_images);

        let confirmed = Confirm::new(&format!(
            "This story will cost {} credit{}. Continue?",
            cost,
            if cost == 1 { "" } else { "s" }
        ))
        .with_default(true)
        .prompt()?;
        if !confirmed {
            return Ok(());
        }

        let pb = ProgressBar::new(request.page_count as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        pb.set_message("Checking your credits...");

        let outcome = drive_with_progress(
            self.generator.generate_story(&request, &self.user, cost),
            &mut self.progress,
            |event| show_progress(&pb, event),
        )
        .await;

        match outcome {
            Ok(outcome) => {
                pb.finish_with_message("Your storybook is ready!");
                println!("\n📖 \"{}\" ({} pages)", outcome.title, outcome.page_count);
                if outcome.images_degraded {
                    println!("Some illustrations could not be drawn and show a placeholder instead.");
                }
                if outcome.back_cover_missing {
                    info!("Story {} has no back cover", outcome.story_id);
                }
                if Confirm::new("Read it now?").with_default(true).prompt()? {
                    self.read_book(outcome.story_id).await?;
                }
                Ok(())
            }
            Err(e) => {
                pb.abandon_with_message("Generation failed");
                Err(e.into())
            }
        }
    }

    async fn pick_starting_point(&mut self) -> Result<GenerationRequest> {
        let defaults = &self.config.defaults;
        let mut request = GenerationRequest {
            illustration_style: defaults.illustration_style,
            narrator_voice_id: defaults.narrator_voice_id.clone(),
            page_count: defaults.page_count,
            with_images: defaults.with_images,
            ..Default::default()
        };

        let options = vec![
            "Start from scratch",
            "Surprise me with a sample",
            "Ask the Wishing Well",
            "Star someone from my cast",
        ];
        match Select::new("How do you want to begin?", options).raw_prompt()?.index {
            1 => inspiration::random_sample().apply_to(&mut request),
            2 => {
                let idea = inspiration::wishing_well_idea(self.last_idea);
                self.last_idea = Some(idea);
                println!("✨ {}", idea);
                request = inspiration::request_from_idea(idea, request);
            }
            3 => {
                let characters = self.cast.list(&self.user).await?;
                if characters.is_empty() {
                    println!("Your cast is empty. Add a character first!");
                } else {
                    let labels: Vec<String> = characters.iter().map(|c| c.name.clone()).collect();
                    let picked = Select::new("Who stars in this story?", labels).raw_prompt()?;
                    request.characters = cast::prompt_for(&characters[picked.index]);
                }
            }
            _ => {}
        }
        Ok(request)
    }

    async fn my_stories(&mut self) -> Result<()> {
        let stories = self.library.my_stories(&self.user).await?;
        if stories.is_empty() {
            println!("No stories yet. Let's create your first one!");
            return Ok(());
        }
        let Some(story) = pick_story("Your stories:", stories)? else {
            return Ok(());
        };

        let actions = vec!["Read", "Share to Community Garden", "Remix", "Delete", "Back"];
        match Select::new(&story.title, actions).raw_prompt()?.index {
            0 => self.read_book(story.id).await?,
            1 => {
                self.library.publish_story(story.id).await?;
                println!("Shared! Everyone can now read \"{}\".", story.title);
            }
            2 => {
                let request = library::remix(&story, &self.config.defaults);
                self.create_story(Some(request)).await?;
            }
            3 => {
                let sure = Confirm::new(&format!("Delete \"{}\" forever?", story.title))
                    .with_default(false)
                    .prompt()?;
                if sure {
                    self.library.delete_story(story.id).await?;
                    println!("Story deleted.");
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn community_garden(&mut self) -> Result<()> {
        let stories = self.library.community_feed(None).await?;
        if stories.is_empty() {
            println!("The Community Garden is empty. Be the first to share!");
            return Ok(());
        }
        let Some(story) = pick_story("Community Garden:", stories)? else {
            return Ok(());
        };
        // Feed rows carry no prompt snapshot, so only owners can remix.
        if Confirm::new(&format!("Read \"{}\"?", story.title))
            .with_default(true)
            .prompt()?
        {
            self.read_book(story.id).await?;
        }
        Ok(())
    }

    async fn read_book(&mut self, story_id: StoryId) -> Result<()> {
        let library::Book { story, mut pages } = self.library.load_book(story_id).await?;
        if pages.is_empty() {
            println!("This story has no pages.");
            return Ok(());
        }

        let mut index = 0;
        loop {
            print_page(&story, &pages[index], pages.len(), &self.user.locale);
            let choice = Select::new(
                "",
                vec!["Next page", "Previous page", "Narrate / pause", "Close book"],
            )
            .raw_prompt()?
            .index;
            match choice {
                0 | 1 => {
                    let next = if choice == 0 {
                        (index + 1).min(pages.len() - 1)
                    } else {
                        index.saturating_sub(1)
                    };
                    if next != index {
                        self.narration.on_page_flip();
                        index = next;
                    }
                }
                2 => {
                    if let Err(e) = self
                        .narration
                        .narrate(&mut pages[index], &story, &self.user)
                        .await
                    {
                        error!("{}", e);
                        println!("{}", e);
                    }
                }
                _ => {
                    self.narration.on_page_flip();
                    if let Some(back_cover) = &story.back_cover_url {
                        println!("The End. Back cover: {}", back_cover);
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn my_cast(&mut self) -> Result<()> {
        let characters = self.cast.list(&self.user).await?;
        println!("\n🎭 Your cast ({} characters)", characters.len());
        for c in &characters {
            println!(
                "  • {}: {} {}",
                c.name,
                c.description,
                c.image_url.as_deref().unwrap_or("")
            );
        }

        let actions = vec!["Create a character", "Delete a character", "Back"];
        match Select::new("Cast:", actions).raw_prompt()?.index {
            0 => {
                let name = Text::new("Name:").prompt()?;
                let description = Text::new("Description:").prompt()?;
                println!("Drawing a portrait...");
                let character = self.cast.create(&self.user, &name, &description).await?;
                println!("{} has joined your cast!", character.name);
            }
            1 if !characters.is_empty() => {
                let labels: Vec<String> = characters.iter().map(|c| c.name.clone()).collect();
                let picked = Select::new("Delete whom?", labels).raw_prompt()?;
                self.cast.delete(characters[picked.index].id).await?;
                println!("{} has left the cast.", picked.value);
            }
            _ => {}
        }
        Ok(())
    }

    async fn buy_credits(&mut self) -> Result<()> {
        let balance = self.credits.balance(&self.user).await?;
        println!("\n💎 You have {} credits.", balance);

        let mut labels: Vec<String> = CREDIT_PACKS
            .iter()
            .map(|p| {
                format!(
                    "{}: {} credits for {}{}",
                    p.name,
                    p.credits,
                    p.price,
                    if p.popular { " (most popular)" } else { "" }
                )
            })
            .collect();
        labels.push("Back".to_string());

        let picked = Select::new("Top up:", labels).raw_prompt()?;
        if let Some(pack) = CREDIT_PACKS.get(picked.index) {
            let session_id = self.credits.start_checkout(&self.user, pack).await?;
            println!("Checkout session created: {}", session_id);
        }
        Ok(())
    }
}

fn show_progress(pb: &ProgressBar, event: &GenerationProgress) {
    match event {
        GenerationProgress::TextReady { pages, .. } => pb.set_length(*pages as u64),
        GenerationProgress::ImageProgress { completed, .. } => pb.set_position(*completed as u64),
        GenerationProgress::Persisted { pages } => pb.set_position(*pages as u64),
        _ => {}
    }
    pb.set_message(event.message());
}

fn story_label(story: &Story) -> String {
    let author = story
        .author
        .as_ref()
        .and_then(|a| a.username.as_deref())
        .unwrap_or("a storyteller");
    format!(
        "{} by {} ({})",
        story.title,
        author,
        story.created_at.format("%Y-%m-%d")
    )
}

fn pick_story(prompt: &str, stories: Vec<Story>) -> Result<Option<Story>> {
    let labels: Vec<String> = stories
        .iter()
        .map(|s| {
            if s.is_public {
                format!("{} 🌍", story_label(s))
            } else {
                story_label(s)
            }
        })
        .collect();
    let picked = Select::new(prompt, labels).raw_prompt()?;
    Ok(stories.into_iter().nth(picked.index))
}

fn print_page(story: &Story, page: &StoryPage, total: usize, locale: &str) {
    println!("\n── {} · page {}/{} ──", story.title, page.page_number, total);
    if let Some(image) = &page.image_url {
        println!("[illustration] {}", image);
    }
    println!("{}\n", page.display_text(locale));
}

fn is_cancel(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<InquireError>(),
        Some(InquireError::OperationCanceled | InquireError::OperationInterrupted)
    )
}
