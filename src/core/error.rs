use thiserror::Error;

/// Fatal outcomes of a story generation run. Degradations (placeholder
/// illustrations, missing back cover) are reported on the outcome instead.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Invalid story request: {0}")]
    InvalidRequest(String),

    #[error("A story is already being created for this account. Please wait for it to finish.")]
    AlreadyInProgress,

    #[error("Not enough credits to create this story. Please top up your account.")]
    InsufficientCredits(#[source] anyhow::Error),

    #[error("Story generation failed: {0}")]
    TextGeneration(String),

    #[error("Could not save the story: {0:#}")]
    Persistence(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CharacterError {
    #[error("Please provide a name and description.")]
    MissingDetails,

    #[error("Character image could not be generated: {0}")]
    ImageGeneration(String),

    #[error("Could not save the character: {0:#}")]
    Persistence(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("Narration could not be generated: {0}")]
    Generation(String),

    #[error("Narration could not be played: {0:#}")]
    Playback(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Story {0} not found")]
    NotFound(uuid::Uuid),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}
