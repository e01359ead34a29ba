pub mod cast;
pub mod credits;
pub mod functions;
pub mod generation;
pub mod inspiration;
pub mod library;
pub mod narration;
pub mod setup;
