//! Document drafting: parameter collection across turns, then generation.

pub mod generator;
pub mod planner;

pub use generator::{Draft, DraftChapter, DraftGenerator, DraftMetadata, slug_filename};
pub use planner::{DraftParam, DraftPlan, ReadyDraft};
