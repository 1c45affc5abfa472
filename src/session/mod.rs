mod cache;
mod controller;

pub use controller::{AiOperation, BaseCommit, ComposerEvent, SessionController, SessionView};
