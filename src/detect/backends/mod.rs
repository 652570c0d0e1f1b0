mod diff;
mod scripted;

pub use diff::FrameDiffBackend;
pub use scripted::ScriptedBackend;
