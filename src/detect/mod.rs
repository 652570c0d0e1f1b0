mod backend;
mod backends;
mod result;

pub use backend::ObjectDetector;
pub use backends::{FrameDiffBackend, ScriptedBackend};
pub use result::Detection;
