pub mod ai_client;
pub mod db;
pub mod digest;
pub mod notifier;
pub mod papers;
pub mod pipeline;
pub mod settings;
pub mod summarizer;
pub mod throttle;
pub mod utils;
