mod fetcher;
mod orchestrator;

pub use fetcher::SegmentFetcher;
pub use orchestrator::{RequestOrchestrator, RunState};
