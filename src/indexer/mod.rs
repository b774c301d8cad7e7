//! Indexer query pipeline
//!
//! Turns a normalized search into per-indexer HTTP requests, runs them
//! through the shared dispatcher with session handling, and parses the
//! responses back into releases.

pub mod capabilities;
pub mod categories;
pub mod definitions;
pub mod events;
pub mod manager;
pub mod parser;
pub mod pipeline;
pub mod request;
pub mod session;
pub mod torznab;
pub mod types;

pub use capabilities::{CapabilityCache, IndexerCapabilities};
pub use categories::{CategoryMap, IndexerCategory};
pub use definitions::{Indexer, IndexerDefinition, IndexerSettings, build_indexer};
pub use events::{BroadcastEventSink, EventSink, EventType, IndexerEvent, NullEventSink};
pub use manager::{IndexerManager, IndexerSearchResult, IndexerStatus};
pub use pipeline::{IndexerPipeline, PipelineConfig};
pub use session::{FileSettingsStore, MemorySettingsStore, SessionState, SettingsStore};
pub use types::{
    BookSearchParam, DownloadProtocol, IndexerFlag, MovieSearchParam, MusicSearchParam,
    ReleaseInfo, SearchCriteria, SearchType, TvSearchParam,
};
