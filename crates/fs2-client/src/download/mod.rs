pub mod controller;
pub mod peer_stats;
pub mod queue;

pub use controller::{DownloadController, SourceMap};
pub use peer_stats::PeerStats;
pub use queue::{DownloadQueue, FileStatus, QueuedFile};
