pub mod backend;
pub mod blocking;
pub mod bridge;
pub mod config;
pub mod error;
pub mod info;
pub mod local;
pub mod manager;
pub mod memory;
pub mod path;
pub mod registry;
pub mod router;
pub mod walk;

pub use backend::{Capabilities, Filesystem, Listing};
pub use blocking::BlockingFs;
pub use bridge::{
    cancellable, run_blocking, BlockingPool, InlineOffload, Job, Offload, SyncBridge,
    SyncFilesystem,
};
pub use config::{ListingMode, VfsConfig};
pub use error::{VfsError, VfsResult};
pub use info::{FileType, InfoRecord, RawInfo};
pub use local::LocalFs;
pub use manager::{parse_url, FsManager, FsOptions, ProtocolFactory};
pub use memory::MemoryFs;
pub use path::{join_path, normalize_path, split_composite, CompositePath, VPath, DEFAULT_SEPARATOR};
pub use registry::{ConstructFuture, ProbeRegistry, ProbeResult, Registration, SubFsFactory};
pub use router::{Delegate, DelegatingFs};
pub use tokio_util::sync::CancellationToken;
