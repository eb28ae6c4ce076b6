pub mod config;
pub mod domain;
pub mod errors;

pub use config::{AppConfig, ConfigError, LoadOptions, ResilienceConfig};
pub use domain::batch::{BufferedEvent, DeferredJob, GroupKey, JobId, JobInstruction, PendingBatch};
pub use domain::token::{CachedToken, ProviderId, RefreshLock, TokenGrant};
pub use errors::{ApplicationError, InterfaceError};
