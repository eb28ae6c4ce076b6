pub mod connection;
pub mod stores;

pub use connection::{connect, RedisManager};
pub use stores::{
    CacheError, InMemoryJobScheduler, InMemorySharedCache, JobScheduler, RedisJobScheduler,
    RedisSharedCache, ScheduledJob, SharedCache,
};
