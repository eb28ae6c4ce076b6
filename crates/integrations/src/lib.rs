pub mod client;
pub mod debounce;
pub mod errors;
pub mod oauth;
pub mod providers;
pub mod sleep;
pub mod token_broker;
pub mod transport;

pub use client::{ClientOptions, Credentials, ResilientClient, RetryAttempt, RetryPolicy};
pub use debounce::{BatchHandler, BatchWorker, EventDebouncer, WorkerPolicy};
pub use errors::{AuthError, DebounceError, IntegrationError, TransportFailure};
pub use oauth::{OAuthRefreshSource, TokenSource};
pub use sleep::{Sleeper, TokioSleeper};
pub use token_broker::{TokenBroker, TokenPolicy};
pub use transport::{HttpMethod, HttpTransport, OutboundRequest, ProviderResponse, ProviderTransport};
