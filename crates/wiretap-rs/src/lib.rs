//! # Wiretap
//!
//! HTTP request/response observability for tower and hyper services.
//!
//! Wiretap sits in front of a handler and, for every exchange:
//!
//! - counts the response status into periodic summaries
//! - samples a configurable fraction of requests for full capture
//! - masks sensitive headers, query parameters and body fields
//! - raises an alert when a request is slower than the threshold
//! - tags the exchange with a correlation id, echoed on the response
//!
//! Records are delivered to a [`LogSink`] by a background task, so logging
//! never slows down or alters a response.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wiretap::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     wiretap::logging::init_tracing(false);
//!
//!     let interceptor = Interceptor::new(
//!         InterceptorConfig::new().sample_rate(0.25).skip_path("/metrics"),
//!         TracingSink,
//!     )?;
//!
//!     let service = wiretap::tower::ServiceBuilder::new()
//!         .layer(WiretapLayer::new(interceptor.clone()))
//!         .service(app);
//!
//!     // ... serve ...
//!
//!     interceptor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Optional Features
//!
//! - `config` - Load configuration from `.env` and `WIRETAP_*` variables
//! - `full` - All optional features enabled

// Re-export core functionality
pub use wiretap_core::*;

pub mod logging;

// Re-export tower for building service stacks
pub use tower;

#[cfg(feature = "config")]
pub mod config;

/// Prelude module - import everything you need with `use wiretap::prelude::*`
pub mod prelude {
    pub use wiretap_core::{
        Interceptor, InterceptorConfig, JsonLinesSink, LogRecord, LogSink, MemorySink, NullSink,
        ReplayBody, SinkEvent, StatusSummary, TeeBody, TracingSink, WiretapLayer, WiretapService,
    };

    #[cfg(feature = "config")]
    pub use crate::config::EnvConfig;

    // Re-export commonly used external types
    pub use tracing::{debug, error, info, instrument, trace, warn};
}
