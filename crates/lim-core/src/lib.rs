//! Core library for bulk-creating header bidding line items on an ad platform.

pub mod bidders;
pub mod error;
pub mod logging;
pub mod options;
pub mod platform;
pub mod prepare;
pub mod pricing;
pub mod resolver;
pub mod runtime;
pub mod schedule;
pub mod schema;
pub mod settings;

pub use bidders::{BidderInfo, BidderPartition, BidderRegistry, list_bidders};
pub use error::{AuthError, CreationFailure, PlatformError, UsageError};
pub use logging::{LoggingDestination, LoggingError, current_log_path, init_logging};
pub use options::{CreateOptions, RunOverrides, Verbosity};
pub use platform::{AdPlatform, Credentials, DryRunPlatform, PlatformConnector, RestConnector};
pub use pricing::{CpmName, PriceBucket, expand_buckets};
pub use resolver::ConfigResolver;
pub use runtime::{
    CreatedResources, CreationResult, Pipeline, StageProgressCallback, StageProgressEvent,
    StageProgressEventKind, create_line_items, create_line_items_with_progress,
};
pub use schedule::{ScheduleWindow, normalize_schedule};
pub use schema::Schema;
pub use settings::{AppSettings, Resource, load_settings, read_resource};
