//! Domain model (policies, locators, instances, classification, TTLs, ...).
//!
//! Everything here is pure: no I/O, no clocks, no locks.

pub mod classifier;
pub mod document;
pub mod errors;
pub mod events;
pub mod ids;
pub mod instance;
pub mod locator;
pub mod policy;
pub mod ttl;

pub use classifier::{Completion, CompletionSource, FinishSignal, classify, completion_instant};
pub use document::{FieldPath, FieldPathError};
pub use errors::{ConfigError, ErrorKind};
pub use events::{DeleteTrigger, ReapEvent};
pub use ids::{PassId, ScheduleId};
pub use instance::{InstanceError, ResourceKey, TargetInstance};
pub use locator::{LocatorError, LocatorResolver, PluralOverrides, ResourceLocator};
pub use policy::{
    DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_TTL_FIELD_PATH, LabelSelector, NamespaceScope,
    PolicyPhase, PolicySpec, ReaperPolicy, ValidatedPolicy,
};
pub use ttl::{TtlError, TtlSeconds, expiration_instant, has_expired, is_eligible};
