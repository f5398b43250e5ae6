//! Canonical schema constants for structured logging and events
//!
//! These constants keep field names identical across the store, the
//! reconciler and the CLI so log pipelines can key on them.

// Canonical field keys for structured logging
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_CYCLE_ID: &str = "cycle_id";

// Resource identifiers
pub const FIELD_RESOURCE_KIND: &str = "resource_kind";
pub const FIELD_RESOURCE_ID: &str = "resource_id";
pub const FIELD_SCOPE: &str = "scope";
pub const FIELD_HISTORY_ID: &str = "history_id";

// Cycle counters
pub const FIELD_COUNT: &str = "count";
pub const FIELD_SKIPPED: &str = "skipped";
pub const FIELD_SWEPT: &str = "swept";

// Error fields
pub const FIELD_ERR_KIND: &str = "err_kind";
pub const FIELD_ERR_CODE: &str = "err_code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
pub const EVENT_SKIP: &str = "skip";
