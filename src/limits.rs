use crate::model::Ms;

pub const DAY_MS: Ms = 86_400_000;
pub const HOUR_MS: Ms = 3_600_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single reservation may not span more than a year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * DAY_MS;

pub const MAX_TENANTS: usize = 10_000;
pub const MAX_ITEMS_PER_ORDER: usize = 100;
pub const MAX_ADDONS_PER_LINE: usize = 20;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_TEXT_LEN: usize = 4096;

/// Upper bound on money precision accepted in a business config.
pub const MAX_PRECISION: u32 = 8;

/// Transaction-scoped drafts outlive any sane transaction by a wide margin.
pub const DRAFT_TTL_MS: u64 = 120_000;

pub const TXN_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const TXN_MAX_RETRIES: u32 = 3;

/// Cancellation jobs enqueued per business per sweep.
pub const MAX_CANCEL_BATCH: usize = 500;
pub const MAX_JOB_ATTEMPTS: u32 = 3;
pub const JOB_RETRY_BACKOFF_MS: u64 = 250;
