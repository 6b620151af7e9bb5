use crate::model::Ms;

// Hard caps, checked before anything is written to the WAL.

pub const MAX_COACHES_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_COACH: usize = 100_000;
pub const MAX_PACKAGES_PER_COACH: usize = 10_000;
pub const MAX_SUBSCRIPTIONS_PER_COACH: usize = 10_000;
pub const MAX_WINDOWS_PER_COACH: usize = 512;
pub const MAX_TIME_OFF_PER_COACH: usize = 4_096;
pub const MAX_BATCH_SIZE: usize = 256;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4_096;
pub const MAX_REASON_LEN: usize = 1_024;

/// Sessions a single grant or adjustment may add.
pub const MAX_SESSIONS_PER_GRANT: u32 = 10_000;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single booking: 24 hours.
pub const MAX_SESSION_DURATION_MS: Ms = 24 * 3_600_000;
pub const MAX_SLOT_DURATION_MINUTES: u32 = 24 * 60;

/// ±14h covers every real-world UTC offset.
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;
