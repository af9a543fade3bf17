pub const MAX_NAME_LEN: usize = 200;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PLACE_LEN: usize = 200;
pub const MAX_OFFICIANT_LEN: usize = 200;
pub const MAX_ANNOUNCEMENT_LEN: usize = 4_000;

/// Widest `from..=to` window accepted when listing schedule entries.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

/// Default cap on booking requests awaiting a decision.
pub const MAX_PENDING_BOOKINGS: usize = 100_000;
pub const MAX_ANNOUNCEMENTS: usize = 10_000;
