//! Hard caps on every unbounded input. Exceeding one is a structured
//! error, never a panic.

/// Max tenants (databases) per process.
pub const MAX_TENANTS: usize = 64;

/// Max length of a tenant name before sanitization.
pub const MAX_TENANT_NAME_LEN: usize = 256;

/// Max coaches per tenant.
pub const MAX_COACHES_PER_TENANT: usize = 10_000;

/// Max bookings held by a single coach, terminal ones included.
pub const MAX_BOOKINGS_PER_COACH: usize = 10_000;

/// Max dates a self-scheduled coach may hold open at once.
pub const MAX_OPEN_DATES_PER_COACH: usize = 1_000;

/// Max sessions in a single booking.
pub const MAX_SESSIONS_PER_BOOKING: usize = 8;

/// Calendar years the engine accepts for month queries and session dates.
pub const MIN_CALENDAR_YEAR: i32 = 2020;
pub const MAX_CALENDAR_YEAR: i32 = 2100;

/// How long a WAL append may wait for the writer task before the caller
/// gets a retryable store error.
pub const WAL_APPEND_TIMEOUT_MS: u64 = 5_000;

/// Largest wire frame accepted from a client.
pub const MAX_WIRE_FRAME_BYTES: usize = 1 << 20;

/// Max SQL text length per statement.
pub const MAX_SQL_LEN: usize = 16 * 1024;

/// Max named prepared statements and portals per connection.
pub const MAX_PREPARED_STATEMENTS: usize = 128;

/// Max LISTEN subscriptions per connection.
pub const MAX_SUBSCRIPTIONS_PER_CONN: usize = 256;

/// Default time a pending_payment booking may wait for capture before the
/// reaper cancels it.
pub const DEFAULT_PAYMENT_WINDOW_MS: i64 = 30 * 60 * 1000;
