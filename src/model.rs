use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

/// First day of a calendar month in the coach's local time.
pub type MonthKey = NaiveDate;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but returns `None` for an empty or inverted span.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingType {
    Session,
    Checkin,
}

impl BookingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingType::Session => "session",
            BookingType::Checkin => "checkin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session" => Some(BookingType::Session),
            "checkin" => Some(BookingType::Checkin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "no_show" => Some(BookingStatus::NoShow),
            _ => None,
        }
    }
}

/// Who the booking is for: a client with an account, or a named invitee
/// who has not signed up yet (a one-off booking).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attendee {
    Client(Ulid),
    Invitee(String),
}

impl Attendee {
    pub fn client_id(&self) -> Option<Ulid> {
        match self {
            Attendee::Client(id) => Some(*id),
            Attendee::Invitee(_) => None,
        }
    }

    pub fn invitee_name(&self) -> Option<&str> {
        match self {
            Attendee::Client(_) => None,
            Attendee::Invitee(name) => Some(name.as_str()),
        }
    }
}

/// Where a booking's credit came from. Fixed at creation; decides refund
/// eligibility on deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditSource {
    Package(Ulid),
    Subscription(Ulid),
    Unpackaged,
}

impl CreditSource {
    /// Build from the nullable pair a request layer receives. Both set is rejected.
    pub fn from_ids(
        package_id: Option<Ulid>,
        subscription_id: Option<Ulid>,
    ) -> Result<Self, crate::engine::EngineError> {
        match (package_id, subscription_id) {
            (Some(_), Some(_)) => Err(crate::engine::EngineError::InvalidRequest(
                "package_id and subscription_id are mutually exclusive",
            )),
            (Some(p), None) => Ok(CreditSource::Package(p)),
            (None, Some(s)) => Ok(CreditSource::Subscription(s)),
            (None, None) => Ok(CreditSource::Unpackaged),
        }
    }

    pub fn package_id(&self) -> Option<Ulid> {
        match self {
            CreditSource::Package(id) => Some(*id),
            _ => None,
        }
    }

    pub fn subscription_id(&self) -> Option<Ulid> {
        match self {
            CreditSource::Subscription(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub coach_id: Ulid,
    pub attendee: Attendee,
    pub booking_type: BookingType,
    pub span: Span,
    pub status: BookingStatus,
    pub credit: CreditSource,
    pub created_at: Ms,
}

// ── Ledger ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPackage {
    pub id: Ulid,
    pub client_id: Ulid,
    pub coach_id: Ulid,
    /// Original grant size. Debits never touch it; only an explicit re-grant does.
    pub total_sessions: u32,
    pub remaining_sessions: u32,
    pub session_duration_minutes: u32,
    pub expires_at: Option<Ms>,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
    /// Bumped on every balance or expiry change.
    pub version: u64,
}

impl SessionPackage {
    pub fn is_expired(&self, now: Ms) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Append-only audit row: `new_balance = previous_balance + adjustment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAdjustment {
    pub id: Ulid,
    pub package_id: Ulid,
    pub adjustment: i32,
    pub previous_balance: u32,
    pub new_balance: u32,
    pub reason: Option<String>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionPlan {
    /// Monthly allotment with one month of rollover:
    /// `0 <= available_sessions <= 2 * monthly_sessions`.
    Hybrid {
        monthly_sessions: u32,
        available_sessions: u32,
        last_replenished: Option<MonthKey>,
    },
    /// Unmetered; never debited.
    OnlineOnly,
}

impl SubscriptionPlan {
    pub fn kind(&self) -> &'static str {
        match self {
            SubscriptionPlan::Hybrid { .. } => "hybrid",
            SubscriptionPlan::OnlineOnly => "online_only",
        }
    }

    pub fn ceiling(&self) -> Option<u32> {
        match self {
            SubscriptionPlan::Hybrid { monthly_sessions, .. } => {
                Some(monthly_sessions.saturating_mul(2))
            }
            SubscriptionPlan::OnlineOnly => None,
        }
    }

    pub fn available(&self) -> Option<u32> {
        match self {
            SubscriptionPlan::Hybrid { available_sessions, .. } => Some(*available_sessions),
            SubscriptionPlan::OnlineOnly => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSubscription {
    pub id: Ulid,
    pub client_id: Ulid,
    pub coach_id: Ulid,
    pub plan: SubscriptionPlan,
    pub session_duration_minutes: u32,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub version: u64,
}

/// One row per (client, coach, month); `used` flips once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinUsage {
    pub id: Ulid,
    pub client_id: Ulid,
    pub coach_id: Ulid,
    pub month: MonthKey,
    pub used: bool,
    pub booking_id: Option<Ulid>,
}

/// A ledger debit decided by the scheduler and committed with the bookings it pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerDebit {
    Package { package_id: Ulid, count: u32 },
    Subscription { subscription_id: Ulid, count: u32 },
}

// ── Coach calendar ───────────────────────────────────────────────

/// Recurring weekly window in coach-local minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingWindow {
    pub id: Ulid,
    /// 0 = Monday .. 6 = Sunday.
    pub weekday: u8,
    pub start_minute: u32,
    pub end_minute: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOff {
    pub id: Ulid,
    pub span: Span,
}

/// Everything owned by one coach. The engine locks this as a unit, so
/// booking rows and the balances they consume always change together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Fixed offset of the coach's local time from UTC.
    pub utc_offset_minutes: i32,
    pub windows: Vec<WorkingWindow>,
    pub time_off: Vec<TimeOff>,
    pub bookings: HashMap<Ulid, Booking>,
    pub packages: HashMap<Ulid, SessionPackage>,
    pub adjustments: Vec<PackageAdjustment>,
    pub subscriptions: HashMap<Ulid, ClientSubscription>,
    pub checkins: HashMap<(Ulid, MonthKey), CheckinUsage>,
}

impl CoachState {
    pub fn new(id: Ulid, name: Option<String>, utc_offset_minutes: i32) -> Self {
        Self {
            id,
            name,
            utc_offset_minutes,
            windows: Vec::new(),
            time_off: Vec::new(),
            bookings: HashMap::new(),
            packages: HashMap::new(),
            adjustments: Vec::new(),
            subscriptions: HashMap::new(),
            checkins: HashMap::new(),
        }
    }

    /// Ids of every entity that resolves to this coach.
    pub fn entity_ids(&self) -> impl Iterator<Item = Ulid> + '_ {
        self.windows
            .iter()
            .map(|w| w.id)
            .chain(self.time_off.iter().map(|t| t.id))
            .chain(self.bookings.keys().copied())
            .chain(self.packages.keys().copied())
            .chain(self.subscriptions.keys().copied())
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CoachCreated {
        id: Ulid,
        name: Option<String>,
        utc_offset_minutes: i32,
    },
    CoachUpdated {
        id: Ulid,
        name: Option<String>,
        utc_offset_minutes: i32,
    },
    WindowAdded {
        coach_id: Ulid,
        window: WorkingWindow,
    },
    WindowRemoved {
        id: Ulid,
        coach_id: Ulid,
    },
    TimeOffAdded {
        coach_id: Ulid,
        time_off: TimeOff,
    },
    TimeOffRemoved {
        id: Ulid,
        coach_id: Ulid,
    },
    PackageCreated {
        package: SessionPackage,
    },
    PackageRegranted {
        package_id: Ulid,
        coach_id: Ulid,
        additional: u32,
        at: Ms,
    },
    PackageAdjusted {
        coach_id: Ulid,
        adjustment: PackageAdjustment,
        /// `Some(new)` replaces the expiry (`Some(None)` clears it).
        expires_at: Option<Option<Ms>>,
    },
    SubscriptionCreated {
        subscription: ClientSubscription,
    },
    SubscriptionActiveSet {
        subscription_id: Ulid,
        coach_id: Ulid,
        is_active: bool,
        at: Ms,
    },
    SubscriptionReplenished {
        subscription_id: Ulid,
        coach_id: Ulid,
        month: MonthKey,
        previous_balance: u32,
        new_balance: u32,
        at: Ms,
    },
    SubscriptionAdjusted {
        subscription_id: Ulid,
        coach_id: Ulid,
        adjustment: i32,
        previous_balance: u32,
        new_balance: u32,
        reason: Option<String>,
        at: Ms,
    },
    /// Bookings, their debit and their check-in claims commit as one record.
    BookingsCreated {
        coach_id: Ulid,
        bookings: Vec<Booking>,
        debit: Option<LedgerDebit>,
        checkins: Vec<CheckinUsage>,
    },
    BookingStatusChanged {
        id: Ulid,
        coach_id: Ulid,
        status: BookingStatus,
        at: Ms,
    },
    BookingsSwept {
        coach_id: Ulid,
        ids: Vec<Ulid>,
        at: Ms,
    },
    BookingRescheduled {
        id: Ulid,
        coach_id: Ulid,
        span: Span,
    },
    BookingDeleted {
        id: Ulid,
        coach_id: Ulid,
        /// Package credited by this deletion, if the refund rule applied.
        refund: Option<Ulid>,
        at: Ms,
    },
    /// Full coach state, written by WAL compaction.
    CoachSnapshot {
        state: CoachState,
    },
}

impl Event {
    pub fn coach_id(&self) -> Ulid {
        match self {
            Event::CoachCreated { id, .. } | Event::CoachUpdated { id, .. } => *id,
            Event::PackageCreated { package } => package.coach_id,
            Event::SubscriptionCreated { subscription } => subscription.coach_id,
            Event::CoachSnapshot { state } => state.id,
            Event::WindowAdded { coach_id, .. }
            | Event::WindowRemoved { coach_id, .. }
            | Event::TimeOffAdded { coach_id, .. }
            | Event::TimeOffRemoved { coach_id, .. }
            | Event::PackageRegranted { coach_id, .. }
            | Event::PackageAdjusted { coach_id, .. }
            | Event::SubscriptionActiveSet { coach_id, .. }
            | Event::SubscriptionReplenished { coach_id, .. }
            | Event::SubscriptionAdjusted { coach_id, .. }
            | Event::BookingsCreated { coach_id, .. }
            | Event::BookingStatusChanged { coach_id, .. }
            | Event::BookingsSwept { coach_id, .. }
            | Event::BookingRescheduled { coach_id, .. }
            | Event::BookingDeleted { coach_id, .. } => *coach_id,
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────

/// Everything a booking needs except its id and time span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub coach_id: Ulid,
    pub attendee: Attendee,
    pub booking_type: BookingType,
    pub credit: CreditSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageGrant {
    pub id: Ulid,
    pub coach_id: Ulid,
    pub client_id: Ulid,
    pub total_sessions: u32,
    pub session_duration_minutes: u32,
    pub expires_at: Option<Ms>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanRequest {
    Hybrid { monthly_sessions: u32 },
    OnlineOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionGrant {
    pub id: Ulid,
    pub coach_id: Ulid,
    pub client_id: Ulid,
    pub plan: PlanRequest,
    pub session_duration_minutes: u32,
    pub notes: Option<String>,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplenishOutcome {
    Applied { previous_balance: u32, new_balance: u32 },
    AlreadyApplied,
}
