use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::SharedPasswordAuthSource;
use crate::engine::{now_ms, Engine};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct CoachbookHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CoachbookQueryParser>,
}

impl CoachbookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CoachbookQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertCoach {
                id,
                name,
                utc_offset_minutes,
            } => {
                engine
                    .create_coach(id, name, utc_offset_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::UpdateCoach {
                id,
                name,
                utc_offset_minutes,
            } => {
                engine
                    .update_coach(id, name, utc_offset_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::InsertWorkingWindow {
                id,
                coach_id,
                weekday,
                start_minute,
                end_minute,
            } => {
                engine
                    .add_working_window(id, coach_id, weekday, start_minute, end_minute)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::DeleteWorkingWindow { id } => {
                engine.remove_working_window(id).await.map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::InsertTimeOff { id, coach_id, span } => {
                engine
                    .add_time_off(id, coach_id, span)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::DeleteTimeOff { id } => {
                engine.remove_time_off(id).await.map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::InsertPackage(grant) => {
                engine.create_package(grant).await.map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::GrantPackageSessions {
                package_id,
                sessions,
            } => {
                engine
                    .regrant_package(package_id, sessions)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::AdjustPackage {
                id,
                package_id,
                adjustment,
                reason,
                expires_at,
            } => {
                engine
                    .adjust_package(id, package_id, adjustment, reason, expires_at)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::InsertSubscription(grant) => {
                engine.create_subscription(grant).await.map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::SetSubscriptionActive {
                subscription_id,
                is_active,
            } => {
                engine
                    .set_subscription_active(subscription_id, is_active)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::Replenish {
                subscription_id: Some(id),
                month,
            } => {
                let outcome = engine.replenish_monthly(id, month).await.map_err(engine_err)?;
                let rows = match outcome {
                    ReplenishOutcome::Applied { .. } => 1,
                    ReplenishOutcome::AlreadyApplied => 0,
                };
                Ok(vec![inserted(rows)])
            }
            Command::Replenish {
                subscription_id: None,
                month,
            } => {
                let applied = engine.replenish_all(month).await.map_err(engine_err)?;
                Ok(vec![inserted(applied)])
            }
            Command::AdjustSubscription {
                subscription_id,
                adjustment,
                reason,
            } => {
                engine
                    .adjust_subscription(subscription_id, adjustment, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::InsertBooking { id, request, span } => {
                engine
                    .create_booking(id, request, span)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::BatchInsertBookings { request, slots } => {
                let created = engine
                    .create_bookings(request, slots)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(created.len())])
            }
            Command::TransitionBooking { booking_id, status } => {
                match status {
                    BookingStatus::Cancelled => engine.cancel_booking(booking_id).await,
                    BookingStatus::Completed => engine.mark_completed(booking_id).await,
                    BookingStatus::NoShow => engine.mark_no_show(booking_id).await,
                    BookingStatus::Confirmed => Err(crate::engine::EngineError::InvalidRequest(
                        "bookings cannot return to confirmed",
                    )),
                }
                .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::RescheduleBooking { booking_id, start } => {
                engine
                    .reschedule_booking(booking_id, start)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::Sweep { coach_id, now } => {
                let swept = engine
                    .sweep_past_sessions(coach_id, now.unwrap_or_else(now_ms))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(swept)])
            }
            Command::DeleteBookings { ids } if ids.len() == 1 => {
                engine.delete_booking(ids[0]).await.map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::DeleteBookings { ids } => {
                let outcomes = engine.delete_bookings(&ids).await;
                Ok(vec![query_response(
                    delete_results_schema(),
                    outcomes,
                    |enc, (id, outcome)| {
                        enc.encode_field(&id.to_string())?;
                        enc.encode_field(&outcome.is_ok())?;
                        enc.encode_field(&outcome.as_ref().ok().copied().flatten().map(|p| p.to_string()))?;
                        enc.encode_field(&outcome.err().map(|e| e.to_string()))
                    },
                )])
            }
            Command::SelectSlots {
                coach_id,
                date,
                duration_minutes,
            } => {
                let slots = engine
                    .get_slots(coach_id, date, duration_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![span_rows(coach_id, slots)])
            }
            Command::SelectOpenTime { coach_id, date } => {
                let open = engine
                    .get_open_time(coach_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![span_rows(coach_id, open)])
            }
            Command::SelectCoaches => {
                let coaches = engine.list_coaches().await;
                Ok(vec![query_response(coaches_schema(), coaches, |enc, c| {
                    enc.encode_field(&c.id.to_string())?;
                    enc.encode_field(&c.name)?;
                    enc.encode_field(&(c.utc_offset_minutes as i64))
                })])
            }
            Command::SelectWorkingWindows { coach_id } => {
                let windows = engine.list_windows(coach_id).await;
                let coach = coach_id.to_string();
                Ok(vec![query_response(windows_schema(), windows, |enc, w| {
                    enc.encode_field(&w.id.to_string())?;
                    enc.encode_field(&coach)?;
                    enc.encode_field(&(w.weekday as i64))?;
                    enc.encode_field(&(w.start_minute as i64))?;
                    enc.encode_field(&(w.end_minute as i64))
                })])
            }
            Command::SelectTimeOff { coach_id } => {
                let entries = engine.list_time_off(coach_id).await;
                let coach = coach_id.to_string();
                Ok(vec![query_response(time_off_schema(), entries, |enc, t| {
                    enc.encode_field(&t.id.to_string())?;
                    enc.encode_field(&coach)?;
                    enc.encode_field(&t.span.start)?;
                    enc.encode_field(&t.span.end)
                })])
            }
            Command::SelectBookings { coach_id } => {
                let bookings = engine.list_bookings(coach_id).await;
                Ok(vec![query_response(bookings_schema(), bookings, encode_booking)])
            }
            Command::SelectPackages { coach_id } => {
                let packages = engine.list_packages(coach_id).await;
                Ok(vec![query_response(packages_schema(), packages, encode_package)])
            }
            Command::SelectPackageAdjustments { package_id } => {
                let trail = engine
                    .package_adjustments(package_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![query_response(adjustments_schema(), trail, |enc, a| {
                    enc.encode_field(&a.id.to_string())?;
                    enc.encode_field(&a.package_id.to_string())?;
                    enc.encode_field(&(a.adjustment as i64))?;
                    enc.encode_field(&(a.previous_balance as i64))?;
                    enc.encode_field(&(a.new_balance as i64))?;
                    enc.encode_field(&a.reason)?;
                    enc.encode_field(&a.created_at)
                })])
            }
            Command::SelectSubscriptions { coach_id } => {
                let subs = engine.list_subscriptions(coach_id).await;
                Ok(vec![query_response(subscriptions_schema(), subs, encode_subscription)])
            }
            Command::SelectCheckinUsage {
                coach_id,
                client_id,
                month,
            } => {
                let usage = engine.checkin_usage(client_id, coach_id, month).await;
                Ok(vec![query_response(
                    checkin_usage_schema(),
                    usage.into_iter().collect(),
                    |enc, u| {
                        enc.encode_field(&u.id.to_string())?;
                        enc.encode_field(&u.client_id.to_string())?;
                        enc.encode_field(&u.coach_id.to_string())?;
                        enc.encode_field(&u.month.format("%Y-%m").to_string())?;
                        enc.encode_field(&u.used)?;
                        enc.encode_field(&u.booking_id.map(|b| b.to_string()))
                    },
                )])
            }
        }
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn deleted(rows: usize) -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(rows))
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn span_rows(coach_id: Ulid, spans: Vec<Span>) -> Response {
    let coach = coach_id.to_string();
    query_response(spans_schema(), spans, |enc, s| {
        enc.encode_field(&coach)?;
        enc.encode_field(&s.start)?;
        enc.encode_field(&s.end)
    })
}

fn encode_booking(enc: &mut DataRowEncoder, b: Booking) -> PgWireResult<()> {
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.coach_id.to_string())?;
    enc.encode_field(&b.attendee.client_id().map(|c| c.to_string()))?;
    enc.encode_field(&b.attendee.invitee_name().map(str::to_string))?;
    enc.encode_field(&b.booking_type.as_str().to_string())?;
    enc.encode_field(&b.span.start)?;
    enc.encode_field(&b.span.end)?;
    enc.encode_field(&b.status.as_str().to_string())?;
    enc.encode_field(&b.credit.package_id().map(|p| p.to_string()))?;
    enc.encode_field(&b.credit.subscription_id().map(|s| s.to_string()))?;
    enc.encode_field(&b.created_at)
}

fn encode_package(enc: &mut DataRowEncoder, p: SessionPackage) -> PgWireResult<()> {
    enc.encode_field(&p.id.to_string())?;
    enc.encode_field(&p.coach_id.to_string())?;
    enc.encode_field(&p.client_id.to_string())?;
    enc.encode_field(&(p.total_sessions as i64))?;
    enc.encode_field(&(p.remaining_sessions as i64))?;
    enc.encode_field(&(p.session_duration_minutes as i64))?;
    enc.encode_field(&p.expires_at)?;
    enc.encode_field(&p.notes)?;
    enc.encode_field(&(p.version as i64))
}

fn encode_subscription(enc: &mut DataRowEncoder, s: ClientSubscription) -> PgWireResult<()> {
    let (monthly, available, last) = match s.plan {
        SubscriptionPlan::Hybrid {
            monthly_sessions,
            available_sessions,
            last_replenished,
        } => (
            Some(monthly_sessions as i64),
            Some(available_sessions as i64),
            last_replenished.map(|m| m.format("%Y-%m").to_string()),
        ),
        SubscriptionPlan::OnlineOnly => (None, None, None),
    };
    enc.encode_field(&s.id.to_string())?;
    enc.encode_field(&s.coach_id.to_string())?;
    enc.encode_field(&s.client_id.to_string())?;
    enc.encode_field(&s.plan.kind().to_string())?;
    enc.encode_field(&monthly)?;
    enc.encode_field(&available)?;
    enc.encode_field(&last)?;
    enc.encode_field(&(s.session_duration_minutes as i64))?;
    enc.encode_field(&s.is_active)?;
    enc.encode_field(&(s.version as i64))
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn spans_schema() -> Vec<FieldInfo> {
    vec![
        field("coach_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
    ]
}

fn coaches_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("utc_offset", Type::INT8),
    ]
}

fn windows_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("coach_id", Type::VARCHAR),
        field("weekday", Type::INT8),
        field("start_minute", Type::INT8),
        field("end_minute", Type::INT8),
    ]
}

fn time_off_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("coach_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("coach_id", Type::VARCHAR),
        field("client_id", Type::VARCHAR),
        field("invitee_name", Type::VARCHAR),
        field("booking_type", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("status", Type::VARCHAR),
        field("package_id", Type::VARCHAR),
        field("subscription_id", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

fn packages_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("coach_id", Type::VARCHAR),
        field("client_id", Type::VARCHAR),
        field("total_sessions", Type::INT8),
        field("remaining_sessions", Type::INT8),
        field("session_minutes", Type::INT8),
        field("expires_at", Type::INT8),
        field("notes", Type::VARCHAR),
        field("version", Type::INT8),
    ]
}

fn adjustments_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("package_id", Type::VARCHAR),
        field("adjustment", Type::INT8),
        field("previous_balance", Type::INT8),
        field("new_balance", Type::INT8),
        field("reason", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

fn subscriptions_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("coach_id", Type::VARCHAR),
        field("client_id", Type::VARCHAR),
        field("plan", Type::VARCHAR),
        field("monthly_sessions", Type::INT8),
        field("available_sessions", Type::INT8),
        field("last_replenished", Type::VARCHAR),
        field("session_minutes", Type::INT8),
        field("is_active", Type::BOOL),
        field("version", Type::INT8),
    ]
}

fn checkin_usage_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("client_id", Type::VARCHAR),
        field("coach_id", Type::VARCHAR),
        field("month", Type::VARCHAR),
        field("used", Type::BOOL),
        field("booking_id", Type::VARCHAR),
    ]
}

fn delete_results_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("deleted", Type::BOOL),
        field("refunded_package_id", Type::VARCHAR),
        field("error", Type::VARCHAR),
    ]
}

/// Result columns of a statement, judged from its text since placeholders
/// are not bound yet.
fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.trim_start().to_lowercase();
    if lower.starts_with("delete") && lower.contains(" in ") {
        return delete_results_schema();
    }
    if !lower.starts_with("select") {
        return vec![];
    }
    let table = lower
        .split_whitespace()
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_matches(|c: char| c == ';' || c == '"'))
        .unwrap_or_default();
    match table {
        "slots" | "open_time" => spans_schema(),
        "coaches" => coaches_schema(),
        "working_windows" => windows_schema(),
        "time_off" => time_off_schema(),
        "bookings" => bookings_schema(),
        "packages" => packages_schema(),
        "package_adjustments" => adjustments_schema(),
        "subscriptions" => subscriptions_schema(),
        "checkin_usage" => checkin_usage_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for CoachbookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CoachbookQueryParser;

#[async_trait]
impl QueryParser for CoachbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CoachbookHandler {
    type Statement = String;
    type QueryParser = CoachbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let mut responses = self.run(&engine, &sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            statement_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted literals and identifiers, as
/// (byte range, N), in statement order.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which leaves us inside.
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            None => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// Substitute $1, $2, ... with bound values (text format) in one pass over
/// the statement. Bound text is never scanned for placeholders itself.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CoachbookFactory {
    handler: Arc<CoachbookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SharedPasswordAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl CoachbookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SharedPasswordAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CoachbookHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CoachbookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls_acceptor: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(CoachbookFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls_acceptor, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest_index() {
        assert_eq!(count_params("SELECT * FROM bookings WHERE coach_id = $1"), 1);
        assert_eq!(count_params("INSERT INTO reschedules VALUES ($2, $10)"), 10);
        assert_eq!(count_params("SELECT * FROM coaches"), 0);
        assert_eq!(count_params("INSERT INTO coaches VALUES ($1, 'costs $5', 0)"), 1);
    }

    #[test]
    fn bound_text_is_not_rescanned() {
        let params = [Some("01J0000000000000000000000A"), Some("Coach $1 it's me")];
        assert_eq!(
            bind_params("INSERT INTO coaches VALUES ($1, $2, 0)", &params),
            "INSERT INTO coaches VALUES ('01J0000000000000000000000A', 'Coach $1 it''s me', 0)"
        );
    }

    #[test]
    fn placeholders_inside_literals_are_kept() {
        let params = [Some("x"), None];
        assert_eq!(
            bind_params("INSERT INTO t VALUES ('$1', \"$2\", $2, $1, $9)", &params),
            "INSERT INTO t VALUES ('$1', \"$2\", NULL, 'x', $9)"
        );
        assert_eq!(
            bind_params::<&str>("SELECT '$1' FROM t WHERE a = $10", &[]),
            "SELECT '$1' FROM t WHERE a = $10"
        );
    }

    #[test]
    fn statement_schema_by_table() {
        let names = |fields: Vec<FieldInfo>| -> Vec<String> {
            fields.iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(
            names(statement_schema("SELECT * FROM slots WHERE coach_id = $1")),
            vec!["coach_id", "start", "end"]
        );
        assert_eq!(statement_schema("select * from packages where coach_id = $1").len(), 9);
        assert!(statement_schema("INSERT INTO coaches VALUES ($1, $2, $3)").is_empty());
        assert_eq!(
            names(statement_schema("DELETE FROM bookings WHERE id IN ($1, $2)"))[1],
            "deleted"
        );
        assert!(statement_schema("DELETE FROM bookings WHERE id = $1").is_empty());
    }
}
