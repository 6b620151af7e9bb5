use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCoach {
        id: Ulid,
        name: Option<String>,
        utc_offset_minutes: i32,
    },
    UpdateCoach {
        id: Ulid,
        name: Option<String>,
        utc_offset_minutes: i32,
    },
    InsertWorkingWindow {
        id: Ulid,
        coach_id: Ulid,
        weekday: u8,
        start_minute: u32,
        end_minute: u32,
    },
    DeleteWorkingWindow {
        id: Ulid,
    },
    InsertTimeOff {
        id: Ulid,
        coach_id: Ulid,
        span: Span,
    },
    DeleteTimeOff {
        id: Ulid,
    },
    InsertPackage(PackageGrant),
    GrantPackageSessions {
        package_id: Ulid,
        sessions: u32,
    },
    AdjustPackage {
        id: Ulid,
        package_id: Ulid,
        adjustment: i32,
        reason: Option<String>,
        /// Column absent: keep. `NULL`: clear. Value: replace.
        expires_at: Option<Option<Ms>>,
    },
    InsertSubscription(SubscriptionGrant),
    SetSubscriptionActive {
        subscription_id: Ulid,
        is_active: bool,
    },
    /// `subscription_id` NULL replenishes every active hybrid subscription.
    Replenish {
        subscription_id: Option<Ulid>,
        month: MonthKey,
    },
    AdjustSubscription {
        subscription_id: Ulid,
        adjustment: i32,
        reason: Option<String>,
    },
    InsertBooking {
        id: Ulid,
        request: BookingRequest,
        span: Span,
    },
    BatchInsertBookings {
        request: BookingRequest,
        slots: Vec<(Ulid, Span)>,
    },
    TransitionBooking {
        booking_id: Ulid,
        status: BookingStatus,
    },
    RescheduleBooking {
        booking_id: Ulid,
        start: Ms,
    },
    Sweep {
        coach_id: Ulid,
        now: Option<Ms>,
    },
    DeleteBookings {
        ids: Vec<Ulid>,
    },
    SelectSlots {
        coach_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
    },
    SelectOpenTime {
        coach_id: Ulid,
        date: NaiveDate,
    },
    SelectCoaches,
    SelectWorkingWindows {
        coach_id: Ulid,
    },
    SelectTimeOff {
        coach_id: Ulid,
    },
    SelectBookings {
        coach_id: Ulid,
    },
    SelectPackages {
        coach_id: Ulid,
    },
    SelectPackageAdjustments {
        package_id: Ulid,
    },
    SelectSubscriptions {
        coach_id: Ulid,
    },
    SelectCheckinUsage {
        coach_id: Ulid,
        client_id: Ulid,
        month: MonthKey,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_all_insert_rows(insert)?;

    if table == "bookings" {
        return parse_insert_bookings(&rows);
    }
    if rows.len() > 1 {
        return Err(SqlError::Unsupported(format!(
            "multi-row INSERT INTO {table} ({} rows)",
            rows.len()
        )));
    }
    let values = &rows[0];

    match table.as_str() {
        "coaches" | "coach_updates" => {
            arity(&table, values, 3)?;
            let id = parse_ulid(&values[0])?;
            let name = parse_string_or_null(&values[1])?;
            let utc_offset_minutes = parse_i32(&values[2])?;
            if table == "coaches" {
                Ok(Command::InsertCoach { id, name, utc_offset_minutes })
            } else {
                Ok(Command::UpdateCoach { id, name, utc_offset_minutes })
            }
        }
        "working_windows" => {
            arity("working_windows", values, 5)?;
            let weekday = parse_i64(&values[2])?;
            Ok(Command::InsertWorkingWindow {
                id: parse_ulid(&values[0])?,
                coach_id: parse_ulid(&values[1])?,
                weekday: u8::try_from(weekday)
                    .map_err(|_| SqlError::Parse(format!("{weekday} out of weekday range")))?,
                start_minute: parse_u32(&values[3])?,
                end_minute: parse_u32(&values[4])?,
            })
        }
        "time_off" => {
            arity("time_off", values, 4)?;
            Ok(Command::InsertTimeOff {
                id: parse_ulid(&values[0])?,
                coach_id: parse_ulid(&values[1])?,
                span: parse_span(&values[2], &values[3])?,
            })
        }
        "packages" => {
            arity("packages", values, 5)?;
            Ok(Command::InsertPackage(PackageGrant {
                id: parse_ulid(&values[0])?,
                coach_id: parse_ulid(&values[1])?,
                client_id: parse_ulid(&values[2])?,
                total_sessions: parse_u32(&values[3])?,
                session_duration_minutes: parse_u32(&values[4])?,
                expires_at: optional(values, 5, parse_i64_or_null)?.flatten(),
                notes: optional(values, 6, parse_string_or_null)?.flatten(),
            }))
        }
        "package_grants" => {
            arity("package_grants", values, 2)?;
            Ok(Command::GrantPackageSessions {
                package_id: parse_ulid(&values[0])?,
                sessions: parse_u32(&values[1])?,
            })
        }
        "package_adjustments" => {
            arity("package_adjustments", values, 3)?;
            Ok(Command::AdjustPackage {
                id: parse_ulid(&values[0])?,
                package_id: parse_ulid(&values[1])?,
                adjustment: parse_i32(&values[2])?,
                reason: optional(values, 3, parse_string_or_null)?.flatten(),
                expires_at: optional(values, 4, parse_i64_or_null)?,
            })
        }
        "subscriptions" => {
            arity("subscriptions", values, 6)?;
            let plan = match parse_string(&values[3])?.to_lowercase().as_str() {
                "hybrid" => PlanRequest::Hybrid {
                    monthly_sessions: parse_u32(&values[4])?,
                },
                "online_only" => PlanRequest::OnlineOnly,
                other => return Err(SqlError::Parse(format!("unknown plan: {other}"))),
            };
            Ok(Command::InsertSubscription(SubscriptionGrant {
                id: parse_ulid(&values[0])?,
                coach_id: parse_ulid(&values[1])?,
                client_id: parse_ulid(&values[2])?,
                plan,
                session_duration_minutes: parse_u32(&values[5])?,
                notes: optional(values, 6, parse_string_or_null)?.flatten(),
            }))
        }
        "subscription_status" => {
            arity("subscription_status", values, 2)?;
            Ok(Command::SetSubscriptionActive {
                subscription_id: parse_ulid(&values[0])?,
                is_active: parse_bool(&values[1])?,
            })
        }
        "replenishments" => {
            arity("replenishments", values, 2)?;
            Ok(Command::Replenish {
                subscription_id: parse_ulid_or_null(&values[0])?,
                month: parse_month(&values[1])?,
            })
        }
        "subscription_adjustments" => {
            arity("subscription_adjustments", values, 2)?;
            Ok(Command::AdjustSubscription {
                subscription_id: parse_ulid(&values[0])?,
                adjustment: parse_i32(&values[1])?,
                reason: optional(values, 2, parse_string_or_null)?.flatten(),
            })
        }
        "booking_transitions" => {
            arity("booking_transitions", values, 2)?;
            let status = parse_string(&values[1])?.to_lowercase();
            let status = match BookingStatus::parse(&status) {
                Some(s) if s != BookingStatus::Confirmed => s,
                _ => return Err(SqlError::Parse(format!("bad target status: {status}"))),
            };
            Ok(Command::TransitionBooking {
                booking_id: parse_ulid(&values[0])?,
                status,
            })
        }
        "reschedules" => {
            arity("reschedules", values, 2)?;
            Ok(Command::RescheduleBooking {
                booking_id: parse_ulid(&values[0])?,
                start: parse_i64(&values[1])?,
            })
        }
        "sweeps" => {
            arity("sweeps", values, 1)?;
            Ok(Command::Sweep {
                coach_id: parse_ulid(&values[0])?,
                now: optional(values, 1, parse_i64_or_null)?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Columns: id, coach_id, client_id, invitee_name, booking_type, start, "end",
/// package_id, subscription_id. Every row of a batch must describe the same
/// coach, attendee, type and credit source.
fn parse_insert_bookings(rows: &[Vec<Expr>]) -> Result<Command, SqlError> {
    let mut request: Option<BookingRequest> = None;
    let mut slots = Vec::with_capacity(rows.len());

    for (i, row) in rows.iter().enumerate() {
        let in_row = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
        arity("bookings row", row, 7)?;
        let attendee = match (
            parse_ulid_or_null(&row[2]).map_err(in_row)?,
            parse_string_or_null(&row[3]).map_err(in_row)?,
        ) {
            (Some(client), None) => Attendee::Client(client),
            (None, Some(name)) => Attendee::Invitee(name),
            (Some(_), Some(_)) => {
                return Err(in_row(SqlError::Parse(
                    "client_id and invitee_name are mutually exclusive".into(),
                )));
            }
            (None, None) => return Err(in_row(SqlError::MissingFilter("client_id or invitee_name"))),
        };
        let type_name = parse_string(&row[4]).map_err(in_row)?.to_lowercase();
        let booking_type = BookingType::parse(&type_name)
            .ok_or_else(|| in_row(SqlError::Parse(format!("bad booking_type: {type_name}"))))?;
        let credit = CreditSource::from_ids(
            optional(row, 7, parse_ulid_or_null).map_err(in_row)?.flatten(),
            optional(row, 8, parse_ulid_or_null).map_err(in_row)?.flatten(),
        )
        .map_err(|e| in_row(SqlError::Parse(e.to_string())))?;

        let row_request = BookingRequest {
            coach_id: parse_ulid(&row[1]).map_err(in_row)?,
            attendee,
            booking_type,
            credit,
        };
        match &request {
            None => request = Some(row_request),
            Some(first) if *first == row_request => {}
            Some(_) => {
                return Err(SqlError::Unsupported(
                    "batch rows must share coach, attendee, type and credit source".into(),
                ));
            }
        }

        slots.push((
            parse_ulid(&row[0]).map_err(in_row)?,
            parse_span(&row[5], &row[6]).map_err(in_row)?,
        ));
    }

    let request = request.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?;
    if slots.len() == 1 {
        let (id, span) = slots[0];
        Ok(Command::InsertBooking { id, request, span })
    } else {
        Ok(Command::BatchInsertBookings { request, slots })
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::collect(delete.selection.as_ref())?;

    match table.as_str() {
        "bookings" => {
            let ids = match filters.in_list("id") {
                Some(list) => list.iter().map(parse_ulid).collect::<Result<Vec<_>, _>>()?,
                None => vec![parse_ulid(filters.require("id")?)?],
            };
            Ok(Command::DeleteBookings { ids })
        }
        "working_windows" => Ok(Command::DeleteWorkingWindow {
            id: parse_ulid(filters.require("id")?)?,
        }),
        "time_off" => Ok(Command::DeleteTimeOff {
            id: parse_ulid(filters.require("id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = Filters::collect(select.selection.as_ref())?;
    let coach_id = || -> Result<Ulid, SqlError> { parse_ulid(filters.require("coach_id")?) };

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            coach_id: coach_id()?,
            date: parse_date(filters.require("date")?)?,
            duration_minutes: parse_u32(filters.require("duration")?)?,
        }),
        "open_time" => Ok(Command::SelectOpenTime {
            coach_id: coach_id()?,
            date: parse_date(filters.require("date")?)?,
        }),
        "coaches" => Ok(Command::SelectCoaches),
        "working_windows" => Ok(Command::SelectWorkingWindows { coach_id: coach_id()? }),
        "time_off" => Ok(Command::SelectTimeOff { coach_id: coach_id()? }),
        "bookings" => Ok(Command::SelectBookings { coach_id: coach_id()? }),
        "packages" => Ok(Command::SelectPackages { coach_id: coach_id()? }),
        "package_adjustments" => Ok(Command::SelectPackageAdjustments {
            package_id: parse_ulid(filters.require("package_id")?)?,
        }),
        "subscriptions" => Ok(Command::SelectSubscriptions { coach_id: coach_id()? }),
        "checkin_usage" => Ok(Command::SelectCheckinUsage {
            coach_id: coach_id()?,
            client_id: parse_ulid(filters.require("client_id")?)?,
            month: parse_month(filters.require("month")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` and `col IN (...)` terms of an AND-only WHERE clause.
#[derive(Default)]
struct Filters {
    eq: Vec<(String, Expr)>,
    in_lists: Vec<(String, Vec<Expr>)>,
}

impl Filters {
    fn collect(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters::default();
        if let Some(expr) = selection {
            filters.visit(expr)?;
        }
        Ok(filters)
    }

    fn visit(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.visit(inner),
            Expr::BinaryOp { left, op, right } => match op {
                ast::BinaryOperator::And => {
                    self.visit(left)?;
                    self.visit(right)
                }
                ast::BinaryOperator::Eq => {
                    let col = expr_column_name(left)
                        .ok_or_else(|| SqlError::Unsupported(format!("filter: {expr}")))?;
                    self.eq.push((col, (**right).clone()));
                    Ok(())
                }
                _ => Err(SqlError::Unsupported(format!("filter: {expr}"))),
            },
            Expr::InList {
                expr: column,
                list,
                negated: false,
            } => {
                let col = expr_column_name(column)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter: {expr}")))?;
                self.in_lists.push((col, list.clone()));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("filter: {expr}"))),
        }
    }

    fn get(&self, col: &str) -> Option<&Expr> {
        self.eq.iter().find(|(c, _)| c == col).map(|(_, e)| e)
    }

    fn require(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingFilter(col))
    }

    fn in_list(&self, col: &str) -> Option<&[Expr]> {
        self.in_lists
            .iter()
            .find(|(c, _)| c == col)
            .map(|(_, list)| list.as_slice())
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn arity(table: &str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table.to_string(), min, values.len()));
    }
    Ok(())
}

/// Parse a trailing optional column. `None` when the column is absent.
fn optional<T>(
    values: &[Expr],
    idx: usize,
    parse: fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    values.get(idx).map(parse).transpose()
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64(expr).map(Some),
    }
}

fn parse_i32(expr: &Expr) -> Result<i32, SqlError> {
    let v = parse_i64(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// Ordering is left to the engine, which rejects an empty span as `InvalidSlot`.
fn parse_span(start: &Expr, end: &Expr) -> Result<Span, SqlError> {
    Ok(Span {
        start: parse_i64(start)?,
        end: parse_i64(end)?,
    })
}

/// `'YYYY-MM-DD'`
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

/// `'YYYY-MM'` or any date within the month.
fn parse_month(expr: &Expr) -> Result<MonthKey, SqlError> {
    let s = parse_string(expr)?;
    let date = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
        .map_err(|e| SqlError::Parse(format!("bad month {s}: {e}")))?;
    Ok(crate::engine::first_of_month(date))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(String, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const COACH: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const CLIENT: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const PKG: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";
    const B1: &str = "01BX5ZZKBKACTAV9WEVGEMMVS1";
    const B2: &str = "01BX5ZZKBKACTAV9WEVGEMMVS2";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_coach() {
        let sql = format!("INSERT INTO coaches (id, name, utc_offset) VALUES ('{COACH}', 'Alex', -300)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertCoach {
                id: ulid(COACH),
                name: Some("Alex".into()),
                utc_offset_minutes: -300,
            }
        );
    }

    #[test]
    fn parse_coach_update_with_null_name() {
        let sql = format!("INSERT INTO coach_updates (id, name, utc_offset) VALUES ('{COACH}', NULL, 60)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateCoach {
                id: ulid(COACH),
                name: None,
                utc_offset_minutes: 60,
            }
        );
    }

    #[test]
    fn parse_insert_working_window() {
        let sql = format!(
            "INSERT INTO working_windows (id, coach_id, weekday, start_minute, end_minute) VALUES ('{B1}', '{COACH}', 0, 540, 1020)"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertWorkingWindow {
                id: ulid(B1),
                coach_id: ulid(COACH),
                weekday: 0,
                start_minute: 540,
                end_minute: 1020,
            }
        );
    }

    #[test]
    fn parse_time_off_keeps_inverted_span_for_engine() {
        let sql = format!(
            r#"INSERT INTO time_off (id, coach_id, start, "end") VALUES ('{B1}', '{COACH}', 2000, 1000)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertTimeOff { span, .. } => {
                assert_eq!((span.start, span.end), (2000, 1000));
            }
            other => panic!("expected InsertTimeOff, got {other:?}"),
        }
    }

    #[test]
    fn multi_row_insert_only_for_bookings() {
        let sql = format!(
            "INSERT INTO working_windows VALUES ('{B1}', '{COACH}', 0, 540, 600), ('{B2}', '{COACH}', 1, 540, 600)"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_insert_package_with_optional_columns() {
        let short = format!(
            "INSERT INTO packages (id, coach_id, client_id, total_sessions, session_minutes) VALUES ('{PKG}', '{COACH}', '{CLIENT}', 10, 60)"
        );
        match parse_sql(&short).unwrap() {
            Command::InsertPackage(grant) => {
                assert_eq!(grant.total_sessions, 10);
                assert_eq!(grant.expires_at, None);
                assert_eq!(grant.notes, None);
            }
            other => panic!("expected InsertPackage, got {other:?}"),
        }

        let full = format!(
            "INSERT INTO packages VALUES ('{PKG}', '{COACH}', '{CLIENT}', 5, 45, 1700000000000, 'spring promo')"
        );
        match parse_sql(&full).unwrap() {
            Command::InsertPackage(grant) => {
                assert_eq!(grant.session_duration_minutes, 45);
                assert_eq!(grant.expires_at, Some(1_700_000_000_000));
                assert_eq!(grant.notes.as_deref(), Some("spring promo"));
            }
            other => panic!("expected InsertPackage, got {other:?}"),
        }
    }

    #[test]
    fn parse_package_adjustment_expiry_forms() {
        let keep = format!("INSERT INTO package_adjustments VALUES ('{B1}', '{PKG}', -2)");
        let clear = format!("INSERT INTO package_adjustments VALUES ('{B1}', '{PKG}', 0, 'fix', NULL)");
        let set = format!("INSERT INTO package_adjustments VALUES ('{B1}', '{PKG}', 3, NULL, 5000)");

        match parse_sql(&keep).unwrap() {
            Command::AdjustPackage { adjustment, expires_at, reason, .. } => {
                assert_eq!(adjustment, -2);
                assert_eq!(expires_at, None);
                assert_eq!(reason, None);
            }
            other => panic!("expected AdjustPackage, got {other:?}"),
        }
        match parse_sql(&clear).unwrap() {
            Command::AdjustPackage { expires_at, reason, .. } => {
                assert_eq!(expires_at, Some(None));
                assert_eq!(reason.as_deref(), Some("fix"));
            }
            other => panic!("expected AdjustPackage, got {other:?}"),
        }
        match parse_sql(&set).unwrap() {
            Command::AdjustPackage { expires_at, .. } => assert_eq!(expires_at, Some(Some(5000))),
            other => panic!("expected AdjustPackage, got {other:?}"),
        }
    }

    #[test]
    fn parse_subscription_plans() {
        let hybrid = format!(
            "INSERT INTO subscriptions VALUES ('{PKG}', '{COACH}', '{CLIENT}', 'hybrid', 4, 60)"
        );
        match parse_sql(&hybrid).unwrap() {
            Command::InsertSubscription(grant) => {
                assert_eq!(grant.plan, PlanRequest::Hybrid { monthly_sessions: 4 });
            }
            other => panic!("expected InsertSubscription, got {other:?}"),
        }

        let online = format!(
            "INSERT INTO subscriptions VALUES ('{PKG}', '{COACH}', '{CLIENT}', 'online_only', NULL, 30)"
        );
        match parse_sql(&online).unwrap() {
            Command::InsertSubscription(grant) => assert_eq!(grant.plan, PlanRequest::OnlineOnly),
            other => panic!("expected InsertSubscription, got {other:?}"),
        }

        let bad = format!("INSERT INTO subscriptions VALUES ('{PKG}', '{COACH}', '{CLIENT}', 'gold', 4, 60)");
        assert!(matches!(parse_sql(&bad), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_replenishment_month() {
        let one = format!("INSERT INTO replenishments VALUES ('{PKG}', '2025-03')");
        assert_eq!(
            parse_sql(&one).unwrap(),
            Command::Replenish {
                subscription_id: Some(ulid(PKG)),
                month: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            }
        );

        let all = "INSERT INTO replenishments VALUES (NULL, '2025-03-17')";
        assert_eq!(
            parse_sql(all).unwrap(),
            Command::Replenish {
                subscription_id: None,
                month: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            }
        );
    }

    #[test]
    fn parse_single_booking_for_client() {
        let sql = format!(
            r#"INSERT INTO bookings (id, coach_id, client_id, invitee_name, booking_type, start, "end", package_id, subscription_id)
               VALUES ('{B1}', '{COACH}', '{CLIENT}', NULL, 'session', 1000, 2000, '{PKG}', NULL)"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking {
                id: ulid(B1),
                request: BookingRequest {
                    coach_id: ulid(COACH),
                    attendee: Attendee::Client(ulid(CLIENT)),
                    booking_type: BookingType::Session,
                    credit: CreditSource::Package(ulid(PKG)),
                },
                span: Span::new(1000, 2000),
            }
        );
    }

    #[test]
    fn parse_invitee_booking_without_credit_columns() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{B1}', '{COACH}', NULL, 'Sam Rivera', 'session', 1000, 2000)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking { request, .. } => {
                assert_eq!(request.attendee, Attendee::Invitee("Sam Rivera".into()));
                assert_eq!(request.credit, CreditSource::Unpackaged);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_batch_bookings() {
        let sql = format!(
            "INSERT INTO bookings VALUES \
             ('{B1}', '{COACH}', '{CLIENT}', NULL, 'session', 1000, 2000, '{PKG}', NULL), \
             ('{B2}', '{COACH}', '{CLIENT}', NULL, 'session', 3000, 4000, '{PKG}', NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::BatchInsertBookings { request, slots } => {
                assert_eq!(request.credit, CreditSource::Package(ulid(PKG)));
                assert_eq!(
                    slots,
                    vec![(ulid(B1), Span::new(1000, 2000)), (ulid(B2), Span::new(3000, 4000))]
                );
            }
            other => panic!("expected BatchInsertBookings, got {other:?}"),
        }
    }

    #[test]
    fn batch_rows_must_share_request() {
        let sql = format!(
            "INSERT INTO bookings VALUES \
             ('{B1}', '{COACH}', '{CLIENT}', NULL, 'session', 1000, 2000), \
             ('{B2}', '{COACH}', '{CLIENT}', NULL, 'checkin', 3000, 4000)"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn booking_with_both_credit_sources_rejected() {
        let sql = format!(
            "INSERT INTO bookings VALUES ('{B1}', '{COACH}', '{CLIENT}', NULL, 'session', 1000, 2000, '{PKG}', '{PKG}')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_transitions() {
        let sql = format!("INSERT INTO booking_transitions VALUES ('{B1}', 'no_show')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::TransitionBooking {
                booking_id: ulid(B1),
                status: BookingStatus::NoShow,
            }
        );

        let back = format!("INSERT INTO booking_transitions VALUES ('{B1}', 'confirmed')");
        assert!(parse_sql(&back).is_err());
    }

    #[test]
    fn parse_sweep_with_and_without_now() {
        let with_now = format!("INSERT INTO sweeps (coach_id, now) VALUES ('{COACH}', 99)");
        assert_eq!(
            parse_sql(&with_now).unwrap(),
            Command::Sweep { coach_id: ulid(COACH), now: Some(99) }
        );
        let bare = format!("INSERT INTO sweeps (coach_id) VALUES ('{COACH}')");
        assert_eq!(
            parse_sql(&bare).unwrap(),
            Command::Sweep { coach_id: ulid(COACH), now: None }
        );
    }

    #[test]
    fn parse_delete_bookings_eq_and_in() {
        let one = format!("DELETE FROM bookings WHERE id = '{B1}'");
        assert_eq!(parse_sql(&one).unwrap(), Command::DeleteBookings { ids: vec![ulid(B1)] });

        let many = format!("DELETE FROM bookings WHERE id IN ('{B1}', '{B2}')");
        assert_eq!(
            parse_sql(&many).unwrap(),
            Command::DeleteBookings { ids: vec![ulid(B1), ulid(B2)] }
        );
    }

    #[test]
    fn parse_delete_requires_id() {
        assert_eq!(
            parse_sql("DELETE FROM time_off"),
            Err(SqlError::MissingFilter("id"))
        );
        let window = format!("DELETE FROM working_windows WHERE id = '{B1}'");
        assert_eq!(parse_sql(&window).unwrap(), Command::DeleteWorkingWindow { id: ulid(B1) });
    }

    #[test]
    fn parse_select_slots() {
        let sql = format!(
            "SELECT * FROM slots WHERE coach_id = '{COACH}' AND date = '2025-06-02' AND duration = 30"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots {
                coach_id: ulid(COACH),
                date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                duration_minutes: 30,
            }
        );
    }

    #[test]
    fn parse_select_slots_missing_duration() {
        let sql = format!("SELECT * FROM slots WHERE coach_id = '{COACH}' AND date = '2025-06-02'");
        assert_eq!(parse_sql(&sql), Err(SqlError::MissingFilter("duration")));
    }

    #[test]
    fn parse_select_checkin_usage() {
        let sql = format!(
            "SELECT * FROM checkin_usage WHERE coach_id = '{COACH}' AND client_id = '{CLIENT}' AND month = '2025-06'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectCheckinUsage {
                coach_id: ulid(COACH),
                client_id: ulid(CLIENT),
                month: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            }
        );
    }

    #[test]
    fn parse_select_lists() {
        assert_eq!(parse_sql("SELECT * FROM coaches").unwrap(), Command::SelectCoaches);
        let adj = format!("SELECT * FROM package_adjustments WHERE package_id = '{PKG}'");
        assert_eq!(
            parse_sql(&adj).unwrap(),
            Command::SelectPackageAdjustments { package_id: ulid(PKG) }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings"),
            Err(SqlError::MissingFilter("coach_id"))
        );
    }

    #[test]
    fn unsupported_filters_rejected() {
        let sql = format!("SELECT * FROM bookings WHERE coach_id = '{COACH}' OR 1 = 1");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn unknown_table_and_statement() {
        assert_eq!(
            parse_sql("SELECT * FROM invoices"),
            Err(SqlError::UnknownTable("invoices".into()))
        );
        assert!(matches!(
            parse_sql("UPDATE bookings SET status = 'cancelled'"),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(parse_sql("SELEC oops"), Err(SqlError::Parse(_))));
    }

    #[test]
    fn wrong_arity() {
        let sql = format!("INSERT INTO package_grants VALUES ('{PKG}')");
        assert_eq!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("package_grants".into(), 2, 1))
        );
    }
}
