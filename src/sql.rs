use chrono::NaiveDate;
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCoach {
        id: Ulid,
        category: CoachCategory,
        price: Option<Money>,
        session_minutes: Option<u32>,
    },
    UpdateCoach {
        id: Ulid,
        price: Option<Money>,
        session_minutes: Option<u32>,
    },
    DeleteCoach {
        id: Ulid,
    },
    OpenDate {
        coach_id: Ulid,
        date: NaiveDate,
    },
    CloseDate {
        coach_id: Ulid,
        date: NaiveDate,
    },
    InsertBooking {
        id: Ulid,
        coach_id: Ulid,
        client_id: Ulid,
        sessions: Vec<SessionRequest>,
        payment_method: PaymentMethod,
    },
    UpdateBookingStatus {
        id: Ulid,
        to: BookingStatus,
        actor: Actor,
    },
    SelectCoaches,
    SelectOpenDays {
        coach_id: Ulid,
        year: i32,
        month: u32,
    },
    SelectSlots {
        coach_id: Ulid,
        date: NaiveDate,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectBookingsForCoach {
        coach_id: Ulid,
    },
    SelectBookingsForClient {
        client_id: Ulid,
        active_only: bool,
    },
    SelectNextSession {
        client_id: Ulid,
    },
    Listen {
        channel: String,
    },
    /// `None` means `UNLISTEN *`.
    Unlisten {
        channel: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN") {
        let rest = trimmed[8..].trim().trim_matches(';').trim();
        if rest == "*" || rest.is_empty() {
            return Ok(Command::Unlisten { channel: None });
        }
        return Ok(Command::Unlisten {
            channel: Some(rest.to_string()),
        });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "coaches" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 2 {
                return Err(SqlError::WrongArity("coaches", 2, values.len()));
            }
            let id = parse_ulid_expr(&values[0])?;
            let category = parse_category(&values[1])?;
            let price = if values.len() >= 3 {
                parse_i64_or_null(&values[2])?
            } else {
                None
            };
            let session_minutes = if values.len() >= 4 {
                parse_u32_or_null(&values[3])?
            } else {
                None
            };
            Ok(Command::InsertCoach {
                id,
                category,
                price,
                session_minutes,
            })
        }
        "calendar" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 2 {
                return Err(SqlError::WrongArity("calendar", 2, values.len()));
            }
            Ok(Command::OpenDate {
                coach_id: parse_ulid_expr(&values[0])?,
                date: parse_date(&values[1])?,
            })
        }
        "bookings" => {
            // One VALUES row per session; rows agree on booking identity.
            let rows = extract_all_insert_rows(insert)?;
            let first = &rows[0];
            if first.len() < 6 {
                return Err(SqlError::WrongArity("bookings", 6, first.len()));
            }
            let id = parse_ulid_expr(&first[0])?;
            let coach_id = parse_ulid_expr(&first[1])?;
            let client_id = parse_ulid_expr(&first[2])?;
            let payment_method = parse_payment(&first[5])?;

            let mut sessions = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 6 {
                    return Err(SqlError::WrongArity("bookings row", 6, row.len()));
                }
                if parse_ulid_expr(&row[0])? != id
                    || parse_ulid_expr(&row[1])? != coach_id
                    || parse_ulid_expr(&row[2])? != client_id
                    || parse_payment(&row[5])? != payment_method
                {
                    return Err(SqlError::Parse(format!(
                        "row {i}: booking rows must agree on id, coach, client and payment"
                    )));
                }
                sessions.push(SessionRequest {
                    date: parse_date(&row[3])?,
                    slot_label: parse_string(&row[4])?,
                });
            }
            Ok(Command::InsertBooking {
                id,
                coach_id,
                client_id,
                sessions,
                payment_method,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "coaches" => Ok(Command::DeleteCoach {
            id: extract_where_id(&delete.selection)?,
        }),
        "calendar" => {
            let mut filters = Vec::new();
            if let Some(sel) = &delete.selection {
                collect_eq_filters(sel, &mut filters);
            }
            Ok(Command::CloseDate {
                coach_id: parse_ulid_expr(required(&filters, "coach_id")?)?,
                date: parse_date(required(&filters, "date")?)?,
            })
        }
        "bookings" => Err(SqlError::Unsupported(
            "bookings are cancelled, not deleted".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;

    match name.as_str() {
        "coaches" => {
            let id = extract_where_id(selection)?;
            let mut price = None;
            let mut session_minutes = None;
            for a in assignments {
                match assignment_column(a).as_deref() {
                    Some("price") => price = Some(parse_i64_expr(&a.value)?),
                    Some("session_minutes") => session_minutes = Some(parse_u32(&a.value)?),
                    Some(other) => {
                        return Err(SqlError::Parse(format!(
                            "unknown column in UPDATE coaches: {other}"
                        )));
                    }
                    None => {
                        return Err(SqlError::Parse("unsupported assignment target".into()));
                    }
                }
            }
            if price.is_none() && session_minutes.is_none() {
                return Err(SqlError::Parse(
                    "UPDATE coaches requires SET price or session_minutes".into(),
                ));
            }
            Ok(Command::UpdateCoach {
                id,
                price,
                session_minutes,
            })
        }
        "bookings" => {
            let id = extract_where_id(selection)?;
            let mut to = None;
            let mut actor = None;
            for a in assignments {
                match assignment_column(a).as_deref() {
                    Some("status") => to = Some(parse_status(&a.value)?),
                    Some("actor") => actor = Some(parse_actor(&a.value)?),
                    Some(other) => {
                        return Err(SqlError::Parse(format!(
                            "unknown column in UPDATE bookings: {other}"
                        )));
                    }
                    None => {
                        return Err(SqlError::Parse("unsupported assignment target".into()));
                    }
                }
            }
            Ok(Command::UpdateBookingStatus {
                id,
                to: to.ok_or_else(|| {
                    SqlError::Parse("UPDATE bookings requires SET status".into())
                })?,
                actor: actor.ok_or_else(|| {
                    SqlError::Parse("UPDATE bookings requires SET actor".into())
                })?,
            })
        }
        _ => Err(SqlError::UnknownTable(name)),
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters);
    }

    match table.as_str() {
        "coaches" => Ok(Command::SelectCoaches),
        "open_days" => Ok(Command::SelectOpenDays {
            coach_id: parse_ulid_expr(required(&filters, "coach_id")?)?,
            year: i32::try_from(parse_i64_expr(required(&filters, "year")?)?)
                .map_err(|_| SqlError::Parse("year out of range".into()))?,
            month: parse_u32(required(&filters, "month")?)?,
        }),
        "slots" => Ok(Command::SelectSlots {
            coach_id: parse_ulid_expr(required(&filters, "coach_id")?)?,
            date: parse_date(required(&filters, "date")?)?,
        }),
        "next_session" => Ok(Command::SelectNextSession {
            client_id: parse_ulid_expr(required(&filters, "client_id")?)?,
        }),
        "bookings" => {
            if let Some(e) = find_filter(&filters, "id") {
                Ok(Command::SelectBooking {
                    id: parse_ulid_expr(e)?,
                })
            } else if let Some(e) = find_filter(&filters, "coach_id") {
                Ok(Command::SelectBookingsForCoach {
                    coach_id: parse_ulid_expr(e)?,
                })
            } else if let Some(e) = find_filter(&filters, "client_id") {
                let active_only = match find_filter(&filters, "active") {
                    Some(a) => parse_bool(a)?,
                    None => false,
                };
                Ok(Command::SelectBookingsForClient {
                    client_id: parse_ulid_expr(e)?,
                    active_only,
                })
            } else {
                Err(SqlError::MissingFilter("id, coach_id or client_id"))
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
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

fn assignment_column(a: &ast::Assignment) -> Option<String> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let rows = extract_all_insert_rows(insert)?;
    Ok(rows.into_iter().next().unwrap_or_default())
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

/// Collect `col = value` pairs joined by AND. Other operators are ignored.
fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out);
                collect_eq_filters(right, out);
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    out.push((col, (**right).clone()));
                }
            }
            _ => {}
        }
    }
}

fn find_filter<'a>(filters: &'a [(String, Expr)], col: &str) -> Option<&'a Expr> {
    filters.iter().find(|(c, _)| c == col).map(|(_, e)| e)
}

fn required<'a>(filters: &'a [(String, Expr)], col: &'static str) -> Result<&'a Expr, SqlError> {
    find_filter(filters, col).ok_or(SqlError::MissingFilter(col))
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let mut filters = Vec::new();
    collect_eq_filters(sel, &mut filters);
    parse_ulid_expr(required(&filters, "id")?)
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    Ok(Some(parse_i64_expr(expr)?))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    Ok(Some(parse_u32(expr)?))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    s.parse::<NaiveDate>()
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_category(expr: &Expr) -> Result<CoachCategory, SqlError> {
    let s = parse_string(expr)?;
    CoachCategory::from_label(&s).ok_or_else(|| SqlError::Parse(format!("bad category: {s}")))
}

fn parse_payment(expr: &Expr) -> Result<PaymentMethod, SqlError> {
    let s = parse_string(expr)?;
    PaymentMethod::from_label(&s).ok_or_else(|| SqlError::Parse(format!("bad payment method: {s}")))
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_string(expr)?;
    BookingStatus::from_label(&s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))
}

fn parse_actor(expr: &Expr) -> Result<Actor, SqlError> {
    let s = parse_string(expr)?;
    Actor::from_label(&s).ok_or_else(|| SqlError::Parse(format!("bad actor: {s}")))
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

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
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
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
