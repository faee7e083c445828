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
    InsertInstructor {
        id: Ulid,
        name: Option<String>,
        buffer_min: Option<Minutes>,
        step_min: Option<Minutes>,
        lead_min: Option<Minutes>,
    },
    UpdateInstructor {
        id: Ulid,
        name: Option<Option<String>>,
        buffer_min: Option<Minutes>,
        step_min: Option<Minutes>,
        lead_min: Option<Minutes>,
    },
    DeleteInstructor {
        id: Ulid,
    },
    InsertWeeklyRule {
        id: Ulid,
        instructor_id: Ulid,
        weekday: u8,
        start: Minutes,
        end: Minutes,
    },
    UpdateWeeklyRule {
        id: Ulid,
        weekday: Option<u8>,
        start: Option<Minutes>,
        end: Option<Minutes>,
    },
    DeleteWeeklyRule {
        id: Ulid,
    },
    InsertTimeOff {
        id: Ulid,
        instructor_id: Ulid,
        first_day: Day,
        last_day: Day,
        hours: Option<(Minutes, Minutes)>,
    },
    DeleteTimeOff {
        id: Ulid,
    },
    InsertOverride {
        id: Ulid,
        instructor_id: Ulid,
        day: Day,
        start: Minutes,
        end: Minutes,
        polarity: Polarity,
    },
    DeleteOverride {
        id: Ulid,
    },
    InsertReservation {
        id: Ulid,
        instructor_id: Ulid,
        student_id: Ulid,
        start: Minutes,
        duration_min: Minutes,
    },
    UpdateReservationStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectInstructors,
    SelectWeeklyRules {
        instructor_id: Ulid,
    },
    SelectTimeOff {
        instructor_id: Ulid,
    },
    SelectOverrides {
        instructor_id: Ulid,
    },
    SelectReservations {
        instructor_id: Ulid,
    },
    SelectAvailability {
        instructor_id: Ulid,
        day: Day,
    },
    SelectSlots {
        instructor_id: Ulid,
        day: Day,
        duration_min: Minutes,
        now: Option<Minutes>,
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
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "instructors" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("instructors", 1, 0));
            }
            let id = parse_ulid(&values[0])?;
            let name = if values.len() >= 2 {
                parse_string_or_null(&values[1])?
            } else {
                None
            };
            let buffer_min = if values.len() >= 3 {
                parse_i64_or_null(&values[2])?
            } else {
                None
            };
            let step_min = if values.len() >= 4 {
                parse_i64_or_null(&values[3])?
            } else {
                None
            };
            let lead_min = if values.len() >= 5 {
                parse_i64_or_null(&values[4])?
            } else {
                None
            };
            Ok(Command::InsertInstructor {
                id,
                name,
                buffer_min,
                step_min,
                lead_min,
            })
        }
        "schedule_rules" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("schedule_rules", 5, values.len()));
            }
            Ok(Command::InsertWeeklyRule {
                id: parse_ulid(&values[0])?,
                instructor_id: parse_ulid(&values[1])?,
                weekday: parse_u8(&values[2])?,
                start: parse_i64(&values[3])?,
                end: parse_i64(&values[4])?,
            })
        }
        "time_off" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("time_off", 4, values.len()));
            }
            let hours = if values.len() >= 6 {
                match (parse_i64_or_null(&values[4])?, parse_i64_or_null(&values[5])?) {
                    (Some(s), Some(e)) => Some((s, e)),
                    (None, None) => None,
                    _ => {
                        return Err(SqlError::Parse(
                            "time_off start/end must both be set or both NULL".into(),
                        ));
                    }
                }
            } else {
                None
            };
            Ok(Command::InsertTimeOff {
                id: parse_ulid(&values[0])?,
                instructor_id: parse_ulid(&values[1])?,
                first_day: parse_i64(&values[2])?,
                last_day: parse_i64(&values[3])?,
                hours,
            })
        }
        "overrides" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("overrides", 6, values.len()));
            }
            Ok(Command::InsertOverride {
                id: parse_ulid(&values[0])?,
                instructor_id: parse_ulid(&values[1])?,
                day: parse_i64(&values[2])?,
                start: parse_i64(&values[3])?,
                end: parse_i64(&values[4])?,
                polarity: parse_polarity(&values[5])?,
            })
        }
        "reservations" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("reservations", 5, values.len()));
            }
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                instructor_id: parse_ulid(&values[1])?,
                student_id: parse_ulid(&values[2])?,
                start: parse_i64(&values[3])?,
                duration_min: parse_i64(&values[4])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "instructors" => Ok(Command::DeleteInstructor { id }),
        "schedule_rules" => Ok(Command::DeleteWeeklyRule { id }),
        "time_off" => Ok(Command::DeleteTimeOff { id }),
        "overrides" => Ok(Command::DeleteOverride { id }),
        // Logical delete: cancels the reservation, the row remains.
        "reservations" => Ok(Command::DeleteReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "instructors" => {
            let mut name = None;
            let mut buffer_min = None;
            let mut step_min = None;
            let mut lead_min = None;
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "name" => name = Some(parse_string_or_null(&a.value)?),
                    "buffer_min" => buffer_min = Some(parse_i64(&a.value)?),
                    "step_min" => step_min = Some(parse_i64(&a.value)?),
                    "lead_min" => lead_min = Some(parse_i64(&a.value)?),
                    col => return Err(SqlError::Parse(format!("unknown column: {col}"))),
                }
            }
            Ok(Command::UpdateInstructor {
                id,
                name,
                buffer_min,
                step_min,
                lead_min,
            })
        }
        "schedule_rules" => {
            let mut weekday = None;
            let mut start = None;
            let mut end = None;
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "weekday" => weekday = Some(parse_u8(&a.value)?),
                    "start" => start = Some(parse_i64(&a.value)?),
                    "end" => end = Some(parse_i64(&a.value)?),
                    col => return Err(SqlError::Parse(format!("unknown column: {col}"))),
                }
            }
            Ok(Command::UpdateWeeklyRule {
                id,
                weekday,
                start,
                end,
            })
        }
        "reservations" => {
            // Only the status column is assignable.
            let mut status = None;
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "status" => status = Some(parse_status(&a.value)?),
                    col => return Err(SqlError::Parse(format!("unknown column: {col}"))),
                }
            }
            let status = status.ok_or(SqlError::MissingFilter("status"))?;
            Ok(Command::UpdateReservationStatus { id, status })
        }
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

    if table == "instructors" {
        return Ok(Command::SelectInstructors);
    }

    let (mut instructor_id, mut day, mut duration, mut now) = (None, None, None, None);
    if let Some(selection) = &select.selection {
        extract_select_filters(selection, &mut instructor_id, &mut day, &mut duration, &mut now)?;
    }
    let instructor_id = instructor_id.ok_or(SqlError::MissingFilter("instructor_id"))?;

    match table.as_str() {
        "schedule_rules" => Ok(Command::SelectWeeklyRules { instructor_id }),
        "time_off" => Ok(Command::SelectTimeOff { instructor_id }),
        "overrides" => Ok(Command::SelectOverrides { instructor_id }),
        "reservations" => Ok(Command::SelectReservations { instructor_id }),
        "availability" => Ok(Command::SelectAvailability {
            instructor_id,
            day: day.ok_or(SqlError::MissingFilter("day"))?,
        }),
        "slots" => Ok(Command::SelectSlots {
            instructor_id,
            day: day.ok_or(SqlError::MissingFilter("day"))?,
            duration_min: duration.ok_or(SqlError::MissingFilter("duration"))?,
            now,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_select_filters(
    expr: &Expr,
    instructor_id: &mut Option<Ulid>,
    day: &mut Option<Day>,
    duration: &mut Option<Minutes>,
    now: &mut Option<Minutes>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_select_filters(left, instructor_id, day, duration, now)?;
                extract_select_filters(right, instructor_id, day, duration, now)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("instructor_id") => *instructor_id = Some(parse_ulid(right)?),
                Some("day") => *day = Some(parse_i64(right)?),
                Some("duration") => *duration = Some(parse_i64(right)?),
                Some("now") => *now = Some(parse_i64(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
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

fn assignment_column(a: &ast::Assignment) -> Result<String, SqlError> {
    match &a.target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
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

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
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
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            _ => Ok(Some(parse_i64(expr)?)),
        }
    } else {
        Ok(Some(parse_i64(expr)?))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) => Ok(Some(s.clone())),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_polarity(expr: &Expr) -> Result<Polarity, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        Polarity::parse(s).ok_or_else(|| SqlError::Parse(format!("bad polarity: {s}")))
    } else {
        Err(SqlError::Parse(format!(
            "expected 'ADD' or 'REMOVE', got {expr:?}"
        )))
    }
}

fn parse_status(expr: &Expr) -> Result<ReservationStatus, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        ReservationStatus::parse(s).ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))
    } else {
        Err(SqlError::Parse(format!("expected status string, got {expr:?}")))
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

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_instructor_minimal() {
        let sql = format!("INSERT INTO instructors (id) VALUES ('{ID}')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertInstructor {
                id,
                name,
                buffer_min,
                step_min,
                lead_min,
            } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(name, None);
                assert_eq!(buffer_min, None);
                assert_eq!(step_min, None);
                assert_eq!(lead_min, None);
            }
            _ => panic!("expected InsertInstructor, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_instructor_full() {
        let sql = format!(
            "INSERT INTO instructors (id, name, buffer_min, step_min, lead_min) VALUES ('{ID}', 'Jo', 10, 15, 120)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertInstructor {
                name,
                buffer_min,
                step_min,
                lead_min,
                ..
            } => {
                assert_eq!(name.as_deref(), Some("Jo"));
                assert_eq!(buffer_min, Some(10));
                assert_eq!(step_min, Some(15));
                assert_eq!(lead_min, Some(120));
            }
            _ => panic!("expected InsertInstructor, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_instructor_null_name() {
        let sql = format!("INSERT INTO instructors (id, name) VALUES ('{ID}', NULL)");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertInstructor { name, .. } => assert_eq!(name, None),
            _ => panic!("expected InsertInstructor, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_instructor_partial() {
        let sql = format!("UPDATE instructors SET buffer_min = 15 WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateInstructor {
                name,
                buffer_min,
                step_min,
                lead_min,
                ..
            } => {
                assert_eq!(name, None);
                assert_eq!(buffer_min, Some(15));
                assert_eq!(step_min, None);
                assert_eq!(lead_min, None);
            }
            _ => panic!("expected UpdateInstructor, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_instructor() {
        let sql = format!("DELETE FROM instructors WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::DeleteInstructor { .. }));
    }

    #[test]
    fn parse_insert_schedule_rule() {
        let sql = format!(
            r#"INSERT INTO schedule_rules (id, instructor_id, weekday, start, "end") VALUES ('{ID}', '{ID}', 0, 480, 720)"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertWeeklyRule {
                weekday,
                start,
                end,
                ..
            } => {
                assert_eq!(weekday, 0);
                assert_eq!(start, 480);
                assert_eq!(end, 720);
            }
            _ => panic!("expected InsertWeeklyRule, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_schedule_rule() {
        let sql = format!(r#"UPDATE schedule_rules SET start = 540, "end" = 780 WHERE id = '{ID}'"#);
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateWeeklyRule {
                weekday,
                start,
                end,
                ..
            } => {
                assert_eq!(weekday, None);
                assert_eq!(start, Some(540));
                assert_eq!(end, Some(780));
            }
            _ => panic!("expected UpdateWeeklyRule, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_time_off_full_day() {
        let sql =
            format!("INSERT INTO time_off (id, instructor_id, first_day, last_day) VALUES ('{ID}', '{ID}', 20000, 20002)");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertTimeOff {
                first_day,
                last_day,
                hours,
                ..
            } => {
                assert_eq!(first_day, 20000);
                assert_eq!(last_day, 20002);
                assert_eq!(hours, None);
            }
            _ => panic!("expected InsertTimeOff, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_time_off_partial_day() {
        let sql = format!(
            r#"INSERT INTO time_off (id, instructor_id, first_day, last_day, start, "end") VALUES ('{ID}', '{ID}', 20000, 20000, 540, 720)"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertTimeOff { hours, .. } => assert_eq!(hours, Some((540, 720))),
            _ => panic!("expected InsertTimeOff, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_time_off_half_null_hours_rejected() {
        let sql = format!(
            r#"INSERT INTO time_off (id, instructor_id, first_day, last_day, start, "end") VALUES ('{ID}', '{ID}', 20000, 20000, 540, NULL)"#
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_override() {
        let sql = format!(
            r#"INSERT INTO overrides (id, instructor_id, day, start, "end", polarity) VALUES ('{ID}', '{ID}', 20000, 540, 780, 'ADD')"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertOverride { day, polarity, .. } => {
                assert_eq!(day, 20000);
                assert_eq!(polarity, Polarity::Add);
            }
            _ => panic!("expected InsertOverride, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_override_bad_polarity() {
        let sql = format!(
            r#"INSERT INTO overrides (id, instructor_id, day, start, "end", polarity) VALUES ('{ID}', '{ID}', 20000, 540, 780, 'MAYBE')"#
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = format!(
            "INSERT INTO reservations (id, instructor_id, student_id, start, duration) VALUES ('{ID}', '{ID}', '{ID}', 28800480, 60)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertReservation {
                start,
                duration_min,
                ..
            } => {
                assert_eq!(start, 28800480);
                assert_eq!(duration_min, 60);
            }
            _ => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_reservation_status() {
        let sql = format!("UPDATE reservations SET status = 'CONFIRMED' WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateReservationStatus { status, .. } => {
                assert_eq!(status, ReservationStatus::Confirmed);
            }
            _ => panic!("expected UpdateReservationStatus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_reservation_bad_status() {
        let sql = format!("UPDATE reservations SET status = 'PAID' WHERE id = '{ID}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_delete_reservation() {
        let sql = format!("DELETE FROM reservations WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::DeleteReservation { .. }));
    }

    #[test]
    fn parse_select_instructors() {
        let cmd = parse_sql("SELECT * FROM instructors").unwrap();
        assert_eq!(cmd, Command::SelectInstructors);
    }

    #[test]
    fn parse_select_reservations() {
        let sql = format!("SELECT * FROM reservations WHERE instructor_id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::SelectReservations { .. }));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!("SELECT * FROM availability WHERE instructor_id = '{ID}' AND day = 20000");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability {
                instructor_id,
                day,
            } => {
                assert_eq!(instructor_id.to_string(), ID);
                assert_eq!(day, 20000);
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_day() {
        let sql = format!("SELECT * FROM availability WHERE instructor_id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("day"))));
    }

    #[test]
    fn parse_select_slots() {
        let sql = format!(
            "SELECT * FROM slots WHERE instructor_id = '{ID}' AND day = 20000 AND duration = 60"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectSlots {
                day,
                duration_min,
                now,
                ..
            } => {
                assert_eq!(day, 20000);
                assert_eq!(duration_min, 60);
                assert_eq!(now, None);
            }
            _ => panic!("expected SelectSlots, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_slots_with_now() {
        let sql = format!(
            "SELECT * FROM slots WHERE instructor_id = '{ID}' AND day = 20000 AND duration = 45 AND now = 28800000"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectSlots { now, .. } => assert_eq!(now, Some(28800000)),
            _ => panic!("expected SelectSlots, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_slots_missing_duration() {
        let sql = format!("SELECT * FROM slots WHERE instructor_id = '{ID}' AND day = 20000");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("duration"))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
