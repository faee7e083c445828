use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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

use crate::auth::TarmacAuthSource;
use crate::engine::{Engine, EngineError};
use crate::limits::{DEFAULT_BUFFER_MIN, DEFAULT_LEAD_MIN, DEFAULT_STEP_MIN};
use crate::model::*;
use crate::observability;
use crate::school::SchoolRegistry;
use crate::sql::{self, Command};

pub struct TarmacHandler {
    schools: Arc<SchoolRegistry>,
    query_parser: Arc<TarmacQueryParser>,
}

fn now_min() -> Minutes {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as Minutes
        / 60
}

impl TarmacHandler {
    pub fn new(schools: Arc<SchoolRegistry>) -> Self {
        Self {
            schools,
            query_parser: Arc::new(TarmacQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.schools.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("school error: {e}"),
            )))
        })
    }

    async fn run_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(engine, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertInstructor {
                id,
                name,
                buffer_min,
                step_min,
                lead_min,
            } => {
                engine
                    .register_instructor(
                        id,
                        name,
                        buffer_min.unwrap_or(DEFAULT_BUFFER_MIN),
                        step_min.unwrap_or(DEFAULT_STEP_MIN),
                        lead_min.unwrap_or(DEFAULT_LEAD_MIN),
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateInstructor {
                id,
                name,
                buffer_min,
                step_min,
                lead_min,
            } => {
                engine
                    .update_instructor(id, name, buffer_min, step_min, lead_min)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteInstructor { id } => {
                engine.remove_instructor(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertWeeklyRule {
                id,
                instructor_id,
                weekday,
                start,
                end,
            } => {
                engine
                    .add_weekly_rule(id, instructor_id, weekday, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateWeeklyRule {
                id,
                weekday,
                start,
                end,
            } => {
                engine
                    .update_weekly_rule(id, weekday, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteWeeklyRule { id } => {
                engine.remove_weekly_rule(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertTimeOff {
                id,
                instructor_id,
                first_day,
                last_day,
                hours,
            } => {
                engine
                    .add_time_off(id, instructor_id, first_day, last_day, hours)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteTimeOff { id } => {
                engine.remove_time_off(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertOverride {
                id,
                instructor_id,
                day,
                start,
                end,
                polarity,
            } => {
                engine
                    .add_override(id, instructor_id, day, start, end, polarity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteOverride { id } => {
                engine.remove_override(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertReservation {
                id,
                instructor_id,
                student_id,
                start,
                duration_min,
            } => {
                engine
                    .book_reservation(id, instructor_id, student_id, start, duration_min)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateReservationStatus { id, status } => {
                match status {
                    ReservationStatus::Confirmed => {
                        engine.confirm_reservation(id).await.map_err(engine_err)?
                    }
                    ReservationStatus::Completed => {
                        engine.complete_reservation(id).await.map_err(engine_err)?
                    }
                    ReservationStatus::Cancelled => {
                        engine.cancel_reservation(id).await.map_err(engine_err)?
                    }
                    ReservationStatus::Pending => {
                        return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                            "ERROR".into(),
                            "22023".into(),
                            "no transition targets PENDING".into(),
                        ))));
                    }
                };
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            // Logical delete: cancellation; the row survives with status CANCELLED.
            Command::DeleteReservation { id } => {
                engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectInstructors => {
                let schema = Arc::new(instructor_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_instructors()
                    .await
                    .into_iter()
                    .map(|i| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&i.id.to_string())?;
                        encoder.encode_field(&i.name)?;
                        encoder.encode_field(&i.buffer_min)?;
                        encoder.encode_field(&i.step_min)?;
                        encoder.encode_field(&i.lead_min)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectWeeklyRules { instructor_id } => {
                let rules = engine
                    .get_weekly_rules(instructor_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(rule_schema());
                let rows: Vec<PgWireResult<_>> = rules
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.instructor_id.to_string())?;
                        encoder.encode_field(&(r.weekday as i64))?;
                        encoder.encode_field(&r.start)?;
                        encoder.encode_field(&r.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectTimeOff { instructor_id } => {
                let entries = engine.get_time_off(instructor_id).await.map_err(engine_err)?;
                let schema = Arc::new(time_off_schema());
                let rows: Vec<PgWireResult<_>> = entries
                    .into_iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&t.id.to_string())?;
                        encoder.encode_field(&t.instructor_id.to_string())?;
                        encoder.encode_field(&t.first_day)?;
                        encoder.encode_field(&t.last_day)?;
                        encoder.encode_field(&t.hours.map(|h| h.0))?;
                        encoder.encode_field(&t.hours.map(|h| h.1))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectOverrides { instructor_id } => {
                let entries = engine
                    .get_overrides(instructor_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(override_schema());
                let rows: Vec<PgWireResult<_>> = entries
                    .into_iter()
                    .map(|o| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&o.id.to_string())?;
                        encoder.encode_field(&o.instructor_id.to_string())?;
                        encoder.encode_field(&o.day)?;
                        encoder.encode_field(&o.start)?;
                        encoder.encode_field(&o.end)?;
                        encoder.encode_field(&o.polarity.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectReservations { instructor_id } => {
                let reservations = engine
                    .get_reservations(instructor_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(reservation_schema());
                let rows: Vec<PgWireResult<_>> = reservations
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.instructor_id.to_string())?;
                        encoder.encode_field(&r.student_id.to_string())?;
                        encoder.encode_field(&r.start)?;
                        encoder.encode_field(&r.end)?;
                        encoder.encode_field(&r.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability { instructor_id, day } => {
                let windows = engine
                    .open_windows(instructor_id, day)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![window_rows(instructor_id, windows)])
            }
            Command::SelectSlots {
                instructor_id,
                day,
                duration_min,
                now,
            } => {
                let now = now.unwrap_or_else(now_min);
                let slots = engine
                    .compute_slots(instructor_id, day, duration_min, now)
                    .await
                    .map_err(engine_err)?;
                let windows = slots
                    .into_iter()
                    .map(|s| Window::new(s.start, s.end))
                    .collect();
                Ok(vec![window_rows(instructor_id, windows)])
            }
        }
    }
}

fn window_rows<'a>(instructor_id: ulid::Ulid, windows: Vec<Window>) -> Response<'a> {
    let schema = Arc::new(window_schema());
    let id_str = instructor_id.to_string();
    let rows: Vec<PgWireResult<_>> = windows
        .into_iter()
        .map(|w| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&id_str)?;
            encoder.encode_field(&w.start)?;
            encoder.encode_field(&w.end)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn window_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new(
            "instructor_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn instructor_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("name".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("buffer_min".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("step_min".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("lead_min".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn rule_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "instructor_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("weekday".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn time_off_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "instructor_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("first_day".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("last_day".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn override_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "instructor_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("day".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("polarity".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "instructor_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "student_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

/// Result schema for a statement, keyed on the relation it reads.
fn schema_for_statement(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("SLOTS") || upper.contains("AVAILABILITY") {
        window_schema()
    } else if upper.contains("RESERVATIONS") {
        reservation_schema()
    } else if upper.contains("SCHEDULE_RULES") {
        rule_schema()
    } else if upper.contains("TIME_OFF") {
        time_off_schema()
    } else if upper.contains("OVERRIDES") {
        override_schema()
    } else if upper.contains("INSTRUCTORS") {
        instructor_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for TarmacHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TarmacQueryParser;

#[async_trait]
impl QueryParser for TarmacQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
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
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TarmacHandler {
    type Statement = String;
    type QueryParser = TarmacQueryParser;

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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run_command(&engine, cmd).await?;
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
            schema_for_statement(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max {
                    max = n;
                }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TarmacFactory {
    handler: Arc<TarmacHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<TarmacAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TarmacFactory {
    pub fn new(schools: Arc<SchoolRegistry>, password: String) -> Self {
        let auth_source = TarmacAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(TarmacHandler::new(schools)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TarmacFactory {
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

/// Serve one pgwire connection until the client disconnects.
pub async fn process_connection(
    socket: TcpStream,
    schools: Arc<SchoolRegistry>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(TarmacFactory::new(schools, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    // 23P01 (exclusion violation) carries the SLOT_ALREADY_BOOKED message;
    // 55P03 marks the transient lock-timeout case as retryable.
    let code = match &e {
        EngineError::SlotConflict(_) => "23P01",
        EngineError::Timeout => "55P03",
        EngineError::NotFound(_) => "P0002",
        EngineError::InvalidInput(_) | EngineError::InvalidTransition { .. } => "22023",
        _ => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
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
