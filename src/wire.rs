use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

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
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SharedPasswordAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct RoomdHandler {
    engine: Engine,
    query_parser: Arc<RoomdQueryParser>,
}

impl RoomdHandler {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RoomdQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(
                observability::QUERIES_TOTAL,
                "command" => "unparsed",
                "status" => "error"
            )
            .increment(1);
            sql_err(e)
        })?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertBooking {
                resource_id,
                start,
                end,
                booker,
            } => {
                let booking = engine
                    .create_booking(resource_id, start, end, booker)
                    .await
                    .map_err(engine_err)?;
                self.booking_rows(vec![booking]).await
            }
            Command::CancelBooking { id } => {
                let booking = engine.cancel_booking(id).await.map_err(engine_err)?;
                self.booking_rows(vec![booking]).await
            }
            Command::SelectBookings { resource_id } => {
                let bookings = engine
                    .list_active_bookings(resource_id)
                    .await
                    .map_err(engine_err)?;
                self.booking_rows(bookings).await
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(id).await.map_err(engine_err)?;
                self.booking_rows(vec![booking]).await
            }
            Command::SelectResources => {
                let resources = engine.list_resources().await.map_err(engine_err)?;
                let schema = Arc::new(resource_schema());
                let rows: Vec<PgWireResult<_>> = resources
                    .iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                )))
            }
        }
    }

    async fn booking_rows(&self, bookings: Vec<Booking>) -> PgWireResult<Response> {
        let mut room_names: HashMap<ResourceId, String> = HashMap::new();
        for b in &bookings {
            if !room_names.contains_key(&b.resource_id) {
                let room = self
                    .engine
                    .get_resource(b.resource_id)
                    .await
                    .map_err(engine_err)?;
                room_names.insert(room.id, room.name);
            }
        }

        let schema = Arc::new(booking_schema());
        let rows: Vec<PgWireResult<_>> = bookings
            .iter()
            .map(|b| {
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&b.id.to_string())?;
                encoder.encode_field(&b.resource_id.to_string())?;
                encoder.encode_field(&room_names.get(&b.resource_id).cloned())?;
                encoder.encode_field(&b.span.start)?;
                encoder.encode_field(&b.span.end)?;
                encoder.encode_field(&b.status().as_str().to_string())?;
                encoder.encode_field(&b.booker)?;
                encoder.encode_field(&b.created_at)?;
                Ok(encoder.take_row())
            })
            .collect();
        Ok(Response::Query(QueryResponse::new(
            schema,
            stream::iter(rows),
        )))
    }
}

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("resource_id", Type::VARCHAR),
        text_field("resource_name", Type::VARCHAR),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
        text_field("status", Type::VARCHAR),
        text_field("booker", Type::VARCHAR),
        text_field("created_at", Type::INT8),
    ]
}

fn resource_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
    ]
}

/// Row shape of a statement, guessed from its text (parameters may still
/// be unbound).
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("BOOKINGS") {
        booking_schema()
    } else if upper.contains("RESOURCES") {
        resource_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomdHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomdQueryParser;

#[async_trait]
impl QueryParser for RoomdQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomdHandler {
    type Statement = String;
    type QueryParser = RoomdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&sql).await
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder outside quoted literals and identifiers.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '$') => {
                let mut digits = String::new();
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    digits.push(d);
                }
                if let Ok(n) = digits.parse::<usize>() {
                    max = max.max(n);
                }
            }
            (None, _) => {}
        }
    }
    max
}

/// Replace `$1, $2, ...` with bound text values as quoted literals, in one
/// pass over the statement. Placeholders inside quoted literals or
/// identifiers are left alone, and substituted text is never rescanned.
fn substitute_params(sql: &str, params: &[Option<bytes::Bytes>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut chars = sql.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '$') => {
                let digits_start = i + 1;
                let mut digits_end = digits_start;
                while let Some(&(j, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits_end = j + 1;
                    chars.next();
                }
                let param = sql[digits_start..digits_end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| params.get(n));
                match param {
                    Some(param) => result.push_str(&param_literal(param)),
                    None => result.push_str(&sql[i..digits_end]),
                }
                continue;
            }
            (None, _) => {}
        }
        result.push(c);
    }
    result
}

fn param_literal(param: &Option<bytes::Bytes>) -> String {
    match param {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomdFactory {
    handler: Arc<RoomdHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SharedPasswordAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomdFactory {
    pub fn new(engine: Engine, password: String) -> Self {
        let auth_source = SharedPasswordAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomdHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomdFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Engine,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(RoomdFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

/// SQLSTATE for each engine error kind.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidTimeRange(_) => "22023",
        EngineError::ResourceNotFound(_) => "42704",
        EngineError::BookingNotFound(_) => "P0002",
        EngineError::OverlapConflict(_) => "23P01",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::StoreUnavailable(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

/// SQLSTATE for a statement rejected before it reaches the engine.
/// Malformed ids share the engine's not-found codes.
pub fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::UnknownResource(_) => "42704",
        SqlError::UnknownBooking(_) => "P0002",
        _ => "42601",
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sql_sqlstate(&e).into(),
        e.to_string(),
    )))
}
