//! PostgreSQL v3 wire protocol, hand-rolled on tokio. The connection
//! task owns both halves of the socket so NOTIFY events can be pushed
//! to idle clients between queries.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::{Decoder, FramedRead};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, ErrorKind};
use crate::limits::{
    MAX_PREPARED_STATEMENTS, MAX_SQL_LEN, MAX_SUBSCRIPTIONS_PER_CONN, MAX_WIRE_FRAME_BYTES,
};
use crate::model::{Booking, Event};
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

const PROTOCOL_VERSION: i32 = 196608; // 3.0
const SSL_REQUEST: i32 = 80877103;
const CANCEL_REQUEST: i32 = 80877102;
const GSSENC_REQUEST: i32 = 80877104;

// Type OIDs for RowDescription.
const OID_BOOL: i32 = 16;
const OID_INT8: i32 = 20;
const OID_VARCHAR: i32 = 1043;

/// Serve one client connection to completion. Handles the SSLRequest
/// dance, startup, cleartext auth, then the query loop.
pub async fn process_connection(
    mut socket: TcpStream,
    tenants: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    loop {
        let (code, payload) = read_initial_message(&mut socket).await?;
        match code {
            SSL_REQUEST => match &tls {
                Some(acceptor) => {
                    socket.write_all(b"S").await?;
                    let mut stream = acceptor.accept(socket).await?;
                    let (code, payload) = read_initial_message(&mut stream).await?;
                    if code != PROTOCOL_VERSION {
                        return Err(protocol_error("expected startup after TLS handshake"));
                    }
                    return serve(stream, payload, tenants, password).await;
                }
                None => socket.write_all(b"N").await?,
            },
            GSSENC_REQUEST => socket.write_all(b"N").await?,
            // No query cancellation; the peer just reconnects.
            CANCEL_REQUEST => return Ok(()),
            PROTOCOL_VERSION => return serve(socket, payload, tenants, password).await,
            other => return Err(protocol_error(&format!("unknown startup code {other}"))),
        }
    }
}

async fn read_initial_message<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> io::Result<(i32, BytesMut)> {
    let len = stream.read_u32().await? as usize;
    if !(8..=MAX_WIRE_FRAME_BYTES).contains(&len) {
        return Err(protocol_error(&format!("bad startup length {len}")));
    }
    let code = stream.read_i32().await?;
    let mut payload = BytesMut::zeroed(len - 8);
    stream.read_exact(&mut payload).await?;
    Ok((code, payload))
}

fn protocol_error(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

// ── Frame codec ──────────────────────────────────────────────

struct WireFrame {
    tag: u8,
    payload: Bytes,
}

struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = WireFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireFrame>, io::Error> {
        if src.len() < 5 {
            return Ok(None);
        }
        let tag = src[0];
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len < 4 || len > MAX_WIRE_FRAME_BYTES {
            return Err(protocol_error(&format!("bad frame length {len}")));
        }
        if src.len() < len + 1 {
            src.reserve(len + 1 - src.len());
            return Ok(None);
        }
        src.advance(1);
        let mut frame = src.split_to(len);
        frame.advance(4);
        Ok(Some(WireFrame {
            tag,
            payload: frame.freeze(),
        }))
    }
}

// ── Message writer ───────────────────────────────────────────

/// Buffers outbound frames and flushes them in one write, the same
/// group-flush shape the WAL writer uses.
struct MessageWriter<S> {
    w: WriteHalf<S>,
    buf: BytesMut,
    scratch: BytesMut,
}

impl<S> MessageWriter<S> {
    fn new(w: WriteHalf<S>) -> Self {
        Self {
            w,
            buf: BytesMut::with_capacity(8 * 1024),
            scratch: BytesMut::new(),
        }
    }

    fn msg(&mut self, tag: u8, build: impl FnOnce(&mut BytesMut)) {
        self.scratch.clear();
        build(&mut self.scratch);
        self.buf.put_u8(tag);
        self.buf.put_u32((self.scratch.len() + 4) as u32);
        self.buf.put_slice(&self.scratch);
    }

    fn error_response(&mut self, sqlstate: &str, message: &str) {
        self.msg(b'E', |b| {
            b.put_u8(b'S');
            put_cstr(b, "ERROR");
            b.put_u8(b'V');
            put_cstr(b, "ERROR");
            b.put_u8(b'C');
            put_cstr(b, sqlstate);
            b.put_u8(b'M');
            put_cstr(b, message);
            b.put_u8(0);
        });
    }

    fn ready_for_query(&mut self) {
        self.msg(b'Z', |b| b.put_u8(b'I'));
    }

    fn command_complete(&mut self, tag: &str) {
        self.msg(b'C', |b| put_cstr(b, tag));
    }

    fn row_description(&mut self, fields: &[WireField]) {
        self.msg(b'T', |b| {
            b.put_i16(fields.len() as i16);
            for f in fields {
                put_cstr(b, f.name);
                b.put_i32(0); // table oid
                b.put_i16(0); // column attr
                b.put_i32(f.oid);
                b.put_i16(f.size);
                b.put_i32(-1); // type modifier
                b.put_i16(0); // text format
            }
        });
    }

    fn data_row(&mut self, values: &[Option<String>]) {
        self.msg(b'D', |b| {
            b.put_i16(values.len() as i16);
            for v in values {
                match v {
                    Some(text) => {
                        b.put_i32(text.len() as i32);
                        b.put_slice(text.as_bytes());
                    }
                    None => b.put_i32(-1),
                }
            }
        });
    }

    fn notification(&mut self, channel: &str, event: &Event) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        self.msg(b'A', |b| {
            b.put_i32(std::process::id() as i32);
            put_cstr(b, channel);
            put_cstr(b, &payload);
        });
    }

    fn parameter_status(&mut self, key: &str, value: &str) {
        self.msg(b'S', |b| {
            put_cstr(b, key);
            put_cstr(b, value);
        });
    }
}

impl<S: AsyncWrite> MessageWriter<S> {
    async fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.w.write_all(&self.buf).await?;
            self.buf.clear();
        }
        Ok(())
    }
}

fn put_cstr(b: &mut BytesMut, s: &str) {
    b.put_slice(s.as_bytes());
    b.put_u8(0);
}

fn read_cstr(b: &mut Bytes) -> io::Result<String> {
    let end = b
        .iter()
        .position(|&c| c == 0)
        .ok_or_else(|| protocol_error("unterminated string"))?;
    let s = String::from_utf8_lossy(&b[..end]).into_owned();
    b.advance(end + 1);
    Ok(s)
}

fn read_u8(b: &mut Bytes) -> io::Result<u8> {
    if b.remaining() < 1 {
        return Err(protocol_error("truncated message"));
    }
    Ok(b.get_u8())
}

fn read_i16(b: &mut Bytes) -> io::Result<i16> {
    if b.remaining() < 2 {
        return Err(protocol_error("truncated message"));
    }
    Ok(b.get_i16())
}

fn read_i32(b: &mut Bytes) -> io::Result<i32> {
    if b.remaining() < 4 {
        return Err(protocol_error("truncated message"));
    }
    Ok(b.get_i32())
}

// ── Result schemas ───────────────────────────────────────────

struct WireField {
    name: &'static str,
    oid: i32,
    size: i16,
}

const fn varchar(name: &'static str) -> WireField {
    WireField {
        name,
        oid: OID_VARCHAR,
        size: -1,
    }
}

const fn int8(name: &'static str) -> WireField {
    WireField {
        name,
        oid: OID_INT8,
        size: 8,
    }
}

const COACHES_SCHEMA: &[WireField] = &[
    varchar("id"),
    varchar("category"),
    int8("price"),
    int8("session_minutes"),
];

const OPEN_DAYS_SCHEMA: &[WireField] = &[varchar("coach_id"), varchar("date")];

const SLOTS_SCHEMA: &[WireField] = &[
    varchar("label"),
    int8("start_minute"),
    int8("end_minute"),
    WireField {
        name: "taken",
        oid: OID_BOOL,
        size: 1,
    },
];

const BOOKINGS_SCHEMA: &[WireField] = &[
    varchar("id"),
    varchar("coach_id"),
    varchar("client_id"),
    varchar("date"),
    varchar("slot"),
    int8("duration_minutes"),
    int8("total_price"),
    varchar("payment_method"),
    varchar("status"),
    int8("created_at"),
    varchar("approved_by"),
    int8("started_at"),
    int8("completed_at"),
];

const NEXT_SESSION_SCHEMA: &[WireField] = &[
    varchar("booking_id"),
    varchar("coach_id"),
    varchar("date"),
    varchar("slot"),
    int8("duration_minutes"),
];

fn schema_for(cmd: &Command) -> Option<&'static [WireField]> {
    match cmd {
        Command::SelectCoaches => Some(COACHES_SCHEMA),
        Command::SelectOpenDays { .. } => Some(OPEN_DAYS_SCHEMA),
        Command::SelectSlots { .. } => Some(SLOTS_SCHEMA),
        Command::SelectBooking { .. }
        | Command::SelectBookingsForCoach { .. }
        | Command::SelectBookingsForClient { .. } => Some(BOOKINGS_SCHEMA),
        Command::SelectNextSession { .. } => Some(NEXT_SESSION_SCHEMA),
        _ => None,
    }
}

/// One row per session, booking fields repeated, mirroring the INSERT
/// shape.
fn booking_rows(bookings: &[Booking]) -> Vec<Vec<Option<String>>> {
    let mut rows = Vec::new();
    for b in bookings {
        for s in &b.sessions {
            rows.push(vec![
                Some(b.id.to_string()),
                Some(b.coach_id.to_string()),
                Some(b.client_id.to_string()),
                Some(s.date.to_string()),
                Some(s.slot_label.clone()),
                Some(s.duration_minutes.to_string()),
                Some(b.total_price.to_string()),
                Some(b.payment_method.label().to_string()),
                Some(b.status.label().to_string()),
                Some(b.created_at.to_string()),
                b.approved_by.map(|a| a.label().to_string()),
                b.started_at.map(|t| t.to_string()),
                b.completed_at.map(|t| t.to_string()),
            ]);
        }
    }
    rows
}

// ── Connection state ─────────────────────────────────────────

struct ConnState {
    engine: Arc<Engine>,
    /// Prepared statement name -> SQL text.
    statements: HashMap<String, String>,
    /// Portal name -> SQL text with parameters substituted.
    portals: HashMap<String, String>,
    /// LISTEN channel -> forwarder task feeding `note_tx`.
    subscriptions: HashMap<String, JoinHandle<()>>,
    note_tx: mpsc::UnboundedSender<(String, Event)>,
    /// After an extended-protocol error, discard until Sync.
    ignore_till_sync: bool,
}

impl ConnState {
    fn subscribe(&mut self, channel: &str) -> Result<(), WireError> {
        if self.subscriptions.contains_key(channel) {
            return Ok(()); // duplicate LISTEN is a no-op
        }
        if self.subscriptions.len() >= MAX_SUBSCRIPTIONS_PER_CONN {
            return Err(WireError::new("54000", "too many LISTEN subscriptions"));
        }
        validate_channel(channel)?;
        let mut rx = self.engine.notify.subscribe(channel);
        let tx = self.note_tx.clone();
        let name = channel.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send((name.clone(), event)).is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("listener on {name} lagged, dropped {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.subscriptions.insert(channel.to_string(), handle);
        Ok(())
    }

    fn unsubscribe(&mut self, channel: Option<&str>) {
        match channel {
            Some(name) => {
                if let Some(handle) = self.subscriptions.remove(name) {
                    handle.abort();
                }
            }
            None => {
                for (_, handle) in self.subscriptions.drain() {
                    handle.abort();
                }
            }
        }
    }
}

fn validate_channel(channel: &str) -> Result<(), WireError> {
    let id = channel
        .strip_prefix("coach_")
        .or_else(|| channel.strip_prefix("client_"))
        .ok_or_else(|| {
            WireError::new(
                "42000",
                &format!("invalid channel: {channel} (expected coach_{{id}} or client_{{id}})"),
            )
        })?;
    Ulid::from_string(id)
        .map_err(|e| WireError::new("42000", &format!("bad ULID in channel: {e}")))?;
    Ok(())
}

// ── Error mapping ────────────────────────────────────────────

struct WireError {
    sqlstate: &'static str,
    message: String,
}

impl WireError {
    fn new(sqlstate: &'static str, message: &str) -> Self {
        Self {
            sqlstate,
            message: message.to_string(),
        }
    }
}

impl From<EngineError> for WireError {
    fn from(e: EngineError) -> Self {
        let sqlstate = match e.kind() {
            ErrorKind::Conflict => "23505",
            ErrorKind::Transition => "55000",
            ErrorKind::Store => "58030",
            ErrorKind::Selection | ErrorKind::Validation => "P0001",
        };
        Self {
            sqlstate,
            message: e.to_string(),
        }
    }
}

impl From<SqlError> for WireError {
    fn from(e: SqlError) -> Self {
        Self {
            sqlstate: "42601",
            message: e.to_string(),
        }
    }
}

// ── Session ──────────────────────────────────────────────────

async fn serve<S>(
    stream: S,
    startup: BytesMut,
    tenants: Arc<TenantManager>,
    password: String,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let params = parse_startup_params(startup.freeze())?;
    let user = params.get("user").cloned().unwrap_or_default();
    let database = params
        .get("database")
        .cloned()
        .unwrap_or_else(|| user.clone());

    let (r, w) = tokio::io::split(stream);
    let mut frames = FramedRead::new(r, FrameCodec);
    let mut out = MessageWriter::new(w);

    // AuthenticationCleartextPassword
    out.msg(b'R', |b| b.put_i32(3));
    out.flush().await?;

    let Some(frame) = frames.next().await.transpose()? else {
        return Ok(());
    };
    if frame.tag != b'p' {
        return Err(protocol_error("expected password message"));
    }
    let mut payload = frame.payload;
    let supplied = read_cstr(&mut payload)?;
    if supplied != password {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        out.error_response(
            "28P01",
            &format!("password authentication failed for user \"{user}\""),
        );
        out.flush().await?;
        return Ok(());
    }

    let engine = match tenants.get_or_create(&database) {
        Ok(engine) => engine,
        Err(e) => {
            out.error_response("08006", &format!("tenant error: {e}"));
            out.flush().await?;
            return Ok(());
        }
    };

    // AuthenticationOk and session preamble
    out.msg(b'R', |b| b.put_i32(0));
    out.parameter_status("server_version", "16.0");
    out.parameter_status("client_encoding", "UTF8");
    out.parameter_status("DateStyle", "ISO");
    out.parameter_status("integer_datetimes", "on");
    out.parameter_status("standard_conforming_strings", "on");
    out.msg(b'K', |b| {
        b.put_i32(std::process::id() as i32);
        b.put_i32(Ulid::new().0 as i32);
    });
    out.ready_for_query();
    out.flush().await?;

    let (note_tx, mut note_rx) = mpsc::unbounded_channel();
    let mut conn = ConnState {
        engine,
        statements: HashMap::new(),
        portals: HashMap::new(),
        subscriptions: HashMap::new(),
        note_tx,
        ignore_till_sync: false,
    };

    let result = loop {
        tokio::select! {
            maybe = frames.next() => match maybe {
                None => break Ok(()),
                Some(Err(e)) => break Err(e),
                Some(Ok(frame)) => {
                    match handle_frame(&mut conn, frame, &mut out).await {
                        Ok(true) => out.flush().await?,
                        Ok(false) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
            },
            Some((channel, event)) = note_rx.recv() => {
                out.notification(&channel, &event);
                out.flush().await?;
            }
        }
    };

    conn.unsubscribe(None);
    result
}

fn parse_startup_params(mut payload: Bytes) -> io::Result<HashMap<String, String>> {
    let mut params = HashMap::new();
    loop {
        if payload.is_empty() || payload[0] == 0 {
            break;
        }
        let key = read_cstr(&mut payload)?;
        let value = read_cstr(&mut payload)?;
        params.insert(key, value);
    }
    Ok(params)
}

/// Returns false when the client sent Terminate.
async fn handle_frame<S: AsyncWrite>(
    conn: &mut ConnState,
    frame: WireFrame,
    out: &mut MessageWriter<S>,
) -> io::Result<bool> {
    if conn.ignore_till_sync && frame.tag != b'S' && frame.tag != b'X' {
        return Ok(true);
    }
    match frame.tag {
        b'Q' => handle_simple_query(conn, frame.payload, out).await?,
        b'P' => handle_parse(conn, frame.payload, out)?,
        b'B' => handle_bind(conn, frame.payload, out)?,
        b'D' => handle_describe(conn, frame.payload, out)?,
        b'E' => handle_execute(conn, frame.payload, out).await?,
        b'C' => handle_close(conn, frame.payload, out)?,
        b'H' => out.flush().await?,
        b'S' => {
            conn.ignore_till_sync = false;
            out.ready_for_query();
        }
        b'X' => return Ok(false),
        other => {
            out.error_response("08P01", &format!("unexpected message type {}", other as char));
        }
    }
    Ok(true)
}

async fn handle_simple_query<S>(
    conn: &mut ConnState,
    mut payload: Bytes,
    out: &mut MessageWriter<S>,
) -> io::Result<()> {
    let sql = read_cstr(&mut payload)?;
    if sql.trim().trim_matches(';').is_empty() {
        out.msg(b'I', |_| {});
        out.ready_for_query();
        return Ok(());
    }
    if let Err(e) = run_query(conn, &sql, out, true).await {
        out.error_response(e.sqlstate, &e.message);
    }
    out.ready_for_query();
    Ok(())
}

/// Parse, dispatch and encode one statement. `describe_rows` adds the
/// RowDescription for the simple protocol; extended clients get it from
/// Describe instead.
async fn run_query<S>(
    conn: &mut ConnState,
    sql: &str,
    out: &mut MessageWriter<S>,
    describe_rows: bool,
) -> Result<(), WireError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(WireError::new("54000", "statement too long"));
    }
    let cmd = sql::parse_sql(sql)?;
    let label = observability::command_label(&cmd);
    let start = std::time::Instant::now();
    let result = dispatch(conn, cmd, out, describe_rows).await;
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
        .increment(1);
    metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
        .record(start.elapsed().as_secs_f64());
    result
}

async fn dispatch<S>(
    conn: &mut ConnState,
    cmd: Command,
    out: &mut MessageWriter<S>,
    describe_rows: bool,
) -> Result<(), WireError> {
    let engine = conn.engine.clone();
    match cmd {
        Command::InsertCoach {
            id,
            category,
            price,
            session_minutes,
        } => {
            engine
                .register_coach(id, category, price, session_minutes)
                .await?;
            out.command_complete("INSERT 0 1");
        }
        Command::UpdateCoach {
            id,
            price,
            session_minutes,
        } => {
            engine.update_coach(id, price, session_minutes).await?;
            out.command_complete("UPDATE 1");
        }
        Command::DeleteCoach { id } => {
            engine.remove_coach(id).await?;
            out.command_complete("DELETE 1");
        }
        Command::OpenDate { coach_id, date } => {
            engine.open_date(coach_id, date).await?;
            out.command_complete("INSERT 0 1");
        }
        Command::CloseDate { coach_id, date } => {
            engine.close_date(coach_id, date).await?;
            out.command_complete("DELETE 1");
        }
        Command::InsertBooking {
            id,
            coach_id,
            client_id,
            sessions,
            payment_method,
        } => {
            let count = sessions.len();
            engine
                .create_booking(id, coach_id, client_id, sessions, payment_method)
                .await?;
            out.command_complete(&format!("INSERT 0 {count}"));
        }
        Command::UpdateBookingStatus { id, to, actor } => {
            engine.transition_booking(id, to, actor).await?;
            out.command_complete("UPDATE 1");
        }
        Command::SelectCoaches => {
            let rows: Vec<Vec<Option<String>>> = engine
                .list_coaches()
                .into_iter()
                .map(|c| {
                    vec![
                        Some(c.id.to_string()),
                        Some(c.category.label().to_string()),
                        Some(c.price_per_session.to_string()),
                        Some(c.session_minutes.to_string()),
                    ]
                })
                .collect();
            send_rows(out, COACHES_SCHEMA, rows, describe_rows);
        }
        Command::SelectOpenDays {
            coach_id,
            year,
            month,
        } => {
            let days = engine.open_days(coach_id, year, month).await?;
            let rows: Vec<Vec<Option<String>>> = days
                .into_iter()
                .map(|d| vec![Some(coach_id.to_string()), Some(d.to_string())])
                .collect();
            send_rows(out, OPEN_DAYS_SCHEMA, rows, describe_rows);
        }
        Command::SelectSlots { coach_id, date } => {
            let slots = engine.day_slots(coach_id, date).await?;
            let rows: Vec<Vec<Option<String>>> = slots
                .into_iter()
                .map(|s| {
                    vec![
                        Some(s.label.to_string()),
                        Some(s.start_minute.to_string()),
                        Some(s.end_minute.to_string()),
                        Some(if s.taken { "t" } else { "f" }.to_string()),
                    ]
                })
                .collect();
            send_rows(out, SLOTS_SCHEMA, rows, describe_rows);
        }
        Command::SelectBooking { id } => {
            let booking = engine.get_booking(id).await?;
            send_rows(out, BOOKINGS_SCHEMA, booking_rows(&[booking]), describe_rows);
        }
        Command::SelectBookingsForCoach { coach_id } => {
            let bookings = engine.bookings_for_coach(coach_id).await?;
            send_rows(out, BOOKINGS_SCHEMA, booking_rows(&bookings), describe_rows);
        }
        Command::SelectBookingsForClient {
            client_id,
            active_only,
        } => {
            let bookings = engine.bookings_for_client(client_id, active_only).await;
            send_rows(out, BOOKINGS_SCHEMA, booking_rows(&bookings), describe_rows);
        }
        Command::SelectNextSession { client_id } => {
            let rows: Vec<Vec<Option<String>>> = engine
                .next_session(client_id)
                .await
                .into_iter()
                .map(|s| {
                    vec![
                        Some(s.booking_id.to_string()),
                        Some(s.coach_id.to_string()),
                        Some(s.date.to_string()),
                        Some(s.slot_label.clone()),
                        Some(s.duration_minutes.to_string()),
                    ]
                })
                .collect();
            send_rows(out, NEXT_SESSION_SCHEMA, rows, describe_rows);
        }
        Command::Listen { channel } => {
            conn.subscribe(&channel)?;
            out.command_complete("LISTEN");
        }
        Command::Unlisten { channel } => {
            conn.unsubscribe(channel.as_deref());
            out.command_complete("UNLISTEN");
        }
    }
    Ok(())
}

fn send_rows<S>(
    out: &mut MessageWriter<S>,
    schema: &[WireField],
    rows: Vec<Vec<Option<String>>>,
    describe_rows: bool,
) {
    if describe_rows {
        out.row_description(schema);
    }
    let count = rows.len();
    for row in &rows {
        out.data_row(row);
    }
    out.command_complete(&format!("SELECT {count}"));
}

// ── Extended protocol ────────────────────────────────────────

fn handle_parse<S>(
    conn: &mut ConnState,
    mut payload: Bytes,
    out: &mut MessageWriter<S>,
) -> io::Result<()> {
    let name = read_cstr(&mut payload)?;
    let sql = read_cstr(&mut payload)?;
    if conn.statements.len() >= MAX_PREPARED_STATEMENTS && !conn.statements.contains_key(&name) {
        out.error_response("54000", "too many prepared statements");
        conn.ignore_till_sync = true;
        return Ok(());
    }
    conn.statements.insert(name, sql);
    out.msg(b'1', |_| {}); // ParseComplete
    Ok(())
}

fn handle_bind<S>(
    conn: &mut ConnState,
    mut payload: Bytes,
    out: &mut MessageWriter<S>,
) -> io::Result<()> {
    let portal = read_cstr(&mut payload)?;
    let statement = read_cstr(&mut payload)?;

    let Some(sql) = conn.statements.get(&statement).cloned() else {
        out.error_response("26000", &format!("unknown statement: {statement:?}"));
        conn.ignore_till_sync = true;
        return Ok(());
    };

    let nformats = read_i16(&mut payload)?;
    let mut all_text = true;
    for _ in 0..nformats {
        if read_i16(&mut payload)? != 0 {
            all_text = false;
        }
    }
    if !all_text {
        out.error_response("0A000", "binary parameter format not supported");
        conn.ignore_till_sync = true;
        return Ok(());
    }

    let nparams = read_i16(&mut payload)?;
    let mut params = Vec::with_capacity(nparams.max(0) as usize);
    for _ in 0..nparams {
        let len = read_i32(&mut payload)?;
        if len < 0 {
            params.push(None);
        } else {
            let len = len as usize;
            if payload.remaining() < len {
                return Err(protocol_error("truncated parameter"));
            }
            params.push(Some(payload.split_to(len).to_vec()));
        }
    }

    conn.portals.insert(portal, substitute_params(&sql, &params));
    out.msg(b'2', |_| {}); // BindComplete
    Ok(())
}

fn handle_describe<S>(
    conn: &mut ConnState,
    mut payload: Bytes,
    out: &mut MessageWriter<S>,
) -> io::Result<()> {
    let kind = read_u8(&mut payload)?;
    let name = read_cstr(&mut payload)?;
    match kind {
        b'S' => {
            let Some(sql) = conn.statements.get(&name) else {
                out.error_response("26000", &format!("unknown statement: {name:?}"));
                conn.ignore_till_sync = true;
                return Ok(());
            };
            let nparams = count_params(sql);
            out.msg(b't', |b| {
                b.put_i16(nparams as i16);
                for _ in 0..nparams {
                    b.put_i32(OID_VARCHAR);
                }
            });
            describe_statement_rows(sql, out);
        }
        b'P' => {
            let Some(sql) = conn.portals.get(&name) else {
                out.error_response("34000", &format!("unknown portal: {name:?}"));
                conn.ignore_till_sync = true;
                return Ok(());
            };
            describe_statement_rows(sql, out);
        }
        other => {
            out.error_response("08P01", &format!("bad describe kind {}", other as char));
            conn.ignore_till_sync = true;
        }
    }
    Ok(())
}

fn describe_statement_rows<S>(sql: &str, out: &mut MessageWriter<S>) {
    match sql::parse_sql(sql).ok().as_ref().and_then(schema_for) {
        Some(schema) => out.row_description(schema),
        None => out.msg(b'n', |_| {}), // NoData
    }
}

async fn handle_execute<S>(
    conn: &mut ConnState,
    mut payload: Bytes,
    out: &mut MessageWriter<S>,
) -> io::Result<()> {
    let portal = read_cstr(&mut payload)?;
    let Some(sql) = conn.portals.get(&portal).cloned() else {
        out.error_response("34000", &format!("unknown portal: {portal:?}"));
        conn.ignore_till_sync = true;
        return Ok(());
    };
    if let Err(e) = run_query(conn, &sql, out, false).await {
        out.error_response(e.sqlstate, &e.message);
        conn.ignore_till_sync = true;
    }
    Ok(())
}

fn handle_close<S>(
    conn: &mut ConnState,
    mut payload: Bytes,
    out: &mut MessageWriter<S>,
) -> io::Result<()> {
    let kind = read_u8(&mut payload)?;
    let name = read_cstr(&mut payload)?;
    match kind {
        b'S' => {
            conn.statements.remove(&name);
        }
        b'P' => {
            conn.portals.remove(&name);
        }
        _ => {}
    }
    out.msg(b'3', |_| {}); // CloseComplete
    Ok(())
}

/// Highest $N placeholder in the SQL string.
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
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values
/// (text format).
fn substitute_params(sql: &str, params: &[Option<Vec<u8>>]) -> String {
    let mut result = sql.to_string();
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
