//! Warn-and-above journal in SQLite.
//!
//! Each row is attributed to the connection and message type it concerns,
//! read from the event or from the closest enclosing span. The server opens a
//! `connection` span per socket and a `frame` span per dispatched frame, and
//! records `message_type` on the frame span once the frame parses.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS journal (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        conn_id TEXT,
        message_type TEXT,
        error_kind TEXT,
        fields TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_journal_conn ON journal(conn_id);
    CREATE INDEX IF NOT EXISTS idx_journal_kind ON journal(error_kind);";

/// SQLite file holding the journal.
pub struct WarnJournal {
    conn: Mutex<Connection>,
}

impl WarnJournal {
    /// Open or create the journal, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn append(&self, entry: &Entry) {
        let conn = self.conn.lock();
        let written = conn.execute(
            "INSERT INTO journal
                 (timestamp, level, target, message, conn_id, message_type, error_kind, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Utc::now().to_rfc3339(),
                entry.level.to_string(),
                entry.target,
                entry.fields.message,
                entry.fields.attribution.conn_id,
                entry.fields.attribution.message_type,
                entry.fields.error_kind,
                entry.extra_json(),
            ],
        );
        // Logging from inside the subscriber would recurse.
        if let Err(e) = written {
            eprintln!("iris-telemetry: journal write failed: {e}");
        }
    }
}

struct Entry<'a> {
    level: Level,
    target: &'a str,
    fields: HubFields,
}

impl Entry<'_> {
    fn extra_json(&self) -> Option<String> {
        if self.fields.extra.is_empty() {
            return None;
        }
        serde_json::to_string(&self.fields.extra).ok()
    }
}

/// Which connection and message a record concerns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Attribution {
    conn_id: Option<String>,
    message_type: Option<String>,
}

impl Attribution {
    fn is_empty(&self) -> bool {
        self.conn_id.is_none() && self.message_type.is_none()
    }

    fn is_complete(&self) -> bool {
        self.conn_id.is_some() && self.message_type.is_some()
    }

    /// Take values from `other` only where this one has none.
    fn inherit(&mut self, other: &Attribution) {
        if self.conn_id.is_none() {
            self.conn_id.clone_from(&other.conn_id);
        }
        if self.message_type.is_none() {
            self.message_type.clone_from(&other.message_type);
        }
    }

    /// Take every value `other` has, replacing ours.
    fn overwrite(&mut self, other: Attribution) {
        if other.conn_id.is_some() {
            self.conn_id = other.conn_id;
        }
        if other.message_type.is_some() {
            self.message_type = other.message_type;
        }
    }
}

/// Fields of one event or span, split into the columns the journal indexes
/// and everything else.
#[derive(Default)]
struct HubFields {
    message: String,
    error_kind: Option<String>,
    attribution: Attribution,
    extra: Map<String, Value>,
}

impl HubFields {
    fn text(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = value,
            "conn_id" => self.attribution.conn_id = Some(value),
            "message_type" => self.attribution.message_type = Some(value),
            "error_kind" => self.error_kind = Some(value),
            _ => {
                let _ = self.extra.insert(name.to_owned(), Value::String(value));
            }
        }
    }

    fn value(&mut self, field: &Field, value: Value) {
        let _ = self.extra.insert(field.name().to_owned(), value);
    }
}

impl Visit for HubFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.text(field.name(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field.name(), value.to_owned());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.value(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.value(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.value(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.value(field, Value::Number(n));
        }
    }
}

/// `tracing` layer feeding the [`WarnJournal`].
pub struct JournalLayer {
    journal: Arc<WarnJournal>,
}

impl JournalLayer {
    pub fn new(journal: Arc<WarnJournal>) -> Self {
        Self { journal }
    }
}

impl<S> Layer<S> for JournalLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut fields = HubFields::default();
        attrs.record(&mut fields);
        if fields.attribution.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields.attribution);
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut fields = HubFields::default();
        values.record(&mut fields);
        if fields.attribution.is_empty() {
            return;
        }
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<Attribution>() {
            Some(existing) => existing.overwrite(fields.attribution),
            None => extensions.insert(fields.attribution),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut fields = HubFields::default();
        event.record(&mut fields);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if fields.attribution.is_complete() {
                    break;
                }
                if let Some(inherited) = span.extensions().get::<Attribution>() {
                    fields.attribution.inherit(inherited);
                }
            }
        }

        self.journal.append(&Entry {
            level,
            target: event.metadata().target(),
            fields,
        });
    }
}
