use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tiberius::{AuthMethod, Client, ColumnData, FromSql};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;
use tracing::{debug, info};

use crate::config::LimsConnection;
use crate::error::WaphlError;
use crate::store;

/// Result set of a single query, every cell already rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LimsExport {
    pub columns: usize,
    pub rows: usize,
    pub output: String,
}

pub trait LimsClient: Send + Sync {
    fn query(&self, sql: &str) -> Result<QueryTable, WaphlError>;
}

/// SQL Server client driven from a private current-thread runtime.
pub struct TiberiusLimsClient {
    connection: LimsConnection,
}

impl TiberiusLimsClient {
    pub fn new(connection: LimsConnection) -> Self {
        Self { connection }
    }

    fn config(&self) -> tiberius::Config {
        let mut config = tiberius::Config::new();
        config.host(&self.connection.server.host);
        config.port(self.connection.server.port);
        config.authentication(AuthMethod::sql_server(
            &self.connection.user,
            self.connection.password(),
        ));
        config.trust_cert();
        config
    }

    async fn run_query(&self, sql: &str) -> Result<QueryTable, tiberius::error::Error> {
        let server = &self.connection.server;
        let tcp = TcpStream::connect((server.host.as_str(), server.port)).await?;
        tcp.set_nodelay(true)?;
        let mut client = Client::connect(self.config(), tcp.compat_write()).await?;
        debug!(server = %server, "connected to LIMS");

        let mut stream = client.simple_query(sql).await?;
        let columns = stream
            .columns()
            .await?
            .map(|columns| columns.iter().map(|column| column.name().to_string()).collect())
            .unwrap_or_default();
        let rows = stream
            .into_first_result()
            .await?
            .into_iter()
            .map(|row| row.into_iter().map(|cell| render_cell(&cell)).collect())
            .collect();
        Ok(QueryTable { columns, rows })
    }
}

impl LimsClient for TiberiusLimsClient {
    fn query(&self, sql: &str) -> Result<QueryTable, WaphlError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| WaphlError::Lims(err.to_string()))?;
        runtime
            .block_on(self.run_query(sql))
            .map_err(|err| WaphlError::Lims(err.to_string()))
    }
}

/// Text form of one cell; NULL becomes an empty field.
pub fn render_cell(cell: &ColumnData<'static>) -> String {
    fn text<T: ToString>(value: &Option<T>) -> String {
        value.as_ref().map(ToString::to_string).unwrap_or_default()
    }

    match cell {
        ColumnData::U8(value) => text(value),
        ColumnData::I16(value) => text(value),
        ColumnData::I32(value) => text(value),
        ColumnData::I64(value) => text(value),
        ColumnData::F32(value) => text(value),
        ColumnData::F64(value) => text(value),
        ColumnData::Bit(value) => text(value),
        ColumnData::String(value) => text(value),
        ColumnData::Guid(value) => text(value),
        ColumnData::Numeric(value) => text(value),
        ColumnData::Binary(value) => value
            .as_ref()
            .map(|bytes| bytes.iter().map(|byte| format!("{byte:02x}")).collect())
            .unwrap_or_default(),
        other => render_temporal(other).unwrap_or_else(|| format!("{other:?}")),
    }
}

fn render_temporal(cell: &ColumnData<'static>) -> Option<String> {
    if let ColumnData::DateTimeOffset(_) = cell {
        return DateTime::<FixedOffset>::from_sql(cell)
            .ok()
            .map(|value| text_or_empty(value.map(|at| at.to_rfc3339())));
    }
    if let Ok(value) = NaiveDateTime::from_sql(cell) {
        return Some(text_or_empty(value.map(|at| at.to_string())));
    }
    if let Ok(value) = NaiveDate::from_sql(cell) {
        return Some(text_or_empty(value.map(|day| day.to_string())));
    }
    NaiveTime::from_sql(cell)
        .ok()
        .map(|value| text_or_empty(value.map(|time| time.to_string())))
}

fn text_or_empty(value: Option<String>) -> String {
    value.unwrap_or_default()
}

pub fn render_csv(table: &QueryTable) -> Result<Vec<u8>, WaphlError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&table.columns)
        .map_err(|err| WaphlError::Table(err.to_string()))?;
    for row in &table.rows {
        writer
            .write_record(row)
            .map_err(|err| WaphlError::Table(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| WaphlError::Table(err.to_string()))
}

/// Runs `sql` and saves the result set as CSV at `output`.
pub fn export<C: LimsClient>(client: &C, sql: &str, output: &Path) -> Result<LimsExport, WaphlError> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(WaphlError::InvalidArgument("query is empty".to_string()));
    }
    let table = client.query(sql)?;
    store::write_bytes_atomic(output, &render_csv(&table)?)?;
    info!(rows = table.rows.len(), output = %output.display(), "query results saved");
    Ok(LimsExport {
        columns: table.columns.len(),
        rows: table.rows.len(),
        output: output.display().to_string(),
    })
}
