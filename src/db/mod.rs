//! SQL Server access.
//!
//! Layout:
//! - `statement.rs`: procedure-call SQL builders and bound parameters
//! - `value.rs`: result cell conversion
//! - `driver.rs`: one raw connection per job, verified right after connect
//! - `engine.rs`: connection-string engine handing out disposable sessions
//! - `queries.rs`: ad-hoc queries shared by jobs
//!
//! Both strategies implement [`ProcedureRunner`]; [`Database::open`] picks
//! one from configuration. Connections are never pooled or shared.

pub mod driver;
pub mod engine;
pub mod queries;
pub mod statement;
pub mod value;

pub use driver::DriverConnection;
pub use engine::{Engine, EngineSession};
pub use statement::{SqlParam, Statement, TvpRows};

use crate::config::{DatabaseConfig, DbStrategy};
use crate::error::SyncError;
use crate::table::Table;
use std::fmt;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Column, Config, SqlBrowser};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

pub type SqlClient = Client<Compat<TcpStream>>;

const APPLICATION_NAME: &str = "storesync";

/// Lifecycle of a connection. There is no way back from `Failed` or
/// `Closed`; a new connection must be opened instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Verified,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Connected | Self::Verified | Self::Failed)
    }
}

/// Everything needed to reach the database, derived from [`DatabaseConfig`].
#[derive(Clone)]
pub struct ConnectionSettings {
    pub server: String,
    pub instance: Option<String>,
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    pub password: String,
    pub trust_cert: bool,
    pub connect_timeout: Duration,
    pub strategy: DbStrategy,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("server", &self.server)
            .field("instance", &self.instance)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl From<&DatabaseConfig> for ConnectionSettings {
    fn from(cfg: &DatabaseConfig) -> Self {
        Self {
            server: cfg.server.clone(),
            instance: cfg.instance.clone(),
            port: cfg.port,
            database: cfg.name.clone(),
            user: cfg.user.clone(),
            password: cfg.password.clone(),
            trust_cert: cfg.trust_cert,
            connect_timeout: cfg.connect_timeout(),
            strategy: cfg.strategy,
        }
    }
}

impl ConnectionSettings {
    /// `host\instance` when an instance is configured.
    pub fn server_display(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{}\\{instance}", self.server),
            None => self.server.clone(),
        }
    }

    /// Client configuration for the driver strategy.
    pub fn client_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.server);
        if let Some(port) = self.port {
            config.port(port);
        }
        if let Some(instance) = &self.instance {
            config.instance_name(instance);
        }
        config.database(&self.database);
        config.application_name(APPLICATION_NAME);
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));
        if self.trust_cert {
            config.trust_cert();
        }
        config
    }

    /// ADO.NET connection string for the engine strategy.
    pub fn connection_string(&self) -> Result<String, SyncError> {
        let mut server = format!("tcp:{}", self.server_display());
        if let Some(port) = self.port {
            server.push_str(&format!(",{port}"));
        }
        Ok(format!(
            "server={};database={};user id={};password={};TrustServerCertificate={};Application Name={APPLICATION_NAME}",
            server,
            ado_value(&self.database)?,
            ado_value(&self.user)?,
            ado_value(&self.password)?,
            self.trust_cert,
        ))
    }
}

/// Common seam over both strategies.
#[allow(async_fn_in_trait)]
pub trait ProcedureRunner {
    /// `EXEC <name> @P1, ...`; a procedure without a result set yields an
    /// empty [`Table`].
    async fn exec_procedure(
        &mut self,
        name: &str,
        params: Vec<SqlParam>,
    ) -> Result<Table, SyncError>;

    /// Ad-hoc statement with bound `@Pn` values.
    async fn query(&mut self, sql: &str, params: Vec<SqlParam>) -> Result<Table, SyncError>;

    /// Release the connection. Further calls fail.
    async fn close(&mut self) -> Result<(), SyncError>;
}

/// The configured strategy behind one value.
#[derive(Debug)]
pub enum Database {
    Driver(DriverConnection),
    Engine(EngineSession),
}

impl Database {
    pub async fn open(settings: &ConnectionSettings) -> Result<Self, SyncError> {
        match settings.strategy {
            DbStrategy::Driver => {
                let mut conn = DriverConnection::connect(settings).await?;
                conn.verify().await;
                Ok(Self::Driver(conn))
            }
            DbStrategy::Engine => {
                let engine = Engine::from_settings(settings)?;
                Ok(Self::Engine(engine.session().await?))
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self {
            Self::Driver(conn) => conn.state(),
            Self::Engine(session) => session.state(),
        }
    }
}

impl ProcedureRunner for Database {
    async fn exec_procedure(
        &mut self,
        name: &str,
        params: Vec<SqlParam>,
    ) -> Result<Table, SyncError> {
        match self {
            Self::Driver(conn) => conn.exec_procedure(name, params).await,
            Self::Engine(session) => session.exec_procedure(name, params).await,
        }
    }

    async fn query(&mut self, sql: &str, params: Vec<SqlParam>) -> Result<Table, SyncError> {
        match self {
            Self::Driver(conn) => conn.query(sql, params).await,
            Self::Engine(session) => session.query(sql, params).await,
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        match self {
            Self::Driver(conn) => conn.close().await,
            Self::Engine(session) => session.close().await,
        }
    }
}

/// Open a TCP connection (resolving named instances through the SQL
/// Browser) and log in, all within `timeout`.
pub(crate) async fn connect(config: Config, timeout: Duration) -> Result<SqlClient, SyncError> {
    let addr = config.get_addr();
    let attempt = async {
        let tcp = TcpStream::connect_named(&config).await?;
        tcp.set_nodelay(true)?;
        Ok::<_, SyncError>(Client::connect(config, tcp.compat_write()).await?)
    };
    let client = tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| SyncError::ConnectTimeout(timeout.as_secs()))??;
    debug!(%addr, "database session established");
    Ok(client)
}

/// Run a statement and materialise its first result set.
pub(crate) async fn fetch_table(
    client: &mut SqlClient,
    statement: &Statement,
) -> Result<Table, SyncError> {
    let mut stream = statement.query().query(client).await?;
    let columns = stream.columns().await?.map(<[Column]>::to_vec);
    let rows = stream
        .into_first_result()
        .await?
        .into_iter()
        .map(value::row_values)
        .collect();
    let table = result_table(columns.as_deref(), rows);
    info!(rows = table.len(), columns = table.columns.len(), "statement returned");
    Ok(table)
}

/// `None` metadata means the statement sent no result set at all.
fn result_table(columns: Option<&[Column]>, rows: Vec<Vec<serde_json::Value>>) -> Table {
    let names = columns.map(|cols| cols.iter().map(|c| c.name().to_string()).collect());
    Table::from_parts(names, rows)
}

/// Run a statement for its side effects. Returns the affected-row total.
pub(crate) async fn execute(client: &mut SqlClient, statement: &Statement) -> Result<u64, SyncError> {
    Ok(statement.query().execute(client).await?.total())
}

pub(crate) fn closed_error() -> SyncError {
    SyncError::Unexpected("database connection is already closed".to_string())
}

fn ado_value(value: &str) -> Result<String, SyncError> {
    let needs_escape = value.is_empty()
        || value.starts_with(' ')
        || value.ends_with(' ')
        || value
            .chars()
            .any(|c| matches!(c, ';' | '=' | '\'' | '"' | '{' | '}'));
    if !needs_escape {
        return Ok(value.to_string());
    }
    if value.contains('}') || !value.is_ascii() {
        return Err(SyncError::validation(
            "connection string values cannot contain '}' together with other separators",
        ));
    }
    Ok(format!("{{{value}}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            server: "10.0.0.5".into(),
            instance: Some("SQLEXPRESS".into()),
            port: None,
            database: "Inventory".into(),
            user: "sync".into(),
            password: "p;ss".into(),
            trust_cert: true,
            connect_timeout: Duration::from_secs(30),
            strategy: DbStrategy::Engine,
        }
    }

    #[test]
    fn connection_string_escapes_separators() {
        let s = settings().connection_string().unwrap();
        assert!(s.starts_with("server=tcp:10.0.0.5\\SQLEXPRESS;"));
        assert!(s.contains("password={p;ss};"));
        assert!(s.contains("TrustServerCertificate=true"));
    }

    #[test]
    fn connection_string_parses_back() {
        let mut settings = settings();
        settings.port = Some(1433);
        settings.instance = None;
        let config = Config::from_ado_string(&settings.connection_string().unwrap()).unwrap();
        assert_eq!(config.get_addr(), "10.0.0.5:1433");
    }

    #[test]
    fn debug_hides_password() {
        assert!(!format!("{:?}", settings()).contains("p;ss"));
    }

    #[test]
    fn procedure_without_result_set_gives_empty_table() {
        let table = result_table(None, Vec::new());
        assert!(table.is_empty());
        assert!(table.columns.is_empty());
    }

    #[test]
    fn result_set_keeps_column_names_and_rows() {
        let columns = [
            Column::new("sku".to_string(), tiberius::ColumnType::NVarchar),
            Column::new("qty".to_string(), tiberius::ColumnType::Int4),
        ];
        let table = result_table(
            Some(&columns),
            vec![vec![serde_json::json!("A-1"), serde_json::json!(4)]],
        );
        assert_eq!(table.columns, ["sku", "qty"]);
        assert_eq!(table.len(), 1);

        // Metadata with no rows is still an empty table.
        assert!(result_table(Some(&columns), Vec::new()).is_empty());
    }

    #[test]
    fn open_states() {
        assert!(!ConnectionState::Unconnected.is_open());
        assert!(ConnectionState::Failed.is_open());
        assert!(!ConnectionState::Closed.is_open());
    }
}
