use super::statement::{self, SqlParam, Statement};
use super::{ConnectionSettings, ConnectionState, ProcedureRunner, SqlClient, closed_error};
use crate::error::SyncError;
use crate::table::Table;
use tracing::{error, info};

/// A single raw client connection, opened with a fixed connect timeout.
///
/// The caller owns the lifecycle: every path that connects must call
/// [`DriverConnection::close`], including the error paths.
pub struct DriverConnection {
    client: Option<SqlClient>,
    state: ConnectionState,
    server: String,
    database: String,
}

impl std::fmt::Debug for DriverConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverConnection")
            .field("state", &self.state)
            .field("server", &self.server)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl DriverConnection {
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self, SyncError> {
        let server = settings.server_display();
        let client = super::connect(settings.client_config(), settings.connect_timeout)
            .await
            .inspect_err(|e| {
                error!(server = %server, database = %settings.database, error = %e, "failed to connect to the database")
            })?;
        info!(server = %server, database = %settings.database, "connected to the database");
        Ok(Self {
            client: Some(client),
            state: ConnectionState::Connected,
            server,
            database: settings.database.clone(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run `SELECT 1` and record the outcome. Never fails: the result is
    /// logged and reflected in [`Self::state`].
    pub async fn verify(&mut self) -> ConnectionState {
        let outcome = match self.client.as_mut() {
            Some(client) => match client.simple_query("SELECT 1").await {
                Ok(stream) => stream.into_row().await.map(|_| ()),
                Err(e) => Err(e),
            },
            None => {
                error!(server = %self.server, "cannot verify a closed connection");
                return self.state;
            }
        };

        self.state = match outcome {
            Ok(()) => {
                info!(server = %self.server, database = %self.database, "connection verified");
                ConnectionState::Verified
            }
            Err(e) => {
                error!(server = %self.server, database = %self.database, error = %e, "connection check failed");
                ConnectionState::Failed
            }
        };
        self.state
    }

    pub async fn exec_procedure(
        &mut self,
        name: &str,
        params: Vec<SqlParam>,
    ) -> Result<Table, SyncError> {
        let stmt = statement::exec_positional(name, params)
            .inspect_err(|e| error!(procedure = name, error = %e, "rejected procedure call"))?;
        self.run(&stmt)
            .await
            .inspect(|t| info!(procedure = name, rows = t.len(), "stored procedure executed"))
            .inspect_err(|e| error!(procedure = name, error = %e, "stored procedure failed"))
    }

    pub async fn query(&mut self, sql: &str, params: Vec<SqlParam>) -> Result<Table, SyncError> {
        let stmt = Statement {
            sql: sql.to_string(),
            params,
        };
        self.run(&stmt)
            .await
            .inspect_err(|e| error!(error = %e, "query failed"))
    }

    pub async fn close(&mut self) -> Result<(), SyncError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        self.state = ConnectionState::Closed;
        client.close().await?;
        info!(server = %self.server, "database connection closed");
        Ok(())
    }

    async fn run(&mut self, stmt: &Statement) -> Result<Table, SyncError> {
        let client = self.client.as_mut().ok_or_else(closed_error)?;
        super::fetch_table(client, stmt).await
    }
}

impl ProcedureRunner for DriverConnection {
    async fn exec_procedure(
        &mut self,
        name: &str,
        params: Vec<SqlParam>,
    ) -> Result<Table, SyncError> {
        DriverConnection::exec_procedure(self, name, params).await
    }

    async fn query(&mut self, sql: &str, params: Vec<SqlParam>) -> Result<Table, SyncError> {
        DriverConnection::query(self, sql, params).await
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        DriverConnection::close(self).await
    }
}
