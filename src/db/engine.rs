use super::statement::{self, SqlParam, Statement, TvpRows};
use super::{ConnectionSettings, ConnectionState, ProcedureRunner, SqlClient, closed_error};
use crate::error::SyncError;
use crate::table::Table;
use std::time::Duration;
use tiberius::Config;
use tracing::{error, info, warn};

/// Connection-string based engine. Holds no connection itself; every
/// [`Engine::session`] opens a fresh one that the caller must dispose.
#[derive(Clone)]
pub struct Engine {
    config: Config,
    connect_timeout: Duration,
    label: String,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("label", &self.label)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn from_connection_string(
        connection_string: &str,
        connect_timeout: Duration,
    ) -> Result<Self, SyncError> {
        let config = Config::from_ado_string(connection_string)
            .inspect_err(|e| error!(error = %e, "invalid connection string"))?;
        Ok(Self {
            label: config.get_addr(),
            config,
            connect_timeout,
        })
    }

    pub fn from_settings(settings: &ConnectionSettings) -> Result<Self, SyncError> {
        Self::from_connection_string(&settings.connection_string()?, settings.connect_timeout)
    }

    pub async fn session(&self) -> Result<EngineSession, SyncError> {
        let client = super::connect(self.config.clone(), self.connect_timeout)
            .await
            .inspect_err(|e| error!(server = %self.label, error = %e, "failed to open engine session"))?;
        info!(server = %self.label, "engine session opened");
        Ok(EngineSession {
            client: Some(client),
            state: ConnectionState::Connected,
            label: self.label.clone(),
        })
    }
}

/// One engine connection. Call [`EngineSession::dispose`] when done;
/// dropping without it abandons the socket without a clean logout.
pub struct EngineSession {
    client: Option<SqlClient>,
    state: ConnectionState,
    label: String,
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("state", &self.state)
            .field("server", &self.label)
            .finish_non_exhaustive()
    }
}

impl EngineSession {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub async fn exec_procedure(
        &mut self,
        name: &str,
        params: Vec<SqlParam>,
    ) -> Result<Table, SyncError> {
        let stmt = statement::exec_positional(name, params)?;
        self.fetch(name, &stmt).await
    }

    /// `EXEC <name> @param = value, ...`
    pub async fn exec_procedure_named(
        &mut self,
        name: &str,
        params: Vec<(String, SqlParam)>,
    ) -> Result<Table, SyncError> {
        let stmt = statement::exec_named(name, params)?;
        self.fetch(name, &stmt).await
    }

    /// Pass `rows` as the table-valued parameter `@<param>` of user type
    /// `table_type`.
    pub async fn exec_procedure_tvp(
        &mut self,
        name: &str,
        param: &str,
        table_type: &str,
        rows: &TvpRows,
    ) -> Result<Table, SyncError> {
        let stmt = statement::exec_tvp(name, param, table_type, rows)
            .inspect_err(|e| error!(procedure = name, error = %e, "rejected table-valued call"))?;
        info!(procedure = name, rows = rows.rows.len(), "sending table-valued parameter");
        self.fetch(name, &stmt).await
    }

    /// Run an administrative cleanup procedure and report how many rows it
    /// touched. Procedures running with `SET NOCOUNT ON` report zero.
    pub async fn cleanup_duplicates(&mut self, name: &str) -> Result<u64, SyncError> {
        let stmt = statement::exec_positional(name, Vec::new())?;
        let client = self.client.as_mut().ok_or_else(closed_error)?;
        let affected = super::execute(client, &stmt)
            .await
            .inspect_err(|e| error!(procedure = name, error = %e, "duplicate cleanup failed"))?;
        info!(procedure = name, affected, "duplicate cleanup finished");
        Ok(affected)
    }

    pub async fn query(&mut self, sql: &str, params: Vec<SqlParam>) -> Result<Table, SyncError> {
        let stmt = Statement {
            sql: sql.to_string(),
            params,
        };
        let client = self.client.as_mut().ok_or_else(closed_error)?;
        super::fetch_table(client, &stmt)
            .await
            .inspect_err(|e| error!(error = %e, "query failed"))
    }

    /// Close the session. Safe to call more than once.
    pub async fn dispose(&mut self) -> Result<(), SyncError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        self.state = ConnectionState::Closed;
        match client.close().await {
            Ok(()) => {
                info!(server = %self.label, "engine session disposed");
                Ok(())
            }
            Err(e) => {
                warn!(server = %self.label, error = %e, "engine session did not close cleanly");
                Err(e.into())
            }
        }
    }

    async fn fetch(&mut self, name: &str, stmt: &Statement) -> Result<Table, SyncError> {
        let client = self.client.as_mut().ok_or_else(closed_error)?;
        super::fetch_table(client, stmt)
            .await
            .inspect(|t| info!(procedure = name, rows = t.len(), "stored procedure executed"))
            .inspect_err(|e| error!(procedure = name, error = %e, "stored procedure failed"))
    }
}

impl ProcedureRunner for EngineSession {
    async fn exec_procedure(
        &mut self,
        name: &str,
        params: Vec<SqlParam>,
    ) -> Result<Table, SyncError> {
        EngineSession::exec_procedure(self, name, params).await
    }

    async fn query(&mut self, sql: &str, params: Vec<SqlParam>) -> Result<Table, SyncError> {
        EngineSession::query(self, sql, params).await
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.dispose().await
    }
}
