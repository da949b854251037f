//! Round trips against a real SQL Server. Skipped unless
//! `STORESYNC_TEST_MSSQL` is set; the `DB_*` variables must then point at a
//! reachable instance.

use figment::{Figment, providers::Env};
use serde_json::json;
use storesync::config::{self, Config};
use storesync::db::{ConnectionSettings, ConnectionState, DriverConnection, Engine, SqlParam};

fn live_config() -> Option<Config> {
    std::env::var_os("STORESYNC_TEST_MSSQL")?;
    let cfg = Config::from_sources(|prefix| match prefix {
        "APP_" => config::figment_from(json!({ "log_dir": std::env::temp_dir() })),
        other => Figment::from(Env::prefixed(other)),
    })
    .expect("DB_* variables describe a server");
    Some(cfg)
}

#[tokio::test]
async fn driver_connects_verifies_and_runs_procedures() {
    let Some(cfg) = live_config() else {
        return;
    };
    let settings = ConnectionSettings::from(&cfg.database);

    let mut conn = DriverConnection::connect(&settings).await.expect("connect");
    assert_eq!(conn.verify().await, ConnectionState::Verified);

    // A procedure that returns no result set still yields an (empty) table.
    let table = conn
        .exec_procedure(
            "sp_set_session_context",
            vec![SqlParam::from("storesync"), SqlParam::from("test")],
        )
        .await
        .expect("exec");
    assert!(table.is_empty());

    let table = conn
        .query("SELECT CAST(SESSION_CONTEXT(N'storesync') AS nvarchar(20)) AS v", vec![])
        .await
        .expect("query");
    assert_eq!(table.rows, [[json!("test")]]);

    conn.close().await.expect("close");
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(conn.query("SELECT 1", vec![]).await.is_err());
}

#[tokio::test]
async fn engine_session_runs_bound_queries() {
    let Some(cfg) = live_config() else {
        return;
    };
    let engine = Engine::from_settings(&ConnectionSettings::from(&cfg.database)).expect("engine");

    let mut session = engine.session().await.expect("session");
    let table = session
        .query("SELECT @P1 + 1 AS one", vec![SqlParam::Int(0)])
        .await
        .expect("query");
    assert_eq!(table.columns, ["one"]);
    assert_eq!(table.rows, [[json!(1)]]);

    session.dispose().await.expect("dispose");
}
