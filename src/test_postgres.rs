//! PostgreSQL test infrastructure.
//!
//! A single PostgreSQL container is started on first use and kept for the test run.
//! Each test creates its own database on it.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Once, OnceLock};

use postgres::{Client, NoTls};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

/// Mapped port of the shared container, set once it has started
static POSTGRES_PORT: AtomicU16 = AtomicU16::new(0);

static POSTGRES_INIT: Once = Once::new();

/// Runtime that owns the container for the lifetime of the test binary
static TOKIO_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

/// Default credentials for testcontainers-modules postgres
const PG_USER: &str = "postgres";
const PG_PASSWORD: &str = "postgres";
const PG_DB: &str = "postgres";

fn ensure_postgres_started() {
    POSTGRES_INIT.call_once(|| {
        let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

        let port = rt.block_on(async {
            let container = Postgres::default()
                .start()
                .await
                .expect("failed to start postgres container");

            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("failed to get postgres port");

            // keep the container running until the process exits
            std::mem::forget(container);

            port
        });

        POSTGRES_PORT.store(port, Ordering::SeqCst);
        let _ = TOKIO_RT.set(rt);
    });
}

fn url_with_db(db: &str) -> String {
    ensure_postgres_started();
    format!(
        "postgres://{}:{}@127.0.0.1:{}/{}",
        PG_USER,
        PG_PASSWORD,
        POSTGRES_PORT.load(Ordering::SeqCst),
        db
    )
}

/// Create a database with a unique name and return a URL pointing at it, with the name.
pub fn fresh_postgres_db() -> (String, String) {
    let mut admin =
        Client::connect(&url_with_db(PG_DB), NoTls).expect("failed to connect as admin");

    // lowercase, so the unquoted name in URLs matches
    let db_name = format!("test_{}", Uuid::new_v4().simple());
    admin
        .execute(&format!("CREATE DATABASE \"{}\"", db_name), &[])
        .expect("failed to create test database");

    (url_with_db(&db_name), db_name)
}
