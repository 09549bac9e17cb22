use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

// Per-series bar tables are created lazily by `Warehouse::merge_bars`; only the
// bookkeeping tables are migrated here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_series_catalog",
        sql: r#"
CREATE TABLE IF NOT EXISTS series_catalog (
    ticker TEXT NOT NULL,
    resolution TEXT NOT NULL,
    table_name TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(ticker, resolution)
);

CREATE TABLE IF NOT EXISTS ingest_log (
    batch_id TEXT NOT NULL,
    ticker TEXT NOT NULL,
    resolution TEXT NOT NULL,
    rows BIGINT NOT NULL,
    inserted BIGINT NOT NULL,
    replaced BIGINT NOT NULL,
    status TEXT NOT NULL,
    timestamp TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_coverage_ledger",
        sql: r#"
CREATE TABLE IF NOT EXISTS coverage_ledger (
    ticker TEXT NOT NULL,
    resolution TEXT NOT NULL,
    range_start BIGINT NOT NULL,
    range_end BIGINT NOT NULL,
    recorded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(ticker, resolution, range_start),
    CHECK (range_start <= range_end)
);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}
