//! データベース初期化とマイグレーション

use crate::common::error::EdcError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{migrate::MigrateDatabase, Sqlite, SqlitePool};
use std::str::FromStr;

/// SQLiteデータベース接続プールを作成してマイグレーションを実行
///
/// # Arguments
/// * `database_url` - データベースURL（例: "sqlite:data/edc.db"）
///
/// # Returns
/// * `Ok(SqlitePool)` - 初期化済みデータベースプール
/// * `Err(EdcError)` - 初期化失敗
pub async fn initialize_database(database_url: &str) -> Result<SqlitePool, EdcError> {
    let in_memory = database_url.contains(":memory:");

    // データベースファイルが存在しない場合は作成
    if !in_memory
        && !Sqlite::database_exists(database_url)
            .await
            .map_err(|e| EdcError::Database(format!("Failed to check database: {}", e)))?
    {
        tracing::info!("Creating database: {}", database_url);
        if let Some(parent) = database_path(database_url).and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EdcError::Database(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Sqlite::create_database(database_url)
            .await
            .map_err(|e| EdcError::Database(format!("Failed to create database: {}", e)))?;
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| EdcError::Database(format!("Invalid database URL: {}", e)))?;

    // インメモリDBは接続ごとに別DBになるため1接続に固定
    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect_with(options)
        .await
        .map_err(|e| EdcError::Database(format!("Failed to connect to database: {}", e)))?;

    run_migrations(&pool).await?;

    Ok(pool)
}

fn database_path(database_url: &str) -> Option<&std::path::Path> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    Some(std::path::Path::new(path))
}

/// マイグレーションを実行（sqlx::migrate!マクロを使用）
///
/// # Arguments
/// * `pool` - データベース接続プール
///
/// # Returns
/// * `Ok(())` - マイグレーション成功
/// * `Err(EdcError)` - マイグレーション失敗
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), EdcError> {
    tracing::info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| EdcError::Database(format!("Failed to run migrations: {}", e)))?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
