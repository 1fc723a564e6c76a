use deadpool_redis::Pool;
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Ok,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub status: ProbeStatus,
    pub database: ProbeStatus,
    pub redis: ProbeStatus,
}

impl ReadinessReport {
    pub fn from_probes(database: ProbeStatus, redis: ProbeStatus) -> Self {
        let status = if database == ProbeStatus::Ok && redis == ProbeStatus::Ok {
            ProbeStatus::Ok
        } else {
            ProbeStatus::Unhealthy
        };
        Self {
            status,
            database,
            redis,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ProbeStatus::Ok
    }
}

/// READINESS PROBE
/// - `SELECT 1` against PostgreSQL
/// - `PING` against Redis
///
/// Each probe is bounded by `limit`.
pub async fn readiness(db: &DatabaseConnection, redis: &Pool, limit: Duration) -> ReadinessReport {
    let database = match timeout(
        limit,
        db.execute(Statement::from_string(
            db.get_database_backend(),
            "SELECT 1",
        )),
    )
    .await
    {
        Ok(Ok(_)) => ProbeStatus::Ok,
        _ => ProbeStatus::Unhealthy,
    };

    let redis = match timeout(limit, ping(redis)).await {
        Ok(true) => ProbeStatus::Ok,
        _ => ProbeStatus::Unhealthy,
    };

    ReadinessReport::from_probes(database, redis)
}

async fn ping(pool: &Pool) -> bool {
    let Ok(mut conn) = pool.get().await else {
        return false;
    };
    deadpool_redis::redis::cmd("PING")
        .query_async::<String>(&mut *conn)
        .await
        .is_ok()
}
