//! Postgres role directory adapter.
//!
//! The three registries are plain tables (`super_admins`,
//! `school_admins`, `finance_staff`), each keyed by email.
//! `super_admins` has no school scope; the other two carry a
//! `school_id`. Lookups cap at two rows so the multiple-match anomaly
//! stays observable without fetching unbounded data.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::LookupError;
use crate::traits::BaseRoleDirectory;
use crate::types::{DirectoryRecord, Registry};

pub struct PgRoleDirectory {
    pool: PgPool,
}

impl PgRoleDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, LookupError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(classify_error)?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl BaseRoleDirectory for PgRoleDirectory {
    async fn find_by_email(
        &self,
        registry: Registry,
        email: &str,
    ) -> Result<Vec<DirectoryRecord>, LookupError> {
        let sql = match registry {
            Registry::SuperAdmins => {
                "SELECT id::text, NULL::text AS school_id FROM super_admins WHERE email = $1 LIMIT 2"
            }
            Registry::SchoolAdmins => {
                "SELECT id::text, school_id::text FROM school_admins WHERE email = $1 LIMIT 2"
            }
            Registry::FinanceStaff => {
                "SELECT id::text, school_id::text FROM finance_staff WHERE email = $1 LIMIT 2"
            }
        };

        let rows: Vec<(String, Option<String>)> = sqlx::query_as(sql)
            .bind(email)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_error)?;

        Ok(rows
            .into_iter()
            .map(|(id, tenant_id)| DirectoryRecord { id, tenant_id })
            .collect())
    }
}

/// Split sqlx failures into retryable infrastructure trouble and
/// non-retryable query problems.
fn classify_error(e: sqlx::Error) -> LookupError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            LookupError::Transient(e.to_string())
        }
        _ => LookupError::Query(e.to_string()),
    }
}
