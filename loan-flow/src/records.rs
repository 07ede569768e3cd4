use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::{
    error::Result,
    session::{Decision, Language, LoanOffer, RejectionReason},
};

pub const PROFILE_DOC: &str = "user-profile";
pub const DECISION_DOC: &str = "loan-decision";

/// `artifacts/{app_id}/users/{user_id}/loan-app-data/{doc}`
pub fn document_path(app_id: &str, user_id: &str, doc: &str) -> String {
    format!("artifacts/{app_id}/users/{user_id}/loan-app-data/{doc}")
}

/// Written once per session as soon as the user id is known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileRecord {
    pub app_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub status: String,
    pub language: Language,
}

impl UserProfileRecord {
    pub fn started(
        app_id: impl Into<String>,
        user_id: impl Into<String>,
        language: Language,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            user_id: user_id.into(),
            started_at: Utc::now(),
            status: "started".to_string(),
            language,
        }
    }
}

/// Written once per completed decision, merged into the user's decision document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LoanDecisionRecord {
    Approved {
        amount: u32,
        installment: u32,
        decided_at: DateTime<Utc>,
    },
    Rejected {
        reason: String,
        decided_at: DateTime<Utc>,
    },
}

impl LoanDecisionRecord {
    pub fn from_decision(decision: &Decision, decided_at: DateTime<Utc>) -> Self {
        match decision {
            Decision::Approved(offer) => LoanDecisionRecord::Approved {
                amount: offer.amount,
                installment: offer.installment,
                decided_at,
            },
            Decision::Rejected(rejection) => LoanDecisionRecord::Rejected {
                reason: rejection.reason.clone(),
                decided_at,
            },
        }
    }
}

/// Document store holding profile and decision records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write the profile document, replacing any previous one
    async fn put_profile(&self, record: &UserProfileRecord) -> Result<()>;

    /// Merge the decision fields into the user's decision document. Fields not
    /// present in `record` are left as they were.
    async fn merge_decision(
        &self,
        app_id: &str,
        user_id: &str,
        record: &LoanDecisionRecord,
    ) -> Result<()>;
}

/// Overlay the top-level fields of `patch` onto `base`
fn merge_fields(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
        }
        (base, patch) => *base = patch,
    }
}

/// In-memory implementation of RecordStore
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    documents: Arc<DashMap<String, Value>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(DashMap::new()),
        }
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.documents.get(path).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put_profile(&self, record: &UserProfileRecord) -> Result<()> {
        let path = document_path(&record.app_id, &record.user_id, PROFILE_DOC);
        self.documents.insert(path, serde_json::to_value(record)?);
        Ok(())
    }

    async fn merge_decision(
        &self,
        app_id: &str,
        user_id: &str,
        record: &LoanDecisionRecord,
    ) -> Result<()> {
        let path = document_path(app_id, user_id, DECISION_DOC);
        let patch = serde_json::to_value(record)?;
        self.documents
            .entry(path)
            .and_modify(|existing| merge_fields(existing, patch.clone()))
            .or_insert_with(|| patch.clone());
        Ok(())
    }
}

#[cfg(feature = "postgres")]
pub use postgres::PostgresRecordStore;

#[cfg(feature = "postgres")]
mod postgres {
    use async_trait::async_trait;
    use sqlx::postgres::{PgPool, PgPoolOptions};
    use sqlx::types::Json;
    use tracing::info;

    use super::{
        DECISION_DOC, LoanDecisionRecord, PROFILE_DOC, RecordStore, UserProfileRecord,
        document_path,
    };
    use crate::error::{FlowError, Result};

    const CREATE_TABLE: &str = r#"
        CREATE TABLE IF NOT EXISTS loan_app_documents (
            path TEXT PRIMARY KEY,
            app_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            data JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
    "#;

    const PUT_DOCUMENT: &str = r#"
        INSERT INTO loan_app_documents (path, app_id, user_id, data, updated_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (path) DO UPDATE
        SET data = EXCLUDED.data, updated_at = now()
    "#;

    const MERGE_DOCUMENT: &str = r#"
        INSERT INTO loan_app_documents (path, app_id, user_id, data, updated_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (path) DO UPDATE
        SET data = loan_app_documents.data || EXCLUDED.data, updated_at = now()
    "#;

    /// RecordStore backed by a Postgres JSONB table
    #[derive(Clone)]
    pub struct PostgresRecordStore {
        pool: PgPool,
    }

    impl PostgresRecordStore {
        pub async fn connect(database_url: &str) -> Result<Self> {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .map_err(|e| FlowError::StorageError(e.to_string()))?;

            sqlx::query(CREATE_TABLE)
                .execute(&pool)
                .await
                .map_err(|e| FlowError::StorageError(e.to_string()))?;

            info!("Connected to Postgres record store");
            Ok(Self { pool })
        }

        async fn write(
            &self,
            statement: &str,
            app_id: &str,
            user_id: &str,
            doc: &str,
            data: serde_json::Value,
        ) -> Result<()> {
            sqlx::query(statement)
                .bind(document_path(app_id, user_id, doc))
                .bind(app_id)
                .bind(user_id)
                .bind(Json(data))
                .execute(&self.pool)
                .await
                .map_err(|e| FlowError::StorageError(e.to_string()))?;
            Ok(())
        }
    }

    #[async_trait]
    impl RecordStore for PostgresRecordStore {
        async fn put_profile(&self, record: &UserProfileRecord) -> Result<()> {
            let data = serde_json::to_value(record)?;
            self.write(PUT_DOCUMENT, &record.app_id, &record.user_id, PROFILE_DOC, data)
                .await
        }

        async fn merge_decision(
            &self,
            app_id: &str,
            user_id: &str,
            record: &LoanDecisionRecord,
        ) -> Result<()> {
            let data = serde_json::to_value(record)?;
            self.write(MERGE_DOCUMENT, app_id, user_id, DECISION_DOC, data)
                .await
        }
    }
}

impl From<&LoanDecisionRecord> for Decision {
    fn from(record: &LoanDecisionRecord) -> Self {
        match record {
            LoanDecisionRecord::Approved {
                amount,
                installment,
                ..
            } => Decision::Approved(LoanOffer {
                amount: *amount,
                installment: *installment,
            }),
            LoanDecisionRecord::Rejected { reason, .. } => {
                Decision::Rejected(RejectionReason {
                    reason: reason.clone(),
                })
            }
        }
    }
}
