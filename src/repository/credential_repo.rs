//! Credential repository (数据库访问层)

use crate::auth::store::{CredentialRecord, StoreError, UserStore};
use async_trait::async_trait;
use sqlx::PgPool;

/// PostgreSQL 用户存储（表 `credentials`）
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 创建凭据（供初始化数据和测试使用）
    pub async fn create(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (identifier, password_hash, active, is_admin)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&record.identifier)
        .bind(&record.password_hash)
        .bind(record.active)
        .bind(record.is_admin)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    /// 根据标识查找凭据
    async fn find_credential(
        &self,
        identifier: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let record = sqlx::query_as::<_, CredentialRecord>(
            "SELECT identifier, password_hash, active, is_admin FROM credentials WHERE identifier = $1",
        )
        .bind(identifier)
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    /// 写回迁移后的哈希
    async fn update_credential_hash(
        &self,
        identifier: &str,
        new_hash: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET password_hash = $2, updated_at = NOW()
            WHERE identifier = $1
            "#,
        )
        .bind(identifier)
        .bind(new_hash)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(identifier.to_string()));
        }

        Ok(())
    }

    async fn is_active(&self, identifier: &str) -> Result<bool, StoreError> {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT active FROM credentials WHERE identifier = $1")
                .bind(identifier)
                .fetch_optional(&self.db)
                .await?;

        active.ok_or_else(|| StoreError::NotFound(identifier.to_string()))
    }
}
