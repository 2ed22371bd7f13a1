use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use uuid::Uuid;

use super::model::{NewUser, User, UserChanges, UserPage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already in use")]
    DuplicateEmail,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence for user records. Implementations enforce email uniqueness
/// themselves; callers may pre-check but must not rely on it.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn create(&self, new: NewUser) -> Result<User, StoreError>;
    /// Returns `None` if no user has this id.
    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError>;
    /// Returns `false` if no user has this id.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
    /// Newest first. An empty `search` matches everyone.
    async fn search(&self, search: &str, page: u64, limit: u64) -> Result<UserPage, StoreError>;
    /// All-or-nothing bulk insert.
    async fn insert_many(&self, users: Vec<NewUser>) -> Result<u64, StoreError>;
}

const USER_COLUMNS: &str =
    "id, name, email, password_hash, phone, avatar, created_at, updated_at";

/// Rows per multi-row INSERT. Six binds a row stays under the 65535 parameter cap.
const INSERT_CHUNK: usize = 1000;

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_unique(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
        _ => StoreError::Database(e),
    }
}

/// Turns a literal search term into an ILIKE pattern matching it anywhere.
pub(crate) fn like_pattern(search: &str) -> String {
    let mut out = String::with_capacity(search.len() + 2);
    out.push('%');
    for c in search.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// One INSERT statement carrying every row of `users`.
fn bulk_insert(users: &[NewUser]) -> QueryBuilder<'_, Postgres> {
    let mut qb = QueryBuilder::new(
        "INSERT INTO users (id, name, email, password_hash, phone, avatar) ",
    );
    qb.push_values(users, |mut row, new| {
        row.push_bind(Uuid::new_v4())
            .push_bind(&new.name)
            .push_bind(&new.email)
            .push_bind(&new.password_hash)
            .push_bind(&new.phone)
            .push_bind(&new.avatar);
    });
    qb
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, phone, avatar)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.name)
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.phone)
        .bind(new.avatar)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique)?;
        Ok(user)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError> {
        if changes.is_empty() {
            return self.find_by_id(id).await;
        }
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET name          = COALESCE($2, name),
                   email         = COALESCE($3, email),
                   password_hash = COALESCE($4, password_hash),
                   phone         = COALESCE($5, phone),
                   avatar        = COALESCE($6, avatar),
                   updated_at    = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.name)
        .bind(changes.email)
        .bind(changes.password_hash)
        .bind(changes.phone)
        .bind(changes.avatar)
        .fetch_optional(&self.db)
        .await
        .map_err(map_unique)?;
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn search(&self, search: &str, page: u64, limit: u64) -> Result<UserPage, StoreError> {
        let pattern = (!search.is_empty()).then(|| like_pattern(search));
        let filter = "($1::text IS NULL OR name ILIKE $1 OR email ILIKE $1 OR phone ILIKE $1)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users WHERE {filter}"))
            .bind(pattern.as_deref())
            .fetch_one(&self.db)
            .await?;

        let offset = page.saturating_sub(1).saturating_mul(limit);
        let users = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
              FROM users
             WHERE {filter}
             ORDER BY created_at DESC, id
             LIMIT $2 OFFSET $3
            "#
        ))
        .bind(pattern.as_deref())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.db)
        .await?;

        Ok(UserPage {
            users,
            total: total.max(0) as u64,
        })
    }

    async fn insert_many(&self, users: Vec<NewUser>) -> Result<u64, StoreError> {
        let mut tx = self.db.begin().await?;
        let mut inserted = 0u64;
        for chunk in users.chunks(INSERT_CHUNK) {
            let res = bulk_insert(chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_unique)?;
            inserted += res.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }
}
