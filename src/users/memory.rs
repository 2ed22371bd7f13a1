//! In-process `UserStore` used by unit tests in place of PostgreSQL.

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{NewUser, User, UserChanges, UserPage};
use super::repo::{StoreError, UserStore};

/// Records are kept in insertion order; newest is last.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.users.read().await.len()
    }
}

fn email_taken(users: &[User], email: &str, except: Option<Uuid>) -> bool {
    users
        .iter()
        .any(|u| Some(u.id) != except && u.email.eq_ignore_ascii_case(email))
}

fn materialize(new: NewUser) -> User {
    let now = OffsetDateTime::now_utc();
    User {
        id: Uuid::new_v4(),
        name: new.name,
        email: new.email,
        password_hash: new.password_hash,
        phone: new.phone,
        avatar: new.avatar,
        created_at: now,
        updated_at: now,
    }
}

fn matches_search(user: &User, needle: &str) -> bool {
    [&user.name, &user.email, &user.phone]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if email_taken(&users, &new.email, None) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = materialize(new);
        users.push(user.clone());
        Ok(user)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        if let Some(email) = &changes.email {
            if email_taken(&users, email, Some(id)) {
                return Err(StoreError::DuplicateEmail);
            }
        }
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(v) = changes.name {
            user.name = v;
        }
        if let Some(v) = changes.email {
            user.email = v;
        }
        if let Some(v) = changes.password_hash {
            user.password_hash = v;
        }
        if let Some(v) = changes.phone {
            user.phone = v;
        }
        if let Some(v) = changes.avatar {
            user.avatar = v;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        Ok(users.len() != before)
    }

    async fn search(&self, search: &str, page: u64, limit: u64) -> Result<UserPage, StoreError> {
        let needle = search.to_lowercase();
        let users = self.users.read().await;
        let hits: Vec<&User> = users
            .iter()
            .rev()
            .filter(|u| needle.is_empty() || matches_search(u, &needle))
            .collect();
        let offset = page.saturating_sub(1).saturating_mul(limit) as usize;
        Ok(UserPage {
            total: hits.len() as u64,
            users: hits
                .into_iter()
                .skip(offset)
                .take(limit as usize)
                .cloned()
                .collect(),
        })
    }

    async fn insert_many(&self, batch: Vec<NewUser>) -> Result<u64, StoreError> {
        let mut users = self.users.write().await;
        for (i, new) in batch.iter().enumerate() {
            if email_taken(&users, &new.email, None)
                || batch[..i].iter().any(|b| b.email.eq_ignore_ascii_case(&new.email))
            {
                return Err(StoreError::DuplicateEmail);
            }
        }
        let count = batch.len() as u64;
        users.extend(batch.into_iter().map(materialize));
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str, email: &str, phone: &str) -> NewUser {
        NewUser {
            name: name.into(),
            email: email.into(),
            password_hash: "hash".into(),
            phone: phone.into(),
            avatar: String::new(),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email_case_insensitively() {
        let store = MemoryUserStore::new();
        store.create(new_user("A", "a@x.com", "")).await.unwrap();
        let err = store.create(new_user("B", "A@X.com", "")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn update_checks_email_against_other_users_only() {
        let store = MemoryUserStore::new();
        let a = store.create(new_user("A", "a@x.com", "")).await.unwrap();
        store.create(new_user("B", "b@x.com", "")).await.unwrap();

        let same = UserChanges {
            email: Some("a@x.com".into()),
            ..Default::default()
        };
        assert!(store.update(a.id, same).await.unwrap().is_some());

        let taken = UserChanges {
            email: Some("b@x.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update(a.id, taken).await.unwrap_err(),
            StoreError::DuplicateEmail
        ));
    }

    #[tokio::test]
    async fn search_is_newest_first_and_paged() {
        let store = MemoryUserStore::new();
        for i in 0..5 {
            store
                .create(new_user(&format!("User {i}"), &format!("u{i}@x.com"), ""))
                .await
                .unwrap();
        }
        let page = store.search("", 1, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.users[0].name, "User 4");
        assert_eq!(page.users[1].name, "User 3");

        let last = store.search("", 3, 2).await.unwrap();
        assert_eq!(last.users.len(), 1);
        assert_eq!(last.users[0].name, "User 0");
    }

    #[tokio::test]
    async fn insert_many_is_all_or_nothing() {
        let store = MemoryUserStore::new();
        let batch = vec![new_user("A", "dup@x.com", ""), new_user("B", "dup@x.com", "")];
        assert!(store.insert_many(batch).await.is_err());
        assert_eq!(store.count().await, 0);
    }
}
