use bytes::Bytes;
use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{
    ChangePasswordRequest, CreateUserRequest, ListQuery, LoginRequest, RegisterRequest,
    UpdateUserRequest,
};
use super::model::{NewUser, PageInfo, User, UserChanges};
use super::repo::StoreError;
use crate::{
    auth::password::{hash_password, verify_password},
    error::{AppError, AppResult},
    state::AppState,
    storage::{avatar_extension, avatar_key, key_from_public_path},
};

const DEFAULT_PAGE: u64 = 1;
const DEFAULT_LIMIT: u64 = 10;
pub const DEFAULT_SEED_COUNT: u32 = 1000;
const MAX_SEED_COUNT: u32 = 5000;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    // Verified against when the email is unknown so both login failures cost the same.
    static ref DUMMY_HASH: String = hash_password("userhub-login-timing").unwrap_or_default();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Trimmed value, or `None` when absent or blank.
fn required(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_positive(raw: Option<&str>) -> Option<u64> {
    raw?.trim().parse::<u64>().ok().filter(|n| *n > 0)
}

fn email_in_use(e: StoreError) -> AppError {
    match e {
        StoreError::DuplicateEmail => AppError::Conflict("Email already in use".into()),
        other => other.into(),
    }
}

/// Validated email for an update, checked against every other account.
async fn changed_email(st: &AppState, user_id: Uuid, raw: &str) -> AppResult<String> {
    let email = normalize_email(raw);
    if !is_valid_email(&email) {
        return Err(AppError::BadRequest("Invalid email".into()));
    }
    if let Some(other) = st.users.find_by_email(&email).await? {
        if other.id != user_id {
            warn!(email = %email, "email already in use");
            return Err(AppError::Conflict("Email already in use".into()));
        }
    }
    Ok(email)
}

async fn remove_stored_avatar(st: &AppState, public_path: &str) {
    if let Some(key) = key_from_public_path(public_path) {
        if let Err(e) = st.storage.delete_object(key).await {
            warn!(error = %e, key, "failed to remove avatar file");
        }
    }
}

async fn create_account(
    st: &AppState,
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    phone: Option<String>,
) -> AppResult<User> {
    let (Some(name), Some(email), Some(password)) = (
        required(name),
        required(email).map(|e| normalize_email(&e)),
        password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::BadRequest(
            "Name, email and password are required".into(),
        ));
    };

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::BadRequest("Invalid email".into()));
    }

    // Fast path only; the store's unique index has the final word.
    if st.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("User already exists".into()));
    }

    let password_hash = hash_password(&password)?;
    let user = st
        .users
        .create(NewUser {
            name,
            email,
            password_hash,
            phone: phone.map(|p| p.trim().to_string()).unwrap_or_default(),
            avatar: String::new(),
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user created");
    Ok(user)
}

pub async fn register(st: &AppState, req: RegisterRequest) -> AppResult<User> {
    create_account(st, req.name, req.email, req.password, None).await
}

/// Returns a fresh token and the user it was issued for.
pub async fn login(st: &AppState, req: LoginRequest) -> AppResult<(String, User)> {
    let (Some(email), Some(password)) = (
        required(req.email).map(|e| normalize_email(&e)),
        req.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::BadRequest("Email and password are required".into()));
    };

    let Some(user) = st.users.find_by_email(&email).await? else {
        verify_password(&password, &DUMMY_HASH);
        warn!(email = %email, "login unknown email");
        return Err(AppError::InvalidCredentials);
    };

    if !verify_password(&password, &user.password_hash) {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    let token = st.keys.sign(user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok((token, user))
}

pub async fn get_profile(st: &AppState, user_id: Uuid) -> AppResult<User> {
    st.users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

/// An uploaded file as received from the client.
#[derive(Debug)]
pub struct AvatarUpload {
    pub file_name: String,
    pub body: Bytes,
}

#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<AvatarUpload>,
}

pub async fn update_profile(st: &AppState, user_id: Uuid, update: ProfileUpdate) -> AppResult<User> {
    let current = get_profile(st, user_id).await?;
    let mut changes = UserChanges::default();

    if let Some(name) = update.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Name cannot be empty".into()));
        }
        changes.name = Some(name.to_string());
    }
    if let Some(email) = update.email {
        changes.email = Some(changed_email(st, user_id, &email).await?);
    }

    let mut stored = None;
    if let Some(file) = update.avatar {
        let ext = avatar_extension(&file.file_name).ok_or_else(|| {
            warn!(file_name = %file.file_name, "rejected avatar upload");
            AppError::BadRequest("Only image files are allowed".into())
        })?;
        let key = avatar_key(ext);
        st.storage.put_object(&key, file.body).await?;
        changes.avatar = Some(st.storage.public_path(&key));
        stored = Some(key);
    }

    let updated = match st.users.update(user_id, changes).await {
        Ok(Some(user)) => user,
        outcome => {
            if let Some(key) = &stored {
                if let Err(e) = st.storage.delete_object(key).await {
                    warn!(error = %e, key = %key, "failed to clean up avatar after update error");
                }
            }
            return match outcome {
                Err(e) => Err(email_in_use(e)),
                _ => Err(AppError::NotFound("User not found".into())),
            };
        }
    };

    if stored.is_some() && current.avatar != updated.avatar {
        remove_stored_avatar(st, &current.avatar).await;
    }

    info!(user_id = %user_id, "profile updated");
    Ok(updated)
}

pub async fn change_password(st: &AppState, user_id: Uuid, req: ChangePasswordRequest) -> AppResult<()> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
    let (Some(current), Some(new), Some(confirm)) = (
        non_empty(req.current_password),
        non_empty(req.new_password),
        non_empty(req.confirm_password),
    ) else {
        return Err(AppError::BadRequest("All fields are required".into()));
    };

    if new != confirm {
        return Err(AppError::BadRequest("New passwords do not match".into()));
    }

    let user = get_profile(st, user_id).await?;
    if !verify_password(&current, &user.password_hash) {
        warn!(user_id = %user_id, "change password with wrong current password");
        return Err(AppError::Unauthorized("Old password is incorrect".into()));
    }

    let changes = UserChanges {
        password_hash: Some(hash_password(&new)?),
        ..Default::default()
    };
    st.users
        .update(user_id, changes)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    info!(user_id = %user_id, "password changed");
    Ok(())
}

pub async fn admin_create(st: &AppState, req: CreateUserRequest) -> AppResult<User> {
    create_account(st, req.name, req.email, req.password, req.phone).await
}

pub async fn admin_update(st: &AppState, user_id: Uuid, req: UpdateUserRequest) -> AppResult<User> {
    let current = get_profile(st, user_id).await?;
    let mut changes = UserChanges::default();

    if let Some(name) = req.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Name cannot be empty".into()));
        }
        changes.name = Some(name.to_string());
    }
    if let Some(email) = req.email {
        let email = changed_email(st, user_id, &email).await?;
        if email != current.email {
            changes.email = Some(email);
        }
    }
    if let Some(phone) = req.phone {
        changes.phone = Some(phone.trim().to_string());
    }
    if let Some(password) = req.password.filter(|p| !p.is_empty()) {
        changes.password_hash = Some(hash_password(&password)?);
    }

    let user = st
        .users
        .update(user_id, changes)
        .await
        .map_err(email_in_use)?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    info!(user_id = %user_id, "user updated");
    Ok(user)
}

pub async fn admin_delete(st: &AppState, user_id: Uuid) -> AppResult<()> {
    let user = get_profile(st, user_id).await?;
    if !st.users.delete(user_id).await? {
        return Err(AppError::NotFound("User not found".into()));
    }
    remove_stored_avatar(st, &user.avatar).await;
    info!(user_id = %user_id, "user deleted");
    Ok(())
}

pub async fn list_users(st: &AppState, q: ListQuery) -> AppResult<(Vec<User>, PageInfo)> {
    let page = parse_positive(q.page.as_deref()).unwrap_or(DEFAULT_PAGE);
    let limit = parse_positive(q.limit.as_deref()).unwrap_or(DEFAULT_LIMIT);
    let search = q.search.as_deref().map(str::trim).unwrap_or_default();

    let result = st.users.search(search, page, limit).await?;
    Ok((result.users, PageInfo::new(result.total, page, limit)))
}

const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Grace", "Linus", "Margaret", "Dennis", "Barbara", "Ken", "Frances", "John",
    "Radia", "Edsger", "Hedy", "Tim", "Katherine", "Donald", "Annie", "Niklaus", "Jean", "Guido",
];

const LAST_NAMES: &[&str] = &[
    "Lovelace", "Turing", "Hopper", "Torvalds", "Hamilton", "Ritchie", "Liskov", "Thompson",
    "Allen", "McCarthy", "Perlman", "Dijkstra", "Lamarr", "Berners-Lee", "Johnson", "Knuth",
    "Easley", "Wirth", "Bartik", "van Rossum",
];

fn dummy_users(count: u32, password_hash: &str) -> Vec<NewUser> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            let first = FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())];
            let last = LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())];
            let tag = Uuid::new_v4().simple().to_string();
            NewUser {
                name: format!("{first} {last}"),
                email: format!("{}.{}.{}@example.com", first, last.replace(' ', ""), &tag[..8])
                    .to_lowercase(),
                password_hash: password_hash.to_string(),
                phone: format!(
                    "+1-555-{:03}-{:04}",
                    rng.gen_range(0..1000),
                    rng.gen_range(0..10000)
                ),
                avatar: String::new(),
            }
        })
        .collect()
}

/// Bulk-inserts generated accounts sharing one random, undisclosed password.
pub async fn seed_dummy_users(st: &AppState, count: Option<u32>) -> AppResult<u64> {
    let count = count
        .unwrap_or(DEFAULT_SEED_COUNT)
        .clamp(1, MAX_SEED_COUNT);
    let secret: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    let users = dummy_users(count, &hash_password(&secret)?);
    let inserted = st.users.insert_many(users).await?;
    info!(inserted, "dummy users seeded");
    Ok(inserted)
}
