use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{
    ChangePasswordRequest, CreateUserRequest, CreateUserResponse, ListQuery, LoginRequest,
    LoginResponse, MessageResponse, RegisterRequest, RegisterResponse, SeedQuery, SeedResponse,
    UpdateUserRequest, UserEnvelope, UsersListResponse,
};
use super::model::PublicUser;
use super::service::{self, AvatarUpload, ProfileUpdate};
use crate::{
    auth::CurrentUser,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn account_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/profile", get(profile))
        .route("/changePassword", put(change_password))
        .route(
            "/updateProfile",
            put(update_profile).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/createUser", post(create_user))
        .route("/updateUser/:id", put(update_user))
        .route("/usersList", get(users_list))
        .route("/deleteUser/:id", delete(delete_user))
        .route("/add-dummy-users", get(add_dummy_users))
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let Json(payload) = payload?;
    let user = service::register(&state, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: user.id,
            name: user.name,
            email: user.email,
        }),
    ))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<LoginResponse>> {
    let Json(payload) = payload?;
    let (token, user) = service::login(&state, payload).await?;
    Ok(Json(LoginResponse {
        message: "Login successful",
        success: true,
        token,
        user: user.into(),
    }))
}

#[instrument(skip_all, fields(user_id = %caller.id))]
pub async fn profile(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
) -> AppResult<Json<PublicUser>> {
    let user = service::get_profile(&state, caller.id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip_all, fields(user_id = %caller.id))]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> AppResult<Json<MessageResponse>> {
    let Json(payload) = payload?;
    service::change_password(&state, caller.id, payload).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Password changed successfully",
    }))
}

/// Multipart form: optional `name`, `email` and `profileImage` file.
#[instrument(skip_all, fields(user_id = %caller.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<UserEnvelope>> {
    let mut mp = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let mut update = ProfileUpdate::default();

    while let Some(field) = mp.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("name") => update.name = Some(field.text().await?),
            Some("email") => update.email = Some(field.text().await?),
            Some("profileImage") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let body = field.bytes().await?;
                // browsers send an empty part when no file was picked
                if !file_name.is_empty() || !body.is_empty() {
                    update.avatar = Some(AvatarUpload { file_name, body });
                }
            }
            _ => {}
        }
    }

    let user = service::update_profile(&state, caller.id, update).await?;
    Ok(Json(UserEnvelope {
        success: true,
        message: "Profile updated successfully",
        user: user.into(),
    }))
}

#[instrument(skip_all, fields(caller_id = %caller.id))]
pub async fn create_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<CreateUserResponse>)> {
    let Json(payload) = payload?;
    let user = service::admin_create(&state, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            phone: user.phone,
        }),
    ))
}

#[instrument(skip_all, fields(caller_id = %caller.id))]
pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> AppResult<Json<UserEnvelope>> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let user = service::admin_update(&state, id, payload).await?;
    Ok(Json(UserEnvelope {
        success: true,
        message: "User updated successfully.",
        user: user.into(),
    }))
}

#[instrument(skip_all, fields(caller_id = %caller.id))]
pub async fn users_list(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> AppResult<Json<UsersListResponse>> {
    let Query(query) = query?;
    let (users, pagination) = service::list_users(&state, query).await?;
    Ok(Json(UsersListResponse {
        success: true,
        data: users.into_iter().map(PublicUser::from).collect(),
        pagination,
    }))
}

#[instrument(skip_all, fields(caller_id = %caller.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<MessageResponse>> {
    let Path(id) = id?;
    service::admin_delete(&state, id).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "User deleted successfully",
    }))
}

#[instrument(skip_all, fields(caller_id = %caller.id))]
pub async fn add_dummy_users(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    query: Result<Query<SeedQuery>, QueryRejection>,
) -> AppResult<Json<SeedResponse>> {
    let Query(query) = query?;
    let total = service::seed_dummy_users(&state, query.count).await?;
    Ok(Json(SeedResponse {
        success: true,
        message: "Dummy users added successfully",
        total,
    }))
}
