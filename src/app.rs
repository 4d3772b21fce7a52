//! HTTP API: routing, the bearer gate, and request handlers.

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Request, State},
    http::{
        Method, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use chrono::Utc;
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};

use crate::codec::{Story, StoryInput, User, iso_timestamp};
use crate::config::{Backend, Config};
use crate::error::{SheetError, StoreError};
use crate::session::SessionStore;
use crate::sheet::SheetClient;
use crate::stories::{STORIES_TAB, StoryRepository};
use crate::upload::{MAX_UPLOAD_BYTES, UPLOAD_URL_PREFIX, UploadError, store_upload};
use crate::users::{NewUser, Role, USERS_TAB, UserPatch, UserRepository};
use crate::workbook::LocalWorkbook;

/// Body limit for the upload route. Larger than the image limit so an
/// oversized image is rejected with a readable 400 rather than a bare 413.
const UPLOAD_BODY_LIMIT: usize = 2 * MAX_UPLOAD_BYTES;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct AppState {
    pub stories: StoryRepository,
    pub users: UserRepository,
    pub sessions: SessionStore,
    pub admin_token: String,
    pub upload_dir: PathBuf,
}

impl AppState {
    pub fn new(client: Arc<dyn SheetClient>, admin_token: &str, upload_dir: PathBuf) -> Self {
        AppState {
            stories: StoryRepository::new(client.clone()),
            users: UserRepository::new(client),
            sessions: SessionStore::new(),
            admin_token: admin_token.to_string(),
            upload_dir,
        }
    }
}

/// Who is making an authenticated request.
#[derive(Debug, Clone)]
pub enum Principal {
    /// The configured static admin token
    AdminToken,

    /// A user holding a session token from login
    User {
        id: String,
        role: Role,
        token: String,
    },
}

impl Principal {
    pub fn role(&self) -> Role {
        match self {
            Principal::AdminToken => Role::Admin,
            Principal::User { role, .. } => *role,
        }
    }

    fn require(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role()) {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Insufficient permissions".into()))
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Map a repository failure to a response. Backend failures are logged
    /// and reported with the generic `context` message.
    fn from_store(err: StoreError, context: &str) -> Self {
        match err {
            StoreError::InvalidStoryId => ApiError::BadRequest(err.to_string()),
            StoreError::Validation(msg) => ApiError::BadRequest(msg),
            StoreError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            StoreError::Duplicate(msg) => ApiError::Conflict(msg),
            StoreError::InvalidCredentials => ApiError::Unauthorized(err.to_string()),
            StoreError::AccountInactive => ApiError::Forbidden(err.to_string()),
            StoreError::Sheet(_) | StoreError::RowShape { .. } | StoreError::PasswordHash => {
                error!("{context}: {err}");
                ApiError::Internal(context.to_string())
            }
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Io(e) => {
                error!("Failed to store upload: {e}");
                ApiError::Internal("Failed to upload image".into())
            }
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default, alias = "email")]
    username: String,
    #[serde(default)]
    password: String,
}

fn success(message: &str) -> Json<Value> {
    Json(json!({ "success": true, "message": message }))
}

/// Open the storage backend named by `config`.
///
/// # Errors
/// * `SheetError` if the workbook cannot be loaded or the service account key is unusable
pub fn connect_backend(config: &Config) -> Result<Arc<dyn SheetClient>, SheetError> {
    match &config.backend {
        Backend::Local { path } => {
            info!("Using local workbook at {}", path.display());
            Ok(Arc::new(LocalWorkbook::open(path, &[STORIES_TAB, USERS_TAB])?))
        }
        #[cfg(feature = "google")]
        Backend::Google {
            spreadsheet_id,
            service_account_key,
        } => {
            info!("Using Google spreadsheet {spreadsheet_id}");
            let client = crate::google::GoogleSheetsClient::new(spreadsheet_id, service_account_key)?;
            Ok(Arc::new(client))
        }
        #[cfg(not(feature = "google"))]
        Backend::Google { .. } => Err(SheetError::Auth(
            "Google Sheets support was not compiled in".into(),
        )),
    }
}

/// Build the application router around `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let public = Router::new()
        .route("/api/health", get(health))
        .route("/api/stories", get(list_stories))
        .route("/api/stories/:id", get(get_story))
        .route("/api/users/login", post(login));

    let protected = Router::new()
        .route("/api/stories", post(create_story))
        .route("/api/stories/:id", put(update_story).delete(delete_story))
        .route(
            "/api/upload",
            post(upload_image).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/logout", post(logout))
        .route(
            "/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .nest_service(UPLOAD_URL_PREFIX, ServeDir::new(&state.upload_dir))
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .with_state(state)
}

/// Start the server and run until Ctrl+C or SIGTERM.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let client = connect_backend(&config)?;
    let state = Arc::new(AppState::new(
        client,
        &config.admin_token,
        config.upload_dir.clone(),
    ));

    let purge_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = purge_state.sessions.purge_expired();
            if purged > 0 {
                info!("Purged {purged} expired sessions");
            }
        }
    });

    let app = router(state);
    let listener = TcpListener::bind(config.address()).await?;
    info!("Listening on http://{}", config.address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        "{method} {path} {} {:.1?}",
        response.status().as_u16(),
        start.elapsed()
    );
    response
}

/// Resolve the bearer token to a [`Principal`] or reject with 401.
async fn require_auth(
    State(state): State<Arc<AppState>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return ApiError::Unauthorized("Unauthorized".into()).into_response();
    };
    let token = bearer.token();

    let principal = if token == state.admin_token {
        Principal::AdminToken
    } else if let Some(session) = state.sessions.validate(token) {
        Principal::User {
            id: session.user_id,
            role: Role::parse(&session.role).unwrap_or(Role::Editor),
            token: token.to_string(),
        }
    } else {
        return ApiError::Unauthorized("Unauthorized".into()).into_response();
    };

    request.extensions_mut().insert(principal);
    next.run(request).await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": iso_timestamp(Utc::now()) }))
}

async fn list_stories(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Story>>> {
    let stories = state
        .stories
        .list_stories()
        .await
        .map_err(|e| ApiError::from_store(e, "Failed to fetch stories"))?;
    Ok(Json(stories))
}

async fn get_story(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Story>> {
    state
        .stories
        .get_story(&id)
        .await
        .map_err(|e| ApiError::from_store(e, "Failed to fetch story"))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Story not found".into()))
}

async fn create_story(
    State(state): State<Arc<AppState>>,
    Json(input): Json<StoryInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state
        .stories
        .create_story(&input)
        .await
        .map_err(|e| ApiError::from_store(e, "Failed to create story"))?;
    Ok((StatusCode::CREATED, success("Story created successfully")))
}

async fn update_story(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<StoryInput>,
) -> ApiResult<Json<Value>> {
    state
        .stories
        .update_story(&id, &input)
        .await
        .map_err(|e| ApiError::from_store(e, "Failed to update story"))?;
    Ok(success("Story updated successfully"))
}

async fn delete_story(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .stories
        .delete_story(&id)
        .await
        .map_err(|e| ApiError::from_store(e, "Failed to delete story"))?;
    Ok(success("Story deleted successfully"))
}

/// Accepts a multipart form with one `image` field. The field is read in
/// chunks so an oversized file is refused without buffering all of it.
async fn upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        crate::upload::validate_upload(content_type.as_deref(), 0)?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?
        {
            bytes.extend_from_slice(&chunk);
            if bytes.len() > MAX_UPLOAD_BYTES {
                return Err(UploadError::TooLarge.into());
            }
        }

        let url = store_upload(
            &state.upload_dir,
            "image",
            file_name.as_deref(),
            content_type.as_deref(),
            &bytes,
        )
        .await?;
        return Ok(Json(json!({ "success": true, "imageUrl": url })));
    }

    Err(UploadError::Missing.into())
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<User>>> {
    principal.require(&[Role::Admin, Role::Manager])?;
    let users = state
        .users
        .list_users()
        .await
        .map_err(|e| ApiError::from_store(e, "Failed to fetch users"))?;
    Ok(Json(users))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<Json<User>> {
    principal.require(&[Role::Admin, Role::Manager])?;
    state
        .users
        .get_user(&id)
        .await
        .map_err(|e| ApiError::from_store(e, "Failed to fetch user"))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(input): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    principal.require(&[Role::Admin])?;
    let user = state
        .users
        .create_user(input)
        .await
        .map_err(|e| ApiError::from_store(e, "Failed to create user"))?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(patch): Json<UserPatch>,
) -> ApiResult<Json<User>> {
    principal.require(&[Role::Admin])?;
    let user = state
        .users
        .update_user(&id, patch)
        .await
        .map_err(|e| ApiError::from_store(e, "Failed to update user"))?;

    state.sessions.sync_user(&user);
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    principal.require(&[Role::Admin])?;
    state
        .users
        .delete_user(&id)
        .await
        .map_err(|e| ApiError::from_store(e, "Failed to delete user"))?;
    state.sessions.revoke_user(&id);
    Ok(success("User deleted successfully"))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<Value>> {
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Username and password are required".into(),
        ));
    }

    let user = state
        .users
        .authenticate(&request.username, &request.password)
        .await
        .map_err(|e| ApiError::from_store(e, "Login failed"))?;
    let token = state.sessions.create(&user);

    Ok(Json(json!({ "success": true, "user": user, "token": token })))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Json<Value> {
    if let Principal::User { token, .. } = &principal {
        state.sessions.revoke(token);
    }
    success("Logged out")
}
