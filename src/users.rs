//! User accounts on top of a [`SheetClient`].
//!
//! Users live in the `Users` tab, columns A-M, keyed by a generated id in
//! column A. Unlike stories, a user's id is stable: lookups scan column A for
//! it. Row 1 is treated as a header only when its first cell reads `id`.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use lazy_static::lazy_static;
use log::{error, info, warn};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;

use crate::codec::{USER_COLUMNS, User, decode_user_row, encode_user_row, iso_timestamp, user_header};
use crate::error::StoreError;
use crate::range::SheetRange;
use crate::sheet::SheetClient;

pub const USERS_TAB: &str = "Users";

const LAST_COL: u32 = USER_COLUMNS.len() as u32;

lazy_static! {
    // Verified against when the login name is unknown, so that a miss costs
    // the same as a wrong password.
    static ref DUMMY_HASH: String = hash_password("not-a-real-password").unwrap_or_default();
}

/// Operator roles, from most to least privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Manager,
    Editor,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "editor" => Some(Role::Editor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Editor => "editor",
        }
    }
}

/// Account status. Only active accounts may log in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Inactive,
    Pending,
}

impl Status {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "active" => Some(Status::Active),
            "inactive" => Some(Status::Inactive),
            "pending" => Some(Status::Pending),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Inactive => "inactive",
            Status::Pending => "pending",
        }
    }
}

/// Fields accepted when creating a user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub permissions: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub notes: Option<String>,
}

/// Fields accepted when updating a user. Absent fields keep their value; an
/// empty or absent password keeps the current hash.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
    pub permissions: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub notes: Option<String>,
}

/// Hash a password using Argon2id with a random salt.
///
/// # Errors
/// * `StoreError::PasswordHash` if hashing fails
pub fn hash_password(password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| StoreError::PasswordHash)
}

/// Check a plaintext password against a stored hash.
///
/// # Errors
/// * `StoreError::PasswordHash` if the stored hash is not a valid PHC string
pub fn verify_password(password: &str, hash: &str) -> Result<bool, StoreError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| StoreError::PasswordHash)?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// `user_<unix-millis>_<9 base-36 chars>`
pub fn generate_user_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .filter_map(|_| std::char::from_digit(rng.gen_range(0..36), 36))
        .collect();

    format!("user_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// Create, read, update and delete users, and check their credentials.
#[derive(Clone)]
pub struct UserRepository {
    client: Arc<dyn SheetClient>,
    tab: String,
}

impl UserRepository {
    pub fn new(client: Arc<dyn SheetClient>) -> Self {
        Self::with_tab(client, USERS_TAB)
    }

    pub fn with_tab(client: Arc<dyn SheetClient>, tab: &str) -> Self {
        UserRepository {
            client,
            tab: tab.to_string(),
        }
    }

    fn all_range(&self) -> String {
        SheetRange::columns(&self.tab, 1, LAST_COL).to_string()
    }

    fn row_range(&self, row: u32) -> String {
        SheetRange::row(&self.tab, 1, LAST_COL, row).to_string()
    }

    // Every user with the sheet row it lives on.
    async fn scan(&self) -> Result<Vec<(u32, User)>, StoreError> {
        let rows = self
            .client
            .fetch_range(&self.all_range())
            .await
            .inspect_err(|e| error!("Error fetching users: {e}"))?;

        let mut users = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let is_header = index == 0 && is_header_row(row);
            if is_header || row.first().is_none_or(|c| c.is_empty()) {
                continue;
            }
            let user = decode_user_row(row).inspect_err(|e| {
                error!("Malformed user row {}: {e}", index + 1);
            })?;
            users.push((index as u32 + 1, user));
        }

        Ok(users)
    }

    /// Every user, in sheet order.
    ///
    /// # Errors
    /// * `StoreError::RowShape` if a row does not fit the user schema
    /// * Propagates any backend failure
    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.scan().await?.into_iter().map(|(_, user)| user).collect())
    }

    /// # Errors
    /// * Propagates any backend failure
    pub async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .find(|(_, user)| user.id == id)
            .map(|(_, user)| user))
    }

    /// Sheet row (1-based) holding user `id`, found by scanning column A.
    /// A header in row 1 never matches.
    ///
    /// # Errors
    /// * Propagates any backend failure
    pub async fn find_user_row(&self, id: &str) -> Result<Option<u32>, StoreError> {
        let ids = self
            .client
            .fetch_range(&SheetRange::columns(&self.tab, 1, 1).to_string())
            .await
            .inspect_err(|e| error!("Error scanning user ids: {e}"))?;

        Ok(ids
            .iter()
            .enumerate()
            .filter(|(index, row)| !(*index == 0 && is_header_row(row)))
            .find(|(_, row)| row.first().is_some_and(|cell| cell == id))
            .map(|(index, _)| index as u32 + 1))
    }

    /// Create an account. Username and email must be unique.
    ///
    /// # Errors
    /// * `StoreError::Validation` if username, email or password is missing,
    ///   or role/status is not recognised
    /// * `StoreError::Duplicate` if the username or email is taken
    /// * Propagates any backend failure
    pub async fn create_user(&self, input: NewUser) -> Result<User, StoreError> {
        let username = input.username.trim().to_string();
        let email = input.email.trim().to_string();

        if username.is_empty() || email.is_empty() || input.password.is_empty() {
            return Err(StoreError::Validation(
                "Username, email and password are required".to_string(),
            ));
        }
        validate_email(&email)?;
        let role = validated_role(input.role.as_deref().unwrap_or("editor"))?;
        let status = validated_status(input.status.as_deref().unwrap_or("active"))?;

        let existing = self.scan().await?;
        ensure_unique(&existing, None, &username, &email)?;

        let user = User {
            id: generate_user_id(),
            username,
            email,
            password: hash_password(&input.password)?,
            full_name: input.full_name.unwrap_or_default(),
            role: role.as_str().to_string(),
            status: status.as_str().to_string(),
            created_at: iso_timestamp(Utc::now()),
            last_login: String::new(),
            permissions: input.permissions.unwrap_or_default(),
            phone: input.phone.unwrap_or_default(),
            department: input.department.unwrap_or_default(),
            notes: input.notes.unwrap_or_default(),
        };

        let blank = self
            .client
            .fetch_range(&self.row_range(1))
            .await
            .inspect_err(|e| error!("Error creating user: {e}"))?
            .is_empty();

        let mut rows = Vec::with_capacity(2);
        if blank && existing.is_empty() {
            info!("{} tab is blank, writing header row", self.tab);
            rows.push(user_header());
        }
        rows.push(encode_user_row(&user));

        self.client
            .append_rows(&self.all_range(), rows)
            .await
            .inspect_err(|e| error!("Error creating user: {e}"))?;

        info!("Created user {} ({})", user.username, user.id);
        Ok(user)
    }

    /// Apply `patch` to user `id` and rewrite the whole row.
    ///
    /// # Errors
    /// * `StoreError::NotFound` if no user has that id
    /// * `StoreError::Validation` / `StoreError::Duplicate` as for creation
    /// * Propagates any backend failure
    pub async fn update_user(&self, id: &str, patch: UserPatch) -> Result<User, StoreError> {
        let users = self.scan().await?;
        let (row, current) = users
            .iter()
            .find(|(_, user)| user.id == id)
            .cloned()
            .ok_or(StoreError::NotFound("User"))?;

        let mut user = current;
        if let Some(username) = patch.username {
            let username = username.trim().to_string();
            if username.is_empty() {
                return Err(StoreError::Validation("Username cannot be empty".to_string()));
            }
            user.username = username;
        }
        if let Some(email) = patch.email {
            let email = email.trim().to_string();
            validate_email(&email)?;
            user.email = email;
        }
        ensure_unique(&users, Some(id), &user.username, &user.email)?;

        if let Some(password) = patch.password.filter(|p| !p.is_empty()) {
            user.password = hash_password(&password)?;
        }
        if let Some(role) = patch.role {
            user.role = validated_role(&role)?.as_str().to_string();
        }
        if let Some(status) = patch.status {
            user.status = validated_status(&status)?.as_str().to_string();
        }
        if let Some(v) = patch.full_name {
            user.full_name = v;
        }
        if let Some(v) = patch.permissions {
            user.permissions = v;
        }
        if let Some(v) = patch.phone {
            user.phone = v;
        }
        if let Some(v) = patch.department {
            user.department = v;
        }
        if let Some(v) = patch.notes {
            user.notes = v;
        }

        self.write_row(row, &user).await?;
        Ok(user)
    }

    /// Delete user `id`.
    ///
    /// # Errors
    /// * `StoreError::NotFound` if no user has that id
    /// * Propagates any backend failure
    pub async fn delete_user(&self, id: &str) -> Result<(), StoreError> {
        let row = self
            .find_user_row(id)
            .await?
            .ok_or(StoreError::NotFound("User"))?;

        let sheet_id = self
            .client
            .sheet_id(&self.tab)
            .await
            .inspect_err(|e| error!("Error deleting user {id}: {e}"))?;

        let start = row as usize - 1;
        self.client
            .delete_rows(sheet_id, start, start + 1)
            .await
            .inspect_err(|e| error!("Error deleting user {id}: {e}"))?;

        info!("Deleted user {id}");
        Ok(())
    }

    /// Check credentials given as username or email.
    ///
    /// An unknown login and a wrong password fail identically. On success the
    /// user's row is rewritten with a fresh `lastLogin`.
    ///
    /// # Errors
    /// * `StoreError::InvalidCredentials` if the login is unknown or the
    ///   password does not match
    /// * `StoreError::AccountInactive` if the password matches but the
    ///   account is not active
    /// * Propagates any backend failure
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<User, StoreError> {
        let login = login.trim();
        let users = self.scan().await?;

        let Some((row, mut user)) = users
            .into_iter()
            .find(|(_, u)| !login.is_empty() && (u.username == login || u.email == login))
        else {
            let _ = verify_password(password, &DUMMY_HASH);
            return Err(StoreError::InvalidCredentials);
        };

        let matches = verify_password(password, &user.password).unwrap_or_else(|_| {
            warn!("User {} has an unreadable password hash", user.id);
            false
        });
        if !matches {
            return Err(StoreError::InvalidCredentials);
        }

        if Status::parse(&user.status) != Some(Status::Active) {
            return Err(StoreError::AccountInactive);
        }

        user.last_login = iso_timestamp(Utc::now());
        self.write_row(row, &user).await?;

        info!("User {} logged in", user.username);
        Ok(user)
    }

    async fn write_row(&self, row: u32, user: &User) -> Result<(), StoreError> {
        self.client
            .update_range(&self.row_range(row), vec![encode_user_row(user)])
            .await
            .inspect_err(|e| error!("Error updating user {}: {e}", user.id))?;
        Ok(())
    }
}

fn is_header_row(row: &[String]) -> bool {
    row.first().is_some_and(|c| c == "id")
}

fn validate_email(email: &str) -> Result<(), StoreError> {
    if email.is_empty() || !email.contains('@') {
        return Err(StoreError::Validation(format!("Invalid email: {email}")));
    }
    Ok(())
}

fn validated_role(value: &str) -> Result<Role, StoreError> {
    Role::parse(value).ok_or_else(|| StoreError::Validation(format!("Invalid role: {value}")))
}

fn validated_status(value: &str) -> Result<Status, StoreError> {
    Status::parse(value).ok_or_else(|| StoreError::Validation(format!("Invalid status: {value}")))
}

fn ensure_unique(
    users: &[(u32, User)],
    except_id: Option<&str>,
    username: &str,
    email: &str,
) -> Result<(), StoreError> {
    let others = users
        .iter()
        .map(|(_, u)| u)
        .filter(|u| Some(u.id.as_str()) != except_id);

    for other in others {
        if other.username == username {
            return Err(StoreError::Duplicate("Username already exists".to_string()));
        }
        if other.email == email {
            return Err(StoreError::Duplicate(
                "Email address is already registered".to_string(),
            ));
        }
    }
    Ok(())
}
