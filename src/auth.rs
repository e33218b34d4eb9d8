//! Session lifecycle
//!
//! The stores never ask for a session themselves; the application layer reads
//! [`AuthProvider::current_user`] and forwards the id, and watches
//! [`AuthProvider::subscribe`] to tear state down on sign-out.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{CoreError, CoreResult, RemoteError};
use crate::models::Profile;

const MIN_PASSWORD_LEN: usize = 6;

/// Session change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Uuid),
    SignedOut,
    TokenRefreshed(Uuid),
}

impl AuthEvent {
    pub fn user_id(self) -> Option<Uuid> {
        match self {
            AuthEvent::SignedIn(id) | AuthEvent::TokenRefreshed(id) => Some(id),
            AuthEvent::SignedOut => None,
        }
    }
}

pub trait AuthProvider: Send + Sync {
    /// Stable user id while a session is active
    fn current_user(&self) -> Option<Uuid>;

    /// Latest session event; the receiver sees every later transition
    fn subscribe(&self) -> watch::Receiver<AuthEvent>;
}

/// Email/password accounts stored next to the data, hashed with argon2
pub struct LocalAuth {
    db: Arc<Database>,
    events: watch::Sender<AuthEvent>,
}

impl LocalAuth {
    pub fn new(db: Arc<Database>) -> Self {
        let (events, _) = watch::channel(AuthEvent::SignedOut);
        Self { db, events }
    }

    pub fn sign_up(&self, email: &str, password: &str, full_name: &str) -> CoreResult<Uuid> {
        let email = email.trim();
        let full_name = full_name.trim();
        if email.is_empty() || password.trim().is_empty() || full_name.is_empty() {
            return Err(CoreError::validation("Please fill in all fields"));
        }
        validate_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(CoreError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let hash = hash_password(password)?;
        let account = self.db.insert_account(email, full_name, &hash)?;

        tracing::info!(user_id = %account.id, "Account created");
        self.events.send_replace(AuthEvent::SignedIn(account.id));
        Ok(account.id)
    }

    pub fn sign_in(&self, email: &str, password: &str) -> CoreResult<Uuid> {
        let email = email.trim();
        if email.is_empty() || password.trim().is_empty() {
            return Err(CoreError::validation("Please fill in all fields"));
        }
        validate_email(email)?;

        let account = self
            .db
            .find_account(email)?
            .ok_or(CoreError::Unauthenticated)?;
        if !verify_password(password, &account.password_hash) {
            tracing::warn!(email = %email, "Rejected sign-in");
            return Err(CoreError::Unauthenticated);
        }

        tracing::info!(user_id = %account.id, "Signed in");
        self.events.send_replace(AuthEvent::SignedIn(account.id));
        Ok(account.id)
    }

    /// Resume a persisted session if the account still exists
    pub fn restore(&self, user_id: Uuid) -> CoreResult<()> {
        if !self.db.account_exists(user_id)? {
            self.sign_out();
            return Err(CoreError::Unauthenticated);
        }
        self.events.send_replace(AuthEvent::SignedIn(user_id));
        Ok(())
    }

    /// Re-validate the current session
    pub fn refresh(&self) -> CoreResult<Uuid> {
        let user_id = self.current_user().ok_or(CoreError::Unauthenticated)?;
        if !self.db.account_exists(user_id)? {
            self.sign_out();
            return Err(CoreError::Unauthenticated);
        }
        self.events.send_replace(AuthEvent::TokenRefreshed(user_id));
        Ok(user_id)
    }

    /// Profile of the signed-in user
    pub fn profile(&self) -> CoreResult<Profile> {
        let user_id = self.current_user().ok_or(CoreError::Unauthenticated)?;
        self.db
            .get_profile(user_id)?
            .ok_or(CoreError::NotFound(user_id))
    }

    pub fn update_profile(
        &self,
        full_name: &str,
        avatar_url: Option<&str>,
    ) -> CoreResult<Profile> {
        let user_id = self.current_user().ok_or(CoreError::Unauthenticated)?;
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(CoreError::validation("Name cannot be empty"));
        }
        let avatar_url = avatar_url.map(str::trim).filter(|url| !url.is_empty());

        let profile = self.db.update_profile(user_id, full_name, avatar_url)?;
        tracing::info!(user_id = %user_id, "Updated profile");
        Ok(profile)
    }

    pub fn sign_out(&self) {
        if self.current_user().is_some() {
            tracing::info!("Signed out");
        }
        self.events.send_replace(AuthEvent::SignedOut);
    }
}

impl AuthProvider for LocalAuth {
    fn current_user(&self) -> Option<Uuid> {
        self.events.borrow().user_id()
    }

    fn subscribe(&self) -> watch::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

fn validate_email(email: &str) -> CoreResult<()> {
    if email.contains('@') && email.contains('.') {
        Ok(())
    } else {
        Err(CoreError::validation("Invalid email"))
    }
}

fn hash_password(password: &str) -> CoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| RemoteError::backend(format!("Failed to hash password: {e}")).into())
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}
