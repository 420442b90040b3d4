use std::sync::{Arc, RwLock};

use chat_core::{ChatError, ChatErrorCategory, Credential, User};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("no user is signed in")]
    NotSignedIn,
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("identity provider failure: {0}")]
    Backend(String),
}

impl From<IdentityError> for ChatError {
    fn from(err: IdentityError) -> Self {
        let code = match err {
            IdentityError::NotSignedIn => "not_signed_in",
            IdentityError::Unavailable(_) => "identity_unavailable",
            IdentityError::Backend(_) => "identity_failure",
        };
        ChatError::new(ChatErrorCategory::Auth, code, err.to_string())
    }
}

/// Source of the signed-in user and their bearer token.
///
/// Sign-in and sign-out happen on the provider itself, outside the session.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<User>;

    fn get_token(&self) -> Result<String, IdentityError>;
}

/// Current user plus a fresh token, ready for backend calls.
pub fn current_credential<P: IdentityProvider + ?Sized>(
    provider: &P,
) -> Result<(User, Credential), IdentityError> {
    let user = provider.current_user().ok_or(IdentityError::NotSignedIn)?;
    let token = provider.get_token()?;
    let credential = Credential {
        user_id: user.id.clone(),
        token,
    };
    Ok((user, credential))
}

#[derive(Clone, Default)]
pub struct InMemoryIdentity {
    session: Arc<RwLock<Option<(User, String)>>>,
}

impl InMemoryIdentity {
    pub fn signed_in(user: User, token: impl Into<String>) -> Self {
        Self {
            session: Arc::new(RwLock::new(Some((user, token.into())))),
        }
    }

    pub fn sign_in(&self, user: User, token: impl Into<String>) -> Result<(), IdentityError> {
        let mut session = self
            .session
            .write()
            .map_err(|_| IdentityError::Backend("poisoned lock".to_owned()))?;
        *session = Some((user, token.into()));
        Ok(())
    }

    pub fn sign_out(&self) -> Result<(), IdentityError> {
        let mut session = self
            .session
            .write()
            .map_err(|_| IdentityError::Backend("poisoned lock".to_owned()))?;
        *session = None;
        Ok(())
    }
}

impl IdentityProvider for InMemoryIdentity {
    fn current_user(&self) -> Option<User> {
        self.session
            .read()
            .ok()
            .and_then(|session| session.as_ref().map(|(user, _)| user.clone()))
    }

    fn get_token(&self) -> Result<String, IdentityError> {
        let session = self
            .session
            .read()
            .map_err(|_| IdentityError::Backend("poisoned lock".to_owned()))?;
        session
            .as_ref()
            .map(|(_, token)| token.clone())
            .ok_or(IdentityError::NotSignedIn)
    }
}
