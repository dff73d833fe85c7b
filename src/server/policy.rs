use crate::server::crypto::{digests_match, secure_hash};
use crate::{Paste, User};

/// The requesting principal, resolved from the request's `api_key` (or, in a
/// fuller deployment, the session cookie handled outside this crate).
#[derive(Debug, Clone, Default)]
pub enum Caller {
    #[default]
    Anonymous,
    User(User),
}

impl Caller {
    pub fn user(&self) -> Option<&User> {
        match self {
            Caller::Anonymous => None,
            Caller::User(user) => Some(user),
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user().map(|user| user.user_id)
    }
}

/// Why a deactivation request was refused. The distinction feeds user-facing
/// messaging only; the HTTP-level signal is uniform either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationDenial {
    NotOwner,
    BadToken,
}

/// A paste may be deactivated by its owner or by anyone holding its
/// deactivation token.
pub fn check_deactivation(
    caller: &Caller,
    supplied_token: Option<&str>,
    paste: &Paste,
) -> Result<(), DeactivationDenial> {
    if let Some(user) = caller.user() {
        if paste.user_id == Some(user.user_id) {
            return Ok(());
        }
    }
    if let Some(token) = supplied_token {
        if digests_match(token, &paste.deactivation_token) {
            return Ok(());
        }
    }
    if caller.user().is_some() {
        Err(DeactivationDenial::NotOwner)
    } else {
        Err(DeactivationDenial::BadToken)
    }
}

/// Password changes have no token bypass: owner only.
pub fn can_set_password(caller: &Caller, paste: &Paste) -> bool {
    match caller.user() {
        Some(user) => paste.user_id == Some(user.user_id),
        None => false,
    }
}

/// Content reveal: open pastes are always readable; protected ones require a
/// password whose digest matches. Deny is uniform so a caller cannot tell a
/// missing password from a wrong one.
pub fn can_reveal_content(paste: &Paste, supplied_password: Option<&str>) -> bool {
    match (&paste.password_hash, supplied_password) {
        (None, _) => true,
        (Some(hash), Some(password)) if !password.is_empty() => {
            digests_match(&secure_hash(password), hash)
        }
        _ => false,
    }
}

/// A submission may only claim a user_id that belongs to the caller;
/// anonymous submissions must not claim one at all.
pub fn submission_user_allowed(caller: &Caller, requested_user_id: Option<i64>) -> bool {
    match requested_user_id {
        None => true,
        Some(requested) => caller.user_id() == Some(requested),
    }
}
