use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

pub mod config;
pub mod server;

use crate::server::crypto::{digests_match, secure_hash};
use crate::server::time::current_timestamp;

pub const DEFAULT_LANGUAGE: &str = "text";
pub const DEFAULT_TITLE: &str = "Untitled";
pub const API_KEY_LENGTH: usize = 64;
pub const DEACTIVATION_TOKEN_LENGTH: usize = 32;

/// A registered account. Usernames are stored lowercased; lookups are
/// case-insensitive. Deactivation is terminal and cascades to the user's
/// active pastes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub is_active: bool,
    pub signup_time: i64,
    pub signup_ip: String,
    pub username: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub api_key: String,
}

/// A stored paste. A paste is *active* when `is_active` is true and its
/// expiry, if any, lies in the future; expiry is derived at read time and
/// never written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paste {
    pub paste_id: i64,
    pub is_active: bool,
    pub user_id: Option<i64>,
    pub post_time: i64,
    pub expiry_time: Option<i64>,
    pub title: String,
    pub language: String,
    pub password_hash: Option<String>,
    pub contents: String,
    pub views: u64,
    pub deactivation_token: String,
    pub is_api_post: bool,
}

/// Attachment metadata. The binary payload lives on disk under
/// `<attachments_dir>/<paste_id>/<hash_name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub attachment_id: i64,
    pub paste_id: i64,
    pub file_name: String,
    pub hash_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewPaste {
    pub contents: String,
    pub user_id: Option<i64>,
    pub expiry_time: Option<i64>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub password: Option<String>,
    pub is_api_post: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub signup_ip: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewAttachment {
    pub paste_id: i64,
    pub file_name: String,
    pub mime_type: String,
    pub payload: Vec<u8>,
}

/// Partial profile update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserDetailsUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no paste with paste_id {0} exists")]
    PasteNotFound(i64),
    #[error("no user matching {0} exists")]
    UserNotFound(String),
    #[error("no attachment matching {0} exists")]
    AttachmentNotFound(String),
    #[error("the username {0} is not available")]
    UsernameTaken(String),
    #[error("{0} is not a valid email address")]
    InvalidEmail(String),
    #[error("attachment storage failed: {0}")]
    Storage(#[from] std::io::Error),
}

/// Durable store interface for pastes, users, and attachments. The bundled
/// implementation is [`MemoryDatastore`]; anything that can uphold the same
/// read-modify-write atomicity can stand in behind this trait.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    async fn create_paste(&self, new: NewPaste) -> Result<Paste, StoreError>;
    async fn get_paste(&self, paste_id: i64, active_only: bool) -> Result<Paste, StoreError>;
    async fn deactivate_paste(&self, paste_id: i64) -> Result<Paste, StoreError>;
    async fn increment_paste_views(&self, paste_id: i64) -> Result<Paste, StoreError>;
    async fn set_paste_password(
        &self,
        paste_id: i64,
        password: Option<&str>,
    ) -> Result<Paste, StoreError>;
    async fn recent_pastes(&self, page_num: usize, num_per_page: usize) -> Vec<Paste>;
    async fn top_pastes(&self, page_num: usize, num_per_page: usize) -> Vec<Paste>;
    async fn pastes_for_user(&self, user_id: i64, active_only: bool) -> Vec<Paste>;
    async fn paste_is_active(&self, paste_id: i64) -> bool;

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;
    async fn get_user_by_id(&self, user_id: i64, active_only: bool) -> Result<User, StoreError>;
    async fn get_user_by_username(
        &self,
        username: &str,
        active_only: bool,
    ) -> Result<User, StoreError>;
    async fn get_user_by_api_key(
        &self,
        api_key: &str,
        active_only: bool,
    ) -> Result<User, StoreError>;
    async fn authenticate_user(&self, username: &str, password: &str) -> Result<bool, StoreError>;
    async fn update_user_details(
        &self,
        user_id: i64,
        update: UserDetailsUpdate,
    ) -> Result<User, StoreError>;
    async fn regenerate_api_key(&self, user_id: i64) -> Result<User, StoreError>;
    async fn deactivate_user(&self, user_id: i64) -> Result<User, StoreError>;
    async fn is_username_available(&self, username: &str) -> bool;

    async fn create_attachment(&self, new: NewAttachment) -> Result<Attachment, StoreError>;
    async fn get_attachment_by_id(
        &self,
        attachment_id: i64,
        active_only: bool,
    ) -> Result<Attachment, StoreError>;
    async fn get_attachment_by_name(
        &self,
        paste_id: i64,
        file_name: &str,
        active_only: bool,
    ) -> Result<Attachment, StoreError>;
    async fn attachments_for_paste(
        &self,
        paste_id: i64,
        active_only: bool,
    ) -> Result<Vec<Attachment>, StoreError>;
    async fn read_attachment_payload(&self, attachment: &Attachment)
        -> Result<Vec<u8>, StoreError>;
}

pub type SharedDatastore = Arc<dyn Datastore>;

pub fn create_datastore(attachments_dir: impl Into<PathBuf>) -> SharedDatastore {
    Arc::new(MemoryDatastore::new(attachments_dir))
}

/// Active-predicate for a paste: deactivation wins, then derived expiry.
pub fn paste_active(paste: &Paste, now: i64) -> bool {
    paste.is_active && paste.expiry_time.map_or(true, |expiry| expiry > now)
}

pub fn random_alphanumeric(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Permissive email validation; this is only meant to catch the outrageous
/// cases, not to implement the RFC.
pub fn is_email_address_valid(email_addr: &str) -> bool {
    if email_addr.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = email_addr.split('@');
    let (addr, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(addr), Some(domain), None) => (addr, domain),
        _ => return false,
    };
    !addr.is_empty() && !domain.is_empty() && domain.contains('.')
}

/// Replaces path-unsafe characters so a client-supplied file name can never
/// escape the attachment directory.
pub fn sanitize_file_name(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            _ => c,
        })
        .collect()
}

#[derive(Default)]
struct Tables {
    pastes: BTreeMap<i64, Paste>,
    users: BTreeMap<i64, User>,
    attachments: BTreeMap<i64, Attachment>,
    next_paste_id: i64,
    next_user_id: i64,
    next_attachment_id: i64,
}

impl Tables {
    fn paste(&self, paste_id: i64, active_only: bool, now: i64) -> Result<&Paste, StoreError> {
        match self.pastes.get(&paste_id) {
            Some(paste) if !active_only || paste_active(paste, now) => Ok(paste),
            _ => Err(StoreError::PasteNotFound(paste_id)),
        }
    }
}

/// In-memory datastore guarded by a single `RwLock`. Holding the write guard
/// for the whole of a mutation makes view increments atomic and the user
/// deactivation cascade a single critical section.
pub struct MemoryDatastore {
    tables: RwLock<Tables>,
    attachments_dir: PathBuf,
}

impl MemoryDatastore {
    pub fn new(attachments_dir: impl Into<PathBuf>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            attachments_dir: attachments_dir.into(),
        }
    }

    fn payload_path(&self, paste_id: i64, hash_name: &str) -> PathBuf {
        self.attachments_dir
            .join(paste_id.to_string())
            .join(hash_name)
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn create_paste(&self, new: NewPaste) -> Result<Paste, StoreError> {
        let mut tables = self.tables.write().await;
        tables.next_paste_id += 1;
        let paste = Paste {
            paste_id: tables.next_paste_id,
            is_active: true,
            user_id: new.user_id,
            post_time: current_timestamp(),
            expiry_time: new.expiry_time,
            title: match new.title {
                Some(title) if !title.trim().is_empty() => title,
                _ => DEFAULT_TITLE.to_string(),
            },
            language: match new.language {
                Some(language) if !language.trim().is_empty() => language,
                _ => DEFAULT_LANGUAGE.to_string(),
            },
            password_hash: new.password.as_deref().map(secure_hash),
            contents: new.contents,
            views: 0,
            deactivation_token: random_alphanumeric(DEACTIVATION_TOKEN_LENGTH),
            is_api_post: new.is_api_post,
        };
        tables.pastes.insert(paste.paste_id, paste.clone());
        Ok(paste)
    }

    async fn get_paste(&self, paste_id: i64, active_only: bool) -> Result<Paste, StoreError> {
        let tables = self.tables.read().await;
        tables
            .paste(paste_id, active_only, current_timestamp())
            .cloned()
    }

    async fn deactivate_paste(&self, paste_id: i64) -> Result<Paste, StoreError> {
        let mut tables = self.tables.write().await;
        let paste = tables
            .pastes
            .get_mut(&paste_id)
            .ok_or(StoreError::PasteNotFound(paste_id))?;
        paste.is_active = false;
        Ok(paste.clone())
    }

    async fn increment_paste_views(&self, paste_id: i64) -> Result<Paste, StoreError> {
        let mut tables = self.tables.write().await;
        let paste = tables
            .pastes
            .get_mut(&paste_id)
            .ok_or(StoreError::PasteNotFound(paste_id))?;
        paste.views += 1;
        Ok(paste.clone())
    }

    async fn set_paste_password(
        &self,
        paste_id: i64,
        password: Option<&str>,
    ) -> Result<Paste, StoreError> {
        let mut tables = self.tables.write().await;
        let paste = tables
            .pastes
            .get_mut(&paste_id)
            .ok_or(StoreError::PasteNotFound(paste_id))?;
        paste.password_hash = match password {
            Some(password) if !password.is_empty() => Some(secure_hash(password)),
            _ => None,
        };
        Ok(paste.clone())
    }

    async fn recent_pastes(&self, page_num: usize, num_per_page: usize) -> Vec<Paste> {
        let tables = self.tables.read().await;
        let now = current_timestamp();
        let mut pastes: Vec<Paste> = tables
            .pastes
            .values()
            .filter(|paste| paste_active(paste, now))
            .cloned()
            .collect();
        pastes.sort_by(|a, b| {
            b.post_time
                .cmp(&a.post_time)
                .then(b.paste_id.cmp(&a.paste_id))
        });
        paginate(pastes, page_num, num_per_page)
    }

    async fn top_pastes(&self, page_num: usize, num_per_page: usize) -> Vec<Paste> {
        let tables = self.tables.read().await;
        let now = current_timestamp();
        let mut pastes: Vec<Paste> = tables
            .pastes
            .values()
            .filter(|paste| paste_active(paste, now))
            .cloned()
            .collect();
        pastes.sort_by(|a, b| b.views.cmp(&a.views).then(b.paste_id.cmp(&a.paste_id)));
        paginate(pastes, page_num, num_per_page)
    }

    async fn pastes_for_user(&self, user_id: i64, active_only: bool) -> Vec<Paste> {
        let tables = self.tables.read().await;
        let now = current_timestamp();
        let mut pastes: Vec<Paste> = tables
            .pastes
            .values()
            .filter(|paste| paste.user_id == Some(user_id))
            // Expiry is filtered unconditionally; deactivation only on request.
            .filter(|paste| paste.expiry_time.map_or(true, |expiry| expiry > now))
            .filter(|paste| !active_only || paste.is_active)
            .cloned()
            .collect();
        pastes.sort_by(|a, b| {
            b.post_time
                .cmp(&a.post_time)
                .then(b.paste_id.cmp(&a.paste_id))
        });
        pastes
    }

    async fn paste_is_active(&self, paste_id: i64) -> bool {
        let tables = self.tables.read().await;
        tables
            .pastes
            .get(&paste_id)
            .map_or(false, |paste| paste_active(paste, current_timestamp()))
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        let username = new.username.to_lowercase();
        // Both validations run before anything is written; username first.
        if tables.users.values().any(|user| user.username == username) {
            return Err(StoreError::UsernameTaken(new.username));
        }
        if let Some(email) = new.email.as_deref() {
            if !email.is_empty() && !is_email_address_valid(email) {
                return Err(StoreError::InvalidEmail(email.to_string()));
            }
        }
        tables.next_user_id += 1;
        let user = User {
            user_id: tables.next_user_id,
            is_active: true,
            signup_time: current_timestamp(),
            signup_ip: new.signup_ip,
            username,
            password_hash: secure_hash(&new.password),
            name: new.name,
            email: new.email.filter(|email| !email.is_empty()),
            api_key: random_alphanumeric(API_KEY_LENGTH),
        };
        tables.users.insert(user.user_id, user.clone());
        Ok(user)
    }

    async fn get_user_by_id(&self, user_id: i64, active_only: bool) -> Result<User, StoreError> {
        let tables = self.tables.read().await;
        tables
            .users
            .get(&user_id)
            .filter(|user| !active_only || user.is_active)
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound(format!("user_id {user_id}")))
    }

    async fn get_user_by_username(
        &self,
        username: &str,
        active_only: bool,
    ) -> Result<User, StoreError> {
        let tables = self.tables.read().await;
        let username = username.to_lowercase();
        tables
            .users
            .values()
            .find(|user| user.username == username && (!active_only || user.is_active))
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound(format!("username {username}")))
    }

    async fn get_user_by_api_key(
        &self,
        api_key: &str,
        active_only: bool,
    ) -> Result<User, StoreError> {
        let tables = self.tables.read().await;
        tables
            .users
            .values()
            .find(|user| digests_match(&user.api_key, api_key) && (!active_only || user.is_active))
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound("api_key".to_string()))
    }

    async fn authenticate_user(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let user = self.get_user_by_username(username, false).await?;
        Ok(user.is_active && digests_match(&secure_hash(password), &user.password_hash))
    }

    async fn update_user_details(
        &self,
        user_id: i64,
        update: UserDetailsUpdate,
    ) -> Result<User, StoreError> {
        if let Some(email) = update.email.as_deref() {
            if !email.is_empty() && !is_email_address_valid(email) {
                return Err(StoreError::InvalidEmail(email.to_string()));
            }
        }
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .filter(|user| user.is_active)
            .ok_or_else(|| StoreError::UserNotFound(format!("user_id {user_id}")))?;
        if let Some(name) = update.name {
            user.name = Some(name);
        }
        if let Some(email) = update.email {
            user.email = Some(email).filter(|email| !email.is_empty());
        }
        if let Some(new_password) = update.new_password.filter(|p| !p.is_empty()) {
            user.password_hash = secure_hash(&new_password);
        }
        Ok(user.clone())
    }

    async fn regenerate_api_key(&self, user_id: i64) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::UserNotFound(format!("user_id {user_id}")))?;
        user.api_key = random_alphanumeric(API_KEY_LENGTH);
        Ok(user.clone())
    }

    async fn deactivate_user(&self, user_id: i64) -> Result<User, StoreError> {
        // One write guard covers the user flip and the full paste cascade, so
        // no reader can observe a half-applied cascade.
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::UserNotFound(format!("user_id {user_id}")))?;
        user.is_active = false;
        let deactivated = user.clone();
        for paste in tables.pastes.values_mut() {
            if paste.user_id == Some(user_id) && paste.is_active {
                paste.is_active = false;
            }
        }
        Ok(deactivated)
    }

    async fn is_username_available(&self, username: &str) -> bool {
        let tables = self.tables.read().await;
        let username = username.to_lowercase();
        !tables.users.values().any(|user| user.username == username)
    }

    async fn create_attachment(&self, new: NewAttachment) -> Result<Attachment, StoreError> {
        let mut tables = self.tables.write().await;
        tables.paste(new.paste_id, true, current_timestamp())?;

        let file_name = sanitize_file_name(&new.file_name);
        let hash_name = secure_hash(&file_name);
        let file_size = new.payload.len() as u64;

        let path = self.payload_path(new.paste_id, &hash_name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // tokio::fs::write flushes and closes the handle on every exit path.
        tokio::fs::write(&path, &new.payload).await?;

        tables.next_attachment_id += 1;
        let attachment = Attachment {
            attachment_id: tables.next_attachment_id,
            paste_id: new.paste_id,
            file_name,
            hash_name,
            file_size,
            mime_type: new.mime_type,
        };
        tables
            .attachments
            .insert(attachment.attachment_id, attachment.clone());
        Ok(attachment)
    }

    async fn get_attachment_by_id(
        &self,
        attachment_id: i64,
        active_only: bool,
    ) -> Result<Attachment, StoreError> {
        let tables = self.tables.read().await;
        let attachment = tables.attachments.get(&attachment_id).ok_or_else(|| {
            StoreError::AttachmentNotFound(format!("attachment_id {attachment_id}"))
        })?;
        tables
            .paste(attachment.paste_id, active_only, current_timestamp())
            .map_err(|_| {
                StoreError::AttachmentNotFound(format!("attachment_id {attachment_id}"))
            })?;
        Ok(attachment.clone())
    }

    async fn get_attachment_by_name(
        &self,
        paste_id: i64,
        file_name: &str,
        active_only: bool,
    ) -> Result<Attachment, StoreError> {
        let tables = self.tables.read().await;
        tables.paste(paste_id, active_only, current_timestamp())?;
        let file_name = sanitize_file_name(file_name);
        tables
            .attachments
            .values()
            .find(|attachment| attachment.paste_id == paste_id && attachment.file_name == file_name)
            .cloned()
            .ok_or(StoreError::AttachmentNotFound(file_name))
    }

    async fn attachments_for_paste(
        &self,
        paste_id: i64,
        active_only: bool,
    ) -> Result<Vec<Attachment>, StoreError> {
        let tables = self.tables.read().await;
        tables.paste(paste_id, active_only, current_timestamp())?;
        Ok(tables
            .attachments
            .values()
            .filter(|attachment| attachment.paste_id == paste_id)
            .cloned()
            .collect())
    }

    async fn read_attachment_payload(
        &self,
        attachment: &Attachment,
    ) -> Result<Vec<u8>, StoreError> {
        let path = self.payload_path(attachment.paste_id, &attachment.hash_name);
        Ok(tokio::fs::read(&path).await?)
    }
}

fn paginate(pastes: Vec<Paste>, page_num: usize, num_per_page: usize) -> Vec<Paste> {
    pastes
        .into_iter()
        .skip(page_num.saturating_mul(num_per_page))
        .take(num_per_page)
        .collect()
}
