use rocket::http::Status;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};

use crate::server::crypto::IdCodec;
use crate::{Attachment, Paste};

// Request bodies. Every field is optional at the serde level; required-field
// checks happen in the handlers so a missing param yields the uniform
// incomplete_params_failure envelope instead of a framework rejection.

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct SubmitPasteRequest {
    pub api_key: Option<String>,
    pub contents: Option<String>,
    pub user_id: Option<String>,
    pub expiry_time: Option<i64>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub password: Option<String>,
    pub attachments: Option<Vec<AttachmentUpload>>,
}

#[derive(Deserialize, Default, Clone)]
#[serde(default)]
pub struct AttachmentUpload {
    pub name: String,
    /// Declared pre-encoding size; informational, the decoded payload length
    /// is authoritative.
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    /// Base64-encoded payload.
    pub data: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct DeactivatePasteRequest {
    pub api_key: Option<String>,
    pub paste_id: Option<String>,
    pub deactivation_token: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct SetPasswordRequest {
    pub api_key: Option<String>,
    pub paste_id: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct PasteDetailsRequest {
    pub paste_id: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct PasteListRequest {
    pub page_num: Option<usize>,
    pub num_per_page: Option<usize>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ApiKeyRequest {
    pub api_key: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CreateUserRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct UpdateUserDetailsRequest {
    pub api_key: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct UsernameAvailabilityRequest {
    pub username: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ValidateEmailRequest {
    pub email: Option<String>,
}

// Response bodies.

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AttachmentDetails {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
}

impl From<&Attachment> for AttachmentDetails {
    fn from(attachment: &Attachment) -> Self {
        Self {
            file_name: attachment.file_name.clone(),
            file_size: attachment.file_size,
            mime_type: attachment.mime_type.clone(),
        }
    }
}

/// Outward paste representation. The id is always the external form produced
/// by [`IdCodec::represent`]; the deactivation token is echoed only in the
/// submission response.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PasteDetails {
    pub paste_id: String,
    pub post_time: i64,
    pub expiry_time: Option<i64>,
    pub title: String,
    pub language: String,
    pub views: u64,
    pub is_api_post: bool,
    pub contents: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivation_token: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentDetails>,
}

impl PasteDetails {
    pub fn from_paste(paste: &Paste, codec: &IdCodec) -> Self {
        Self {
            paste_id: codec.represent(paste.paste_id).into_string(),
            post_time: paste.post_time,
            expiry_time: paste.expiry_time,
            title: paste.title.clone(),
            language: paste.language.clone(),
            views: paste.views,
            is_api_post: paste.is_api_post,
            contents: paste.contents.clone(),
            poster_username: None,
            deactivation_token: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_poster(mut self, poster_username: String) -> Self {
        self.poster_username = Some(poster_username);
        self
    }

    pub fn with_deactivation_token(mut self, token: String) -> Self {
        self.deactivation_token = Some(token);
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<AttachmentDetails>) -> Self {
        self.attachments = attachments;
        self
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SubmitPasteResponse {
    pub success: bool,
    pub message: Option<String>,
    pub details: PasteDetails,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PasteActionResponse {
    pub success: bool,
    pub message: Option<String>,
    pub paste_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PasteDetailsResponse {
    pub success: bool,
    pub message: Option<String>,
    pub details: PasteDetails,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PasteListResponse {
    pub success: bool,
    pub message: Option<String>,
    pub pastes: Vec<PasteDetails>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreateUserResponse {
    pub success: bool,
    pub message: Option<String>,
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub api_key: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UpdateUserDetailsResponse {
    pub success: bool,
    pub message: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserActionResponse {
    pub success: bool,
    pub message: Option<String>,
    pub username: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RegenerateApiKeyResponse {
    pub success: bool,
    pub message: Option<String>,
    pub api_key: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UsernameAvailabilityResponse {
    pub success: bool,
    pub message: Option<String>,
    pub username: String,
    pub is_available: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ValidateEmailResponse {
    pub success: bool,
    pub message: Option<String>,
    pub email: String,
    pub is_valid: bool,
}

/// Uniform JSON failure envelope: `success` is always false, `failure` is the
/// machine-readable kind, `message` is for humans.
#[derive(Serialize, Deserialize, Debug)]
pub struct ApiFailure {
    pub success: bool,
    pub message: String,
    pub failure: String,
}

pub type ApiError = (Status, Json<ApiFailure>);

fn failure(status: Status, kind: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ApiFailure {
            success: false,
            message: message.into(),
            failure: kind.to_string(),
        }),
    )
}

pub fn auth_failure() -> ApiError {
    failure(
        Status::Unauthorized,
        "auth_failure",
        "User needs to be authenticated to complete this request",
    )
}

pub fn auth_failure_with(message: impl Into<String>) -> ApiError {
    failure(Status::Unauthorized, "auth_failure", message)
}

pub fn incomplete_params_failure() -> ApiError {
    failure(
        Status::BadRequest,
        "incomplete_params_failure",
        "Required params are missing",
    )
}

pub fn nonexistent_paste_failure() -> ApiError {
    failure(
        Status::NotFound,
        "nonexistent_paste_failure",
        "The requested paste does not exist",
    )
}

pub fn nonexistent_user_failure() -> ApiError {
    failure(
        Status::NotFound,
        "nonexistent_user_failure",
        "User does not exist",
    )
}

pub fn username_not_available_failure() -> ApiError {
    failure(
        Status::BadRequest,
        "username_not_available_failure",
        "Username is not available",
    )
}

pub fn invalid_email_failure(email: &str) -> ApiError {
    failure(
        Status::BadRequest,
        "invalid_email_failure",
        format!("Email address {email} is invalid"),
    )
}

pub fn password_mismatch_failure() -> ApiError {
    failure(
        Status::Unauthorized,
        "password_mismatch_failure",
        "Password-protected paste: either no password or wrong password supplied",
    )
}

pub fn attachment_too_large_failure(file_name: &str) -> ApiError {
    failure(
        Status::BadRequest,
        "attachment_too_large_failure",
        format!("Attachment {file_name} exceeds the maximum allowed size"),
    )
}

pub fn attachments_disabled_failure() -> ApiError {
    failure(
        Status::BadRequest,
        "attachments_disabled_failure",
        "Paste attachments are disabled on this server",
    )
}

pub fn user_registration_disabled_failure() -> ApiError {
    failure(
        Status::Forbidden,
        "user_registration_disabled_failure",
        "User registration is disabled on this server",
    )
}

pub fn undefined_failure(err: &dyn std::fmt::Display) -> ApiError {
    // Operators get the detail; clients get a generic envelope.
    log::error!("unhandled failure while serving request: {err}");
    failure(
        Status::InternalServerError,
        "undefined_failure",
        "Undefined error occurred",
    )
}
