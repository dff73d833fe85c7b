use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use rocket::http::{ContentType, Status};
use rocket::response::content;
use rocket::serde::json::Json;
use rocket::{get, post, routes, Build, Rocket, State};

use crate::config::AppConfig;
use crate::server::crypto::IdCodec;
use crate::server::models as api;
use crate::server::models::{
    ApiError, ApiKeyRequest, AttachmentDetails, CreateUserRequest, CreateUserResponse,
    DeactivatePasteRequest, PasteActionResponse, PasteDetails, PasteDetailsRequest,
    PasteDetailsResponse, PasteListRequest, PasteListResponse, RegenerateApiKeyResponse,
    SetPasswordRequest, SubmitPasteRequest, SubmitPasteResponse, UpdateUserDetailsRequest,
    UpdateUserDetailsResponse, UserActionResponse, UsernameAvailabilityRequest,
    UsernameAvailabilityResponse, ValidateEmailRequest, ValidateEmailResponse,
};
use crate::server::policy::{self, Caller, DeactivationDenial};
use crate::{
    create_datastore, is_email_address_valid, NewAttachment, NewPaste, NewUser, Paste,
    SharedDatastore, StoreError, UserDetailsUpdate,
};

pub fn build_rocket(store: SharedDatastore, config: AppConfig) -> Rocket<Build> {
    let codec = IdCodec::new(&config);
    rocket::build().manage(store).manage(codec).manage(config).mount(
        "/",
        routes![
            submit_paste,
            deactivate_paste,
            set_paste_password,
            paste_details,
            recent_pastes,
            top_pastes,
            user_pastes,
            create_user,
            update_user_details,
            deactivate_user,
            regenerate_api_key,
            check_username_availability,
            validate_email_address,
            paste_raw,
            attachment_download,
        ],
    )
}

pub async fn launch(config: AppConfig) -> Result<(), rocket::Error> {
    let rocket_config = rocket::Config {
        address: config.address,
        port: config.port,
        ..rocket::Config::default()
    };
    let store = create_datastore(config.attachments_dir.clone());
    build_rocket(store, config)
        .configure(rocket_config)
        .launch()
        .await?;
    Ok(())
}

fn map_store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::PasteNotFound(_) | StoreError::AttachmentNotFound(_) => {
            api::nonexistent_paste_failure()
        }
        StoreError::UserNotFound(_) => api::nonexistent_user_failure(),
        StoreError::UsernameTaken(_) => api::username_not_available_failure(),
        StoreError::InvalidEmail(email) => api::invalid_email_failure(&email),
        err @ StoreError::Storage(_) => api::undefined_failure(&err),
    }
}

/// Resolves the caller from an optional `api_key` body field. A key that
/// doesn't map to an active user is an authentication failure, not anonymity.
async fn resolve_caller(
    store: &SharedDatastore,
    api_key: Option<&str>,
) -> Result<Caller, ApiError> {
    match api_key {
        None => Ok(Caller::Anonymous),
        Some(key) => match store.get_user_by_api_key(key, true).await {
            Ok(user) => Ok(Caller::User(user)),
            Err(StoreError::UserNotFound(_)) => Err(api::auth_failure()),
            Err(err) => Err(api::undefined_failure(&err)),
        },
    }
}

fn require_user(caller: &Caller) -> Result<&crate::User, ApiError> {
    caller.user().ok_or_else(api::auth_failure)
}

fn decode_paste_id(codec: &IdCodec, raw: &str) -> Result<i64, ApiError> {
    // Malformed and nonexistent ids are indistinguishable to the client.
    codec
        .decode(raw, false)
        .map_err(|_| api::nonexistent_paste_failure())
}

async fn fetch_active_paste(
    store: &SharedDatastore,
    codec: &IdCodec,
    raw_id: &str,
) -> Result<Paste, ApiError> {
    let paste_id = decode_paste_id(codec, raw_id)?;
    store
        .get_paste(paste_id, true)
        .await
        .map_err(map_store_error)
}

async fn poster_username(store: &SharedDatastore, paste: &Paste) -> Result<String, ApiError> {
    match paste.user_id {
        None => Ok("Anonymous".to_string()),
        Some(user_id) => store
            .get_user_by_id(user_id, false)
            .await
            .map(|user| user.username)
            .map_err(map_store_error),
    }
}

#[post("/api/paste/submit", data = "<body>")]
async fn submit_paste(
    store: &State<SharedDatastore>,
    codec: &State<IdCodec>,
    config: &State<AppConfig>,
    body: Json<SubmitPasteRequest>,
) -> Result<Json<SubmitPasteResponse>, ApiError> {
    let body = body.into_inner();
    let contents = match body.contents {
        Some(contents) if !contents.is_empty() => contents,
        _ => return Err(api::incomplete_params_failure()),
    };

    let caller = resolve_caller(store, body.api_key.as_deref()).await?;
    if config.require_login_to_paste && caller.user().is_none() {
        return Err(api::auth_failure_with(
            "This server requires login to submit pastes",
        ));
    }
    if let Some(raw_user_id) = body.user_id.as_deref() {
        let requested = codec
            .decode(raw_user_id, true)
            .map_err(|_| api::nonexistent_user_failure())?;
        if !policy::submission_user_allowed(&caller, Some(requested)) {
            return Err(api::auth_failure_with(
                "Cannot submit a paste on behalf of another user",
            ));
        }
    }

    let uploads = body.attachments.unwrap_or_default();
    if !uploads.is_empty() && !config.enable_paste_attachments {
        return Err(api::attachments_disabled_failure());
    }
    let mut payloads = Vec::with_capacity(uploads.len());
    for upload in &uploads {
        if upload.name.is_empty() {
            return Err(api::incomplete_params_failure());
        }
        let payload = BASE64_STANDARD
            .decode(upload.data.as_bytes())
            .map_err(|_| api::incomplete_params_failure())?;
        let declared = upload.size.unwrap_or(payload.len() as u64);
        if config.max_attachment_size > 0
            && (payload.len() as u64 > config.max_attachment_size
                || declared > config.max_attachment_size)
        {
            return Err(api::attachment_too_large_failure(&upload.name));
        }
        payloads.push(payload);
    }

    let paste = store
        .create_paste(NewPaste {
            contents,
            user_id: caller.user_id(),
            expiry_time: body.expiry_time,
            title: body.title,
            language: body.language,
            password: body.password.filter(|p| !p.is_empty()),
            is_api_post: true,
        })
        .await
        .map_err(map_store_error)?;

    let mut attachments = Vec::with_capacity(uploads.len());
    for (upload, payload) in uploads.into_iter().zip(payloads) {
        let attachment = store
            .create_attachment(NewAttachment {
                paste_id: paste.paste_id,
                file_name: upload.name,
                mime_type: upload
                    .mime_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                payload,
            })
            .await
            .map_err(map_store_error)?;
        attachments.push(AttachmentDetails::from(&attachment));
    }

    let details = PasteDetails::from_paste(&paste, codec)
        .with_poster(poster_username(store, &paste).await?)
        .with_deactivation_token(paste.deactivation_token.clone())
        .with_attachments(attachments);
    Ok(Json(SubmitPasteResponse {
        success: true,
        message: None,
        details,
    }))
}

#[post("/api/paste/deactivate", data = "<body>")]
async fn deactivate_paste(
    store: &State<SharedDatastore>,
    codec: &State<IdCodec>,
    body: Json<DeactivatePasteRequest>,
) -> Result<Json<PasteActionResponse>, ApiError> {
    let body = body.into_inner();
    let raw_id = body.paste_id.ok_or_else(api::incomplete_params_failure)?;
    let paste = fetch_active_paste(store, codec, &raw_id).await?;
    let caller = resolve_caller(store, body.api_key.as_deref()).await?;

    policy::check_deactivation(&caller, body.deactivation_token.as_deref(), &paste).map_err(
        |denial| {
            api::auth_failure_with(match denial {
                DeactivationDenial::NotOwner => "User does not own the requested paste",
                DeactivationDenial::BadToken => "Deactivation token is invalid",
            })
        },
    )?;

    let paste = store
        .deactivate_paste(paste.paste_id)
        .await
        .map_err(map_store_error)?;
    Ok(Json(PasteActionResponse {
        success: true,
        message: None,
        paste_id: codec.represent(paste.paste_id).into_string(),
    }))
}

#[post("/api/paste/set_password", data = "<body>")]
async fn set_paste_password(
    store: &State<SharedDatastore>,
    codec: &State<IdCodec>,
    body: Json<SetPasswordRequest>,
) -> Result<Json<PasteActionResponse>, ApiError> {
    let body = body.into_inner();
    let raw_id = body.paste_id.ok_or_else(api::incomplete_params_failure)?;
    // A blank password is a valid request meaning "remove"; an absent field
    // is not.
    let password = body.password.ok_or_else(api::incomplete_params_failure)?;

    let caller = resolve_caller(store, body.api_key.as_deref()).await?;
    require_user(&caller)?;
    let paste = fetch_active_paste(store, codec, &raw_id).await?;
    if !policy::can_set_password(&caller, &paste) {
        return Err(api::auth_failure_with(
            "User does not own the specified paste",
        ));
    }

    let paste = store
        .set_paste_password(paste.paste_id, Some(password.as_str()))
        .await
        .map_err(map_store_error)?;
    Ok(Json(PasteActionResponse {
        success: true,
        message: None,
        paste_id: codec.represent(paste.paste_id).into_string(),
    }))
}

#[post("/api/paste/details", data = "<body>")]
async fn paste_details(
    store: &State<SharedDatastore>,
    codec: &State<IdCodec>,
    body: Json<PasteDetailsRequest>,
) -> Result<Json<PasteDetailsResponse>, ApiError> {
    let body = body.into_inner();
    let raw_id = body.paste_id.ok_or_else(api::incomplete_params_failure)?;
    let paste = fetch_active_paste(store, codec, &raw_id).await?;

    if !policy::can_reveal_content(&paste, body.password.as_deref()) {
        return Err(api::password_mismatch_failure());
    }

    let attachments = store
        .attachments_for_paste(paste.paste_id, true)
        .await
        .map_err(map_store_error)?
        .iter()
        .map(AttachmentDetails::from)
        .collect();
    let details = PasteDetails::from_paste(&paste, codec)
        .with_poster(poster_username(store, &paste).await?)
        .with_attachments(attachments);
    Ok(Json(PasteDetailsResponse {
        success: true,
        message: None,
        details,
    }))
}

#[post("/api/paste/recent", data = "<body>")]
async fn recent_pastes(
    store: &State<SharedDatastore>,
    codec: &State<IdCodec>,
    body: Json<PasteListRequest>,
) -> Result<Json<PasteListResponse>, ApiError> {
    let body = body.into_inner();
    let (page_num, num_per_page) = match (body.page_num, body.num_per_page) {
        (Some(page_num), Some(num_per_page)) => (page_num, num_per_page),
        _ => return Err(api::incomplete_params_failure()),
    };
    let pastes = store.recent_pastes(page_num, num_per_page).await;
    Ok(Json(paste_list_response(&pastes, codec)))
}

#[post("/api/paste/top", data = "<body>")]
async fn top_pastes(
    store: &State<SharedDatastore>,
    codec: &State<IdCodec>,
    body: Json<PasteListRequest>,
) -> Result<Json<PasteListResponse>, ApiError> {
    let body = body.into_inner();
    let (page_num, num_per_page) = match (body.page_num, body.num_per_page) {
        (Some(page_num), Some(num_per_page)) => (page_num, num_per_page),
        _ => return Err(api::incomplete_params_failure()),
    };
    let pastes = store.top_pastes(page_num, num_per_page).await;
    Ok(Json(paste_list_response(&pastes, codec)))
}

#[post("/api/paste/user_pastes", data = "<body>")]
async fn user_pastes(
    store: &State<SharedDatastore>,
    codec: &State<IdCodec>,
    body: Json<ApiKeyRequest>,
) -> Result<Json<PasteListResponse>, ApiError> {
    let caller = resolve_caller(store, body.api_key.as_deref()).await?;
    let user = require_user(&caller)?;
    let pastes = store.pastes_for_user(user.user_id, true).await;
    Ok(Json(paste_list_response(&pastes, codec)))
}

fn paste_list_response(pastes: &[Paste], codec: &IdCodec) -> PasteListResponse {
    PasteListResponse {
        success: true,
        message: None,
        pastes: pastes
            .iter()
            .map(|paste| PasteDetails::from_paste(paste, codec))
            .collect(),
    }
}

#[post("/api/user/create", data = "<body>")]
async fn create_user(
    store: &State<SharedDatastore>,
    config: &State<AppConfig>,
    body: Json<CreateUserRequest>,
    client_ip: Option<IpAddr>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    if !config.enable_user_registration {
        return Err(api::user_registration_disabled_failure());
    }
    let body = body.into_inner();
    let (username, password) = match (body.username, body.password) {
        (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
            (username, password)
        }
        _ => return Err(api::incomplete_params_failure()),
    };

    let user = store
        .create_user(NewUser {
            username,
            password,
            signup_ip: client_ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            name: body.name,
            email: body.email,
        })
        .await
        .map_err(map_store_error)?;

    Ok(Json(CreateUserResponse {
        success: true,
        message: None,
        username: user.username,
        name: user.name,
        email: user.email,
        api_key: user.api_key,
    }))
}

#[post("/api/user/update_details", data = "<body>")]
async fn update_user_details(
    store: &State<SharedDatastore>,
    body: Json<UpdateUserDetailsRequest>,
) -> Result<Json<UpdateUserDetailsResponse>, ApiError> {
    let body = body.into_inner();
    let caller = resolve_caller(store, body.api_key.as_deref()).await?;
    let user = require_user(&caller)?.clone();

    if body.new_password.as_deref().is_some_and(|p| !p.is_empty()) {
        let current = body.current_password.as_deref().unwrap_or_default();
        let authenticated = store
            .authenticate_user(&user.username, current)
            .await
            .map_err(map_store_error)?;
        if !authenticated {
            return Err(api::auth_failure_with(
                "Changing the password requires the correct current password",
            ));
        }
    }

    let user = store
        .update_user_details(
            user.user_id,
            UserDetailsUpdate {
                name: body.name,
                email: body.email,
                new_password: body.new_password,
            },
        )
        .await
        .map_err(map_store_error)?;
    Ok(Json(UpdateUserDetailsResponse {
        success: true,
        message: None,
        name: user.name,
        email: user.email,
    }))
}

#[post("/api/user/deactivate", data = "<body>")]
async fn deactivate_user(
    store: &State<SharedDatastore>,
    body: Json<ApiKeyRequest>,
) -> Result<Json<UserActionResponse>, ApiError> {
    let caller = resolve_caller(store, body.api_key.as_deref()).await?;
    let user = require_user(&caller)?.clone();
    let user = store
        .deactivate_user(user.user_id)
        .await
        .map_err(map_store_error)?;
    Ok(Json(UserActionResponse {
        success: true,
        message: None,
        username: user.username,
    }))
}

#[post("/api/user/regenerate_api_key", data = "<body>")]
async fn regenerate_api_key(
    store: &State<SharedDatastore>,
    body: Json<ApiKeyRequest>,
) -> Result<Json<RegenerateApiKeyResponse>, ApiError> {
    let caller = resolve_caller(store, body.api_key.as_deref()).await?;
    let user = require_user(&caller)?.clone();
    let user = store
        .regenerate_api_key(user.user_id)
        .await
        .map_err(map_store_error)?;
    Ok(Json(RegenerateApiKeyResponse {
        success: true,
        message: None,
        api_key: user.api_key,
    }))
}

#[post("/api/user/check_username_availability", data = "<body>")]
async fn check_username_availability(
    store: &State<SharedDatastore>,
    body: Json<UsernameAvailabilityRequest>,
) -> Result<Json<UsernameAvailabilityResponse>, ApiError> {
    let username = body
        .into_inner()
        .username
        .filter(|username| !username.is_empty())
        .ok_or_else(api::incomplete_params_failure)?;
    let is_available = store.is_username_available(&username).await;
    Ok(Json(UsernameAvailabilityResponse {
        success: true,
        message: None,
        username,
        is_available,
    }))
}

#[post("/api/user/validate_email_address", data = "<body>")]
async fn validate_email_address(
    body: Json<ValidateEmailRequest>,
) -> Result<Json<ValidateEmailResponse>, ApiError> {
    let email = body
        .into_inner()
        .email
        .ok_or_else(api::incomplete_params_failure)?;
    let is_valid = is_email_address_valid(&email);
    Ok(Json(ValidateEmailResponse {
        success: true,
        message: None,
        email,
        is_valid,
    }))
}

// Browser/curl-facing paths; errors are human-readable plaintext, not JSON.

type RawError = (Status, content::RawText<&'static str>);

const RAW_NOT_FOUND: &str = "This paste does not exist, has expired, or has been deactivated.\n";
const RAW_PASSWORD_REQUIRED: &str =
    "This paste is password-protected. Supply the correct password to view it.\n";
const RAW_INTERNAL_ERROR: &str = "Something went wrong serving this paste. Try again later.\n";

fn raw_not_found() -> RawError {
    (Status::NotFound, content::RawText(RAW_NOT_FOUND))
}

#[get("/paste/<paste_id>/raw?<password>")]
async fn paste_raw(
    store: &State<SharedDatastore>,
    codec: &State<IdCodec>,
    paste_id: String,
    password: Option<String>,
) -> Result<content::RawText<String>, RawError> {
    let id = codec.decode(&paste_id, false).map_err(|_| raw_not_found())?;
    let paste = store.get_paste(id, true).await.map_err(|_| raw_not_found())?;
    if !policy::can_reveal_content(&paste, password.as_deref()) {
        return Err((
            Status::Unauthorized,
            content::RawText(RAW_PASSWORD_REQUIRED),
        ));
    }
    // One successful raw request is exactly one view; the fetch above was
    // active-only, so expired or deactivated pastes never inflate the count.
    let paste = store.increment_paste_views(paste.paste_id).await.map_err(|err| {
        log::error!("failed to count view for paste {id}: {err}");
        (
            Status::InternalServerError,
            content::RawText(RAW_INTERNAL_ERROR),
        )
    })?;
    Ok(content::RawText(paste.contents))
}

#[get("/paste/<paste_id>/attachment/<file_name>?<password>")]
async fn attachment_download(
    store: &State<SharedDatastore>,
    codec: &State<IdCodec>,
    paste_id: String,
    file_name: String,
    password: Option<String>,
) -> Result<(ContentType, Vec<u8>), RawError> {
    let id = codec.decode(&paste_id, false).map_err(|_| raw_not_found())?;
    let paste = store.get_paste(id, true).await.map_err(|_| raw_not_found())?;
    if !policy::can_reveal_content(&paste, password.as_deref()) {
        return Err((
            Status::Unauthorized,
            content::RawText(RAW_PASSWORD_REQUIRED),
        ));
    }
    let attachment = store
        .get_attachment_by_name(paste.paste_id, &file_name, true)
        .await
        .map_err(|_| {
            (
                Status::NotFound,
                content::RawText("No attachment with that name exists for this paste.\n"),
            )
        })?;
    let payload = store
        .read_attachment_payload(&attachment)
        .await
        .map_err(|err| {
            log::error!(
                "failed to read attachment payload {}/{}: {err}",
                attachment.paste_id,
                attachment.hash_name
            );
            (
                Status::InternalServerError,
                content::RawText(RAW_INTERNAL_ERROR),
            )
        })?;
    let content_type =
        ContentType::parse_flexible(&attachment.mime_type).unwrap_or(ContentType::Binary);
    Ok((content_type, payload))
}
