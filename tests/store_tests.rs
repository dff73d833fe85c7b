use snipbin::server::time::current_timestamp;
use snipbin::{
    create_datastore, random_alphanumeric, NewAttachment, NewPaste, NewUser, SharedDatastore,
    StoreError, UserDetailsUpdate, DEFAULT_LANGUAGE, DEFAULT_TITLE,
};

fn store() -> SharedDatastore {
    create_datastore(std::env::temp_dir().join(format!("snipbin-store-{}", random_alphanumeric(8))))
}

#[tokio::test]
async fn create_paste_fills_defaults() {
    let store = store();
    let paste = store
        .create_paste(NewPaste {
            contents: "plain contents".to_string(),
            ..NewPaste::default()
        })
        .await
        .unwrap();
    assert!(paste.is_active);
    assert_eq!(paste.title, DEFAULT_TITLE);
    assert_eq!(paste.language, DEFAULT_LANGUAGE);
    assert_eq!(paste.views, 0);
    assert!(paste.password_hash.is_none());
    assert!(!paste.deactivation_token.is_empty());
    assert!(paste.post_time > 0);
}

#[tokio::test]
async fn blank_title_and_language_fall_back() {
    let store = store();
    let paste = store
        .create_paste(NewPaste {
            contents: "x".to_string(),
            title: Some("   ".to_string()),
            language: Some(String::new()),
            ..NewPaste::default()
        })
        .await
        .unwrap();
    assert_eq!(paste.title, DEFAULT_TITLE);
    assert_eq!(paste.language, DEFAULT_LANGUAGE);
}

#[tokio::test]
async fn expired_pastes_vanish_from_active_reads_but_not_archival_ones() {
    let store = store();
    let paste = store
        .create_paste(NewPaste {
            contents: "short-lived".to_string(),
            expiry_time: Some(current_timestamp() - 10),
            ..NewPaste::default()
        })
        .await
        .unwrap();

    assert!(matches!(
        store.get_paste(paste.paste_id, true).await,
        Err(StoreError::PasteNotFound(_))
    ));
    // The row itself survives; only the active view hides it.
    let archived = store.get_paste(paste.paste_id, false).await.unwrap();
    assert!(archived.is_active);
    assert!(!store.paste_is_active(paste.paste_id).await);
    assert!(store.recent_pastes(0, 10).await.is_empty());
}

#[tokio::test]
async fn deactivation_is_idempotent_and_keeps_token_and_owner() {
    let store = store();
    let owner = store
        .create_user(NewUser {
            username: "owner".to_string(),
            password: "pw".to_string(),
            signup_ip: "127.0.0.1".to_string(),
            ..NewUser::default()
        })
        .await
        .unwrap();
    let paste = store
        .create_paste(NewPaste {
            contents: "x".to_string(),
            user_id: Some(owner.user_id),
            ..NewPaste::default()
        })
        .await
        .unwrap();
    let token = paste.deactivation_token.clone();

    let first = store.deactivate_paste(paste.paste_id).await.unwrap();
    let second = store.deactivate_paste(paste.paste_id).await.unwrap();
    assert!(!first.is_active);
    assert!(!second.is_active);
    // Deactivation flips the flag and nothing else.
    assert_eq!(second.deactivation_token, token);
    assert_eq!(second.user_id, Some(owner.user_id));
}

#[tokio::test]
async fn view_increments_accumulate() {
    let store = store();
    let paste = store
        .create_paste(NewPaste {
            contents: "x".to_string(),
            ..NewPaste::default()
        })
        .await
        .unwrap();
    for _ in 0..5 {
        store.increment_paste_views(paste.paste_id).await.unwrap();
    }
    let paste = store.get_paste(paste.paste_id, false).await.unwrap();
    assert_eq!(paste.views, 5);
}

#[tokio::test]
async fn set_password_gates_and_blank_clears() {
    let store = store();
    let paste = store
        .create_paste(NewPaste {
            contents: "x".to_string(),
            ..NewPaste::default()
        })
        .await
        .unwrap();

    let locked = store
        .set_paste_password(paste.paste_id, Some("secret"))
        .await
        .unwrap();
    assert!(locked.password_hash.is_some());

    let unlocked = store
        .set_paste_password(paste.paste_id, Some(""))
        .await
        .unwrap();
    assert!(unlocked.password_hash.is_none());
}

#[tokio::test]
async fn recent_orders_newest_first_and_paginates() {
    let store = store();
    let mut ids = Vec::new();
    for n in 0..5 {
        let paste = store
            .create_paste(NewPaste {
                contents: format!("paste {n}"),
                ..NewPaste::default()
            })
            .await
            .unwrap();
        ids.push(paste.paste_id);
    }

    let page = store.recent_pastes(0, 2).await;
    assert_eq!(page.len(), 2);
    // Same-second posts break ties on id, so newest insertion still leads.
    assert_eq!(page[0].paste_id, ids[4]);
    assert_eq!(page[1].paste_id, ids[3]);

    let last = store.recent_pastes(2, 2).await;
    assert_eq!(last.len(), 1);
    assert!(store.recent_pastes(3, 2).await.is_empty());
    assert!(store.recent_pastes(1000, 2).await.is_empty());
}

#[tokio::test]
async fn top_orders_by_views() {
    let store = store();
    let quiet = store
        .create_paste(NewPaste {
            contents: "quiet".to_string(),
            ..NewPaste::default()
        })
        .await
        .unwrap();
    let popular = store
        .create_paste(NewPaste {
            contents: "popular".to_string(),
            ..NewPaste::default()
        })
        .await
        .unwrap();
    for _ in 0..4 {
        store.increment_paste_views(popular.paste_id).await.unwrap();
    }

    let top = store.top_pastes(0, 10).await;
    assert_eq!(top[0].paste_id, popular.paste_id);
    assert_eq!(top[1].paste_id, quiet.paste_id);
}

#[tokio::test]
async fn usernames_are_lowercased_and_unique() {
    let store = store();
    let user = store
        .create_user(NewUser {
            username: "CamelCase".to_string(),
            password: "pw".to_string(),
            signup_ip: "127.0.0.1".to_string(),
            ..NewUser::default()
        })
        .await
        .unwrap();
    assert_eq!(user.username, "camelcase");

    let duplicate = store
        .create_user(NewUser {
            username: "cameLcasE".to_string(),
            password: "pw".to_string(),
            signup_ip: "127.0.0.1".to_string(),
            ..NewUser::default()
        })
        .await;
    assert!(matches!(duplicate, Err(StoreError::UsernameTaken(_))));

    assert!(!store.is_username_available("CAMELCASE").await);
    assert!(store.is_username_available("other").await);

    let found = store.get_user_by_username("CamelCase", true).await.unwrap();
    assert_eq!(found.user_id, user.user_id);
}

#[tokio::test]
async fn username_collision_reported_before_bad_email() {
    let store = store();
    store
        .create_user(NewUser {
            username: "taken".to_string(),
            password: "pw".to_string(),
            signup_ip: "127.0.0.1".to_string(),
            ..NewUser::default()
        })
        .await
        .unwrap();

    let result = store
        .create_user(NewUser {
            username: "taken".to_string(),
            password: "pw".to_string(),
            signup_ip: "127.0.0.1".to_string(),
            email: Some("not-an-email".to_string()),
            ..NewUser::default()
        })
        .await;
    assert!(matches!(result, Err(StoreError::UsernameTaken(_))));

    let result = store
        .create_user(NewUser {
            username: "fresh".to_string(),
            password: "pw".to_string(),
            signup_ip: "127.0.0.1".to_string(),
            email: Some("not-an-email".to_string()),
            ..NewUser::default()
        })
        .await;
    assert!(matches!(result, Err(StoreError::InvalidEmail(_))));
    // The failed attempt must not have reserved the username.
    assert!(store.is_username_available("fresh").await);
}

#[tokio::test]
async fn authentication_checks_password_and_activity() {
    let store = store();
    let user = store
        .create_user(NewUser {
            username: "alice".to_string(),
            password: "wonderland".to_string(),
            signup_ip: "127.0.0.1".to_string(),
            ..NewUser::default()
        })
        .await
        .unwrap();

    assert!(store.authenticate_user("alice", "wonderland").await.unwrap());
    assert!(store.authenticate_user("ALICE", "wonderland").await.unwrap());
    assert!(!store.authenticate_user("alice", "queen").await.unwrap());
    assert!(matches!(
        store.authenticate_user("nobody", "pw").await,
        Err(StoreError::UserNotFound(_))
    ));

    store.deactivate_user(user.user_id).await.unwrap();
    assert!(!store.authenticate_user("alice", "wonderland").await.unwrap());
}

#[tokio::test]
async fn update_details_is_partial() {
    let store = store();
    let user = store
        .create_user(NewUser {
            username: "bob".to_string(),
            password: "builder".to_string(),
            signup_ip: "127.0.0.1".to_string(),
            name: Some("Bob".to_string()),
            email: Some("bob@example.com".to_string()),
        })
        .await
        .unwrap();

    let updated = store
        .update_user_details(
            user.user_id,
            UserDetailsUpdate {
                name: Some("Robert".to_string()),
                ..UserDetailsUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name.as_deref(), Some("Robert"));
    assert_eq!(updated.email.as_deref(), Some("bob@example.com"));

    let rejected = store
        .update_user_details(
            user.user_id,
            UserDetailsUpdate {
                email: Some("busted".to_string()),
                ..UserDetailsUpdate::default()
            },
        )
        .await;
    assert!(matches!(rejected, Err(StoreError::InvalidEmail(_))));

    let repassworded = store
        .update_user_details(
            user.user_id,
            UserDetailsUpdate {
                new_password: Some("new-pw".to_string()),
                ..UserDetailsUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_ne!(repassworded.password_hash, user.password_hash);
    assert!(store.authenticate_user("bob", "new-pw").await.unwrap());
    assert!(!store.authenticate_user("bob", "builder").await.unwrap());
}

#[tokio::test]
async fn regenerating_the_api_key_invalidates_the_old_one() {
    let store = store();
    let user = store
        .create_user(NewUser {
            username: "carol".to_string(),
            password: "pw".to_string(),
            signup_ip: "127.0.0.1".to_string(),
            ..NewUser::default()
        })
        .await
        .unwrap();

    let rotated = store.regenerate_api_key(user.user_id).await.unwrap();
    assert_ne!(rotated.api_key, user.api_key);
    assert!(matches!(
        store.get_user_by_api_key(&user.api_key, true).await,
        Err(StoreError::UserNotFound(_))
    ));
    let found = store.get_user_by_api_key(&rotated.api_key, true).await.unwrap();
    assert_eq!(found.user_id, user.user_id);
}

#[tokio::test]
async fn user_deactivation_cascades_to_active_pastes() {
    let store = store();
    let user = store
        .create_user(NewUser {
            username: "dave".to_string(),
            password: "pw".to_string(),
            signup_ip: "127.0.0.1".to_string(),
            ..NewUser::default()
        })
        .await
        .unwrap();
    let mine = store
        .create_paste(NewPaste {
            contents: "mine".to_string(),
            user_id: Some(user.user_id),
            ..NewPaste::default()
        })
        .await
        .unwrap();
    let anonymous = store
        .create_paste(NewPaste {
            contents: "not mine".to_string(),
            ..NewPaste::default()
        })
        .await
        .unwrap();

    store.deactivate_user(user.user_id).await.unwrap();

    assert!(matches!(
        store.get_user_by_id(user.user_id, true).await,
        Err(StoreError::UserNotFound(_))
    ));
    assert!(!store.paste_is_active(mine.paste_id).await);
    assert!(store.paste_is_active(anonymous.paste_id).await);
    assert!(store.pastes_for_user(user.user_id, true).await.is_empty());
    // The archival view still shows the deactivated pastes.
    assert_eq!(store.pastes_for_user(user.user_id, false).await.len(), 1);
}

#[tokio::test]
async fn attachments_round_trip_through_disk() {
    let store = store();
    let paste = store
        .create_paste(NewPaste {
            contents: "with attachment".to_string(),
            ..NewPaste::default()
        })
        .await
        .unwrap();

    let attachment = store
        .create_attachment(NewAttachment {
            paste_id: paste.paste_id,
            file_name: "report.txt".to_string(),
            mime_type: "text/plain".to_string(),
            payload: b"attachment payload".to_vec(),
        })
        .await
        .unwrap();
    assert_eq!(attachment.file_name, "report.txt");
    assert_eq!(attachment.file_size, 18);
    assert_ne!(attachment.hash_name, attachment.file_name);

    let listed = store
        .attachments_for_paste(paste.paste_id, true)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    let by_name = store
        .get_attachment_by_name(paste.paste_id, "report.txt", true)
        .await
        .unwrap();
    assert_eq!(by_name.attachment_id, attachment.attachment_id);

    let payload = store.read_attachment_payload(&attachment).await.unwrap();
    assert_eq!(payload, b"attachment payload");
}

#[tokio::test]
async fn attachment_file_names_are_sanitized() {
    let store = store();
    let paste = store
        .create_paste(NewPaste {
            contents: "x".to_string(),
            ..NewPaste::default()
        })
        .await
        .unwrap();

    let attachment = store
        .create_attachment(NewAttachment {
            paste_id: paste.paste_id,
            file_name: "../../etc/passwd".to_string(),
            mime_type: "text/plain".to_string(),
            payload: b"harmless".to_vec(),
        })
        .await
        .unwrap();
    assert_eq!(attachment.file_name, ".._.._etc_passwd");
    // Lookups go through the same sanitization, so the original spelling
    // still resolves.
    let found = store
        .get_attachment_by_name(paste.paste_id, "../../etc/passwd", true)
        .await
        .unwrap();
    assert_eq!(found.attachment_id, attachment.attachment_id);
}

#[tokio::test]
async fn attachment_id_lookup_gates_on_the_parent_paste() {
    let store = store();
    let paste = store
        .create_paste(NewPaste {
            contents: "x".to_string(),
            ..NewPaste::default()
        })
        .await
        .unwrap();
    let attachment = store
        .create_attachment(NewAttachment {
            paste_id: paste.paste_id,
            file_name: "data.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            payload: b"bytes".to_vec(),
        })
        .await
        .unwrap();

    let found = store
        .get_attachment_by_id(attachment.attachment_id, true)
        .await
        .unwrap();
    assert_eq!(found.file_name, "data.bin");

    store.deactivate_paste(paste.paste_id).await.unwrap();
    // A deactivated parent hides the attachment from active-only reads; the
    // archival view still resolves it.
    assert!(matches!(
        store.get_attachment_by_id(attachment.attachment_id, true).await,
        Err(StoreError::AttachmentNotFound(_))
    ));
    let archived = store
        .get_attachment_by_id(attachment.attachment_id, false)
        .await
        .unwrap();
    assert_eq!(archived.attachment_id, attachment.attachment_id);

    assert!(matches!(
        store.get_attachment_by_id(9999, true).await,
        Err(StoreError::AttachmentNotFound(_))
    ));
}

#[tokio::test]
async fn attachments_require_an_active_paste() {
    let store = store();
    let paste = store
        .create_paste(NewPaste {
            contents: "x".to_string(),
            ..NewPaste::default()
        })
        .await
        .unwrap();
    store.deactivate_paste(paste.paste_id).await.unwrap();

    let result = store
        .create_attachment(NewAttachment {
            paste_id: paste.paste_id,
            file_name: "late.txt".to_string(),
            mime_type: "text/plain".to_string(),
            payload: b"too late".to_vec(),
        })
        .await;
    assert!(matches!(result, Err(StoreError::PasteNotFound(_))));

    let missing = store
        .create_attachment(NewAttachment {
            paste_id: 9999,
            file_name: "orphan.txt".to_string(),
            mime_type: "text/plain".to_string(),
            payload: b"no paste".to_vec(),
        })
        .await;
    assert!(matches!(missing, Err(StoreError::PasteNotFound(_))));
}
