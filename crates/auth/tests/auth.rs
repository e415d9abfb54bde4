// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use std::time::Duration;

use quill_auth::{AuthService, ClientInfo, LoginRequest, RegisterRequest, SessionStore};
use quill_core::model::UserSettingsPatch;
use quill_store::KvStore;
use quill_type::Error;

fn service() -> AuthService {
	service_with_timeout(Duration::from_secs(3600))
}

fn service_with_timeout(timeout: Duration) -> AuthService {
	let kv = KvStore::in_memory();
	let sessions = SessionStore::new(kv.clone(), timeout);
	AuthService::new(kv, sessions)
}

fn register_request(username: &str, email: Option<&str>) -> RegisterRequest {
	RegisterRequest {
		username: username.to_string(),
		email: email.map(str::to_string),
		password: "alice123abc".to_string(),
		display_name: None,
	}
}

#[tokio::test]
async fn test_register_then_login_with_username_and_email() {
	let auth = service();
	let (user, session) = auth
		.register(register_request("alice", Some("alice@example.com")), ClientInfo::default())
		.await
		.unwrap();
	assert_eq!(user.username, "alice");
	assert!(session.expires_at > session.created_at);

	let (by_username, _) = auth
		.login(
			LoginRequest { identifier: "alice".into(), password: "alice123abc".into() },
			ClientInfo::default(),
		)
		.await
		.unwrap();
	assert_eq!(by_username.id, user.id);

	let (by_email, _) = auth
		.login(
			LoginRequest { identifier: "alice@example.com".into(), password: "alice123abc".into() },
			ClientInfo::default(),
		)
		.await
		.unwrap();
	assert_eq!(by_email.id, user.id);

	let wrong = auth
		.login(
			LoginRequest { identifier: "alice".into(), password: "wrong123abc".into() },
			ClientInfo::default(),
		)
		.await;
	assert!(matches!(wrong, Err(Error::InvalidCredentials)));
}

#[tokio::test]
async fn test_login_failures_are_opaque() {
	let auth = service();
	auth.register(register_request("alice", None), ClientInfo::default()).await.unwrap();

	for (identifier, password) in
		[("nobody", "alice123abc"), ("alice", "bad"), ("nobody@example.com", "alice123abc")]
	{
		let result = auth
			.login(
				LoginRequest { identifier: identifier.into(), password: password.into() },
				ClientInfo::default(),
			)
			.await;
		assert!(matches!(result, Err(Error::InvalidCredentials)), "{identifier}");
	}
}

#[tokio::test]
async fn test_concurrent_duplicate_registration_commits_exactly_once() {
	let auth = service();
	let first = auth.register(register_request("bob", Some("bob@example.com")), ClientInfo::default());
	let second =
		auth.register(register_request("bob", Some("bob@elsewhere.com")), ClientInfo::default());
	let (first, second) = tokio::join!(first, second);

	let succeeded = [&first, &second].iter().filter(|r| r.is_ok()).count();
	assert_eq!(succeeded, 1);
	for result in [first, second] {
		if let Err(err) = result {
			assert!(matches!(err, Error::DuplicateResource(_)), "{err}");
		}
	}
}

#[tokio::test]
async fn test_registration_validates_inputs() {
	let auth = service();
	let mut weak = register_request("carol", None);
	weak.password = "letters-only".into();
	assert!(matches!(
		auth.register(weak, ClientInfo::default()).await,
		Err(Error::InvalidInput(_))
	));

	let mut short = register_request("cb", None);
	short.password = "carol123abc".into();
	assert!(matches!(
		auth.register(short, ClientInfo::default()).await,
		Err(Error::InvalidInput(_))
	));

	assert!(matches!(
		auth.register(register_request("carol", Some("not-an-email")), ClientInfo::default())
			.await,
		Err(Error::InvalidInput(_))
	));
}

#[tokio::test]
async fn test_identify_pipeline_and_revocation() {
	let auth = service();
	let (user, session) =
		auth.register(register_request("dave", None), ClientInfo::default()).await.unwrap();

	let identified = auth.identify(&session.id).await.unwrap();
	assert_eq!(identified.id, user.id);

	auth.sessions().revoke(&session.id).await.unwrap();
	assert!(matches!(auth.identify(&session.id).await, Err(Error::AuthenticationRequired)));
	// Revoking again is idempotent.
	auth.sessions().revoke(&session.id).await.unwrap();
}

#[tokio::test]
async fn test_touch_never_extends_the_lifetime() {
	let auth = service();
	let (_, session) =
		auth.register(register_request("erin", None), ClientInfo::default()).await.unwrap();

	auth.sessions().touch(&session.id).await.unwrap();
	let touched = auth.sessions().resolve(&session.id).await.unwrap().unwrap();
	assert_eq!(touched.expires_at, session.expires_at);
	assert!(touched.updated_at >= session.updated_at);
}

#[tokio::test]
async fn test_expired_sessions_resolve_as_absent() {
	let auth = service_with_timeout(Duration::ZERO);
	let (_, session) =
		auth.register(register_request("frank", None), ClientInfo::default()).await.unwrap();
	assert!(auth.sessions().resolve(&session.id).await.unwrap().is_none());
	assert!(matches!(auth.identify(&session.id).await, Err(Error::AuthenticationRequired)));
}

#[tokio::test]
async fn test_sweep_removes_expired_in_batches() {
	let kv = KvStore::in_memory();
	let expired = SessionStore::new(kv.clone(), Duration::ZERO);
	let live = SessionStore::new(kv.clone(), Duration::from_secs(3600));

	let user = uuid::Uuid::new_v4();
	for _ in 0..120 {
		expired.issue(user, ClientInfo::default()).await.unwrap();
	}
	let keeper = live.issue(user, ClientInfo::default()).await.unwrap();

	let swept = live.sweep().await.unwrap();
	assert_eq!(swept, 120);
	assert!(live.resolve(&keeper.id).await.unwrap().is_some());
	assert_eq!(live.sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn test_profile_update_merges_settings_field_wise() {
	let auth = service();
	let (user, _) =
		auth.register(register_request("grace", None), ClientInfo::default()).await.unwrap();

	let updated = auth
		.update_profile(
			user.id,
			quill_auth::ProfilePatch {
				display_name: Some("Grace H.".into()),
				settings: Some(UserSettingsPatch {
					theme: Some("dark".into()),
					..Default::default()
				}),
			},
		)
		.await
		.unwrap();
	assert_eq!(updated.display_name, "Grace H.");
	assert_eq!(updated.settings.theme, "dark");
	assert_eq!(updated.settings.language, "en");

	let reloaded = auth.get_user(user.id).await.unwrap();
	assert_eq!(reloaded.settings.theme, "dark");
}

#[tokio::test]
async fn test_change_password_requires_current() {
	let auth = service();
	let (user, _) =
		auth.register(register_request("heidi", None), ClientInfo::default()).await.unwrap();

	assert!(matches!(
		auth.change_password(user.id, "wrong123abc", "next456def").await,
		Err(Error::InvalidCredentials)
	));
	assert!(matches!(
		auth.change_password(user.id, "alice123abc", "weak").await,
		Err(Error::InvalidInput(_))
	));
	auth.change_password(user.id, "alice123abc", "next456def").await.unwrap();

	let login = auth
		.login(
			LoginRequest { identifier: "heidi".into(), password: "next456def".into() },
			ClientInfo::default(),
		)
		.await;
	assert!(login.is_ok());
}

#[tokio::test]
async fn test_deactivation_revokes_sessions_and_blocks_login() {
	let auth = service();
	let (user, session) =
		auth.register(register_request("ivan", None), ClientInfo::default()).await.unwrap();

	auth.deactivate(user.id).await.unwrap();
	assert!(matches!(auth.identify(&session.id).await, Err(Error::AuthenticationRequired)));
	let login = auth
		.login(
			LoginRequest { identifier: "ivan".into(), password: "alice123abc".into() },
			ClientInfo::default(),
		)
		.await;
	assert!(matches!(login, Err(Error::InvalidCredentials)));
}
