// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

use once_cell::sync::Lazy;
use quill_core::model::{Session, User, UserSettingsPatch};
use quill_core::record::{decode_record, encode_record};
use quill_core::schema;
use quill_store::KvStore;
use quill_type::time::now_millis;
use quill_type::{Error, Result, Value};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::password::{hash_password, validate_strength, verify_password};
use crate::session::{ClientInfo, SessionStore};

/// Verified against when a login names an unknown account, so the failure
/// path costs one derivation either way.
static DUMMY_HASH: Lazy<String> = Lazy::new(|| hash_password("quill-timing-equalizer-0"));

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;

#[derive(Debug, Clone)]
pub struct RegisterRequest {
	pub username: String,
	pub email: Option<String>,
	pub password: String,
	pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
	/// Username or email.
	pub identifier: String,
	pub password: String,
}

/// Profile mutations never touch the username/email indices; index-bearing
/// fields change through dedicated flows.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
	pub display_name: Option<String>,
	pub settings: Option<UserSettingsPatch>,
}

#[derive(Clone)]
pub struct AuthService {
	kv: KvStore,
	sessions: SessionStore,
}

impl AuthService {
	pub fn new(kv: KvStore, sessions: SessionStore) -> AuthService {
		AuthService { kv, sessions }
	}

	pub fn sessions(&self) -> &SessionStore {
		&self.sessions
	}

	#[instrument(name = "auth::register", level = "debug", skip(self, request, client), fields(username = %request.username))]
	pub async fn register(
		&self,
		request: RegisterRequest,
		client: ClientInfo,
	) -> Result<(User, Session)> {
		validate_username(&request.username)?;
		if let Some(email) = &request.email {
			validate_email(email)?;
		}
		validate_strength(&request.password)?;

		// Fast-path probes; the atomic checks below are what actually
		// guarantee uniqueness under concurrency.
		if self.kv.get(&schema::user_by_username(&request.username)).await?.is_some() {
			return Err(Error::DuplicateResource("username".into()));
		}
		if let Some(email) = &request.email {
			if self.kv.get(&schema::user_by_email(email)).await?.is_some() {
				return Err(Error::DuplicateResource("email".into()));
			}
		}

		let now = now_millis();
		let user = User {
			id: Uuid::new_v4(),
			username: request.username.clone(),
			email: request.email.clone(),
			display_name: request.display_name.unwrap_or_else(|| request.username.clone()),
			password_hash: Some(hash_password(&request.password)),
			is_active: true,
			created_at: now,
			updated_at: now,
			settings: Default::default(),
		};

		let id_value = Value::text(user.id.to_string());
		let mut op = self
			.kv
			.atomic()
			.check(schema::user_by_id(user.id), None)
			.check(schema::user_by_username(&user.username), None)
			.set(schema::user_by_id(user.id), encode_record(&user)?)
			.set(schema::user_by_username(&user.username), id_value.clone());
		if let Some(email) = &user.email {
			op = op.check(schema::user_by_email(email), None).set(schema::user_by_email(email), id_value);
		}
		if !op.commit().await?.is_ok() {
			return Err(Error::DuplicateResource("username or email".into()));
		}

		info!(user = %user.id, username = %user.username, "user registered");
		let session = self.sessions.issue(user.id, client).await?;
		Ok((user, session))
	}

	/// Opaque on every failure path: an unknown identifier, an inactive
	/// account and a wrong password all cost one derivation and return
	/// `InvalidCredentials`.
	#[instrument(name = "auth::login", level = "debug", skip_all)]
	pub async fn login(&self, request: LoginRequest, client: ClientInfo) -> Result<(User, Session)> {
		let user = match self.lookup_identifier(&request.identifier).await? {
			Some(user) => user,
			None => {
				verify_password(&DUMMY_HASH, &request.password);
				return Err(Error::InvalidCredentials);
			}
		};
		let Some(stored) = user.password_hash.as_deref().filter(|_| user.is_active) else {
			verify_password(&DUMMY_HASH, &request.password);
			return Err(Error::InvalidCredentials);
		};
		if !verify_password(stored, &request.password) {
			return Err(Error::InvalidCredentials);
		}
		let session = self.sessions.issue(user.id, client).await?;
		Ok((user, session))
	}

	/// The request-to-identity pipeline the edge runs on every call: token
	/// to session to active user, touching the session on the way.
	pub async fn identify(&self, token: &str) -> Result<User> {
		let session =
			self.sessions.resolve(token).await?.ok_or(Error::AuthenticationRequired)?;
		let user = self.get_user(session.user_id).await.map_err(|err| match err {
			Error::NotFound(_) => Error::AuthenticationRequired,
			err => err,
		})?;
		if !user.is_active {
			return Err(Error::AuthenticationRequired);
		}
		self.sessions.touch(token).await?;
		Ok(user)
	}

	pub async fn get_user(&self, user_id: Uuid) -> Result<User> {
		let entry = self
			.kv
			.get(&schema::user_by_id(user_id))
			.await?
			.ok_or_else(|| Error::NotFound("user".into()))?;
		decode_record(&entry.value)
	}

	/// Plain read-modify-write: no indices change, so no atomic op.
	#[instrument(name = "auth::update_profile", level = "debug", skip(self, patch))]
	pub async fn update_profile(&self, user_id: Uuid, patch: ProfilePatch) -> Result<User> {
		let mut user = self.get_user(user_id).await?;
		if let Some(display_name) = patch.display_name {
			if display_name.trim().is_empty() {
				return Err(Error::InvalidInput("display name must not be empty".into()));
			}
			user.display_name = display_name;
		}
		if let Some(settings) = patch.settings {
			user.settings.apply(settings);
		}
		user.updated_at = now_millis();
		self.kv
			.set(&schema::user_by_id(user_id), encode_record(&user)?, Default::default())
			.await?;
		Ok(user)
	}

	#[instrument(name = "auth::change_password", level = "debug", skip(self, current, new))]
	pub async fn change_password(&self, user_id: Uuid, current: &str, new: &str) -> Result<()> {
		let mut user = self.get_user(user_id).await?;
		let stored = user.password_hash.as_deref().ok_or(Error::InvalidCredentials)?;
		if !verify_password(stored, current) {
			return Err(Error::InvalidCredentials);
		}
		validate_strength(new)?;
		user.password_hash = Some(hash_password(new));
		user.updated_at = now_millis();
		self.kv
			.set(&schema::user_by_id(user_id), encode_record(&user)?, Default::default())
			.await?;
		Ok(())
	}

	/// Accounts are never physically deleted while sessions may reference
	/// them; deactivation flips `isActive` and revokes every session.
	#[instrument(name = "auth::deactivate", level = "debug", skip(self))]
	pub async fn deactivate(&self, user_id: Uuid) -> Result<()> {
		let mut user = self.get_user(user_id).await?;
		user.is_active = false;
		user.updated_at = now_millis();
		self.kv
			.set(&schema::user_by_id(user_id), encode_record(&user)?, Default::default())
			.await?;
		let revoked = self.sessions.revoke_all_for(user_id).await?;
		info!(user = %user_id, revoked, "account deactivated");
		Ok(())
	}

	async fn lookup_identifier(&self, identifier: &str) -> Result<Option<User>> {
		let by_username = self.kv.get(&schema::user_by_username(identifier)).await?;
		let index = match by_username {
			Some(entry) => Some(entry),
			None => self.kv.get(&schema::user_by_email(identifier)).await?,
		};
		let Some(entry) = index else {
			return Ok(None);
		};
		let id = entry
			.value
			.as_text()
			.and_then(|raw| Uuid::parse_str(raw).ok())
			.ok_or_else(|| Error::backend("corrupt user index entry"))?;
		match self.get_user(id).await {
			Ok(user) => Ok(Some(user)),
			Err(Error::NotFound(_)) => Ok(None),
			Err(err) => Err(err),
		}
	}
}

fn validate_username(username: &str) -> Result<()> {
	let length = username.chars().count();
	if !(USERNAME_MIN..=USERNAME_MAX).contains(&length) {
		return Err(Error::InvalidInput(format!(
			"username must be {USERNAME_MIN}-{USERNAME_MAX} characters"
		)));
	}
	if !username.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
		return Err(Error::InvalidInput("username must be url-safe".into()));
	}
	Ok(())
}

fn validate_email(email: &str) -> Result<()> {
	let valid = email.split_once('@').is_some_and(|(local, domain)| {
		!local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
	});
	if !valid {
		return Err(Error::InvalidInput(format!("invalid email address {email:?}")));
	}
	Ok(())
}
