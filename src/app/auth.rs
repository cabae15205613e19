use anyhow::{anyhow, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::{local, version4::V4, Local};
use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::domain::user::{NewUser, UserIdentity, UserProfile};
use crate::infra::store::Store;

const TOKEN_ISSUER: &str = "plaza";

/// A freshly issued access token and the user it belongs to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthGrant {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user: UserIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: i64,
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub email: String,
    #[serde(flatten)]
    pub profile: UserProfile,
}

#[derive(Clone)]
pub struct AuthService {
    store: Store,
    token_key: [u8; 32],
    token_ttl_hours: u64,
}

impl AuthService {
    pub fn new(store: Store, token_key: [u8; 32], token_ttl_hours: u64) -> Self {
        Self {
            store,
            token_key,
            token_ttl_hours,
        }
    }

    /// Creates the account and signs it in. Duplicate email or username
    /// surfaces as a `UniqueViolation` inside the error.
    pub async fn register(
        &self,
        email: String,
        username: String,
        password: &str,
    ) -> Result<AuthGrant> {
        let password_hash = hash_password(password)?;
        let user = self
            .store
            .insert_user(NewUser {
                email,
                username,
                password_hash,
            })
            .await?;
        self.issue_grant(user)
    }

    /// `identifier` matches either the email or the username.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<Option<AuthGrant>> {
        let credentials = match self.store.find_credentials(identifier).await? {
            Some(credentials) => credentials,
            None => return Ok(None),
        };
        if credentials.password_hash.is_empty() {
            return Ok(None);
        }

        if !verify_password(password, &credentials.password_hash)? {
            return Ok(None);
        }

        let grant = self.issue_grant(credentials.identity)?;
        Ok(Some(grant))
    }

    /// `None` for anything that is not a live access token issued with our key.
    pub fn verify_token(&self, token: &str) -> Result<Option<TokenClaims>> {
        let claims = match self.decrypt_claims(token)? {
            Some(claims) => claims,
            None => return Ok(None),
        };
        if !has_token_type(&claims, "access") {
            return Ok(None);
        }

        let user_id = match claim_str(&claims, "sub").and_then(|sub| sub.parse::<i64>().ok()) {
            Some(user_id) => user_id,
            None => return Ok(None),
        };
        let email = claim_str(&claims, "email").unwrap_or_default().to_string();
        let username = claim_str(&claims, "username")
            .unwrap_or_default()
            .to_string();

        Ok(Some(TokenClaims {
            user_id,
            email,
            username,
        }))
    }

    pub async fn current_user(&self, user_id: i64) -> Result<Option<CurrentUser>> {
        let identity = match self.store.find_identity(user_id).await? {
            Some(identity) => identity,
            None => return Ok(None),
        };
        let profile = self.store.find_profile(user_id).await?;

        Ok(profile.map(|profile| CurrentUser {
            email: identity.email,
            profile,
        }))
    }

    pub fn issue_grant(&self, user: UserIdentity) -> Result<AuthGrant> {
        let (claims, expires_at) = self.build_claims(&user)?;
        let key = SymmetricKey::<V4>::from(&self.token_key)?;
        let token = local::encrypt(&key, &claims, None, None)?;

        Ok(AuthGrant {
            token,
            expires_at,
            user,
        })
    }

    fn build_claims(&self, user: &UserIdentity) -> Result<(Claims, OffsetDateTime)> {
        let ttl_seconds = self
            .token_ttl_hours
            .checked_mul(60 * 60)
            .and_then(|seconds| i64::try_from(seconds).ok())
            .ok_or_else(|| anyhow!("token ttl out of range: {} hours", self.token_ttl_hours))?;
        let duration = std::time::Duration::from_secs(ttl_seconds as u64);
        let mut claims = Claims::new_expires_in(&duration)?;
        claims.issuer(TOKEN_ISSUER)?;
        claims.audience(TOKEN_ISSUER)?;
        claims.subject(&user.id.to_string())?;
        claims.add_additional("typ", "access")?;
        claims.add_additional("email", user.email.as_str())?;
        claims.add_additional("username", user.username.as_str())?;
        let expires_at = OffsetDateTime::now_utc()
            .checked_add(Duration::seconds(ttl_seconds))
            .ok_or_else(|| anyhow!("token ttl out of range: {} hours", self.token_ttl_hours))?;
        Ok((claims, expires_at))
    }

    fn decrypt_claims(&self, token: &str) -> Result<Option<Claims>> {
        let key = SymmetricKey::<V4>::from(&self.token_key)?;
        let mut rules = ClaimsValidationRules::new();
        rules.validate_issuer_with(TOKEN_ISSUER);
        rules.validate_audience_with(TOKEN_ISSUER);

        let untrusted = match UntrustedToken::<Local, V4>::try_from(token) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        let trusted = match local::decrypt(&key, &untrusted, &rules, None, None) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        Ok(trusted.payload_claims().cloned())
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {}", err))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|err| anyhow!("failed to parse password hash: {}", err))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn claim_str<'a>(claims: &'a Claims, name: &str) -> Option<&'a str> {
    claims.get_claim(name).and_then(|value| value.as_str())
}

fn has_token_type(claims: &Claims, expected: &str) -> bool {
    claim_str(claims, "typ")
        .map(|value| value == expected)
        .unwrap_or(false)
}
