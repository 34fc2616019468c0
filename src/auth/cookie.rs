//! Session cookie codec.
//!
//! Value layout: `v1.<session id, simple hex>.<secret>.<mac>`, where `mac` is
//! base64url HMAC-SHA256 over everything before the last dot. Decoding is
//! total: malformed, truncated or tampered input is `Decoded::Invalid`.

use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::{SameSitePolicy, SessionConfig};
use crate::crypto::{KeyTooShort, SigningKey, TOKEN_BYTES};

const VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Valid { session_id: Uuid, secret: String },
    Invalid,
}

#[derive(Clone, Debug)]
pub struct CookieCodec {
    key: SigningKey,
    name: String,
    secure: bool,
    same_site: SameSite,
}

impl CookieCodec {
    pub fn new(cfg: &SessionConfig) -> Result<Self, KeyTooShort> {
        Ok(Self {
            key: SigningKey::new(&cfg.secret)?,
            name: cfg.cookie_name.clone(),
            secure: cfg.cookie_secure,
            same_site: match cfg.same_site {
                SameSitePolicy::Lax => SameSite::Lax,
                SameSitePolicy::Strict => SameSite::Strict,
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encode(&self, session_id: Uuid, secret: &str) -> String {
        let payload = format!("{VERSION}.{}.{secret}", session_id.simple());
        let mac = URL_SAFE_NO_PAD.encode(self.key.sign(payload.as_bytes()));
        format!("{payload}.{mac}")
    }

    pub fn decode(&self, value: &str) -> Decoded {
        let Some((payload, mac)) = value.rsplit_once('.') else {
            return Decoded::Invalid;
        };
        let Ok(mac) = URL_SAFE_NO_PAD.decode(mac) else {
            return Decoded::Invalid;
        };
        if !self.key.verify(payload.as_bytes(), &mac) {
            return Decoded::Invalid;
        }

        let mut parts = payload.split('.');
        let (Some(version), Some(id), Some(secret), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Decoded::Invalid;
        };
        if version != VERSION || !is_token(secret) {
            return Decoded::Invalid;
        }
        match Uuid::try_parse(id) {
            Ok(session_id) => Decoded::Valid {
                session_id,
                secret: secret.to_string(),
            },
            Err(_) => Decoded::Invalid,
        }
    }

    /// Session cookie expiring together with the session record.
    pub fn session_cookie(
        &self,
        session_id: Uuid,
        secret: &str,
        expires_at: OffsetDateTime,
    ) -> Cookie<'static> {
        Cookie::build((self.name.clone(), self.encode(session_id, secret)))
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .path("/")
            .expires(expires_at)
            .build()
    }

    /// Matches the session cookie's name and path so the browser drops it.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.name.clone(), ""))
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .path("/")
            .build()
    }
}

fn is_token(s: &str) -> bool {
    URL_SAFE_NO_PAD
        .decode(s)
        .map(|b| b.len() == TOKEN_BYTES)
        .unwrap_or(false)
}
