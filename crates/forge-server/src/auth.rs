//! Bearer-JWT subject extraction, generalized from
//! `sem_os_server::middleware::jwt`: validate the signature, pull the
//! subject id out of the `sub` claim, and inject it into request extensions
//! as a [`Subject`]. Unlike the teacher, a missing or invalid token is never
//! rejected here — apps with `auth_mode: none` have no token at all, and the
//! executor (C11) is the one place that decides whether a missing subject
//! is fatal (`spec.md` §4.11 step 1).

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Clone)]
pub struct JwtConfig {
    pub decoding_key: DecodingKey,
    pub validation: Validation,
}

impl JwtConfig {
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::default();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self { decoding_key: DecodingKey::from_secret(secret), validation }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Uuid,
}

/// The verified subject id, present in request extensions whenever a valid
/// bearer token was supplied.
#[derive(Clone, Copy, Debug)]
pub struct Subject(pub Uuid);

pub async fn extract_subject(jwt_config: axum::extract::State<JwtConfig>, mut req: Request, next: Next) -> Response {
    if let Some(token) = req.headers().get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()).and_then(|v| v.strip_prefix("Bearer ")) {
        match decode::<Claims>(token, &jwt_config.decoding_key, &jwt_config.validation) {
            Ok(data) => {
                req.extensions_mut().insert(Subject(data.claims.sub));
            }
            Err(err) => {
                tracing::debug!(error = %err, "bearer token present but invalid, treating request as anonymous");
            }
        }
    }
    next.run(req).await
}
