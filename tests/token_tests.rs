//! Token issuance and verification tests
//!
//! Covers the verification gates in order:
//! - parse, algorithm and key id
//! - signature and expiry
//! - claim structure, issuer, audience, origin binding
//! - revocation and permission lookup

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use pretty_assertions::assert_eq;

use api_gate::ErrorKind;
use api_gate::token::{
    Claims, InMemoryPermissions, InMemoryRevocationStore, KeyStore, Permission, RevocationRecord,
    RevocationStore, StoreError, TokenRequest, TokenService, TokenSettings,
};

const OLD_SECRET: &[u8] = &[0x11; 64];
const NEW_SECRET: &[u8] = &[0x22; 64];
const RETIRED: &[u8] = &[];

fn keys(current: &str, entries: &[(&str, &[u8])]) -> KeyStore {
    KeyStore::load(
        current,
        entries
            .iter()
            .map(|(id, secret)| ((*id).to_string(), secret.to_vec())),
    )
    .unwrap()
}

fn settings() -> TokenSettings {
    TokenSettings {
        issuer: TokenSettings::issuer_for("gate", false),
        audience: "gate_api".to_string(),
        lifetime: Duration::from_secs(3600),
    }
}

fn permissions() -> Arc<InMemoryPermissions> {
    let permissions = InMemoryPermissions::new(Some(Permission::DEFAULT));
    permissions.set(7, Permission::ADMIN);
    Arc::new(permissions)
}

fn service_with(keys: KeyStore) -> TokenService {
    TokenService::new(
        keys,
        settings(),
        Arc::new(InMemoryRevocationStore::new()),
        permissions(),
    )
}

fn service() -> TokenService {
    service_with(keys("k1", &[("k1", OLD_SECRET)]))
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap()
}

fn claims_for(user_id: u64, jti: &str) -> Claims {
    let now = now_secs();
    Claims {
        sub: user_id.to_string(),
        iss: "gate_debug".to_string(),
        aud: "gate_api".to_string(),
        iat: now,
        exp: now + 600,
        jti: jti.to_string(),
        allowed_ips: vec!["*".to_string()],
    }
}

fn sign_raw(claims: &Claims, kid: &str, secret: &[u8], alg: Algorithm) -> String {
    let mut header = Header::new(alg);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
}

async fn verify_kind(svc: &TokenService, token: &str, from: &str) -> ErrorKind {
    svc.verify(token, ip(from)).await.unwrap_err().kind()
}

// ── Round trip ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn issued_token_verifies_with_current_permission() {
    // GIVEN: a service with user 7 seeded as admin
    let svc = service();

    // WHEN: a token is issued and presented back
    let issued = svc.generate(TokenRequest::new(7)).await.unwrap();
    let verified = svc.verify(&issued.token, ip("192.0.2.1")).await.unwrap();

    // THEN: identity and permission come back
    assert_eq!(verified.user_id, 7);
    assert_eq!(verified.permission, Permission::ADMIN);
    assert_eq!(verified.token_id, issued.token_id);
    assert_eq!(issued.token_id.len(), 32);
}

#[tokio::test]
async fn issued_token_carries_kid_and_settings() {
    let svc = service();
    let issued = svc.generate(TokenRequest::new(3)).await.unwrap();

    let header = jsonwebtoken::decode_header(&issued.token).unwrap();
    assert_eq!(header.alg, Algorithm::HS512);
    assert_eq!(header.kid.as_deref(), Some("k1"));

    let lifetime = issued.expires_at - Utc::now();
    assert!(lifetime.num_seconds() > 3500 && lifetime.num_seconds() <= 3600);
}

#[tokio::test]
async fn issuance_rejects_zero_user_and_empty_origins() {
    let svc = service();
    let zero = svc.generate(TokenRequest::new(0)).await.unwrap_err();
    assert_eq!(zero.kind(), ErrorKind::InvalidRequest);

    let no_ips = svc
        .generate(TokenRequest::new(1).allowed_ips(Vec::<String>::new()))
        .await
        .unwrap_err();
    assert_eq!(no_ips.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn lifetime_past_calendar_range_is_rejected() {
    // GIVEN: lifetimes that overflow the expiry timestamp
    let svc = service();
    let ten_million_years = Duration::from_secs(10_000_000 * 365 * 86_400);

    // WHEN / THEN: issuance fails cleanly instead of panicking
    for lifetime in [ten_million_years, Duration::MAX] {
        let err = svc
            .generate(TokenRequest::new(1).expires_in(lifetime))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(err.message(), "Token lifetime out of range");
    }
}

// ── Parse gates ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_token_is_empty_credential() {
    assert_eq!(verify_kind(&service(), "", "192.0.2.1").await, ErrorKind::EmptyCredential);
}

#[tokio::test]
async fn garbage_is_malformed() {
    let svc = service();
    assert_eq!(verify_kind(&svc, "garbage", "192.0.2.1").await, ErrorKind::Malformed);
    assert_eq!(verify_kind(&svc, "a.b.c", "192.0.2.1").await, ErrorKind::Malformed);
}

#[tokio::test]
async fn other_algorithm_is_unexpected_signing_method() {
    let svc = service();
    let token = sign_raw(&claims_for(1, "jti-hs256"), "k1", OLD_SECRET, Algorithm::HS256);
    assert_eq!(
        verify_kind(&svc, &token, "192.0.2.1").await,
        ErrorKind::UnexpectedSigningMethod
    );
}

#[tokio::test]
async fn unsigned_token_is_unexpected_signing_method() {
    // GIVEN: a token declaring alg "none" with an empty signature
    let svc = service();
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT","kid":"k1"}"#);
    let claims = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims_for(1, "jti-none")).unwrap());
    let token = format!("{header}.{claims}.");

    // WHEN / THEN: it is refused for its algorithm, not as unparseable
    assert_eq!(
        verify_kind(&svc, &token, "192.0.2.1").await,
        ErrorKind::UnexpectedSigningMethod
    );
}

#[tokio::test]
async fn unknown_and_missing_kid_are_key_too_old() {
    let svc = service();
    let unknown = sign_raw(&claims_for(1, "jti-x"), "nope", OLD_SECRET, Algorithm::HS512);
    assert_eq!(verify_kind(&svc, &unknown, "192.0.2.1").await, ErrorKind::KeyTooOld);

    let no_kid = jsonwebtoken::encode(
        &Header::new(Algorithm::HS512),
        &claims_for(1, "jti-y"),
        &EncodingKey::from_secret(OLD_SECRET),
    )
    .unwrap();
    assert_eq!(verify_kind(&svc, &no_kid, "192.0.2.1").await, ErrorKind::KeyTooOld);
}

// ── Signature and expiry ────────────────────────────────────────────────────

#[tokio::test]
async fn flipped_signature_bit_is_invalid_signature() {
    // GIVEN: a valid token
    let svc = service();
    let issued = svc.generate(TokenRequest::new(1)).await.unwrap();

    // WHEN: one bit of the decoded signature is flipped and re-encoded
    let (signing_input, signature) = issued.token.rsplit_once('.').unwrap();
    let mut raw = URL_SAFE_NO_PAD.decode(signature).unwrap();
    raw[0] ^= 0x01;
    let tampered = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(raw));

    // THEN: verification fails on the signature
    assert_eq!(verify_kind(&svc, &tampered, "192.0.2.1").await, ErrorKind::InvalidSignature);
}

#[tokio::test]
async fn token_signed_with_other_secret_is_invalid_signature() {
    let svc = service();
    let token = sign_raw(&claims_for(1, "jti-forged"), "k1", NEW_SECRET, Algorithm::HS512);
    assert_eq!(verify_kind(&svc, &token, "192.0.2.1").await, ErrorKind::InvalidSignature);
}

#[tokio::test]
async fn past_expiry_is_expired() {
    let svc = service();
    let mut claims = claims_for(1, "jti-old");
    claims.iat = now_secs() - 7200;
    claims.exp = now_secs() - 3600;
    let token = sign_raw(&claims, "k1", OLD_SECRET, Algorithm::HS512);
    assert_eq!(verify_kind(&svc, &token, "192.0.2.1").await, ErrorKind::Expired);
}

// ── Claims ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn issued_after_expiry_is_invalid() {
    let svc = service();
    let mut claims = claims_for(1, "jti-inverted");
    claims.iat = claims.exp + 10;
    let token = sign_raw(&claims, "k1", OLD_SECRET, Algorithm::HS512);
    assert_eq!(verify_kind(&svc, &token, "192.0.2.1").await, ErrorKind::Invalid);
}

#[tokio::test]
async fn empty_token_id_is_invalid() {
    let svc = service();
    let token = sign_raw(&claims_for(1, ""), "k1", OLD_SECRET, Algorithm::HS512);
    assert_eq!(verify_kind(&svc, &token, "192.0.2.1").await, ErrorKind::Invalid);
}

#[tokio::test]
async fn foreign_issuer_and_audience_are_rejected() {
    let svc = service();

    let mut claims = claims_for(1, "jti-iss");
    claims.iss = "gate_production".to_string();
    let token = sign_raw(&claims, "k1", OLD_SECRET, Algorithm::HS512);
    assert_eq!(verify_kind(&svc, &token, "192.0.2.1").await, ErrorKind::InvalidIssuer);

    let mut claims = claims_for(1, "jti-aud");
    claims.aud = "billing".to_string();
    let token = sign_raw(&claims, "k1", OLD_SECRET, Algorithm::HS512);
    assert_eq!(verify_kind(&svc, &token, "192.0.2.1").await, ErrorKind::InvalidAudience);
}

#[tokio::test]
async fn ip_bound_token_rejects_other_callers() {
    // GIVEN: a token bound to one address
    let svc = service();
    let issued = svc
        .generate(TokenRequest::new(1).allowed_ips(["10.0.0.1"]))
        .await
        .unwrap();

    // THEN: it verifies from that address only
    assert!(svc.verify(&issued.token, ip("10.0.0.1")).await.is_ok());
    assert_eq!(
        verify_kind(&svc, &issued.token, "10.0.0.2").await,
        ErrorKind::UnauthorizedOrigin
    );
}

#[tokio::test]
async fn ipv6_binding_compares_parsed_addresses() {
    let svc = service();
    let issued = svc
        .generate(TokenRequest::new(1).allowed_ips(["127.0.0.1", "0:0:0:0:0:0:0:1"]))
        .await
        .unwrap();
    assert!(svc.verify(&issued.token, ip("::1")).await.is_ok());
}

// ── Revocation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn revoked_token_is_blacklisted() {
    let svc = service();
    let issued = svc.generate(TokenRequest::new(1)).await.unwrap();

    assert!(svc.revoke(&issued.token_id).await.unwrap());
    assert_eq!(verify_kind(&svc, &issued.token, "192.0.2.1").await, ErrorKind::Blacklisted);
}

#[tokio::test]
async fn unrecorded_token_id_is_blacklisted() {
    // GIVEN: a correctly signed token whose jti was never recorded
    let svc = service();
    let token = sign_raw(&claims_for(1, "never-recorded"), "k1", OLD_SECRET, Algorithm::HS512);

    // THEN: it is treated as revoked
    assert_eq!(verify_kind(&svc, &token, "192.0.2.1").await, ErrorKind::Blacklisted);
}

#[tokio::test]
async fn revoking_unknown_id_reports_false() {
    assert!(!service().revoke("missing").await.unwrap());
}

#[tokio::test]
async fn usage_counters_track_checks() {
    let svc = service();
    let issued = svc.generate(TokenRequest::new(1)).await.unwrap();

    svc.verify(&issued.token, ip("192.0.2.1")).await.unwrap();
    svc.verify(&issued.token, ip("192.0.2.1")).await.unwrap();
    svc.revoke(&issued.token_id).await.unwrap();
    let _ = svc.verify(&issued.token, ip("192.0.2.1")).await;

    let record = svc
        .revocations()
        .get(&issued.token_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!record.valid);
    assert_eq!(record.valid_usage_count, 2);
    assert_eq!(record.invalid_usage_count, 1);
}

#[tokio::test]
async fn pure_checks_do_not_touch_the_store() {
    // GIVEN: a recorded token presented from a disallowed address
    let svc = service();
    let issued = svc
        .generate(TokenRequest::new(1).allowed_ips(["10.0.0.1"]))
        .await
        .unwrap();

    // WHEN: it fails the origin check
    let _ = svc.verify(&issued.token, ip("10.9.9.9")).await;

    // THEN: no usage counter moved
    let record = svc
        .revocations()
        .get(&issued.token_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.valid_usage_count, 0);
    assert_eq!(record.invalid_usage_count, 0);
}

// ── Key rotation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn rotation_keeps_old_tokens_until_key_is_deprecated() {
    // GIVEN: a token signed under k1
    let svc = service();
    let old = svc.generate(TokenRequest::new(1)).await.unwrap();

    // WHEN: k2 becomes current and k1 stays active
    svc.rotate(keys("k2", &[("k1", OLD_SECRET), ("k2", NEW_SECRET)]));
    let new = svc.generate(TokenRequest::new(1)).await.unwrap();

    // THEN: both verify, and new tokens carry k2
    assert!(svc.verify(&old.token, ip("192.0.2.1")).await.is_ok());
    assert!(svc.verify(&new.token, ip("192.0.2.1")).await.is_ok());
    let header = jsonwebtoken::decode_header(&new.token).unwrap();
    assert_eq!(header.kid.as_deref(), Some("k2"));

    // WHEN: k1 is deprecated
    svc.rotate(keys("k2", &[("k1", RETIRED), ("k2", NEW_SECRET)]));

    // THEN: the old token is too old, the new one still verifies
    assert_eq!(verify_kind(&svc, &old.token, "192.0.2.1").await, ErrorKind::KeyTooOld);
    assert!(svc.verify(&new.token, ip("192.0.2.1")).await.is_ok());
}

#[test]
fn current_key_must_be_active() {
    assert!(KeyStore::load("k1", vec![("k1".to_string(), Vec::new())]).is_err());
    assert!(KeyStore::load("k9", vec![("k1".to_string(), OLD_SECRET.to_vec())]).is_err());
}

// ── Store and permission failures ───────────────────────────────────────────

struct BrokenStore;

#[async_trait::async_trait]
impl RevocationStore for BrokenStore {
    async fn record(&self, _record: RevocationRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }
    async fn is_revoked(&self, _token_id: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }
    async fn revoke(&self, _token_id: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("disk full".to_string()))
    }
    async fn get(&self, _token_id: &str) -> Result<Option<RevocationRecord>, StoreError> {
        Ok(None)
    }
    async fn purge_expired(&self, _now: chrono::DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(0)
    }
}

#[tokio::test]
async fn failed_record_yields_no_token() {
    let svc = TokenService::new(
        keys("k1", &[("k1", OLD_SECRET)]),
        settings(),
        Arc::new(BrokenStore),
        permissions(),
    );
    let err = svc.generate(TokenRequest::new(1)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InternalError);
    assert_eq!(err.message(), "Internal server error");
}

#[tokio::test]
async fn unreachable_store_on_verify_is_internal_error() {
    let svc = TokenService::new(
        keys("k1", &[("k1", OLD_SECRET)]),
        settings(),
        Arc::new(BrokenStore),
        permissions(),
    );
    let token = sign_raw(&claims_for(1, "jti-z"), "k1", OLD_SECRET, Algorithm::HS512);
    assert_eq!(verify_kind(&svc, &token, "192.0.2.1").await, ErrorKind::InternalError);
}

#[tokio::test]
async fn unknown_user_without_fallback_is_internal_error() {
    let svc = TokenService::new(
        keys("k1", &[("k1", OLD_SECRET)]),
        settings(),
        Arc::new(InMemoryRevocationStore::new()),
        Arc::new(InMemoryPermissions::new(None)),
    );
    let issued = svc.generate(TokenRequest::new(99)).await.unwrap();
    assert_eq!(
        verify_kind(&svc, &issued.token, "192.0.2.1").await,
        ErrorKind::InternalError
    );
}
