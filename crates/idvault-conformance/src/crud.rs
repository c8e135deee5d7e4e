//! Sequential CRUD battery run against one freshly reset instance.

use std::fmt::Debug;
use std::time::Instant;

use time::Duration;
use tracing::{info, instrument};

use idvault_storage::types::{
    AuthCode, AuthRequest, Client, Keys, Password, RefreshToken, VerificationKey,
};
use idvault_storage::{
    DynIdentityStorage, Entity, EntityKind, ErrorCategory, GcResult, IdentityStorage,
    StorageResult,
};

use crate::fixtures::{Fixture, expect_eq, expect_err, expect_ok, fixture_id, now};
use crate::report::{CaseFailure, CaseOutcome, SuiteReport};

/// Name reported for this suite.
pub const SUITE: &str = "crud";

/// Single-writer conformance battery.
///
/// Expects an instance straight from [`StorageFactory::open`]; the first
/// case checks that all six tables are empty.
///
/// [`StorageFactory::open`]: idvault_storage::StorageFactory::open
pub struct ConformanceSuite {
    storage: DynIdentityStorage,
}

impl ConformanceSuite {
    #[must_use]
    pub fn new(storage: DynIdentityStorage) -> Self {
        Self { storage }
    }

    /// Runs every case in order and collects the results.
    #[instrument(skip(self), fields(backend = self.storage.backend_name()))]
    pub async fn run(&self) -> SuiteReport {
        let storage: &dyn IdentityStorage = self.storage.as_ref();
        let mut report = SuiteReport::new(SUITE, storage.backend_name());

        macro_rules! case {
            ($name:expr, $body:expr) => {{
                let started = Instant::now();
                let outcome = $body.await;
                report.record($name, started.elapsed(), outcome);
            }};
        }

        case!("empty after reset", empty_after_reset(storage));
        case!("client crud", entity_crud::<Client>(storage));
        case!("auth request crud", entity_crud::<AuthRequest>(storage));
        case!("auth code crud", entity_crud::<AuthCode>(storage));
        case!("refresh token crud", entity_crud::<RefreshToken>(storage));
        case!("password crud", entity_crud::<Password>(storage));
        case!("keys singleton", keys_singleton(storage));
        case!("password email ignores case", password_case(storage));
        case!("list operations", list_operations(storage));
        case!("garbage collection", garbage_collection(storage));

        info!(
            cases = report.cases.len(),
            failed = report.failures().count(),
            "conformance suite finished"
        );
        report
    }
}

async fn empty_after_reset(storage: &dyn IdentityStorage) -> CaseOutcome {
    for kind in EntityKind::ALL {
        let rows = expect_ok(&format!("count {kind}"), storage.count(kind).await)?;
        expect_eq(&format!("rows in {kind}"), &0, &rows)?;
    }

    expect_eq("list clients", &0, &expect_ok("list clients", storage.list_clients().await)?.len())?;
    expect_eq(
        "list refresh tokens",
        &0,
        &expect_ok("list refresh tokens", storage.list_refresh_tokens().await)?.len(),
    )?;
    expect_eq(
        "list passwords",
        &0,
        &expect_ok("list passwords", storage.list_passwords().await)?.len(),
    )?;
    expect_err("get keys", storage.get_keys().await, ErrorCategory::NotFound)
}

/// Steps one to six of the per-entity contract.
async fn entity_crud<E: Fixture>(storage: &dyn IdentityStorage) -> CaseOutcome {
    let original = E::sample(&fixture_id(E::KIND.table()));
    let key = original.key();

    expect_err("get before create", E::get(storage, &key).await, ErrorCategory::NotFound)?;

    expect_ok("create", E::create(storage, &original).await)?;
    let stored = expect_ok("get after create", E::get(storage, &key).await)?;
    expect_eq("get after create", &original, &stored)?;

    // Same key, different content.
    let colliding = original.clone().mutate();
    expect_err(
        "create duplicate",
        E::create(storage, &colliding).await,
        ErrorCategory::AlreadyExists,
    )?;
    let stored = expect_ok("get after duplicate", E::get(storage, &key).await)?;
    expect_eq("get after duplicate", &original, &stored)?;

    let transform = |value: E| -> StorageResult<E> { Ok(value.mutate()) };
    let updated = expect_ok("update", E::update(storage, &key, &transform).await)?;
    let expected = original.clone().mutate();
    expect_eq("update result", &expected, &updated)?;
    let stored = expect_ok("get after update", E::get(storage, &key).await)?;
    expect_eq("get after update", &expected, &stored)?;

    let missing = E::sample(&fixture_id("missing")).key();
    expect_err(
        "update missing",
        E::update(storage, &missing, &transform).await,
        ErrorCategory::NotFound,
    )?;

    expect_ok("delete", E::delete(storage, &key).await)?;
    expect_err("get after delete", E::get(storage, &key).await, ErrorCategory::NotFound)?;
    expect_err("delete again", E::delete(storage, &key).await, ErrorCategory::NotFound)
}

async fn keys_singleton(storage: &dyn IdentityStorage) -> CaseOutcome {
    expect_err("get before rotation", storage.get_keys().await, ErrorCategory::NotFound)?;

    let rotated_at = now();
    let first = Keys {
        signing_key: Some(r#"{"kid":"sig-1"}"#.into()),
        signing_key_pub: Some(r#"{"kid":"sig-1","use":"sig"}"#.into()),
        verification_keys: Vec::new(),
        next_rotation: rotated_at + Duration::hours(6),
    };
    let install = first.clone();
    let written = expect_ok(
        "first rotation",
        storage
            .update_keys(&move |current: Keys| -> StorageResult<Keys> {
                if current != Keys::default() {
                    return Ok(current);
                }
                Ok(install.clone())
            })
            .await,
    )?;
    expect_eq("first rotation result", &first, &written)?;
    expect_eq("get after rotation", &first, &expect_ok("get keys", storage.get_keys().await)?)?;

    // Rotation retires the signing key into the verification set.
    let second = Keys {
        signing_key: Some(r#"{"kid":"sig-2"}"#.into()),
        signing_key_pub: Some(r#"{"kid":"sig-2","use":"sig"}"#.into()),
        verification_keys: vec![VerificationKey {
            public_key: r#"{"kid":"sig-1","use":"sig"}"#.into(),
            expiry: rotated_at + Duration::hours(12),
        }],
        next_rotation: rotated_at + Duration::hours(12),
    };
    let replacement = second.clone();
    expect_ok(
        "second rotation",
        storage
            .update_keys(&move |_: Keys| -> StorageResult<Keys> { Ok(replacement.clone()) })
            .await,
    )?;
    expect_eq("get after second rotation", &second, &expect_ok("get keys", storage.get_keys().await)?)?;

    let rows = expect_ok("count keys", storage.count(EntityKind::Keys).await)?;
    expect_eq("keyset rows", &1, &rows)
}

async fn password_case(storage: &dyn IdentityStorage) -> CaseOutcome {
    let local = fixture_id("Jane.Doe");
    let password = Password {
        email: format!("{local}@Example.COM"),
        ..Password::sample(&local)
    };
    expect_ok("create", storage.create_password(&password).await)?;

    let lower = password.email.to_lowercase();
    let upper = password.email.to_uppercase();
    let stored = expect_ok("get lowercase", storage.get_password(&lower).await)?;
    expect_eq("get lowercase", &password, &stored)?;

    let duplicate = Password {
        email: upper.clone(),
        ..password.clone()
    };
    expect_err(
        "create with other case",
        storage.create_password(&duplicate).await,
        ErrorCategory::AlreadyExists,
    )?;

    expect_ok(
        "update uppercase",
        storage
            .update_password(&upper, &|mut p: Password| -> StorageResult<Password> {
                p.username = "renamed".into();
                Ok(p)
            })
            .await,
    )?;
    let stored = expect_ok("get after update", storage.get_password(&password.email).await)?;
    expect_eq("username after update", &"renamed".to_string(), &stored.username)?;

    expect_ok("delete uppercase", storage.delete_password(&upper).await)?;
    expect_err("get after delete", storage.get_password(&lower).await, ErrorCategory::NotFound)
}

async fn list_operations(storage: &dyn IdentityStorage) -> CaseOutcome {
    let clients = [
        Client::sample(&fixture_id("list-client")),
        Client::sample(&fixture_id("list-client")),
    ];
    let tokens = [
        RefreshToken::sample(&fixture_id("list-token")),
        RefreshToken::sample(&fixture_id("list-token")),
    ];
    let passwords = [
        Password::sample(&fixture_id("list-user")),
        Password::sample(&fixture_id("list-user")),
    ];

    for client in &clients {
        expect_ok("create client", storage.create_client(client).await)?;
    }
    for token in &tokens {
        expect_ok("create refresh token", storage.create_refresh_token(token).await)?;
    }
    for password in &passwords {
        expect_ok("create password", storage.create_password(password).await)?;
    }

    let listed = expect_ok("list clients", storage.list_clients().await)?;
    expect_contains("list clients", &clients, &listed)?;
    let listed = expect_ok("list refresh tokens", storage.list_refresh_tokens().await)?;
    expect_contains("list refresh tokens", &tokens, &listed)?;
    let listed = expect_ok("list passwords", storage.list_passwords().await)?;
    expect_contains("list passwords", &passwords, &listed)?;

    for client in &clients {
        expect_ok("delete client", storage.delete_client(&client.id).await)?;
    }
    for token in &tokens {
        expect_ok("delete refresh token", storage.delete_refresh_token(&token.id).await)?;
    }
    for password in &passwords {
        expect_ok("delete password", storage.delete_password(&password.email).await)?;
    }

    let listed = expect_ok("list clients after delete", storage.list_clients().await)?;
    if let Some(leftover) = listed.iter().find(|c| clients.iter().any(|x| x.id == c.id)) {
        return Err(CaseFailure::mismatch(
            "list clients after delete",
            &"no deleted clients",
            leftover,
        ));
    }
    Ok(())
}

fn expect_contains<E: Entity + PartialEq + Debug>(
    step: &str,
    expected: &[E],
    listed: &[E],
) -> CaseOutcome {
    for record in expected {
        match listed.iter().find(|r| r.key() == record.key()) {
            Some(found) => expect_eq(step, record, found)?,
            None => {
                return Err(CaseFailure::mismatch(
                    step,
                    &format!("listing containing {}", record.key()),
                    &format!("{} records without it", listed.len()),
                ));
            }
        }
    }
    Ok(())
}

async fn garbage_collection(storage: &dyn IdentityStorage) -> CaseOutcome {
    let now = now();

    let expired_request = AuthRequest {
        expiry: now - Duration::minutes(1),
        ..AuthRequest::sample(&fixture_id("gc-request"))
    };
    let live_request = AuthRequest::sample(&fixture_id("gc-request"));
    let expired_code = AuthCode {
        expiry: now - Duration::minutes(1),
        ..AuthCode::sample(&fixture_id("gc-code"))
    };
    let live_code = AuthCode::sample(&fixture_id("gc-code"));

    for request in [&expired_request, &live_request] {
        expect_ok("create auth request", storage.create_auth_request(request).await)?;
    }
    for code in [&expired_code, &live_code] {
        expect_ok("create auth code", storage.create_auth_code(code).await)?;
    }

    let result = expect_ok("garbage collect", storage.garbage_collect(now).await)?;
    expect_eq(
        "garbage collect result",
        &GcResult {
            auth_requests: 1,
            auth_codes: 1,
        },
        &result,
    )?;

    expect_err(
        "get expired auth request",
        storage.get_auth_request(&expired_request.id).await,
        ErrorCategory::NotFound,
    )?;
    expect_err(
        "get expired auth code",
        storage.get_auth_code(&expired_code.id).await,
        ErrorCategory::NotFound,
    )?;
    expect_ok("get live auth request", storage.get_auth_request(&live_request.id).await)?;
    expect_ok("get live auth code", storage.get_auth_code(&live_code.id).await)?;

    let again = expect_ok("garbage collect again", storage.garbage_collect(now).await)?;
    expect_eq("second collection", &GcResult::default(), &again)?;

    expect_ok("delete live auth request", storage.delete_auth_request(&live_request.id).await)?;
    expect_ok("delete live auth code", storage.delete_auth_code(&live_code.id).await)
}
