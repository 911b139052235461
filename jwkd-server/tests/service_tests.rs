//! Key service orchestration tests

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use jwkd_cache::{KeyCache, MemoryStore};
use jwkd_keys::algebra::decode_member;
use jwkd_keys::jwe::decrypt;
use jwkd_keys::{
    EncryptionSettings, Jwk, JwkSet, KeyError, KeyFilter, KeyGenerator, KeyOptions, KeyPayload,
    KeyRecord, KeyRepository, KeyResult, KeySetEncryptor, KeyType, KeyWrite, LocalKeyRepository,
    Sealed, Tags,
};
use jwkd_server::{KeyService, ListKind};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Wraps the in-memory repository; can refuse commits that create keys and
/// can report revocations as older than they are
struct TestRepository {
    inner: Arc<LocalKeyRepository>,
    fail_creates: AtomicBool,
    revoked_days_ago: AtomicI64,
}

impl TestRepository {
    fn new(inner: Arc<LocalKeyRepository>) -> Self {
        Self {
            inner,
            fail_creates: AtomicBool::new(false),
            revoked_days_ago: AtomicI64::new(0),
        }
    }

    fn backdate(&self, mut record: KeyRecord) -> KeyRecord {
        let days = self.revoked_days_ago.load(Ordering::SeqCst);
        record.revoked_at = record.revoked_at.map(|at| at - ChronoDuration::days(days));
        record
    }
}

#[async_trait]
impl KeyRepository for TestRepository {
    async fn get_all(&self, filter: &KeyFilter) -> KeyResult<Vec<KeyRecord>> {
        let records = self.inner.get_all(filter).await?;
        Ok(records.into_iter().map(|record| self.backdate(record)).collect())
    }

    async fn get_single_key(&self, key_id: &str, filter: &KeyFilter) -> KeyResult<KeyRecord> {
        let record = self.inner.get_single_key(key_id, filter).await?;
        Ok(self.backdate(record))
    }

    async fn commit(&self, writes: Vec<KeyWrite>) -> KeyResult<Vec<KeyRecord>> {
        let creates = writes.iter().any(|write| matches!(write, KeyWrite::Create { .. }));
        if creates && self.fail_creates.load(Ordering::SeqCst) {
            return Err(KeyError::Persistence("storage unavailable".to_string()));
        }
        self.inner.commit(writes).await
    }
}

struct Harness {
    service: KeyService,
    repository: Arc<TestRepository>,
    cache: KeyCache,
}

fn harness(encryption_enabled: bool) -> Harness {
    let local = Arc::new(LocalKeyRepository::in_memory());
    let repository = Arc::new(TestRepository::new(local.clone()));
    let store = Arc::new(MemoryStore::new("test:"));

    let settings = EncryptionSettings {
        enabled: encryption_enabled,
        ..EncryptionSettings::default()
    };
    let generator = KeyGenerator::new();
    let encryptor = KeySetEncryptor::new(&settings, generator.clone()).unwrap();

    let service = KeyService::new(
        repository.clone(),
        local,
        generator,
        encryptor,
        KeyCache::new(store.clone()),
    );
    Harness {
        service,
        repository,
        cache: KeyCache::new(store),
    }
}

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

fn plain_set(sealed: Sealed) -> JwkSet {
    match sealed {
        Sealed::Plain(KeyPayload::Set(set)) => set,
        other => panic!("expected a plain key set, got {:?}", other),
    }
}

fn kids(set: &JwkSet) -> Vec<String> {
    let mut kids: Vec<String> = set
        .keys
        .iter()
        .filter_map(|jwk| jwk.kid().map(str::to_string))
        .collect();
    kids.sort();
    kids
}

fn is_private(jwk: &Jwk) -> bool {
    jwk.has("d") || jwk.has("k")
}

#[tokio::test]
async fn test_listing_kinds() {
    let h = harness(false);
    let first = h.service.generate_key(KeyOptions::new(KeyType::Ec), Tags::new()).await.unwrap();
    let second = h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();
    h.service.revoke_key(&first.thumbprint).await.unwrap();

    let private = plain_set(h.service.list_keys(ListKind::Private, Tags::new(), None).await.unwrap());
    assert_eq!(kids(&private), vec![second.thumbprint.clone()]);
    assert!(private.keys.iter().all(is_private));

    let public = plain_set(h.service.list_keys(ListKind::Public, Tags::new(), None).await.unwrap());
    assert_eq!(public.len(), 2);
    assert!(!public.keys.iter().any(is_private));

    // Revoked keys appear in `all` only in public form
    let all = plain_set(h.service.list_keys(ListKind::All, Tags::new(), None).await.unwrap());
    assert_eq!(all.len(), 2);
    for jwk in &all.keys {
        assert_eq!(is_private(jwk), jwk.kid() == Some(second.thumbprint.as_str()));
    }
}

#[tokio::test]
async fn test_listing_filters_by_tags() {
    let h = harness(false);
    let prod = h
        .service
        .generate_key(KeyOptions::new(KeyType::Okp), tags(&[("env", "prod")]))
        .await
        .unwrap();
    h.service
        .generate_key(KeyOptions::new(KeyType::Okp), tags(&[("env", "dev")]))
        .await
        .unwrap();

    let set = plain_set(
        h.service
            .list_keys(ListKind::Public, tags(&[("env", "prod")]), None)
            .await
            .unwrap(),
    );
    assert_eq!(kids(&set), vec![prod.thumbprint]);
}

#[tokio::test]
async fn test_listings_are_cached_until_a_write() {
    let h = harness(false);
    h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();

    let first = plain_set(h.service.list_keys(ListKind::Public, Tags::new(), None).await.unwrap());
    assert!(h.cache.has("list", "public").await.unwrap());

    let cached: JwkSet = h.cache.get("list", "public").await.unwrap().unwrap();
    assert_eq!(cached, first);

    h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();
    assert!(!h.cache.has("list", "public").await.unwrap());

    let second = plain_set(h.service.list_keys(ListKind::Public, Tags::new(), None).await.unwrap());
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn test_malformed_cache_entry_is_rebuilt() {
    let h = harness(false);
    h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();
    h.cache
        .store("list", "public", &serde_json::json!({"keys": 5}), None)
        .await
        .unwrap();

    let set = plain_set(h.service.list_keys(ListKind::Public, Tags::new(), None).await.unwrap());
    assert_eq!(set.len(), 1);
}

#[tokio::test]
async fn test_empty_listing_is_not_cached() {
    let h = harness(false);
    let set = plain_set(h.service.list_keys(ListKind::Private, Tags::new(), None).await.unwrap());
    assert!(set.is_empty());
    assert!(!h.cache.has("list", "private").await.unwrap());
}

#[tokio::test]
async fn test_public_listing_skips_oct_keys() {
    let h = harness(false);
    h.service.generate_key(KeyOptions::from_secret("shared"), Tags::new()).await.unwrap();
    let okp = h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();

    let public = plain_set(h.service.list_keys(ListKind::Public, Tags::new(), None).await.unwrap());
    assert_eq!(kids(&public), vec![okp.thumbprint]);

    let private = plain_set(h.service.list_keys(ListKind::Private, Tags::new(), None).await.unwrap());
    assert_eq!(private.len(), 2);
}

#[tokio::test]
async fn test_rotation_copies_parameters_and_tags() {
    let h = harness(false);
    let old = h
        .service
        .generate_key(KeyOptions::new(KeyType::Ec).curve("P-384"), tags(&[("team", "auth")]))
        .await
        .unwrap();

    let new = h.service.rotate_key(&old.thumbprint).await.unwrap();
    assert_ne!(new.thumbprint, old.thumbprint);

    let old_record = h
        .repository
        .get_single_key(&old.thumbprint, &KeyFilter::new().include_revoked())
        .await
        .unwrap();
    assert!(old_record.is_revoked());

    let new_record = h.repository.get_single_key(&new.thumbprint, &KeyFilter::new()).await.unwrap();
    assert_eq!(new_record.tags, tags(&[("team", "auth")]));
    assert_eq!(new_record.key_data.get("crv").and_then(|v| v.as_str()), Some("P-384"));

    // Rotating a revoked key is not possible
    assert!(matches!(
        h.service.rotate_key(&old.thumbprint).await,
        Err(KeyError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_failed_rotation_leaves_key_active() {
    let h = harness(false);
    let old = h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();
    h.repository.fail_creates.store(true, Ordering::SeqCst);

    let result = h.service.rotate_key(&old.thumbprint).await;
    assert!(matches!(result, Err(KeyError::Persistence(_))));

    let record = h.repository.get_single_key(&old.thumbprint, &KeyFilter::new()).await.unwrap();
    assert!(!record.is_revoked());
    let all = h.repository.get_all(&KeyFilter::new().include_revoked()).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_single_key_lookup() {
    let h = harness(false);
    let created = h.service.generate_key(KeyOptions::new(KeyType::Ec), Tags::new()).await.unwrap();

    for key_id in [created.thumbprint.clone(), created.id.to_string()] {
        let set = plain_set(h.service.get_single_key(&key_id, None).await.unwrap());
        assert_eq!(kids(&set), vec![created.thumbprint.clone()]);
        assert!(!is_private(&set.keys[0]));
    }

    // Revoked keys can still be fetched
    h.service.revoke_key(&created.thumbprint).await.unwrap();
    assert!(h.service.get_single_key(&created.thumbprint, None).await.is_ok());

    assert!(matches!(
        h.service.get_single_key("missing", None).await,
        Err(KeyError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_soft_and_force_delete() {
    let h = harness(false);
    let soft = h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();
    let hard = h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();
    h.service.revoke_key(&hard.thumbprint).await.unwrap();

    h.service.delete_key(&soft.thumbprint, false).await.unwrap();
    h.service.delete_key(&hard.thumbprint, true).await.unwrap();

    let trashed = h
        .repository
        .get_all(&KeyFilter::new().include_revoked().only_trashed())
        .await
        .unwrap();
    assert_eq!(trashed.len(), 1);
    assert_eq!(trashed[0].thumbprint, soft.thumbprint);

    let everything = h
        .repository
        .get_all(&KeyFilter::new().include_revoked().include_trashed())
        .await
        .unwrap();
    assert_eq!(everything.len(), 1);
}

#[tokio::test]
async fn test_cleanup_removes_old_revocations_only() {
    let h = harness(false);
    let old = h
        .service
        .generate_key(KeyOptions::new(KeyType::Okp), tags(&[("env", "prod")]))
        .await
        .unwrap();
    let other = h
        .service
        .generate_key(KeyOptions::new(KeyType::Okp), tags(&[("env", "dev")]))
        .await
        .unwrap();
    let active = h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();
    h.service.revoke_key(&old.thumbprint).await.unwrap();
    h.service.revoke_key(&other.thumbprint).await.unwrap();

    // Revoked five days ago: kept
    h.repository.revoked_days_ago.store(5, Ordering::SeqCst);
    assert_eq!(h.service.cleanup_keys(Tags::new(), 30, false).await.unwrap(), 0);

    // Revoked forty days ago: removed, tag filter applied
    h.repository.revoked_days_ago.store(40, Ordering::SeqCst);
    let removed = h
        .service
        .cleanup_keys(tags(&[("env", "prod")]), 30, false)
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let remaining = h.repository.get_all(&KeyFilter::new().include_revoked()).await.unwrap();
    let mut remaining: Vec<String> = remaining.into_iter().map(|r| r.thumbprint).collect();
    remaining.sort();
    let mut expected = vec![other.thumbprint, active.thumbprint];
    expected.sort();
    assert_eq!(remaining, expected);
}

#[tokio::test]
async fn test_encrypted_listings() {
    let h = harness(true);
    h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();
    h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();

    // Private listings need a registered transport key
    assert!(matches!(
        h.service.list_keys(ListKind::Private, Tags::new(), None).await,
        Err(KeyError::Validation(_))
    ));
    assert!(matches!(
        h.service.list_keys(ListKind::Private, Tags::new(), Some("unknown")).await,
        Err(KeyError::Validation(_))
    ));

    // Public listings are never encrypted
    let public = plain_set(h.service.list_keys(ListKind::Public, Tags::new(), None).await.unwrap());
    assert_eq!(public.len(), 2);

    let pair = h.service.register_encryption_key("client secret").await.unwrap();
    let envelope = match h
        .service
        .list_keys(ListKind::Private, Tags::new(), Some(&pair.hash))
        .await
        .unwrap()
    {
        Sealed::Envelope(envelope) => envelope,
        other => panic!("expected an envelope, got {:?}", other),
    };
    assert_eq!(envelope.protected_header().unwrap()["cty"], "jwk-set+json");

    let wrapping_key = KeyGenerator::new()
        .generate(&KeyOptions::from_secret(pair.key.as_str()))
        .unwrap();
    let plaintext = decrypt(&envelope, &decode_member(&wrapping_key, "k").unwrap()).unwrap();
    let set: JwkSet = serde_json::from_slice(&plaintext).unwrap();
    assert_eq!(set.len(), 2);
    assert!(set.keys.iter().all(is_private));
}

#[tokio::test]
async fn test_encrypted_single_key() {
    let h = harness(true);
    let created = h.service.generate_key(KeyOptions::new(KeyType::Okp), Tags::new()).await.unwrap();
    let pair = h.service.register_encryption_key("client secret").await.unwrap();

    let sealed = h.service.get_single_key(&created.thumbprint, Some(&pair.hash)).await.unwrap();
    assert!(matches!(sealed, Sealed::Envelope(_)));

    // Without a transport key the public form comes back
    let set = plain_set(h.service.get_single_key(&created.thumbprint, None).await.unwrap());
    assert!(!is_private(&set.keys[0]));

    // Revoked keys are only ever returned in public form
    h.service.revoke_key(&created.thumbprint).await.unwrap();
    let set = plain_set(h.service.get_single_key(&created.thumbprint, Some(&pair.hash)).await.unwrap());
    assert!(!is_private(&set.keys[0]));
}
