use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use key_resolver::{
    KeyStore, MemoryStore, NormalizedValue, ResolveError, StoreResult, StoredValue, Strategy,
    resolve,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

/// Wraps a MemoryStore and records which commands the resolver issued
struct RecordingStore {
    inner: MemoryStore,
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn record(&self, command: &'static str) {
        self.calls.lock().push(command);
    }
}

impl KeyStore for RecordingStore {
    async fn get_document(&self, key: &str) -> StoreResult<Option<String>> {
        self.record("JSON.GET");
        self.inner.get_document(key).await
    }

    async fn get_string(&self, key: &str) -> StoreResult<Option<String>> {
        self.record("GET");
        self.inner.get_string(key).await
    }

    async fn get_sequence(&self, key: &str) -> StoreResult<Vec<String>> {
        self.record("LRANGE");
        self.inner.get_sequence(key).await
    }

    async fn get_set(&self, key: &str) -> StoreResult<Vec<String>> {
        self.record("SMEMBERS");
        self.inner.get_set(key).await
    }

    async fn get_mapping(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        self.record("HGETALL");
        self.inner.get_mapping(key).await
    }

    async fn list_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.inner.list_keys(pattern).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn close(&self) {
        self.inner.close().await
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

/// The fixture used by the HTTP layer: no JSON module, four collection keys
fn collections_store() -> MemoryStore {
    MemoryStore::without_documents()
        .with(
            "institutions",
            StoredValue::list([r#"{"id": 1, "name": "Uni A"}"#, r#"{"id": 2, "name": "Uni B"}"#]),
        )
        .with("companies", StoredValue::String(r#"["C1", "C2"]"#.into()))
        .with("roles", StoredValue::set(["admin", "user"]))
}

#[tokio::test]
async fn test_absent_key_resolves_to_empty_sequence() {
    let store = collections_store();

    let resolution = resolve(&store, "degrees").await.unwrap();

    assert_eq!(resolution.value, NormalizedValue::empty());
    assert_eq!(resolution.strategy, None);
    assert_eq!(resolution.count(), 0);
    assert_eq!(resolution.value.into_json(), json!([]));
}

#[tokio::test]
async fn test_list_elements_are_decoded() {
    let store = MemoryStore::new().with("ids", StoredValue::list([r#"{"id":1}"#, r#"{"id":2}"#]));

    let resolution = resolve(&store, "ids").await.unwrap();

    assert_eq!(resolution.strategy, Some(Strategy::Sequence));
    assert_eq!(resolution.value.into_json(), json!([{"id": 1}, {"id": 2}]));
}

#[tokio::test]
async fn test_list_preserves_order_and_mixes_raw_elements() {
    let store = MemoryStore::new().with(
        "mixed",
        StoredValue::list(["plain", r#"{"id":7}"#, "3", "not {json"]),
    );

    let resolution = resolve(&store, "mixed").await.unwrap();

    assert_eq!(
        resolution.value.into_json(),
        json!(["plain", {"id": 7}, 3, "not {json"])
    );
}

#[tokio::test]
async fn test_string_holding_json_array() {
    let store = collections_store();

    let resolution = resolve(&store, "companies").await.unwrap();

    assert_eq!(resolution.strategy, Some(Strategy::String));
    assert_eq!(resolution.count(), 2);
    assert_eq!(resolution.value.into_json(), json!(["C1", "C2"]));
}

#[tokio::test]
async fn test_plain_string_is_wrapped() {
    let store = MemoryStore::new().with("greeting", StoredValue::String("hello world".into()));

    let resolution = resolve(&store, "greeting").await.unwrap();

    assert_eq!(resolution.strategy, Some(Strategy::String));
    assert_eq!(
        resolution.value,
        NormalizedValue::Sequence(vec![json!("hello world")])
    );
}

#[tokio::test]
async fn test_empty_string_falls_through() {
    let store = RecordingStore::new(MemoryStore::new().with("blank", StoredValue::String(String::new())));

    let resolution = resolve(&store, "blank").await.unwrap();

    // An empty string is "not found"; the remaining probes hit WRONGTYPE and skip
    assert_eq!(resolution.value.into_json(), json!([]));
    assert_eq!(resolution.strategy, None);
    assert_eq!(
        store.calls(),
        vec!["JSON.GET", "GET", "LRANGE", "SMEMBERS", "HGETALL"]
    );
}

#[tokio::test]
async fn test_string_holding_empty_array_is_terminal() {
    let store = RecordingStore::new(MemoryStore::new().with("none", StoredValue::String("[]".into())));

    let resolution = resolve(&store, "none").await.unwrap();

    assert_eq!(resolution.strategy, Some(Strategy::String));
    assert_eq!(resolution.count(), 0);
    assert_eq!(store.calls(), vec!["JSON.GET", "GET"]);
}

#[tokio::test]
async fn test_set_members_in_any_order() {
    let store = collections_store();

    let resolution = resolve(&store, "roles").await.unwrap();

    assert_eq!(resolution.strategy, Some(Strategy::Set));
    assert_eq!(resolution.count(), 2);

    let Value::Array(items) = resolution.value.into_json() else {
        panic!("set must resolve to an array");
    };
    let members: HashSet<String> = items
        .into_iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(members, HashSet::from(["admin".to_string(), "user".to_string()]));
}

#[tokio::test]
async fn test_hash_values_are_not_decoded() {
    let fields = BTreeMap::from([
        ("name".to_string(), "Uni A".to_string()),
        ("meta".to_string(), r#"{"rank":1}"#.to_string()),
    ]);
    let store = MemoryStore::new().with("institution:1", StoredValue::Hash(fields.clone()));

    let resolution = resolve(&store, "institution:1").await.unwrap();

    assert_eq!(resolution.strategy, Some(Strategy::Mapping));
    assert_eq!(resolution.value, NormalizedValue::Mapping(fields));
    assert_eq!(
        resolution.value.into_json(),
        json!({"name": "Uni A", "meta": "{\"rank\":1}"})
    );
}

#[tokio::test]
async fn test_document_is_passed_through() {
    let store = RecordingStore::new(MemoryStore::new().with(
        "degrees",
        StoredValue::Document(r#"[{"code":"BSc"},{"code":"MSc"}]"#.into()),
    ));

    let resolution = resolve(&store, "degrees").await.unwrap();

    assert_eq!(resolution.strategy, Some(Strategy::Document));
    assert_eq!(
        resolution.value.into_json(),
        json!([{"code": "BSc"}, {"code": "MSc"}])
    );
    assert_eq!(store.calls(), vec!["JSON.GET"]);
}

/// Store that answers both the document and string probes for one key
struct DocumentAndString;

impl KeyStore for DocumentAndString {
    async fn get_document(&self, _key: &str) -> StoreResult<Option<String>> {
        Ok(Some(r#"{"source":"document"}"#.to_string()))
    }

    async fn get_string(&self, _key: &str) -> StoreResult<Option<String>> {
        Ok(Some(r#"{"source":"string"}"#.to_string()))
    }

    async fn get_sequence(&self, _key: &str) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_set(&self, _key: &str) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_mapping(&self, _key: &str) -> StoreResult<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }

    async fn list_keys(&self, _pattern: &str) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn close(&self) {}

    fn backend_name(&self) -> &'static str {
        "fixed"
    }
}

#[tokio::test]
async fn test_document_wins_over_string() {
    let resolution = resolve(&DocumentAndString, "both").await.unwrap();

    assert_eq!(resolution.strategy, Some(Strategy::Document));
    assert_eq!(resolution.value.into_json(), json!({"source": "document"}));
}

#[tokio::test]
async fn test_invalid_document_propagates() {
    let store = MemoryStore::new().with("broken", StoredValue::Document("{not json".into()));

    let err = resolve(&store, "broken").await.unwrap_err();

    let ResolveError::DocumentDecode { key, .. } = err;
    assert_eq!(key, "broken");
}

#[tokio::test]
async fn test_transport_failure_skips_to_next_probe() {
    let store = RecordingStore::new(
        MemoryStore::new().with("roles", StoredValue::set(["admin", "user"])),
    );
    store.inner.fail_command("JSON.GET");
    store.inner.fail_command("LRANGE");

    let resolution = resolve(&store, "roles").await.unwrap();

    assert_eq!(resolution.strategy, Some(Strategy::Set));
    assert_eq!(resolution.count(), 2);
    assert_eq!(store.calls(), vec!["JSON.GET", "GET", "LRANGE", "SMEMBERS"]);
}

#[tokio::test]
async fn test_timed_out_reads_skip_to_next_strategy() {
    let store = RecordingStore::new(
        MemoryStore::new()
            .with("institutions", StoredValue::list([r#"{"id": 1}"#, r#"{"id": 2}"#]))
            .with("companies", StoredValue::String(r#"["C1", "C2"]"#.into())),
    );
    let after = Duration::from_millis(5000);
    store.inner.time_out_command("JSON.GET", after);
    store.inner.time_out_command("GET", after);

    let resolution = resolve(&store, "institutions").await.unwrap();

    assert_eq!(resolution.strategy, Some(Strategy::Sequence));
    assert_eq!(resolution.count(), 2);
    assert_eq!(store.calls(), vec!["JSON.GET", "GET", "LRANGE"]);

    // Nothing after the timed-out read holds the key
    let resolution = resolve(&store, "companies").await.unwrap();
    assert_eq!(resolution.strategy, None);
    assert_eq!(resolution.count(), 0);
}

#[tokio::test]
async fn test_large_integers_keep_their_digits() {
    let store = MemoryStore::new()
        .with("big", StoredValue::list(["123456789012345678901234567890"]))
        .with("big:string", StoredValue::String("[-98765432109876543210987654321]".into()));

    let list = resolve(&store, "big").await.unwrap().value.into_json();
    assert_eq!(list.to_string(), "[123456789012345678901234567890]");

    let string = resolve(&store, "big:string").await.unwrap().value.into_json();
    assert_eq!(string.to_string(), "[-98765432109876543210987654321]");
}

#[tokio::test]
async fn test_closed_store_exhausts_without_error() {
    let store = collections_store();
    store.close().await;

    let resolution = resolve(&store, "companies").await.unwrap();

    assert_eq!(resolution.value, NormalizedValue::empty());
}

#[tokio::test]
async fn test_resolution_is_idempotent() {
    let store = collections_store();

    for key in ["institutions", "companies", "degrees"] {
        let first = resolve(&store, key).await.unwrap();
        let second = resolve(&store, key).await.unwrap();
        assert_eq!(first, second, "key {key}");
    }

    let first = resolve(&store, "roles").await.unwrap().value.into_json();
    let second = resolve(&store, "roles").await.unwrap().value.into_json();
    let as_set = |v: Value| -> HashSet<String> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|item| item.to_string())
            .collect()
    };
    assert_eq!(as_set(first), as_set(second));
}

#[tokio::test]
async fn test_concurrent_resolution_on_shared_store() {
    let store = Arc::new(collections_store());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let key = if i % 2 == 0 { "institutions" } else { "companies" };
                resolve(store.as_ref(), key).await.unwrap().count()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 2);
    }
}
