use super::*;
use serde_json::json;
use std::sync::Arc;
use std::thread;

#[test]
fn test_first_write_creates_entry() {
    let store = TopicStateStore::new();

    let previous = store.set("unit/1", json!({"temp": -4.5}), EntryOrigin::Inbound);

    assert!(previous.is_none());
    assert_eq!(store.get("unit/1").unwrap(), json!({"temp": -4.5}));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_inbound_write_is_last_write_wins() {
    let store = TopicStateStore::new();

    store.set("unit/1", json!({"temp": 10, "setpoint": 5}), EntryOrigin::Inbound);
    let previous = store.set("unit/1", json!({"temp": 11}), EntryOrigin::Inbound);

    // Whole payload replaced, no merge of the missing "setpoint" field
    assert_eq!(previous, Some(json!({"temp": 10, "setpoint": 5})));
    assert_eq!(store.get("unit/1").unwrap(), json!({"temp": 11}));
}

#[test]
fn test_entry_records_origin_and_timestamp() {
    let store = TopicStateStore::new();

    store.set("unit/2", json!({"power": "ON"}), EntryOrigin::Local);

    let entry = store.entry("unit/2").unwrap();
    assert_eq!(entry.topic, "unit/2");
    assert_eq!(entry.origin, EntryOrigin::Local);
    assert!(entry.age() < chrono::Duration::seconds(5));
}

#[test]
fn test_get_nonexistent_topic() {
    let store = TopicStateStore::new();
    assert!(store.get("nope").is_none());
    assert!(store.entry("nope").is_none());
}

#[test]
fn test_topics_sorted_and_clear() {
    let store = TopicStateStore::new();

    store.set("unit/2", json!({}), EntryOrigin::Inbound);
    store.set("unit/1", json!({}), EntryOrigin::Inbound);

    assert_eq!(store.topics(), vec!["unit/1".to_string(), "unit/2".to_string()]);
    assert_eq!(store.entries().len(), 2);

    store.clear();
    assert!(store.is_empty());
    assert!(store.get("unit/1").is_none());
}

#[test]
fn test_concurrent_writes_to_distinct_topics() {
    let store = Arc::new(TopicStateStore::new());
    let mut handles = vec![];

    for i in 0..10 {
        let store_clone = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let topic = format!("unit/{}", i);
            store_clone.set(&topic, json!({ "temp": i }), EntryOrigin::Inbound);
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.len(), 10);
    assert_eq!(store.get("unit/7").unwrap(), json!({"temp": 7}));
}
