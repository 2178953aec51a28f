//! Response cache behavior tests

use super::*;
use crate::messages::Message;
use crate::storage::{KvStore, MemoryStore};
use std::time::Duration;

fn cache() -> ResponseCache {
    ResponseCache::new(MemoryStore::new())
}

/// A conversation about geography whose last turn is `prompt`
fn france_turns(prompt: &str) -> Vec<Message> {
    vec![
        Message::system("You are a helpful assistant."),
        Message::user("Let's talk geography."),
        Message::assistant("Sure, ask away."),
        Message::user(prompt),
    ]
}

/// A conversation about cooking whose last turn is `prompt`
fn cooking_turns(prompt: &str) -> Vec<Message> {
    vec![
        Message::system("You are a helpful assistant."),
        Message::user("Help me plan dinner."),
        Message::assistant("Happy to. What do you have in?"),
        Message::user(prompt),
    ]
}

#[test]
fn test_exact_hit_round_trip() {
    let cache = cache();
    let turns = france_turns("What is the capital of France?");

    cache.store(&turns, "Paris");
    assert_eq!(cache.lookup(&turns).as_deref(), Some("Paris"));

    let stats = cache.stats();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.total_hits, 1);
    assert!(stats.approximate_bytes > 0);

    let entries = cache.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1.hit_count, 1);
    assert_eq!(entries[0].1.prompt, "What is the capital of France?");
}

#[test]
fn test_fuzzy_hit_is_scoped_to_context() {
    let cache = cache();
    cache.store(
        &france_turns("What is the capital of France?"),
        "Paris",
    );

    // Same context, paraphrased prompt: fuzzy hit
    let hit = cache.lookup(&france_turns("what's the capital of france"));
    assert_eq!(hit.as_deref(), Some("Paris"));

    // Same prompt under a different context: miss
    let miss = cache.lookup(&cooking_turns("what's the capital of france"));
    assert_eq!(miss, None);
}

#[test]
fn test_fuzzy_respects_threshold() {
    let cache = cache();
    cache.store(
        &france_turns("tell me about rust lifetimes"),
        "they bound borrows",
    );

    let miss = cache.lookup(&france_turns("explain borrow checker errors"));
    assert_eq!(miss, None);
}

#[test]
fn test_fuzzy_tie_break_is_deterministic() {
    let cache = cache();
    cache.store(&france_turns("what is the capital of france"), "A");
    cache.store(&france_turns("what is the capital of francy"), "B");

    // Equidistant from both stored prompts; the lexicographically lowest key
    // ("...france" < "...francy") must win
    let hit = cache.lookup(&france_turns("what is the capital of francx"));
    assert_eq!(hit.as_deref(), Some("A"));

    let stats = cache.stats();
    assert_eq!(stats.total_hits, 1);
    let winner = cache
        .entries()
        .into_iter()
        .find(|(_, e)| e.response == "A")
        .unwrap();
    assert_eq!(winner.1.hit_count, 1);
}

#[test]
fn test_expired_entry_is_removed_at_read_time() {
    let config = CacheConfig {
        expiry: Duration::from_millis(40),
        ..Default::default()
    };
    let cache = ResponseCache::with_config(MemoryStore::new(), config);
    let turns = france_turns("What is the capital of France?");

    cache.store(&turns, "Paris");
    std::thread::sleep(Duration::from_millis(60));

    assert_eq!(cache.lookup(&turns), None);
    // The expired entry was deleted as a side effect of the lookup
    assert_eq!(cache.stats().total_entries, 0);
    assert_eq!(cache.stats().total_hits, 0);
}

#[test]
fn test_hit_refreshes_expiry() {
    let config = CacheConfig {
        expiry: Duration::from_millis(100),
        ..Default::default()
    };
    let cache = ResponseCache::with_config(MemoryStore::new(), config);
    let turns = france_turns("What is the capital of France?");

    cache.store(&turns, "Paris");
    std::thread::sleep(Duration::from_millis(60));
    // Hit inside the TTL refreshes the timestamp
    assert_eq!(cache.lookup(&turns).as_deref(), Some("Paris"));
    std::thread::sleep(Duration::from_millis(60));
    // 120ms after the write but only 60ms after the last access
    assert_eq!(cache.lookup(&turns).as_deref(), Some("Paris"));
}

#[test]
fn test_capacity_evicts_oldest() {
    let config = CacheConfig {
        max_entries: 3,
        ..Default::default()
    };
    let cache = ResponseCache::with_config(MemoryStore::new(), config);

    let prompts = ["alpha one", "bravo two", "charlie three", "delta four"];
    for prompt in prompts {
        cache.store(&france_turns(prompt), prompt);
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(cache.stats().total_entries, 3);
    // The single oldest entry is the one gone
    assert_eq!(cache.lookup(&france_turns("alpha one")), None);
    for prompt in &prompts[1..] {
        assert_eq!(cache.lookup(&france_turns(prompt)).as_deref(), Some(*prompt));
    }
}

#[test]
fn test_store_is_last_write_wins() {
    let cache = cache();
    let turns = france_turns("What is the capital of France?");

    cache.store(&turns, "first");
    assert_eq!(cache.lookup(&turns).as_deref(), Some("first"));

    cache.store(&turns, "second");
    let entries = cache.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1.response, "second");
    // Overwrite resets the hit count, no merge
    assert_eq!(entries[0].1.hit_count, 0);
}

#[test]
fn test_clear_is_idempotent() {
    let cache = cache();
    let turns = france_turns("What is the capital of France?");
    cache.store(&turns, "Paris");
    cache.lookup(&turns);

    cache.clear();
    let stats = cache.stats();
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.total_hits, 0);
    assert_eq!(stats.approximate_bytes, 0);

    // Clearing an already-empty store is safe
    cache.clear();
    assert_eq!(cache.stats().total_entries, 0);
}

#[test]
fn test_miss_does_not_mutate() {
    let cache = cache();
    cache.store(&france_turns("What is the capital of France?"), "Paris");

    assert_eq!(cache.lookup(&cooking_turns("how long do lentils take")), None);

    let stats = cache.stats();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.total_hits, 0);
}

#[test]
fn test_sweep_removes_only_expired_entries() {
    let config = CacheConfig {
        expiry: Duration::from_millis(50),
        ..Default::default()
    };
    let cache = ResponseCache::with_config(MemoryStore::new(), config);

    cache.store(&france_turns("old question"), "old answer");
    std::thread::sleep(Duration::from_millis(70));
    cache.store(&cooking_turns("fresh question"), "fresh answer");

    assert_eq!(cache.sweep_expired(), 1);
    assert_eq!(cache.stats().total_entries, 1);
    assert_eq!(
        cache.lookup(&cooking_turns("fresh question")).as_deref(),
        Some("fresh answer")
    );

    // Nothing left to sweep
    assert_eq!(cache.sweep_expired(), 0);
}

#[test]
fn test_quota_recovery_drops_oldest_and_retries() {
    let cache = ResponseCache::new(MemoryStore::with_byte_limit(2000));

    let mut last_turns = Vec::new();
    for i in 0..12 {
        let turns = france_turns(&format!("distinct question number {}", i));
        cache.store(&turns, &"r".repeat(120));
        std::thread::sleep(Duration::from_millis(2));
        last_turns = turns;
    }

    // Writes kept succeeding by shedding the oldest entries
    let stats = cache.stats();
    assert!(stats.total_entries >= 1);
    assert!(stats.total_entries < 12);
    // The most recent write always survives the shed
    assert_eq!(
        cache.lookup(&last_turns).as_deref(),
        Some("r".repeat(120).as_str())
    );
}

#[test]
fn test_malformed_record_degrades_to_empty() {
    let mut store = MemoryStore::new();
    store.set(ENTRIES_KEY, "definitely not json").unwrap();
    let cache = ResponseCache::new(store);

    let turns = france_turns("What is the capital of France?");
    assert_eq!(cache.stats().total_entries, 0);
    assert_eq!(cache.lookup(&turns), None);

    // The store recovers on the next write
    cache.store(&turns, "Paris");
    assert_eq!(cache.lookup(&turns).as_deref(), Some("Paris"));
}

#[test]
fn test_empty_conversation_is_a_no_op() {
    let cache = cache();
    assert_eq!(cache.lookup(&[]), None);
    cache.store(&[], "orphan response");
    assert_eq!(cache.stats().total_entries, 0);
}

#[test]
fn test_key_ignores_history_outside_window() {
    let cache = cache();

    let mut stored = vec![Message::user("early context that will scroll away")];
    stored.extend(france_turns("What is the capital of France?"));
    let mut queried = vec![Message::user("completely different early history")];
    queried.extend(france_turns("What is the capital of France?"));

    cache.store(&stored, "Paris");
    assert_eq!(cache.lookup(&queried).as_deref(), Some("Paris"));
}

#[test]
fn test_enabled_flag_round_trip() {
    let cache = cache();
    assert!(cache.is_enabled());

    cache.set_enabled(false);
    assert!(!cache.is_enabled());

    cache.set_enabled(true);
    assert!(cache.is_enabled());
}
