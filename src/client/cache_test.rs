use std::time::Duration;

use super::cache::ValueCache;

fn cache() -> ValueCache {
    ValueCache::new(Duration::from_secs(60))
}

#[test]
fn fresh_entries_and_cached_misses_are_served() {
    let cache = cache();
    assert_eq!(cache.lookup("a"), None);

    assert!(cache.insert("a", Some("1".into()), cache.epoch()));
    assert!(cache.insert("b", None, cache.epoch()));

    assert_eq!(cache.lookup("a"), Some(Some("1".to_string())));
    assert_eq!(cache.lookup("b"), Some(None));
}

#[test]
fn zero_cooldown_disables_caching() {
    let cache = ValueCache::new(Duration::ZERO);
    assert!(!cache.is_enabled());
    assert!(!cache.insert("a", Some("1".into()), cache.epoch()));
    assert_eq!(cache.lookup("a"), None);
}

#[test]
fn entries_expire_after_cooldown() {
    let cache = ValueCache::new(Duration::from_millis(20));
    cache.insert("a", Some("1".into()), cache.epoch());
    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(cache.lookup("a"), None);

    cache.set_cooldown(Duration::from_secs(60));
    assert!(cache.lookup("a").is_some());
}

#[test]
fn fetch_racing_an_invalidation_is_not_stored() {
    let cache = cache();
    let epoch = cache.epoch();
    cache.invalidate("a");
    assert!(!cache.insert("a", Some("stale".into()), epoch));
    assert_eq!(cache.lookup("a"), None);
}

#[test]
fn invalidate_subtree_drops_the_path_but_not_siblings() {
    let cache = cache();
    for key in ["robot", "robot.arm", "robot.arm.angle", "robotics", "robot.leg"] {
        cache.insert(key, Some("1".into()), cache.epoch());
    }

    cache.invalidate_subtree("robot.arm");

    assert_eq!(cache.lookup("robot.arm"), None);
    assert_eq!(cache.lookup("robot.arm.angle"), None);
    assert_eq!(cache.lookup("robot"), None);
    assert!(cache.lookup("robot.leg").is_some());
    assert!(cache.lookup("robotics").is_some());

    cache.invalidate("robot.leg");
    assert_eq!(cache.len(), 1);

    cache.invalidate_subtree("");
    assert_eq!(cache.len(), 0);
}
