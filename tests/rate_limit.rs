//! Rate-limit effect: per-bucket counting, window expiry, concurrent updates

use parking_lot::Mutex;
use rampart::{EffectKind, Enforcer, RampartError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn model(effect: &str, policy: &str) -> String {
    format!(
        "[request_definition]\nr = sub, obj, act\n\
         [policy_definition]\np = {}\n\
         [policy_effect]\ne = {}\n\
         [matchers]\nm = r.sub == p.sub && r.obj == p.obj && r.act == p.act\n",
        policy, effect
    )
}

#[test]
fn test_limit_per_subject_and_window_reset() {
    let mut e = Enforcer::from_text(&model("rate_limit(3, second, deny, sub)", "sub, obj, act")).unwrap();
    e.add_policy(["alice", "data1", "read"]).unwrap();
    e.add_policy(["bob", "data1", "read"]).unwrap();

    let results: Vec<bool> = (0..4)
        .map(|_| e.enforce(["alice", "data1", "read"]).unwrap())
        .collect();
    assert_eq!(results, vec![true, true, true, false]);

    // Separate bucket per subject
    assert!(e.enforce(["bob", "data1", "read"]).unwrap());

    thread::sleep(Duration::from_millis(1100));
    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
}

#[test]
fn test_count_allow_ignores_denied_rows() {
    let mut e = Enforcer::from_text(&model(
        "rate_limit(2, minute, allow, sub)",
        "sub, obj, act, eft",
    ))
    .unwrap();
    e.add_policy(["alice", "data1", "read", "allow"]).unwrap();
    e.add_policy(["alice", "data2", "read", "deny"]).unwrap();

    for _ in 0..5 {
        assert!(!e.enforce(["alice", "data2", "read"]).unwrap());
    }
    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
    assert!(!e.enforce(["alice", "data1", "read"]).unwrap());
}

#[test]
fn test_count_all_shares_one_bucket() {
    let mut e = Enforcer::from_text(&model("rate_limit(2, minute, all, all)", "sub, obj, act")).unwrap();
    e.add_policy(["alice", "data1", "read"]).unwrap();

    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
    // Unmatched requests still count
    assert!(!e.enforce(["bob", "data1", "read"]).unwrap());
    assert!(!e.enforce(["alice", "data1", "read"]).unwrap());

    let limiter = e.effector("e").unwrap().limiter();
    assert!(limiter.count("bucket:all") >= 3);
    limiter.reset();
    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
}

#[test]
fn test_bucket_by_object() {
    let mut e = Enforcer::from_text(&model("rate_limit(1, hour, deny, obj)", "sub, obj, act")).unwrap();
    e.add_policy(["alice", "data1", "read"]).unwrap();
    e.add_policy(["bob", "data1", "read"]).unwrap();
    e.add_policy(["bob", "data2", "read"]).unwrap();

    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
    assert!(!e.enforce(["bob", "data1", "read"]).unwrap());
    assert!(e.enforce(["bob", "data2", "read"]).unwrap());
}

#[test]
fn test_invalid_rate_limits() {
    for effect in [
        "rate_limit(0, second, deny, sub)",
        "rate_limit(3, fortnight, deny, sub)",
        "rate_limit(3, second, maybe, sub)",
        "rate_limit(3, second, deny, tenant)",
        "rate_limit(3, second)",
    ] {
        assert!(
            matches!(
                Enforcer::from_text(&model(effect, "sub, obj, act")),
                Err(RampartError::InvalidEffect(_))
            ),
            "{} should be rejected",
            effect
        );
    }
    assert!(matches!(
        "rate_limit(10, day, all, act)".parse::<EffectKind>(),
        Ok(EffectKind::RateLimit(_))
    ));
}

#[test]
fn test_concurrent_counting_is_exact() {
    let mut e = Enforcer::from_text(&model("rate_limit(500, minute, all, all)", "sub, obj, act")).unwrap();
    e.add_policy(["alice", "data1", "read"]).unwrap();
    let e = Arc::new(e);
    let allowed = Arc::new(Mutex::new(0usize));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let e = Arc::clone(&e);
            let allowed = Arc::clone(&allowed);
            thread::spawn(move || {
                for _ in 0..100 {
                    if e.enforce(["alice", "data1", "read"]).unwrap() {
                        *allowed.lock() += 1;
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*allowed.lock(), 500);
}
