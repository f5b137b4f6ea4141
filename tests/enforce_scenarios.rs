//! End-to-end enforcement: basic, RBAC and priority scenarios plus effect semantics

use rampart::{
    EnforceContext, Enforcer, EnforcerBuilder, ErrorKind, Model, RampartError, StringAdapter,
};
use std::io::Write;

const BASIC_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
"#;

const RBAC_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

fn effect_model(effect: &str) -> String {
    format!(
        "[request_definition]\nr = sub, obj, act\n\
         [policy_definition]\np = sub, obj, act, eft\n\
         [policy_effect]\ne = {}\n\
         [matchers]\nm = r.sub == p.sub && r.obj == p.obj && r.act == p.act\n",
        effect
    )
}

#[test]
fn test_basic_scenario() {
    let mut e = Enforcer::from_text(BASIC_MODEL).unwrap();
    e.add_policy(["alice", "data1", "read"]).unwrap();
    e.add_policy(["bob", "data2", "write"]).unwrap();

    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
    assert!(!e.enforce(["alice", "data1", "write"]).unwrap());
    assert!(!e.enforce(["alice", "data2", "write"]).unwrap());
    assert!(e.enforce(["bob", "data2", "write"]).unwrap());
}

#[test]
fn test_rbac_scenario() {
    let mut e = Enforcer::from_text(RBAC_MODEL).unwrap();
    e.add_policy(["admin", "data1", "read"]).unwrap();
    e.add_grouping_policy(["alice", "admin"]).unwrap();

    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
    assert!(e.enforce(["admin", "data1", "read"]).unwrap());
    assert!(!e.enforce(["bob", "data1", "read"]).unwrap());
    assert!(!e.enforce(["alice", "data1", "write"]).unwrap());
}

#[test]
fn test_priority_follows_row_order() {
    let text = effect_model("priority(p.eft) || deny");

    let mut e = Enforcer::from_text(&text).unwrap();
    e.add_policy(["alice", "data1", "read", "deny"]).unwrap();
    e.add_policy(["alice", "data1", "read", "allow"]).unwrap();
    assert!(!e.enforce(["alice", "data1", "read"]).unwrap());

    let mut reversed = Enforcer::from_text(&text).unwrap();
    reversed.add_policy(["alice", "data1", "read", "allow"]).unwrap();
    reversed.add_policy(["alice", "data1", "read", "deny"]).unwrap();
    assert!(reversed.enforce(["alice", "data1", "read"]).unwrap());
}

#[test]
fn test_priority_column_orders_rows() {
    let text = "[request_definition]\nr = sub, obj, act\n\
                [policy_definition]\np = priority, sub, obj, act, eft\n\
                [policy_effect]\ne = priority(p.eft) || deny\n\
                [matchers]\nm = r.sub == p.sub && r.obj == p.obj && r.act == p.act\n";
    let mut e = Enforcer::from_text(text).unwrap();
    e.add_policy(["10", "alice", "data1", "read", "allow"]).unwrap();
    e.add_policy(["1", "alice", "data1", "read", "deny"]).unwrap();

    assert_eq!(e.get_policy()[0][0], "1");
    let (allowed, rows) = e.enforce_ex(["alice", "data1", "read"]).unwrap();
    assert!(!allowed);
    assert_eq!(rows, vec![vec!["1", "alice", "data1", "read", "deny"]]);
}

#[test]
fn test_deny_override() {
    let mut e = Enforcer::from_text(&effect_model("!some(where (p.eft == deny))")).unwrap();
    e.add_policy(["alice", "data1", "read", "allow"]).unwrap();
    e.add_policy(["alice", "data1", "read", "deny"]).unwrap();
    e.add_policy(["bob", "data2", "write", "allow"]).unwrap();

    assert!(!e.enforce(["alice", "data1", "read"]).unwrap());
    assert!(e.enforce(["bob", "data2", "write"]).unwrap());
    assert!(!e.enforce(["carol", "data3", "read"]).unwrap());
}

#[test]
fn test_allow_and_deny() {
    let mut e = Enforcer::from_text(&effect_model(
        "some(where (p.eft == allow)) && !some(where (p.eft == deny))",
    ))
    .unwrap();
    e.add_policy(["alice", "data1", "read", "allow"]).unwrap();
    e.add_policy(["bob", "data2", "write", "allow"]).unwrap();
    e.add_policy(["bob", "data2", "write", "deny"]).unwrap();

    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
    assert!(!e.enforce(["bob", "data2", "write"]).unwrap());
    assert!(!e.enforce(["carol", "data1", "read"]).unwrap());
}

#[test]
fn test_unique_match_is_indeterminate_on_overlap() {
    let text = "[request_definition]\nr = sub, obj, act\n\
                [policy_definition]\np = sub, obj, act, eft\n\
                [policy_effect]\ne = unique(where (p.eft == allow))\n\
                [matchers]\nm = (r.sub == p.sub || p.sub == \"*\") && r.obj == p.obj && r.act == p.act\n";
    let mut e = Enforcer::from_text(text).unwrap();
    e.add_policy(["alice", "data1", "read", "allow"]).unwrap();
    e.add_policy(["*", "data1", "read", "allow"]).unwrap();
    e.add_policy(["*", "data2", "read", "allow"]).unwrap();

    assert!(e.enforce(["bob", "data2", "read"]).unwrap());
    assert!(!e.enforce(["bob", "data3", "read"]).unwrap());

    let err = e.enforce(["alice", "data1", "read"]).unwrap_err();
    assert!(matches!(err, RampartError::Indeterminate(_)));
    assert_eq!(err.kind(), ErrorKind::Effect);

    let decision = e.decide(["alice", "data1", "read"]);
    assert!(!decision.allowed);
    assert!(decision.error.is_some());
}

#[test]
fn test_unknown_effect_labels_are_ignored() {
    let mut e = Enforcer::from_text(&effect_model("some(where (p.eft == allow))")).unwrap();
    e.add_policy(["alice", "data1", "read", "maybe"]).unwrap();
    assert!(!e.enforce(["alice", "data1", "read"]).unwrap());

    e.add_policy(["alice", "data1", "read", "allow"]).unwrap();
    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
}

#[test]
fn test_subject_priority() {
    let text = "[request_definition]\nr = sub, obj, act\n\
                [policy_definition]\np = sub, obj, act, eft\n\
                [role_definition]\ng = _, _\n\
                [policy_effect]\ne = subjectPriority(p.eft) || deny\n\
                [matchers]\nm = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act\n";
    let e = EnforcerBuilder::new()
        .model_text(text)
        .adapter(StringAdapter::new(
            "p, root, data1, read, deny\n\
             p, admin, data1, read, allow\n\
             g, admin, root\n\
             g, alice, admin\n",
        ))
        .build()
        .unwrap();

    assert_eq!(e.get_policy()[0][0], "admin");
    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
    assert!(e.enforce(["admin", "data1", "read"]).unwrap());
    assert!(!e.enforce(["root", "data1", "read"]).unwrap());
}

#[test]
fn test_multiple_policy_types() {
    let text = "[request_definition]\nr = sub, obj, act\nr2 = sub, obj\n\
                [policy_definition]\np = sub, obj, act\np2 = sub, obj\n\
                [policy_effect]\ne = some(where (p.eft == allow))\n\
                [matchers]\nm = r.sub == p.sub && r.obj == p.obj && r.act == p.act\n\
                m2 = r2.sub == p2.sub && r2.obj == p2.obj\n";
    let mut e = Enforcer::from_text(text).unwrap();
    e.add_policy(["alice", "data1", "read"]).unwrap();
    e.add_named_policy("p2", ["alice", "data9"]).unwrap();

    let ctx = EnforceContext::new("2");
    assert!(e.enforce_with_context(&ctx, ["alice", "data9"]).unwrap());
    assert!(!e.enforce_with_context(&ctx, ["alice", "data1"]).unwrap());
    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
    assert!(matches!(
        e.enforce_with_context(&ctx, ["alice", "data9", "read"]),
        Err(RampartError::RequestArity { expected: 2, got: 3 })
    ));
}

#[test]
fn test_block_matcher() {
    let text = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = {
    if r.sub == "root" {
        return true
    }
    let same_object = r.obj == p.obj
    return r.sub == p.sub && same_object && r.act == p.act
}
"#;
    let mut e = Enforcer::from_text(text).unwrap();
    // The block reads policy tokens, so an empty policy denies everyone
    assert!(!e.enforce(["root", "data1", "read"]).unwrap());

    e.add_policy(["alice", "data1", "read"]).unwrap();
    assert!(e.enforce(["root", "anything", "delete"]).unwrap());
    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
    assert!(!e.enforce(["alice", "data1", "write"]).unwrap());
}

#[test]
fn test_model_and_options_from_files() {
    let mut model_file = tempfile::NamedTempFile::new().unwrap();
    model_file.write_all(RBAC_MODEL.as_bytes()).unwrap();
    let mut options_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(options_file, "max_hierarchy_level = 1").unwrap();

    let model = Model::from_file(model_file.path()).unwrap();
    assert!(model.get("g", "g").is_some());

    let e = EnforcerBuilder::new()
        .model_file(model_file.path())
        .options(rampart::EnforcerOptions::from_file(options_file.path()).unwrap())
        .policy("p", ["root", "data1", "read"])
        .policy("g", ["admin", "root"])
        .policy("g", ["alice", "admin"])
        .build()
        .unwrap();

    assert!(e.enforce(["admin", "data1", "read"]).unwrap());
    // alice -> admin -> root needs two hops
    assert!(!e.enforce(["alice", "data1", "read"]).unwrap());
}

#[test]
fn test_load_policy_replaces_rows() {
    let mut e = EnforcerBuilder::new()
        .model_text(RBAC_MODEL)
        .adapter(StringAdapter::new(
            "p, admin, data1, read\ng, alice, admin\n",
        ))
        .build()
        .unwrap();
    e.add_policy(["bob", "data2", "write"]).unwrap();
    e.add_grouping_policy(["carol", "admin"]).unwrap();
    assert!(e.enforce(["carol", "data1", "read"]).unwrap());

    e.load_policy().unwrap();
    assert_eq!(e.get_policy().len(), 1);
    assert!(!e.enforce(["bob", "data2", "write"]).unwrap());
    assert!(!e.enforce(["carol", "data1", "read"]).unwrap());
    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
}

#[test]
fn test_bad_adapter_keeps_current_rows() {
    let mut e = Enforcer::from_text(BASIC_MODEL).unwrap();
    e.add_policy(["alice", "data1", "read"]).unwrap();
    e.set_adapter(Box::new(StringAdapter::new("p, bob, data2\n")));

    assert!(matches!(
        e.load_policy(),
        Err(RampartError::PolicyArity { .. })
    ));
    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
}

#[test]
fn test_error_scoping() {
    let err = Enforcer::from_text("[request_definition]\nr = sub\n").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);

    let mut e = Enforcer::from_text(BASIC_MODEL).unwrap();
    e.add_policy(["alice", "data1", "read"]).unwrap();
    let err = e.enforce(["alice", "data1"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parameter);

    let err = e
        .enforce_with_matcher("unknownFn(r.sub)", ["alice", "data1", "read"])
        .unwrap_err();
    assert!(matches!(err, RampartError::UnknownFunction(_)));
    assert_eq!(err.kind(), ErrorKind::MatcherRuntime);

    // Still usable after per-call errors
    assert!(e.enforce(["alice", "data1", "read"]).unwrap());
}

#[test]
fn test_batch_enforce() {
    let mut e = Enforcer::from_text(BASIC_MODEL).unwrap();
    e.add_policy(["alice", "data1", "read"]).unwrap();
    let requests = vec![
        vec!["alice", "data1", "read"],
        vec!["alice", "data1", "write"],
        vec!["alice"],
    ];
    assert_eq!(e.batch_enforce(requests.clone()), vec![true, false, false]);

    let decisions = e.batch_decide(requests);
    assert_eq!(decisions[0].matched_rows, vec![vec!["alice", "data1", "read"]]);
    assert!(decisions[2].error.is_some());
}
