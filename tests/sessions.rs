//! End-to-end session scenarios: branch lifecycle under live sessions,
//! default branch policy, and format migration.

use std::thread;

use serde_json::json;
use tempfile::TempDir;

use revdb::config::EngineConfig;
use revdb::db::Engine;
use revdb::migrate::VerifyMode;
use revdb::session::{ClientIdentity, ErrorKind, SessionError, SessionManager, Target};
use revdb::storage::{BranchName, FormatVersion, Row, RowKey, TableName};

fn t() -> TableName {
    TableName::new("t").unwrap()
}

/// `main` with table `t` holding one committed row, plus a `keep` branch
/// at the same commit.
fn seeded(manager: &SessionManager) -> RowKey {
    manager.create_database("shop").unwrap();
    let mut session = manager.bind("shop/main", ClientIdentity::local()).unwrap();
    let key = RowKey::new("r1").unwrap();
    session.create_table(&t()).unwrap();
    session
        .insert_row(&t(), Row::from_value(key.clone(), json!({ "v": 1, "name": "one" })).unwrap())
        .unwrap();
    session.commit("seed").unwrap();
    session.create_branch("keep", None).unwrap();
    key
}

#[test]
fn migration_preserves_rows_and_moves_tags() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(EngineConfig::new(dir.path()).format(FormatVersion::V1));
    let key = seeded(engine.manager());

    let mut conn = engine.connect("shop/main").unwrap();
    let h1 = conn.session_mut().head().unwrap();
    conn.session_mut().create_tag("v1", None).unwrap();
    let before = conn.session_mut().read_row(&t(), &key).unwrap().unwrap();

    let report = engine.migrate("shop", FormatVersion::V2, VerifyMode::All).unwrap();
    assert_eq!(report.to, FormatVersion::V2);

    let store = engine.database("shop").unwrap();
    assert_eq!(store.format().unwrap(), FormatVersion::V2);
    let tags = store.list_tags().unwrap();
    assert_eq!(tags.len(), 1);
    assert_ne!(tags[0].1, h1);

    // the old hash is no longer an address the store answers to
    let err = engine.connect(&format!("shop/{}", h1)).unwrap_err();
    assert_eq!(err.to_string(), format!("revision not found: {}", h1));

    let after = conn.session_mut().read_row(&t(), &key).unwrap().unwrap();
    assert_eq!(after, before);
    let mut tagged = engine.connect("shop/v1").unwrap();
    assert_eq!(tagged.session_mut().read_row(&t(), &key).unwrap(), Some(before));
}

#[test]
fn deleted_default_branch_fails_implicit_sessions() {
    let manager = SessionManager::new(EngineConfig::in_memory());
    let key = seeded(&manager);

    let mut implicit = manager.bind("shop", ClientIdentity::local()).unwrap();
    assert_eq!(implicit.scan_table(&t()).unwrap().len(), 1);

    let mut admin = manager.bind("shop/keep", ClientIdentity::local()).unwrap();
    admin.delete_branch("main").unwrap();

    let err = implicit.scan_table(&t()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert_eq!(err.to_string(), "default branch unavailable: main");
    // no silent fallback, the target is still the default branch
    assert_eq!(implicit.target(), &Target::DefaultBranch);

    let mut explicit = manager.bind("shop/keep", ClientIdentity::local()).unwrap();
    assert!(explicit.read_row(&t(), &key).unwrap().is_some());

    let err = manager.bind("shop", ClientIdentity::local()).unwrap_err();
    assert!(matches!(err, SessionError::DefaultBranchUnavailable(_)));
}

#[test]
fn default_branch_change_is_seen_without_reconnecting() {
    let manager = SessionManager::new(EngineConfig::in_memory());
    seeded(&manager);

    let mut implicit = manager.bind("shop", ClientIdentity::local()).unwrap();
    assert_eq!(implicit.active_branch().unwrap(), Some(BranchName::main()));

    let mut admin = manager.bind("shop/keep", ClientIdentity::local()).unwrap();
    admin.set_default_branch("keep").unwrap();
    admin.delete_branch("main").unwrap();

    assert_eq!(implicit.active_branch().unwrap(), Some(BranchName::new("keep").unwrap()));
    assert_eq!(implicit.scan_table(&t()).unwrap().len(), 1);
}

#[test]
fn failed_checkout_keeps_the_bound_branch() {
    let manager = SessionManager::new(EngineConfig::in_memory());
    let key = seeded(&manager);

    let mut session = manager.bind("shop/keep", ClientIdentity::local()).unwrap();
    let before = session.binding().cloned();

    let err = session.checkout("ghost").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(session.binding().cloned(), before);
    assert_eq!(session.target(), &Target::Branch(BranchName::new("keep").unwrap()));
    assert!(session.read_row(&t(), &key).unwrap().is_some());
}

#[test]
fn renamed_branch_fails_bound_sessions_until_checkout() {
    let manager = SessionManager::new(EngineConfig::in_memory());
    let key = seeded(&manager);

    let mut admin = manager.bind("shop/main", ClientIdentity::local()).unwrap();
    admin.create_branch("feature", None).unwrap();

    let mut session = manager.bind("shop/feature", ClientIdentity::local()).unwrap();
    session
        .insert_row(&t(), Row::from_value(RowKey::new("r2").unwrap(), json!({ "v": 2 })).unwrap())
        .unwrap();

    admin.rename_branch("feature", "f2").unwrap();

    let err = session.read_row(&t(), &key).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(err, SessionError::BranchNotFound(ref name) if name == "feature"));
    assert_eq!(session.target(), &Target::Branch(BranchName::new("feature").unwrap()));

    session.checkout("f2").unwrap();
    assert_eq!(session.active_branch().unwrap(), Some(BranchName::new("f2").unwrap()));
    // the uncommitted row moved with the branch
    assert_eq!(session.scan_table(&t()).unwrap().len(), 2);
}

#[test]
fn implicit_sessions_follow_a_renamed_default_branch() {
    let manager = SessionManager::new(EngineConfig::in_memory());
    let key = seeded(&manager);

    let mut implicit = manager.bind("shop", ClientIdentity::local()).unwrap();
    assert_eq!(implicit.active_branch().unwrap(), Some(BranchName::main()));

    let mut admin = manager.bind("shop/keep", ClientIdentity::local()).unwrap();
    admin.rename_branch("main", "trunk").unwrap();
    assert_eq!(admin.default_branch().unwrap(), BranchName::new("trunk").unwrap());

    assert_eq!(implicit.active_branch().unwrap(), Some(BranchName::new("trunk").unwrap()));
    assert!(implicit.read_row(&t(), &key).unwrap().is_some());
    assert_eq!(implicit.target(), &Target::DefaultBranch);
}

#[test]
fn pinned_sessions_survive_branch_deletion() {
    let manager = SessionManager::new(EngineConfig::in_memory());
    let key = seeded(&manager);

    let mut admin = manager.bind("shop/main", ClientIdentity::local()).unwrap();
    let head = admin.head().unwrap();
    admin.create_tag("release", None).unwrap();

    let mut by_tag = manager.bind("shop/release", ClientIdentity::local()).unwrap();
    let mut by_hash = manager.bind(&format!("shop/{}", head), ClientIdentity::local()).unwrap();
    let mut by_prefix = manager
        .bind(&format!("shop/{}", &head.to_string()[..10]), ClientIdentity::local())
        .unwrap();

    admin.delete_branch("keep").unwrap();
    admin.checkout("main").unwrap();
    admin.delete_branch("main").unwrap();

    for session in [&mut by_tag, &mut by_hash, &mut by_prefix] {
        assert_eq!(session.head().unwrap(), head);
        assert!(session.read_row(&t(), &key).unwrap().is_some());
    }
}

#[test]
fn concurrent_branch_churn_and_binds() {
    let manager = SessionManager::new(EngineConfig::in_memory().max_cas_retries(1000));
    seeded(&manager);

    let mut handles = Vec::new();
    for worker in 0..4 {
        let manager = manager.clone();
        handles.push(thread::spawn(move || {
            let mut admin = manager.bind("shop/keep", ClientIdentity::local()).unwrap();
            for i in 0..10 {
                let name = format!("w{}-{}", worker, i);
                admin.create_branch(&name, None).unwrap();

                match manager.bind(&format!("shop/{}", name), ClientIdentity::local()) {
                    Ok(mut session) => {
                        // reads either succeed or fail with a structured error
                        if let Err(e) = session.scan_table(&TableName::new("t").unwrap()) {
                            assert_eq!(e.kind(), ErrorKind::NotFound);
                        }
                    }
                    Err(e) => panic!("bind failed: {}", e),
                }
                admin.delete_branch(&name).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut session = manager.bind("shop", ClientIdentity::local()).unwrap();
    let names: Vec<String> = session
        .list_branches()
        .unwrap()
        .into_iter()
        .map(|(name, _)| name.to_string())
        .collect();
    assert_eq!(names, vec!["keep".to_string(), "main".to_string()]);
    drop(session);
    assert_eq!(manager.active_sessions(), 0);
}
