//! Coverage for the SQLite credential store and schema constraints.

use clawcon::credentials::{AuditAction, AuditEntry, CredentialRecord, CredentialStore};
use clawcon::db::Database;

fn record(id: &str, owner: &str, key_hash: &str, version: i64) -> CredentialRecord {
    CredentialRecord {
        id: id.to_owned(),
        owner_id: owner.to_owned(),
        ciphertext: "Y2lwaGVy".to_owned(),
        iv: "AAAAAAAAAAAAAAAA".to_owned(),
        auth_tag: "AAAAAAAAAAAAAAAAAAAAAA==".to_owned(),
        key_hash: key_hash.to_owned(),
        last4: "abcd".to_owned(),
        key_version: version,
        created_at: "2026-01-01T00:00:00.000Z".to_owned(),
        updated_at: "2026-01-01T00:00:00.000Z".to_owned(),
    }
}

fn audit(owner: &str, cred: &str, action: AuditAction) -> AuditEntry {
    AuditEntry {
        owner_id: owner.to_owned(),
        credential_id: cred.to_owned(),
        action,
        created_at: "2026-01-01T00:00:00.000Z".to_owned(),
    }
}

#[tokio::test]
async fn replace_keeps_id_and_created_at() {
    let db = Database::in_memory().await.expect("db should open");
    let original = record("cred-1", "owner-a", "hash-1", 1);

    assert!(db
        .insert_with_audit(&original, &audit("owner-a", "cred-1", AuditAction::Issue))
        .await
        .expect("insert should succeed"));

    let mut replacement = record("ignored-id", "owner-a", "hash-2", 1);
    replacement.created_at = "2026-06-01T00:00:00.000Z".to_owned();
    replacement.updated_at = "2026-06-01T00:00:00.000Z".to_owned();
    replacement.last4 = "wxyz".to_owned();
    assert!(db
        .replace_with_audit(
            &original,
            &replacement,
            &audit("owner-a", "cred-1", AuditAction::Regenerate)
        )
        .await
        .expect("replace should succeed"));

    let row = db
        .find_by_owner("owner-a")
        .await
        .expect("lookup should succeed")
        .expect("row should exist");
    assert_eq!(row.id, "cred-1");
    assert_eq!(row.created_at, "2026-01-01T00:00:00.000Z");
    assert_eq!(row.updated_at, "2026-06-01T00:00:00.000Z");
    assert_eq!(row.key_hash, "hash-2");
    assert_eq!(row.last4, "wxyz");

    assert!(db.find_by_key_hash("hash-1").await.expect("lookup").is_none());
    assert!(db.find_by_key_hash("hash-2").await.expect("lookup").is_some());

    let actions: Vec<AuditAction> = db
        .audit_log("owner-a")
        .await
        .expect("audit should load")
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec![AuditAction::Issue, AuditAction::Regenerate]);
}

#[tokio::test]
async fn second_insert_for_owner_writes_nothing() {
    let db = Database::in_memory().await.expect("db should open");
    assert!(db
        .insert_with_audit(
            &record("cred-1", "owner-a", "hash-1", 1),
            &audit("owner-a", "cred-1", AuditAction::Issue)
        )
        .await
        .expect("insert should succeed"));

    let inserted = db
        .insert_with_audit(
            &record("cred-2", "owner-a", "hash-2", 1),
            &audit("owner-a", "cred-2", AuditAction::Issue),
        )
        .await
        .expect("conflicting insert should not error");
    assert!(!inserted);

    let row = db.find_by_owner("owner-a").await.expect("lookup").expect("row");
    assert_eq!(row.id, "cred-1");
    assert_eq!(row.key_hash, "hash-1");
    assert_eq!(db.audit_log("owner-a").await.expect("audit").len(), 1);
}

#[tokio::test]
async fn replace_against_stale_row_writes_nothing() {
    let db = Database::in_memory().await.expect("db should open");
    let original = record("cred-1", "owner-a", "hash-1", 1);
    db.insert_with_audit(&original, &audit("owner-a", "cred-1", AuditAction::Issue))
        .await
        .expect("insert should succeed");

    let rotated = record("cred-1", "owner-a", "hash-2", 1);
    assert!(db
        .replace_with_audit(&original, &rotated, &audit("owner-a", "cred-1", AuditAction::Regenerate))
        .await
        .expect("replace should succeed"));

    // A writer still holding the original row must not win.
    let late = record("cred-1", "owner-a", "hash-3", 2);
    let replaced = db
        .replace_with_audit(&original, &late, &audit("owner-a", "cred-1", AuditAction::Rekey))
        .await
        .expect("stale replace should not error");
    assert!(!replaced);

    let row = db.find_by_owner("owner-a").await.expect("lookup").expect("row");
    assert_eq!(row.key_hash, "hash-2");
    assert_eq!(row.key_version, 1);
    assert_eq!(db.audit_log("owner-a").await.expect("audit").len(), 2);
}

#[tokio::test]
async fn failed_insert_writes_no_audit_row() {
    let db = Database::in_memory().await.expect("db should open");
    db.insert_with_audit(&record("cred-1", "owner-a", "shared-hash", 1), &audit("owner-a", "cred-1", AuditAction::Issue))
        .await
        .expect("insert should succeed");

    // Duplicate key_hash on another owner violates UNIQUE(key_hash).
    let result = db
        .insert_with_audit(
            &record("cred-2", "owner-b", "shared-hash", 1),
            &audit("owner-b", "cred-2", AuditAction::Issue),
        )
        .await;
    assert!(result.is_err());
    assert!(db.audit_log("owner-b").await.expect("audit").is_empty());
    assert!(db.find_by_owner("owner-b").await.expect("lookup").is_none());
}

#[tokio::test]
async fn audit_rows_cannot_be_changed_or_deleted() {
    let db = Database::in_memory().await.expect("db should open");
    db.append_audit(&audit("owner-a", "cred-1", AuditAction::Reveal))
        .await
        .expect("append should succeed");

    let update = sqlx::query("UPDATE bot_key_audit SET action = 'issue'")
        .execute(db.pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM bot_key_audit")
        .execute(db.pool())
        .await;
    assert!(delete.is_err());

    assert_eq!(db.audit_log("owner-a").await.expect("audit").len(), 1);
}

#[tokio::test]
async fn unknown_audit_action_is_rejected_by_schema() {
    let db = Database::in_memory().await.expect("db should open");
    let insert = sqlx::query(
        "INSERT INTO bot_key_audit (user_id, bot_key_id, action, created_at) \
         VALUES ('owner-a', 'cred-1', 'delete', '2026-01-01T00:00:00.000Z')",
    )
    .execute(db.pool())
    .await;
    assert!(insert.is_err());
}

#[tokio::test]
async fn status_reads_public_view_only() {
    let db = Database::in_memory().await.expect("db should open");
    assert!(db.status("owner-a").await.expect("status").is_none());

    db.insert_with_audit(&record("cred-1", "owner-a", "hash-1", 3), &audit("owner-a", "cred-1", AuditAction::Issue))
        .await
        .expect("insert should succeed");

    let status = db
        .status("owner-a")
        .await
        .expect("status should load")
        .expect("status should exist");
    assert_eq!(status.last4, "abcd");
    assert_eq!(status.key_version, 3);

    let json = serde_json::to_value(&status).expect("status should serialize");
    let fields: Vec<&String> = json
        .as_object()
        .expect("status should be an object")
        .keys()
        .collect();
    assert_eq!(fields.len(), 4);
    assert!(json.get("ciphertext").is_none());
    assert!(json.get("key_hash").is_none());
}

#[tokio::test]
async fn list_stale_skips_current_generation() {
    let db = Database::in_memory().await.expect("db should open");
    db.insert_with_audit(&record("cred-1", "owner-a", "hash-1", 1), &audit("owner-a", "cred-1", AuditAction::Issue))
        .await
        .expect("insert should succeed");
    db.insert_with_audit(&record("cred-2", "owner-b", "hash-2", 2), &audit("owner-b", "cred-2", AuditAction::Issue))
        .await
        .expect("insert should succeed");

    let stale = db.list_stale(2).await.expect("list should succeed");
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].owner_id, "owner-a");
}

#[tokio::test]
async fn database_persists_across_reopen() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("nested").join("clawcon.db");

    let db = Database::open(&path).await.expect("db should open");
    db.insert_with_audit(&record("cred-1", "owner-a", "hash-1", 1), &audit("owner-a", "cred-1", AuditAction::Issue))
        .await
        .expect("insert should succeed");
    db.close().await;

    let reopened = Database::open(&path).await.expect("db should reopen");
    assert!(reopened
        .find_by_key_hash("hash-1")
        .await
        .expect("lookup")
        .is_some());
}
