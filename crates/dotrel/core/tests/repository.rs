mod common;

use common::{ctx, store, CreateTable, Event, ScriptedDatabase, Session, SessionStatus, Shop};
use dotrel_common::{StoreConfig, Value};
use dotrel_core::entity::Entity;
use dotrel_core::query::{field, PageRequest};
use dotrel_core::storage::{DbError, MetadataError, Store};
use dotrel_core::PersistenceError;
use std::sync::Arc;

fn session_db() -> ScriptedDatabase {
    ScriptedDatabase::new().with_table("tenant", &Session::descriptor())
}

#[tokio::test]
async fn test_insert_assigns_identity_and_stamps() {
    let db = session_db();
    let repo = store(&db).repository::<Session>();
    let mut session = Session::open(1);

    let id = repo.insert(&ctx(), &mut session).await.unwrap();
    assert!(id > 0);
    assert_eq!(session.record.id, id);
    assert_eq!(session.record.created_by.as_deref(), Some("ann"));
    assert_eq!(session.record.changed_by.as_deref(), Some("ann"));
    assert_eq!(session.record.created_timestamp, session.record.changed_timestamp);
    assert!(session.record.web_id.is_some());

    let inserts = db.commands_starting("INSERT");
    assert_eq!(inserts.len(), 1);
    assert_eq!(
        inserts[0].text,
        "INSERT INTO [tenant].[Session] ([Document], [CreatedBy], [ChangedBy], [CreatedTimestamp], [ChangedTimestamp], [ShopId], [Status]) \
         OUTPUT INSERTED.[SessionId] VALUES (@p0, @p1, @p2, @p3, @p4, @p5, @p6)"
    );
    assert_eq!(inserts[0].params[6], Value::from("Open"));

    let mut second = Session::open(2);
    repo.insert(&ctx(), &mut second).await.unwrap();
    assert_eq!(db.commands_starting("SELECT c.[name]").len(), 1);
    assert_ne!(second.record.id, id);
}

#[tokio::test]
async fn test_update_keeps_creation_audit() {
    let db = session_db();
    let repo = store(&db).repository::<Session>();
    let mut session = Session::open(1);
    repo.insert(&ctx(), &mut session).await.unwrap();
    let created = session.record.created_timestamp;

    session.status = SessionStatus::Closed;
    session.record.created_by = Some("mallory".to_string());
    repo.update(&ctx(), &mut session).await.unwrap();

    let update = db.commands_starting("UPDATE").pop().unwrap();
    assert!(!update.text.contains("[CreatedBy]"));
    assert!(!update.text.contains("[CreatedTimestamp]"));
    assert!(update.text.ends_with("WHERE [SessionId] = @p5"));
    assert_eq!(update.params[4], Value::from("Closed"));
    assert_eq!(update.params[5], Value::Int(session.record.id));
    assert_eq!(session.record.created_timestamp, created);
}

#[tokio::test]
async fn test_update_and_delete_of_missing_rows() {
    let db = session_db();
    let repo = store(&db).repository::<Session>();

    let mut never_saved = Session::open(1);
    assert!(matches!(repo.update(&ctx(), &mut never_saved).await, Err(PersistenceError::NotFound { id: 0, .. })));
    assert!(never_saved.record.changed_by.is_none());

    let mut gone = Session::open(1);
    gone.record.id = 41;
    assert!(matches!(repo.update(&ctx(), &mut gone).await, Err(PersistenceError::NotFound { id: 41, .. })));
    assert!(gone.record.changed_by.is_none());
    assert!(matches!(repo.delete_by_id(&ctx(), 41).await, Err(PersistenceError::NotFound { .. })));

    db.seed_row("tenant", "Session", 41);
    repo.delete_by_id(&ctx(), 41).await.unwrap();
    assert_eq!(db.row_count("tenant", "Session"), 0);
    assert_eq!(db.commands_starting("DELETE").pop().unwrap().text, "DELETE FROM [tenant].[Session] WHERE [SessionId] = @p0");
}

#[tokio::test]
async fn test_transient_faults_are_retried() {
    let db = session_db();
    db.fail("INSERT", DbError::with_code(1205, "Transaction was deadlocked"), 2);
    let repo = store(&db).repository::<Session>();

    let mut session = Session::open(1);
    repo.insert(&ctx(), &mut session).await.unwrap();
    assert_eq!(db.commands_starting("INSERT").len(), 3);
    assert_eq!(db.connects(), 3);
}

#[tokio::test]
async fn test_retry_exhaustion_surfaces_fault() {
    let db = session_db();
    db.fail("INSERT", DbError::new(None, "Execution Timeout Expired"), 10);
    let repo = store(&db).repository::<Session>();

    let mut session = Session::open(1);
    match repo.insert(&ctx(), &mut session).await {
        Err(PersistenceError::RetryExhausted { attempts, source }) => {
            assert_eq!(attempts, 5);
            assert!(matches!(*source, PersistenceError::Db(_)));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.record.id, 0);
    assert!(session.record.created_by.is_none());
    assert_eq!(db.commands_starting("INSERT").len(), 5);
}

#[tokio::test]
async fn test_missing_table_is_healed_once() {
    let db = ScriptedDatabase::new().with_definition(&Session::descriptor());
    let store = Arc::new(Store::new(Arc::new(db.clone()), StoreConfig::without_delays()).with_definitions(Arc::new(CreateTable)));
    let repo = store.repository::<Session>();

    let mut session = Session::open(1);
    repo.insert(&ctx(), &mut session).await.unwrap();

    let ddl = db.commands_starting("CREATE TABLE");
    assert_eq!(ddl.len(), 1);
    assert!(ddl[0].text.starts_with("CREATE TABLE [tenant].[Session]"));
    assert_eq!(db.row_count("tenant", "Session"), 1);
    assert!(session.record.id > 0);
}

#[tokio::test]
async fn test_heal_failure_returns_original_fault() {
    let db = ScriptedDatabase::new();
    let store = Arc::new(Store::new(Arc::new(db.clone()), StoreConfig::without_delays()).with_definitions(Arc::new(CreateTable)));

    // the definition creates no columns, so the retried insert still misses the table
    let mut session = Session::open(1);
    let result = store.repository::<Session>().insert(&ctx(), &mut session).await;
    assert!(matches!(result, Err(PersistenceError::Metadata(MetadataError::TableMissing { .. }))));
    assert_eq!(db.commands_starting("CREATE TABLE").len(), 1);

    let mut shop = Shop::named("Main");
    let result = store.repository::<Shop>().insert(&ctx(), &mut shop).await;
    assert!(matches!(result, Err(PersistenceError::Metadata(MetadataError::TableMissing { .. }))));
    assert_eq!(db.commands_starting("CREATE TABLE").len(), 1);
}

#[tokio::test]
async fn test_load_pages_and_counts() {
    let db = session_db();
    let repo = store(&db).repository::<Session>();
    let mut seeded = Session::open(1);
    seeded.record.id = 7;
    let document = serde_json::to_string(&seeded).unwrap();
    db.push_select(vec![vec![
        Value::Int(7),
        Value::Text(document),
        Value::from("ann"),
        Value::from("bob"),
        Value::Null,
        Value::Null,
    ]]);
    db.push_select(vec![vec![Value::Int(31)]]);

    let query = repo.query().filter(field("ShopId").eq(1)).filter(field("Status").eq(Value::from_enum(&SessionStatus::Open)));
    let page = repo.load(&ctx(), &query, Some(PageRequest::new(3, 10).unwrap()), true).await.unwrap();

    assert_eq!(page.total, Some(31));
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].record.id, 7);
    assert_eq!(page.items[0].record.changed_by.as_deref(), Some("bob"));

    let selects = db.commands_starting("SELECT [t0]");
    assert_eq!(selects.len(), 1);
    assert!(selects[0].text.ends_with("WHERE (([t0].[ShopId] = @p0) AND ([t0].[Status] = @p1)) ORDER BY [t0].[SessionId] OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"));
    assert_eq!(selects[0].params, vec![Value::Int(1), Value::from("Open")]);

    let count = db.commands_starting("SELECT COUNT(*)");
    assert_eq!(count.len(), 1);
    assert!(!count[0].text.contains("ORDER BY"));
}

#[tokio::test]
async fn test_get_missing_is_none() {
    let db = session_db();
    let repo = store(&db).repository::<Session>();
    assert!(repo.get(&ctx(), 5).await.unwrap().is_none());
    assert!(db.commands()[0].text.ends_with("WHERE ([t0].[SessionId] = @p0)"));
}

#[tokio::test]
async fn test_translation_faults_never_reach_the_database() {
    let db = session_db();
    let repo = store(&db).repository::<Session>();
    let query = repo.query().call("GroupBy", vec![field("ShopId")]);
    let result = repo.load(&ctx(), &query, None, false).await;
    assert!(matches!(result, Err(PersistenceError::Query(_))));
    assert_eq!(db.connects(), 0);
}

#[tokio::test]
async fn test_cancelled_call_does_no_io() {
    let db = session_db();
    let repo = store(&db).repository::<Session>();
    let ctx = ctx();
    ctx.cancellation.cancel();
    let mut session = Session::open(1);
    assert!(matches!(repo.insert(&ctx, &mut session).await, Err(PersistenceError::Cancelled)));
    assert!(!db.events().contains(&Event::Connect));
}
