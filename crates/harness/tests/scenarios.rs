use recgraph_core::{
    commands::{Command, Data, Target},
    field_value::FieldValue,
    schema::{FieldDecl, Registry, TypeDecl},
};
use recgraph_engine::{Engine, ErrorKind};
use recgraph_harness::{
    check_inverse_consistency, check_no_dangling,
    fixtures::{message_data, thread_data},
    init_tracing, mail_engine, Recorder,
};
use recgraph_storage::{SnapshotValue, StoreSnapshot};

fn attachment(id: i64, filename: &str) -> Data {
    Data::new()
        .set("id", id)
        .set("filename", filename)
        .set("res_model", "mail.thread")
        .set("res_id", 5)
}

// ============================================================================
// Thread and messages
// ============================================================================

#[test]
fn thread_with_linked_message() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut registry = Registry::new();
    registry.register(
        TypeDecl::new("Thread")
            .field("name", FieldDecl::attr())
            .field("messages", FieldDecl::many("Message").inverse("thread")),
    )?;
    registry.register(
        TypeDecl::new("Message")
            .field("body", FieldDecl::attr())
            .field("thread", FieldDecl::one("Thread").inverse("messages")),
    )?;
    let mut engine = Engine::new(registry.finalize()?);

    let thread = engine.create("Thread", Data::new().set("name", "General"))?;
    let message = engine.create(
        "Message",
        Data::new()
            .set("body", "hello")
            .with("thread", Command::Add(Target::Record(thread))),
    )?;

    assert_eq!(engine.related(thread, "messages")?, vec![message]);

    engine.delete(thread)?;

    // Verify the message survives without its thread
    assert!(engine.exists(message));
    assert_eq!(engine.one(message, "thread")?, None);
    check_no_dangling(&engine)?;
    Ok(())
}

#[test]
fn renaming_a_thread_updates_its_display_name() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = mail_engine()?;
    let thread = engine.create("Thread", thread_data("res.partner", 3, "General"))?;
    let message = engine.create("Message", message_data(1, "hi").link("thread", thread))?;
    let recorder = Recorder::attach(&mut engine);
    engine.track(recorder.id, |engine| engine.get(message, "thread_name"))?;

    engine.apply(thread, "name", "Support")?;

    // Verify everything downstream is settled when apply returns
    assert_eq!(engine.get(thread, "display_name")?, FieldValue::Text("Support".into()));
    assert_eq!(engine.get(message, "thread_name")?, FieldValue::Text("Support".into()));
    assert_eq!(recorder.count(), 1);
    assert!(recorder.saw_field(message, "thread_name"));
    Ok(())
}

// ============================================================================
// Identity
// ============================================================================

#[test]
fn insert_updates_the_record_it_identifies() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = mail_engine()?;
    let first = engine.insert("Thread", thread_data("res.partner", 3, "General"))?;
    let second = engine.insert("Thread", thread_data("res.partner", 3, "Renamed"))?;
    let other = engine.insert("Thread", thread_data("res.users", 3, "Other"))?;

    assert_eq!(first, second);
    assert_ne!(first, other);
    assert_eq!(engine.records("Thread")?.len(), 2);
    assert_eq!(engine.get(first, "name")?, FieldValue::Text("Renamed".into()));

    let local_id = engine.local_id(first)?;
    assert_eq!(local_id.as_str(), "Thread_res.partner,3");
    assert_eq!(engine.by_local_id("Thread_res.partner,3"), Some(first));
    Ok(())
}

#[test]
fn find_reads_candidates_through_a_reader() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = mail_engine()?;
    let thread = engine.create("Thread", thread_data("res.partner", 1, "General"))?;
    engine.create("Message", message_data(1, "a").link("thread", thread))?;
    let flagged = engine.create(
        "Message",
        message_data(2, "b").set("is_needaction", true).link("thread", thread),
    )?;

    let found = engine.find("Message", |message| Ok(message.get("is_needaction")?.is_truthy()))?;
    assert_eq!(found, Some(flagged));

    // Verify predicates can follow relations and see settled computed values
    let found = engine.find("Thread", |thread| {
        Ok(thread.get("needaction_count")? == FieldValue::Integer(1))
    })?;
    assert_eq!(found, Some(thread));

    assert_eq!(engine.find("Partner", |_| Ok(true))?, None);
    Ok(())
}

#[test]
fn insert_without_identifying_fields_always_creates() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = mail_engine()?;
    let a = engine.insert("ChatWindow", Data::new())?;
    let b = engine.insert("ChatWindow", Data::new())?;

    assert_ne!(a, b);
    assert_ne!(engine.local_id(a)?, engine.local_id(b)?);
    Ok(())
}

#[test]
fn missing_identifying_value_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = mail_engine()?;

    let err = engine.insert("Thread", Data::new().set("model", "res.partner")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCommand);
    assert!(engine.records("Thread")?.is_empty());
    Ok(())
}

#[test]
fn deleted_identity_stays_retired() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = mail_engine()?;
    let old = engine.create("Message", message_data(1, "first"))?;
    engine.delete(old)?;

    let err = engine.create("Message", message_data(1, "second")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCommand);
    let err = engine.insert("Message", message_data(1, "third")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCommand);

    // Verify nothing was created and the old handle is still dead
    assert!(engine.records("Message")?.is_empty());
    assert_eq!(engine.by_local_id("Message_1"), None);
    assert_eq!(engine.get(old, "body").unwrap_err().kind(), ErrorKind::UseAfterDelete);

    let fresh = engine.create("Message", message_data(2, "fourth"))?;
    assert_ne!(old, fresh);
    Ok(())
}

// ============================================================================
// Temporary records
// ============================================================================

#[test]
fn real_record_supersedes_its_temporary_copy() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = mail_engine()?;
    let message = engine.create("Message", message_data(1, "see attached"))?;
    let temp_id = engine.next_temporary_id();
    assert!(temp_id < 0);

    let uploading = engine.insert(
        "Attachment",
        attachment(temp_id, "photo.png")
            .set("uploading", true)
            .link("message", message),
    )?;
    let uploaded = engine.insert(
        "Attachment",
        attachment(42, "photo.png").set("uploading", false),
    )?;

    // Verify one record remains, now under its real identity
    assert_eq!(uploading, uploaded);
    assert_eq!(engine.records("Attachment")?, vec![uploaded]);
    assert_eq!(engine.get(uploaded, "id")?, FieldValue::Integer(42));
    assert_eq!(engine.get(uploaded, "uploading")?, FieldValue::Boolean(false));
    assert_eq!(engine.local_id(uploaded)?.as_str(), "Attachment_42");
    assert_eq!(engine.by_local_id(&format!("Attachment_{temp_id}")), None);

    // Verify links made while temporary are kept
    assert_eq!(engine.related(message, "attachments")?, vec![uploaded]);
    check_inverse_consistency(&engine)?;
    Ok(())
}

#[test]
fn different_natural_key_is_a_different_record() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = mail_engine()?;
    let temp_id = engine.next_temporary_id();
    let uploading = engine.insert("Attachment", attachment(temp_id, "photo.png"))?;
    let other = engine.insert("Attachment", attachment(42, "notes.txt"))?;

    assert_ne!(uploading, other);
    assert_eq!(engine.records("Attachment")?.len(), 2);
    assert_eq!(engine.get(uploading, "id")?, FieldValue::Integer(temp_id));
    Ok(())
}

#[test]
fn temporary_ids_never_repeat() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = Engine::new(Registry::new().finalize()?);
    let ids: Vec<i64> = (0..5).map(|_| engine.next_temporary_id()).collect();

    assert_eq!(ids, vec![-1, -2, -3, -4, -5]);
    Ok(())
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn snapshot_reflects_settled_state() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = mail_engine()?;
    let thread = engine.create("Thread", thread_data("res.partner", 1, "General"))?;
    let m2 = engine.create(
        "Message",
        message_data(2, "b").set("is_needaction", true).link("thread", thread),
    )?;
    let m1 = engine.create("Message", message_data(1, "a").link("thread", thread))?;

    let snapshot = engine.snapshot()?;
    let thread_snapshot = snapshot.get(thread).ok_or("thread missing from snapshot")?;

    assert_eq!(thread_snapshot.type_name, "Thread");
    assert_eq!(
        thread_snapshot.fields.get("messages"),
        Some(&SnapshotValue::Relation(vec![m1, m2]))
    );
    // Lazy fields are brought up to date before copying
    assert_eq!(
        thread_snapshot.fields.get("needaction_count"),
        Some(&SnapshotValue::Value(FieldValue::Integer(1)))
    );

    let restored = StoreSnapshot::from_msgpack(&snapshot.to_msgpack()?)?;
    assert_eq!(restored, snapshot);
    Ok(())
}
