use recgraph_core::{commands::Data, field_value::FieldValue};
use recgraph_engine::{Engine, ErrorKind};
use recgraph_storage::RecordStore;
use recgraph_harness::{
    board_schema, chain_schema, cycle_schema, lazy_cycle_schema,
    fixtures::{engine_with_limit, message_data, thread_data},
    init_tracing, mail_engine, spawner_schema,
};

// ============================================================================
// Eager computations
// ============================================================================

#[test]
fn display_name_follows_name_within_the_batch() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = mail_engine()?;
    let thread = engine.create("Thread", thread_data("res.partner", 1, ""))?;
    assert_eq!(engine.get(thread, "display_name")?, FieldValue::Text("Unnamed thread".into()));

    engine.apply(thread, "name", "General")?;

    // Verify the stored value is current without any explicit refresh
    let stored = engine.store().record(thread)?;
    let index = stored.model().field_index("display_name").ok_or("no display_name")?;
    assert_eq!(stored.value(index), Some(&FieldValue::Text("General".into())));
    Ok(())
}

#[test]
fn related_fields_follow_their_path() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = mail_engine()?;
    let thread = engine.create("Thread", thread_data("res.partner", 1, "General"))?;
    let ann = engine.create("Partner", Data::new().set("id", 1).set("name", "Ann"))?;
    let message = engine.create(
        "Message",
        message_data(1, "hi").link("thread", thread).link("author", ann),
    )?;
    assert_eq!(engine.get(message, "author_name")?, FieldValue::Text("Ann".into()));
    assert_eq!(engine.get(message, "thread_name")?, FieldValue::Text("General".into()));

    // Verify a change two hops away reaches the message
    engine.apply(thread, "name", "Random")?;
    assert_eq!(engine.get(message, "thread_name")?, FieldValue::Text("Random".into()));

    engine.apply(ann, "name", "Annie")?;
    assert_eq!(engine.get(message, "author_name")?, FieldValue::Text("Annie".into()));

    // Verify unlinking empties the related value
    engine.apply(message, "author", FieldValue::Null)?;
    assert_eq!(engine.get(message, "author_name")?, FieldValue::Null);
    Ok(())
}

#[test]
fn counts_and_last_member_track_membership() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = mail_engine()?;
    let thread = engine.create("Thread", thread_data("res.partner", 1, "General"))?;
    assert_eq!(engine.get(thread, "message_count")?, FieldValue::Integer(0));
    assert_eq!(engine.one(thread, "last_message")?, None);

    let second = engine.create("Message", message_data(2, "b").link("thread", thread))?;
    let first = engine.create("Message", message_data(1, "a").link("thread", thread))?;

    assert_eq!(engine.get(thread, "message_count")?, FieldValue::Integer(2));
    assert_eq!(engine.one(thread, "last_message")?, Some(second));

    engine.delete(second)?;
    assert_eq!(engine.get(thread, "message_count")?, FieldValue::Integer(1));
    assert_eq!(engine.one(thread, "last_message")?, Some(first));
    Ok(())
}

// ============================================================================
// Lazy computations
// ============================================================================

#[test]
fn lazy_count_is_current_when_read() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = mail_engine()?;
    let thread = engine.create("Thread", thread_data("res.partner", 1, "General"))?;
    let message = engine.create(
        "Message",
        message_data(1, "a").set("is_needaction", true).link("thread", thread),
    )?;
    engine.create("Message", message_data(2, "b").link("thread", thread))?;

    assert_eq!(engine.get(thread, "needaction_count")?, FieldValue::Integer(1));

    engine.apply(message, "is_needaction", false)?;
    assert_eq!(engine.get(thread, "needaction_count")?, FieldValue::Integer(0));

    engine.create(
        "Message",
        message_data(3, "c").set("is_needaction", true).link("thread", thread),
    )?;
    assert_eq!(engine.get(thread, "needaction_count")?, FieldValue::Integer(1));
    Ok(())
}

#[test]
fn lazy_field_waits_for_a_read() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = mail_engine()?;
    let thread = engine.create("Thread", thread_data("res.partner", 1, "General"))?;
    engine.create(
        "Message",
        message_data(1, "a").set("is_needaction", true).link("thread", thread),
    )?;

    // Verify nothing was stored before the first read
    let stored = engine.store().record(thread)?;
    let index = stored.model().field_index("needaction_count").ok_or("no needaction_count")?;
    assert_eq!(stored.value(index), Some(&FieldValue::Null));

    assert_eq!(engine.get(thread, "needaction_count")?, FieldValue::Integer(1));
    Ok(())
}

// ============================================================================
// Sorted relations
// ============================================================================

#[test]
fn sorted_relation_orders_by_key() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = mail_engine()?;
    let thread = engine.create("Thread", thread_data("res.partner", 1, "General"))?;
    let m3 = engine.create("Message", message_data(3, "c").link("thread", thread))?;
    let m1 = engine.create("Message", message_data(1, "a").link("thread", thread))?;
    let m2 = engine.create("Message", message_data(2, "b").link("thread", thread))?;

    assert_eq!(engine.related(thread, "messages")?, vec![m1, m2, m3]);
    Ok(())
}

#[test]
fn sort_keys_combine_and_react_to_member_fields() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = Engine::new(board_schema()?);
    let board = engine.create("Board", Data::new())?;
    let task = |title: &str, priority: i64| {
        Data::new()
            .set("title", title)
            .set("priority", priority)
            .link("board", board)
    };
    let low = engine.create("Task", task("low", 1))?;
    let high = engine.create("Task", task("high", 5))?;
    let none = engine.create("Task", Data::new().set("title", "none").link("board", board))?;
    let mid = engine.create("Task", task("mid", 3))?;

    // Verify descending priority with nulls last
    assert_eq!(engine.related(board, "tasks")?, vec![high, mid, low, none]);

    // Verify a member field change moves the member
    engine.apply(high, "done", true)?;
    assert_eq!(engine.related(board, "tasks")?, vec![mid, low, none, high]);

    engine.apply(low, "priority", 9)?;
    assert_eq!(engine.related(board, "tasks")?, vec![low, mid, none, high]);
    Ok(())
}

#[test]
fn ties_keep_insertion_order() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = Engine::new(board_schema()?);
    let board = engine.create("Board", Data::new())?;
    let mut tasks = Vec::new();
    for title in ["a", "b", "c", "d"] {
        tasks.push(engine.create(
            "Task",
            Data::new().set("title", title).set("priority", 1).link("board", board),
        )?);
    }

    assert_eq!(engine.related(board, "tasks")?, tasks);
    Ok(())
}

// ============================================================================
// Cycles and divergence
// ============================================================================

#[test]
fn mutual_dependencies_report_a_cycle() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = Engine::new(cycle_schema()?);

    let err = engine.create("Node", Data::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ComputeCycle);
    Ok(())
}

#[test]
fn mutual_lazy_fields_report_a_cycle_on_read() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = Engine::new(lazy_cycle_schema()?);

    // Nothing is computed until a read asks for it
    let node = engine.create("Node", Data::new().set("label", "n"))?;

    let err = engine.get(node, "a").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ComputeCycle);

    // Verify the failed read leaves both fields ready to fail the same way
    assert_eq!(engine.get(node, "b").unwrap_err().kind(), ErrorKind::ComputeCycle);
    assert_eq!(engine.get(node, "label")?, FieldValue::Text("n".into()));
    Ok(())
}

#[test]
fn long_chain_settles_under_the_default_cap() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = Engine::new(chain_schema(20)?);
    let chain = engine.create("Chain", Data::new())?;

    assert_eq!(engine.get(chain, "c20")?, FieldValue::Integer(20));

    engine.apply(chain, "c0", 100)?;
    assert_eq!(engine.get(chain, "c20")?, FieldValue::Integer(120));
    Ok(())
}

#[test]
fn iteration_cap_stops_settling() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = engine_with_limit(chain_schema(5)?, 3);

    let err = engine.create("Chain", Data::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ComputeDivergence);
    Ok(())
}

#[test]
fn self_feeding_computation_diverges() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut engine = engine_with_limit(spawner_schema()?, 50);

    let err = engine.create("Spawner", Data::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ComputeDivergence);

    // Verify each iteration under the cap did its work before the stop
    let children = engine.records("Child")?;
    assert_eq!(children.len(), 50);
    let spawner = engine.records("Spawner")?[0];
    assert_eq!(engine.store().record(children[0])?.type_name(), "Child");
    assert!(engine.exists(spawner));
    Ok(())
}

#[test]
fn batches_defer_recomputation_until_the_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut engine = mail_engine()?;
    let thread = engine.create("Thread", thread_data("res.partner", 1, "General"))?;

    engine.batch(|engine| {
        engine.apply(thread, "name", "One")?;
        engine.apply(thread, "name", "Two")?;
        Ok(())
    })?;

    assert_eq!(engine.get(thread, "display_name")?, FieldValue::Text("Two".into()));
    Ok(())
}
