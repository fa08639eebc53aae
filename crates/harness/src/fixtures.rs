use recgraph_core::{
    commands::{Command, Data, FieldUpdate, Target},
    field_value::FieldValue,
    schema::{FieldDecl, Registry, Schema, SortKey, TypeDecl},
    CoreError, SchemaError,
};
use recgraph_engine::{Engine, EngineConfig};

/// Threads, messages, partners, attachments and chat windows.
pub fn mail_schema() -> Result<Schema, SchemaError> {
    let mut registry = Registry::new();

    registry.register(
        TypeDecl::new("Partner")
            .identify_by(["id"])
            .field("id", FieldDecl::attr())
            .field("name", FieldDecl::attr())
            .field("messages", FieldDecl::many("Message").inverse("author")),
    )?;

    registry.register(
        TypeDecl::new("Thread")
            .identify_by(["model", "id"])
            .field("model", FieldDecl::attr())
            .field("id", FieldDecl::attr())
            .field("name", FieldDecl::attr())
            .field(
                "messages",
                FieldDecl::many("Message")
                    .inverse("thread")
                    .sort([SortKey::asc("id")]),
            )
            .field(
                "display_name",
                FieldDecl::attr().compute(["name"], |thread| {
                    let name = thread.get("name")?;
                    Ok(match name.as_text() {
                        Some(text) if !text.is_empty() => FieldValue::Text(text.to_string()).into(),
                        _ => FieldValue::Text("Unnamed thread".into()).into(),
                    })
                }),
            )
            .field(
                "message_count",
                FieldDecl::attr().compute(["messages"], |thread| {
                    Ok(FieldValue::Integer(thread.related("messages")?.len() as i64).into())
                }),
            )
            .field(
                "last_message",
                FieldDecl::one("Message").compute(["messages"], |thread| {
                    Ok(FieldUpdate::records(thread.related("messages")?.last().copied().into_iter().collect()))
                }),
            )
            .field(
                "needaction_count",
                FieldDecl::attr()
                    .compute(["messages.is_needaction"], |thread| {
                        let mut count = 0;
                        for message in thread.related("messages")? {
                            if thread.get_of(message, "is_needaction")?.is_truthy() {
                                count += 1;
                            }
                        }
                        Ok(FieldValue::Integer(count).into())
                    })
                    .lazy(),
            ),
    )?;

    registry.register(
        TypeDecl::new("Message")
            .identify_by(["id"])
            .field("id", FieldDecl::attr())
            .field("body", FieldDecl::html())
            .field("date", FieldDecl::datetime())
            .field("is_needaction", FieldDecl::attr().default(false))
            .field("thread", FieldDecl::one("Thread").inverse("messages"))
            .field("author", FieldDecl::one("Partner").inverse("messages"))
            .field(
                "attachments",
                FieldDecl::many("Attachment").inverse("message").causal(),
            )
            .field("author_name", FieldDecl::attr().related("author.name"))
            .field("thread_name", FieldDecl::attr().related("thread.display_name")),
    )?;

    registry.register(
        TypeDecl::new("Attachment")
            .identify_by(["id"])
            .natural_key(["filename", "res_model", "res_id"])
            .field("id", FieldDecl::attr())
            .field("filename", FieldDecl::attr())
            .field("res_model", FieldDecl::attr())
            .field("res_id", FieldDecl::attr())
            .field("uploading", FieldDecl::attr().default(false))
            .field("message", FieldDecl::one("Message").inverse("attachments")),
    )?;

    registry.register(
        TypeDecl::new("ChatWindow")
            .field("thread", FieldDecl::one("Thread"))
            .field("folded", FieldDecl::attr().default(false)),
    )?;

    registry.finalize()
}

pub fn mail_engine() -> Result<Engine, SchemaError> {
    Ok(Engine::new(mail_schema()?))
}

/// Two fields computed from each other.
pub fn cycle_schema() -> Result<Schema, SchemaError> {
    let mut registry = Registry::new();
    registry.register(
        TypeDecl::new("Node")
            .field(
                "a",
                FieldDecl::attr().compute(["b"], |node| increment(node.get("b")?)),
            )
            .field(
                "b",
                FieldDecl::attr().compute(["a"], |node| increment(node.get("a")?)),
            ),
    )?;
    registry.finalize()
}

/// Two lazy fields computed from each other; the cycle only shows on read.
pub fn lazy_cycle_schema() -> Result<Schema, SchemaError> {
    let mut registry = Registry::new();
    registry.register(
        TypeDecl::new("Node")
            .field("label", FieldDecl::attr())
            .field(
                "a",
                FieldDecl::attr()
                    .compute(["b"], |node| increment(node.get("b")?))
                    .lazy(),
            )
            .field(
                "b",
                FieldDecl::attr()
                    .compute(["a"], |node| increment(node.get("a")?))
                    .lazy(),
            ),
    )?;
    registry.finalize()
}

/// `links` eager fields, each one more than the previous.
pub fn chain_schema(links: usize) -> Result<Schema, SchemaError> {
    let mut decl = TypeDecl::new("Chain").field("c0", FieldDecl::attr().default(0));
    for i in 1..=links {
        let previous = format!("c{}", i - 1);
        decl = decl.field(
            &format!("c{i}"),
            FieldDecl::attr().compute([previous.clone()], move |chain| increment(chain.get(&previous)?)),
        );
    }
    let mut registry = Registry::new();
    registry.register(decl)?;
    registry.finalize()
}

/// A spawner whose children computation always adds another child.
pub fn spawner_schema() -> Result<Schema, SchemaError> {
    let mut registry = Registry::new();
    registry.register(
        TypeDecl::new("Spawner").field(
            "children",
            FieldDecl::many("Child")
                .inverse("spawner")
                .compute(["children.stamp"], |_| {
                    Ok(Command::Add(Target::Create(Data::new().set("stamp", 1))).into())
                }),
        ),
    )?;
    registry.register(
        TypeDecl::new("Child")
            .field("stamp", FieldDecl::attr())
            .field("spawner", FieldDecl::one("Spawner").inverse("children")),
    )?;
    registry.finalize()
}

/// Boards whose tasks sort open-first, then by descending priority.
pub fn board_schema() -> Result<Schema, SchemaError> {
    let mut registry = Registry::new();
    registry.register(
        TypeDecl::new("Board").field(
            "tasks",
            FieldDecl::many("Task")
                .inverse("board")
                .sort([SortKey::falsy_first("done"), SortKey::desc("priority")]),
        ),
    )?;
    registry.register(
        TypeDecl::new("Task")
            .field("title", FieldDecl::attr())
            .field("done", FieldDecl::attr().default(false))
            .field("priority", FieldDecl::attr())
            .field("board", FieldDecl::one("Board").inverse("tasks")),
    )?;
    registry.finalize()
}

pub fn engine_with_limit(schema: Schema, max_settle_iterations: usize) -> Engine {
    Engine::with_config(
        schema,
        EngineConfig {
            max_settle_iterations,
            ..EngineConfig::default()
        },
    )
}

fn increment(value: FieldValue) -> Result<FieldUpdate, CoreError> {
    Ok(FieldValue::Integer(value.as_integer().unwrap_or(0) + 1).into())
}

/// Data for a thread identified by `(model, id)`.
pub fn thread_data(model: &str, id: i64, name: &str) -> Data {
    Data::new().set("model", model).set("id", id).set("name", name)
}

pub fn message_data(id: i64, body: &str) -> Data {
    Data::new().set("id", id).set("body", body)
}
