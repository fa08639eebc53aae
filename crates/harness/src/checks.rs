use recgraph_core::ids::*;
use recgraph_engine::Engine;
use recgraph_storage::RecordStore;

fn live_records(engine: &Engine) -> Result<Vec<RecordRef>, String> {
    let store = engine.store();
    let mut records = Vec::new();
    for model in engine.schema().types() {
        records.extend(store.records_of(model.name()).map_err(|e| e.to_string())?);
    }
    Ok(records)
}

/// For every relation with an inverse: `b in a.f` iff `a in b.g`.
pub fn check_inverse_consistency(engine: &Engine) -> Result<(), String> {
    let store = engine.store();
    for a in live_records(engine)? {
        let record = store.record(a).map_err(|e| e.to_string())?;
        for (field, rel) in record.model().relation_fields() {
            let Some(inverse) = rel.inverse_index() else {
                continue;
            };
            let members = store.list(a, field.index()).map_err(|e| e.to_string())?;
            for b in members {
                let back = store.list(b, inverse).map_err(|e| e.to_string())?;
                if !back.contains(a) {
                    return Err(format!("{a} lists {b} in {} but not the other way", field.name()));
                }
            }
        }
    }
    Ok(())
}

/// No relation lists a record that no longer exists.
pub fn check_no_dangling(engine: &Engine) -> Result<(), String> {
    let store = engine.store();
    for a in live_records(engine)? {
        let record = store.record(a).map_err(|e| e.to_string())?;
        for (field, _) in record.model().relation_fields() {
            let members = store.list(a, field.index()).map_err(|e| e.to_string())?;
            if let Some(dead) = members.iter().find(|m| !store.exists(*m)) {
                return Err(format!("{a}.{} still lists deleted {dead}", field.name()));
            }
        }
    }
    Ok(())
}
