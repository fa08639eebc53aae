use std::cell::RefCell;
use std::rc::Rc;

use recgraph_core::ids::*;
use recgraph_engine::{Change, Engine, Notification};

/// Observer that keeps every notification it receives.
pub struct Recorder {
    pub id: ObserverId,
    log: Rc<RefCell<Vec<Notification>>>,
}

impl Recorder {
    pub fn attach(engine: &mut Engine) -> Self {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let id = engine.subscribe(move |notification: &Notification| {
            sink.borrow_mut().push(notification.clone());
        });
        Self { id, log }
    }

    pub fn count(&self) -> usize {
        self.log.borrow().len()
    }

    /// Drain what was received so far.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    pub fn saw_field(&self, record: RecordRef, field: &str) -> bool {
        self.log.borrow().iter().any(|n| {
            n.changes
                .iter()
                .any(|c| matches!(c, Change::Field { record: r, field: f } if *r == record && &**f == field))
        })
    }
}
