use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::runner::{PipelineRunner, StepOutcome};

enum Slot {
    Idle(Box<PipelineRunner>),
    CheckedOut,
}

#[derive(Default)]
pub struct SessionTable {
    slots: Mutex<HashMap<String, Slot>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn advance<F>(&self, id: &str, factory: F) -> Result<StepOutcome>
    where
        F: FnOnce() -> Result<PipelineRunner>,
    {
        let existing = match self.lock().insert(id.to_string(), Slot::CheckedOut) {
            Some(Slot::Idle(runner)) => Some(runner),
            Some(Slot::CheckedOut) => return Err(PipelineError::SessionBusy(id.to_string())),
            None => None,
        };

        let mut runner = match existing {
            Some(runner) => runner,
            None => match factory() {
                Ok(runner) => {
                    info!(session = id, "Session started");
                    Box::new(runner)
                }
                Err(err) => {
                    self.lock().remove(id);
                    return Err(err);
                }
            },
        };

        let result = runner.run_next_step();
        let mut slots = self.lock();
        match &result {
            Ok(outcome) if !outcome.finished => {
                debug!(session = id, cursor = runner.current_step_index(), "Session parked");
                slots.insert(id.to_string(), Slot::Idle(runner));
            }
            _ => {
                slots.remove(id);
                info!(session = id, ok = result.is_ok(), "Session closed");
            }
        }
        result
    }

    pub fn discard(&self, id: &str) -> bool {
        let mut slots = self.lock();
        match slots.get(id) {
            Some(Slot::Idle(_)) => slots.remove(id).is_some(),
            _ => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn cursor(&self, id: &str) -> Option<usize> {
        match self.lock().get(id) {
            Some(Slot::Idle(runner)) => Some(runner.current_step_index()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
