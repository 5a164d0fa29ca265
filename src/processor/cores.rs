//! Worker core slots.
//!
//! A core is one unit of task concurrency on a processor. Slot state is a
//! small table behind a mutex; the requestor asks for an idle core before
//! requesting work and binds the assigned task to it.

use parking_lot::Mutex;

use crate::models::TaskId;
use crate::protocol::{CoreAssignment, CoreReport};

#[derive(Debug, Clone)]
pub struct CoreSlot {
    pub code: String,
    pub core_id: Option<i64>,
    pub current_task: Option<TaskId>,
}

pub struct CoreSlots {
    slots: Mutex<Vec<CoreSlot>>,
}

impl CoreSlots {
    /// Create `count` cores named `core-1..core-N`.
    pub fn new(count: u32) -> Self {
        let slots = (1..=count)
            .map(|i| CoreSlot {
                code: format!("core-{i}"),
                core_id: None,
                current_task: None,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Reports for the next heartbeat.
    pub fn reports(&self) -> Vec<CoreReport> {
        self.slots
            .lock()
            .iter()
            .map(|slot| CoreReport {
                code: slot.code.clone(),
                core_id: slot.core_id,
                current_task: slot.current_task,
            })
            .collect()
    }

    /// Adopt dispatcher-assigned core ids.
    pub fn adopt_assignments(&self, assignments: &[CoreAssignment]) {
        let mut slots = self.slots.lock();
        for assignment in assignments {
            if let Some(slot) = slots.iter_mut().find(|s| s.code == assignment.code) {
                slot.core_id = Some(assignment.core_id);
            }
        }
    }

    /// Code of an idle core, if any.
    pub fn idle_core(&self) -> Option<String> {
        self.slots
            .lock()
            .iter()
            .find(|s| s.current_task.is_none())
            .map(|s| s.code.clone())
    }

    pub fn bind(&self, code: &str, task_id: TaskId) {
        if let Some(slot) = self.slots.lock().iter_mut().find(|s| s.code == code) {
            slot.current_task = Some(task_id);
        }
    }

    pub fn release(&self, task_id: TaskId) {
        if let Some(slot) = self
            .slots
            .lock()
            .iter_mut()
            .find(|s| s.current_task == Some(task_id))
        {
            slot.current_task = None;
        }
    }

    pub fn busy_count(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|s| s.current_task.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_release() {
        let cores = CoreSlots::new(2);
        assert_eq!(cores.reports().len(), 2);

        let idle = cores.idle_core().unwrap();
        cores.bind(&idle, 42);
        assert_eq!(cores.busy_count(), 1);
        // the other core is offered next
        assert_ne!(cores.idle_core().unwrap(), idle);

        cores.release(42);
        assert_eq!(cores.busy_count(), 0);
    }

    #[test]
    fn test_adopt_assignments_matches_by_code() {
        let cores = CoreSlots::new(2);
        cores.adopt_assignments(&[CoreAssignment {
            code: "core-2".into(),
            core_id: 77,
        }]);
        let reports = cores.reports();
        assert_eq!(reports[0].core_id, None);
        assert_eq!(reports[1].core_id, Some(77));
    }
}
