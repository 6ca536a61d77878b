//! In-memory task store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use super::store::{apply_to, TaskFilter, TaskMutation, TaskStore, TaskStoreError};
use super::types::Task;

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

/// Task store held in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    inner: RwLock<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn create(&self, task: Task) -> Result<Task, TaskStoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.tasks.contains_key(&task.id) {
            return Err(TaskStoreError::AlreadyExists(task.id));
        }
        inner.order.push(task.id.clone());
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    fn get(&self, id: &str) -> Result<Option<Task>, TaskStoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.tasks.get(id).cloned())
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskStoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(filter.select(
            inner
                .order
                .iter()
                .filter_map(|id| inner.tasks.get(id))
                .cloned(),
        ))
    }

    fn apply(&self, id: &str, mutation: TaskMutation) -> Result<Task, TaskStoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskStoreError::NotFound(id.to_string()))?;

        // Work on a copy so a rejected mutation leaves no trace.
        let mut updated = task.clone();
        apply_to(&mut updated, mutation, Utc::now())?;
        *task = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskDescriptor, TaskState, TaskType};

    fn task(id: &str) -> Task {
        Task::new(id, TaskDescriptor::new(TaskType::Scraping, id), Utc::now())
    }

    #[test]
    fn test_create_get_list_in_order() {
        let store = MemoryTaskStore::new();
        store.create(task("b")).unwrap();
        store.create(task("a")).unwrap();

        assert!(store.get("a").unwrap().is_some());
        assert!(store.get("zz").unwrap().is_none());

        let ids: Vec<_> = store
            .list(&TaskFilter::new())
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let store = MemoryTaskStore::new();
        store.create(task("a")).unwrap();
        assert!(matches!(
            store.create(task("a")),
            Err(TaskStoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_apply_unknown_task() {
        let store = MemoryTaskStore::new();
        assert!(matches!(
            store.apply("nope", TaskMutation::Cancel),
            Err(TaskStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_apply_and_count() {
        let store = MemoryTaskStore::new();
        store.create(task("a")).unwrap();
        store.create(task("b")).unwrap();

        let cancelled = store.apply("a", TaskMutation::Cancel).unwrap();
        assert_eq!(cancelled.state, TaskState::Cancelled);
        assert_eq!(store.get("a").unwrap().unwrap().state, TaskState::Cancelled);

        let counts = store.count_by_state().unwrap();
        assert_eq!(counts[&TaskState::Cancelled], 1);
        assert_eq!(counts[&TaskState::Planning], 1);
        assert_eq!(counts[&TaskState::Completed], 0);
    }

    #[test]
    fn test_list_returns_copies() {
        let store = MemoryTaskStore::new();
        store.create(task("a")).unwrap();

        let mut listed = store.list(&TaskFilter::new()).unwrap();
        listed[0].title = "changed".to_string();
        listed.clear();

        assert_eq!(store.get("a").unwrap().unwrap().title, "a");
    }
}
