//! Per-record results and their aggregation into a batch outcome.

use serde::{Deserialize, Serialize};

/// A failed record: its position in the batch and a readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Position of the record in the input batch.
    pub index: usize,
    /// Error message, prefixed with the item index.
    pub message: String,
}

impl ItemFailure {
    /// Create a new failure entry.
    pub fn new(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            message: message.into(),
        }
    }
}

/// Result of one parallel creation task.
///
/// Exactly one of `value` and `error` is populated.
#[derive(Debug)]
pub struct TaskResult<T> {
    /// Position of the record in the input batch.
    pub index: usize,
    /// Created value on success.
    pub value: Option<T>,
    /// Error message on failure.
    pub error: Option<String>,
}

impl<T> TaskResult<T> {
    /// A successful task.
    pub fn success(index: usize, value: T) -> Self {
        Self {
            index,
            value: Some(value),
            error: None,
        }
    }

    /// A failed task.
    pub fn failure(index: usize, error: impl Into<String>) -> Self {
        Self {
            index,
            value: None,
            error: Some(error.into()),
        }
    }

    /// Check if this is a success.
    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }
}

/// Accumulates task results into index-aligned slots.
///
/// Slots are pre-sized to the batch length, so results can arrive in any
/// order and still come out in input order.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    slots: Vec<Option<T>>,
    failures: Vec<ItemFailure>,
}

impl<T> BatchOutcome<T> {
    /// Create an empty outcome for a batch of `total` records.
    pub fn with_len(total: usize) -> Self {
        let mut slots = Vec::with_capacity(total);
        slots.resize_with(total, || None);
        Self {
            slots,
            failures: Vec::new(),
        }
    }

    /// Size of the batch.
    pub fn total(&self) -> usize {
        self.slots.len()
    }

    /// Store a successful value at its original index.
    pub fn set(&mut self, index: usize, value: T) {
        self.slots[index] = Some(value);
    }

    /// Record the result of a finished task.
    pub fn record(&mut self, result: TaskResult<T>) {
        match result {
            TaskResult {
                index,
                value: Some(value),
                ..
            } => self.set(index, value),
            TaskResult { index, error, .. } => {
                let message = error.unwrap_or_else(|| format!("Item {index}: unknown error"));
                self.failures.push(ItemFailure::new(index, message));
            }
        }
    }

    /// Number of slots filled so far.
    pub fn succeeded(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if any task failed.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Finish the batch: every value in input order, or the sorted list of
    /// failures together with how many records succeeded.
    ///
    /// A slot that was never filled and never reported as failed counts as a
    /// failure, so a lost result can't silently shorten the output.
    pub fn finish(mut self) -> std::result::Result<Vec<T>, (usize, Vec<ItemFailure>)> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.is_none() && !self.failures.iter().any(|f| f.index == index) {
                self.failures
                    .push(ItemFailure::new(index, format!("Item {index}: produced no result")));
            }
        }

        if self.has_failures() {
            let succeeded = self.succeeded();
            self.failures.sort_by_key(|f| f.index);
            return Err((succeeded, self.failures));
        }

        Ok(self.slots.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_result_constructors() {
        let ok = TaskResult::success(3, "value");
        assert!(ok.is_success());
        assert!(ok.error.is_none());

        let err: TaskResult<&str> = TaskResult::failure(4, "Item 4: boom");
        assert!(!err.is_success());
        assert_eq!(err.error.as_deref(), Some("Item 4: boom"));
    }

    #[test]
    fn test_out_of_order_results_are_reassembled() {
        let mut outcome = BatchOutcome::with_len(3);
        outcome.record(TaskResult::success(2, "c"));
        outcome.set(0, "a");
        outcome.record(TaskResult::success(1, "b"));

        assert_eq!(outcome.finish().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unfilled_slot_is_a_failure() {
        let mut outcome = BatchOutcome::with_len(2);
        outcome.set(0, "a");

        let (succeeded, failures) = outcome.finish().unwrap_err();
        assert_eq!(succeeded, 1);
        assert_eq!(failures, vec![ItemFailure::new(1, "Item 1: produced no result")]);
    }

    #[test]
    fn test_failures_are_sorted_and_counted() {
        let mut outcome = BatchOutcome::with_len(4);
        outcome.set(0, 0);
        outcome.record(TaskResult::failure(3, "Item 3: late"));
        outcome.record(TaskResult::success(2, 2));
        outcome.record(TaskResult::failure(1, "Item 1: early"));

        let (succeeded, failures) = outcome.finish().unwrap_err();
        assert_eq!(succeeded, 2);
        assert_eq!(
            failures.iter().map(|f| f.index).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }
}
