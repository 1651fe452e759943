//! Exit status codes and the rule that folds many unit statuses into one.

use std::sync::{Mutex, PoisonError};

pub const EXIT_STATUS_ZERO: i32 = 0;
pub const EXIT_STATUS_ABORTED: i32 = -1;
pub const EXIT_STATUS_INVALID_FUNCTION: i32 = -2;
pub const EXIT_STATUS_FILE_NOT_FOUND: i32 = -3;

/// Fold an incoming status into the current one.
///
/// Once either side is negative the more negative value wins; otherwise the
/// higher severity wins.
pub fn fold(current: i32, incoming: i32) -> i32 {
    if current < 0 || incoming < 0 {
        current.min(incoming)
    } else {
        current.max(incoming)
    }
}

/// Fold a whole sequence, starting from success.
pub fn fold_all<I>(statuses: I) -> i32
where
    I: IntoIterator<Item = i32>,
{
    statuses.into_iter().fold(EXIT_STATUS_ZERO, fold)
}

/// Aggregated exit status shared by every worker of a run.
#[derive(Debug)]
pub struct ExitStatus {
    value: Mutex<i32>,
}

impl ExitStatus {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(EXIT_STATUS_ZERO),
        }
    }

    /// Apply `fold` under the lock and return the updated status.
    pub fn update(&self, incoming: i32) -> i32 {
        let mut guard = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = fold(*guard, incoming);
        *guard
    }

    pub fn get(&self) -> i32 {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn positive_statuses_take_the_maximum() {
        assert_eq!(fold(0, 2), 2);
        assert_eq!(fold(4, 2), 4);
        assert_eq!(fold_all([1, 3, 2]), 3);
    }

    #[test]
    fn negative_status_dominates() {
        assert_eq!(fold(4, -1), -1);
        assert_eq!(fold(-1, 4), -1);
        assert_eq!(fold(-1, -3), -3);
        assert_eq!(fold(-3, -1), -3);
    }

    #[test]
    fn folded_sign_matches_presence_of_a_negative() {
        let samples: Vec<Vec<i32>> = vec![
            vec![],
            vec![0],
            vec![0, 1, 2],
            vec![5, -1, 7],
            vec![-2],
            vec![3, 3, -3, 0],
            vec![0, 0, 0, -1],
            vec![12, 4],
        ];
        for sample in samples {
            let folded = fold_all(sample.iter().copied());
            let any_negative = sample.iter().any(|s| *s < 0);
            assert_eq!(folded < 0, any_negative, "sample {sample:?}");
        }
    }

    #[test]
    fn exit_status_never_recovers_from_negative() {
        let status = ExitStatus::new();
        assert_eq!(status.update(2), 2);
        assert_eq!(status.update(-1), -1);
        assert_eq!(status.update(8), -1);
        assert_eq!(status.update(0), -1);
        assert_eq!(status.get(), -1);
    }

    #[test]
    fn exit_status_updates_from_many_threads() {
        let status = Arc::new(ExitStatus::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let status = status.clone();
                std::thread::spawn(move || {
                    for n in 0..100 {
                        status.update((i * 100 + n) % 7);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
        assert_eq!(status.get(), 6);
    }
}
