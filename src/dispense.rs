use std::path::Path;

use crate::item_types::{FetchLimit, Manager, MarkOutcome, Progress};
use crate::logger::{sanitize_log_value, Logger};
use crate::session::{check_batch_limit, increment_batch, BatchCheck, FetchState, SessionStore};

pub(crate) trait WorkItem {
    /// Identity recorded by the fetch tracker.
    fn fetch_key(&self) -> String;
    /// Short form for logs.
    fn label(&self) -> &str;
}

/// A markdown checklist the managers dispense from. Missing documents read
/// as empty; malformed lines are skipped.
pub(crate) trait Checklist {
    type Item: WorkItem;

    fn path(&self) -> &Path;
    fn first_unchecked(&self) -> Result<Option<Self::Item>, String>;
    fn mark_done(&self, identity: &str) -> Result<MarkOutcome, String>;
    fn progress(&self) -> Result<Progress, String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DispensePolicy {
    pub(crate) batch_limit: i64,
    pub(crate) max_same_fetches: FetchLimit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum NextOutcome<I> {
    Item {
        item: I,
        fetch_count: u32,
        progress: Progress,
    },
    Exhausted {
        progress: Progress,
    },
    BatchLimitReached {
        limit: i64,
    },
    /// The same item was requested too many times without being completed.
    SafetyStop {
        key: String,
        fetch_count: u32,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CompleteOutcome {
    Completed {
        mark: MarkOutcome,
        progress: Progress,
    },
    NotFound,
}

pub(crate) fn dispense_next<C: Checklist>(
    list: &C,
    store: &dyn SessionStore,
    manager: Manager,
    policy: &DispensePolicy,
    logger: &Logger,
) -> Result<NextOutcome<C::Item>, String> {
    if let BatchCheck::RestartRequested { limit, count } =
        check_batch_limit(store, policy.batch_limit)?
    {
        logger.log_transition(&format!(
            "batch_limit_reached manager={} limit={} count={}",
            manager, limit, count
        ));
        return Ok(NextOutcome::BatchLimitReached { limit });
    }

    let Some(item) = list.first_unchecked()? else {
        let progress = list.progress()?;
        logger.log_transition(&format!(
            "idle manager={} progress={}",
            manager, progress
        ));
        return Ok(NextOutcome::Exhausted { progress });
    };

    let key = item.fetch_key();
    let next_state = store.fetch_state(manager).advance(&key);
    if next_state.count > policy.max_same_fetches.get() {
        logger.log_transition(&format!(
            "safety_stop manager={} item={} fetches={} limit={}",
            manager,
            sanitize_log_value(item.label()),
            next_state.count,
            policy.max_same_fetches
        ));
        return Ok(NextOutcome::SafetyStop {
            key,
            fetch_count: next_state.count,
        });
    }
    store.save_fetch_state(manager, &next_state)?;

    let progress = list.progress()?;
    logger.log_transition(&format!(
        "next manager={} item={} fetch={}",
        manager,
        sanitize_log_value(item.label()),
        next_state.count
    ));
    Ok(NextOutcome::Item {
        item,
        fetch_count: next_state.count,
        progress,
    })
}

/// Marks `identity` done, runs `after_mark` (ledger append), clears the
/// manager's fetch tracker and counts the completion toward the batch.
pub(crate) fn complete<C, F>(
    list: &C,
    store: &dyn SessionStore,
    manager: Manager,
    identity: &str,
    logger: &Logger,
    after_mark: F,
) -> Result<CompleteOutcome, String>
where
    C: Checklist,
    F: FnOnce(MarkOutcome) -> Result<(), String>,
{
    let mark = list.mark_done(identity)?;
    if mark == MarkOutcome::NotFound {
        logger.log_transition(&format!(
            "not_found manager={} item={}",
            manager,
            sanitize_log_value(identity)
        ));
        return Ok(CompleteOutcome::NotFound);
    }

    after_mark(mark)?;
    store.save_fetch_state(manager, &FetchState::default())?;

    let batch_count = match increment_batch(store) {
        Ok(count) => Some(count),
        Err(err) => {
            eprintln!("Warning: failed to update batch counter: {}", err);
            logger.log_transition(&format!(
                "batch_increment_failed manager={} err={}",
                manager,
                sanitize_log_value(&err)
            ));
            None
        }
    };

    logger.log_transition(&format!(
        "completed manager={} item={} already_done={} batch={}",
        manager,
        sanitize_log_value(identity),
        mark == MarkOutcome::AlreadyDone,
        batch_count.map_or_else(|| "unknown".to_string(), |count| count.to_string())
    ));

    Ok(CompleteOutcome::Completed {
        mark,
        progress: list.progress()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checklist::{TaskItem, TaskList};
    use crate::scenarios::ScenarioList;
    use crate::session::{FileSessionStore, MemorySessionStore, SessionPaths};
    use std::fs;
    use tempfile::TempDir;

    fn policy(batch_limit: i64) -> DispensePolicy {
        DispensePolicy {
            batch_limit,
            max_same_fetches: FetchLimit::default(),
        }
    }

    fn task_list(temp: &TempDir, content: &str) -> TaskList {
        let path = temp.path().join("TASKS.md");
        fs::write(&path, content).expect("write tasks");
        TaskList::new(path)
    }

    fn next_task(list: &TaskList, store: &MemorySessionStore, batch_limit: i64) -> NextOutcome<TaskItem> {
        dispense_next(list, store, Manager::Tasks, &policy(batch_limit), &Logger::disabled())
            .expect("dispense")
    }

    fn done_task(list: &TaskList, store: &MemorySessionStore, text: &str) -> CompleteOutcome {
        complete(list, store, Manager::Tasks, text, &Logger::disabled(), |_| Ok(()))
            .expect("complete")
    }

    fn dispensed(outcome: NextOutcome<TaskItem>) -> (String, u32) {
        match outcome {
            NextOutcome::Item {
                item, fetch_count, ..
            } => (item.description, fetch_count),
            other => panic!("expected an item, got {other:?}"),
        }
    }

    #[test]
    fn dispenses_in_document_order_across_completions() {
        let temp = TempDir::new().expect("temp dir");
        let list = task_list(&temp, "- [ ] Fix bug\n- [ ] Write tests\n");
        let store = MemorySessionStore::default();

        assert_eq!(dispensed(next_task(&list, &store, 10)).0, "Fix bug");
        assert!(matches!(
            done_task(&list, &store, "Fix bug"),
            CompleteOutcome::Completed {
                mark: MarkOutcome::Marked,
                ..
            }
        ));
        assert_eq!(store.batch_count(), 1);
        assert_eq!(dispensed(next_task(&list, &store, 10)).0, "Write tests");
        done_task(&list, &store, "Write tests");
        assert_eq!(
            next_task(&list, &store, 10),
            NextOutcome::Exhausted {
                progress: Progress { done: 2, total: 2 }
            }
        );
    }

    #[test]
    fn safety_stop_triggers_on_fourth_consecutive_fetch() {
        let temp = TempDir::new().expect("temp dir");
        let list = task_list(&temp, "- [ ] Stuck task\n");
        let store = MemorySessionStore::default();

        for expected in 1..=3 {
            assert_eq!(
                dispensed(next_task(&list, &store, 10)),
                ("Stuck task".to_string(), expected)
            );
        }
        assert_eq!(
            next_task(&list, &store, 10),
            NextOutcome::SafetyStop {
                key: "Stuck task".to_string(),
                fetch_count: 4
            }
        );
        // The over-limit count is not persisted.
        assert_eq!(store.fetch_state(Manager::Tasks).count, 3);
    }

    fn scenario_safety_stop_through_file_store(document: &str, expected_key: &str) {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("SCENARIOS.md");
        fs::write(&path, document).expect("write scenarios");
        let list = ScenarioList::new(path);
        let logger = Logger::disabled();

        for expected in 1..=3 {
            // Fresh store each call, as each CLI invocation would have.
            let store = FileSessionStore::new(SessionPaths::in_dir(temp.path()));
            match dispense_next(&list, &store, Manager::Scenarios, &policy(10), &logger)
                .expect("dispense")
            {
                NextOutcome::Item { fetch_count, .. } => assert_eq!(fetch_count, expected),
                other => panic!("expected a scenario, got {other:?}"),
            }
        }

        let store = FileSessionStore::new(SessionPaths::in_dir(temp.path()));
        assert_eq!(
            dispense_next(&list, &store, Manager::Scenarios, &policy(10), &logger)
                .expect("dispense"),
            NextOutcome::SafetyStop {
                key: expected_key.to_string(),
                fetch_count: 4
            }
        );
        assert_eq!(
            store.fetch_state(Manager::Scenarios),
            FetchState {
                last: Some(expected_key.to_string()),
                count: 3
            }
        );
    }

    #[test]
    fn scenario_safety_stop_for_named_rows() {
        scenario_safety_stop_through_file_store("| A1 | Login | Open | Lockout | [ ] |\n", "A1 | Login");
    }

    #[test]
    fn scenario_safety_stop_for_unnamed_rows() {
        scenario_safety_stop_through_file_store("- [ ] A2\n", "A2 |");
        scenario_safety_stop_through_file_store("| B1 |  | Steps |  | [ ] |\n", "B1 |");
    }

    #[test]
    fn completing_any_item_resets_the_fetch_counter() {
        let temp = TempDir::new().expect("temp dir");
        let list = task_list(&temp, "- [ ] First\n- [ ] Second\n");
        let store = MemorySessionStore::default();

        next_task(&list, &store, 10);
        next_task(&list, &store, 10);
        assert_eq!(store.fetch_state(Manager::Tasks).count, 2);

        // Completing a different item than the one last dispensed still counts.
        done_task(&list, &store, "Second");
        assert_eq!(store.fetch_state(Manager::Tasks), FetchState::default());
        assert_eq!(dispensed(next_task(&list, &store, 10)), ("First".to_string(), 1));
    }

    #[test]
    fn batch_limit_requests_restart_after_limit_completions() {
        let temp = TempDir::new().expect("temp dir");
        let list = task_list(&temp, "- [ ] a\n- [ ] b\n- [ ] c\n");
        let store = MemorySessionStore::default();

        for text in ["a", "b"] {
            dispensed(next_task(&list, &store, 2));
            done_task(&list, &store, text);
        }
        assert_eq!(store.batch_count(), 2);

        assert_eq!(
            next_task(&list, &store, 2),
            NextOutcome::BatchLimitReached { limit: 2 }
        );
        assert!(store.restart_signal_raised());
        assert_eq!(store.batch_count(), 0);
        // No item was dispensed, so the tracker is untouched.
        assert_eq!(store.fetch_state(Manager::Tasks), FetchState::default());

        assert_eq!(dispensed(next_task(&list, &store, 2)).0, "c");
    }

    #[test]
    fn not_found_leaves_state_untouched() {
        let temp = TempDir::new().expect("temp dir");
        let list = task_list(&temp, "- [ ] Real task\n");
        let store = MemorySessionStore::default();
        next_task(&list, &store, 10);

        assert_eq!(
            done_task(&list, &store, "Real  task"),
            CompleteOutcome::NotFound
        );
        assert_eq!(store.fetch_state(Manager::Tasks).count, 1);
        assert_eq!(store.batch_count(), 0);
        assert_eq!(
            fs::read_to_string(list.path()).expect("read"),
            "- [ ] Real task\n"
        );
    }

    #[test]
    fn managers_share_one_batch_budget() {
        let temp = TempDir::new().expect("temp dir");
        let tasks = task_list(&temp, "- [ ] t1\n- [ ] t2\n");
        let scenarios_path = temp.path().join("SCENARIOS.md");
        fs::write(&scenarios_path, "- [ ] A1 First\n").expect("write scenarios");
        let scenarios = ScenarioList::new(scenarios_path);
        let store = MemorySessionStore::default();
        let logger = Logger::disabled();

        done_task(&tasks, &store, "t1");
        complete(&scenarios, &store, Manager::Scenarios, "A1", &logger, |_| Ok(()))
            .expect("complete scenario");
        assert_eq!(store.batch_count(), 2);

        let outcome = dispense_next(&scenarios, &store, Manager::Scenarios, &policy(2), &logger)
            .expect("dispense");
        assert_eq!(outcome, NextOutcome::BatchLimitReached { limit: 2 });
    }

    #[test]
    fn after_mark_runs_only_for_found_items() {
        let temp = TempDir::new().expect("temp dir");
        let list = task_list(&temp, "- [x] Done\n");
        let store = MemorySessionStore::default();
        let mut seen = Vec::new();

        complete(&list, &store, Manager::Tasks, "Done", &Logger::disabled(), |mark| {
            seen.push(mark);
            Ok(())
        })
        .expect("complete");
        complete(&list, &store, Manager::Tasks, "Missing", &Logger::disabled(), |mark| {
            seen.push(mark);
            Ok(())
        })
        .expect("complete");

        assert_eq!(seen, vec![MarkOutcome::AlreadyDone]);
        assert_eq!(store.batch_count(), 1);
    }
}
