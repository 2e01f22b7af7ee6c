use std::sync::Arc;

use chrono::Utc;
use corkboard_core::board::{Board, Intent, PendingMutation, TaskDraft};
use corkboard_core::clock::FixedClock;
use corkboard_core::error::RemoteError;
use corkboard_core::remote::memory::Op;
use corkboard_core::remote::{IdentityApi, InMemoryRemote, WorkspaceApi};
use corkboard_shared::LoginRequest;
use proptest::prelude::*;

const TITLES: [&str; 3] = ["T1", "x", "y"];

#[derive(Debug, Clone)]
enum Step {
    Move { task: usize, group: usize },
    Rename { task: usize, title: usize },
    Delete { task: usize },
    Create { group: usize },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0..6usize, 0..3usize).prop_map(|(task, group)| Step::Move { task, group }),
        2 => (0..6usize, 0..3usize).prop_map(|(task, title)| Step::Rename { task, title }),
        1 => (0..6usize).prop_map(|task| Step::Delete { task }),
        1 => (0..3usize).prop_map(|group| Step::Create { group }),
    ]
}

fn op_for(pending: &PendingMutation) -> Op {
    match pending.intent() {
        Intent::MoveTask { .. } | Intent::RenameTask { .. } => Op::UpdateTask,
        Intent::DeleteTask { .. } => Op::DeleteTask,
        _ => Op::CreateTask,
    }
}

fn assert_counters(board: &Board) {
    let store = board.store().expect("hydrated");
    assert!(store.verify_counters(), "counters drifted: {:?}", store.counters());
    let total: usize = store.counters().iter().map(|(_, count)| count).sum();
    assert_eq!(total, store.task_count());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Requests reach the server in the order they were planned, responses
    /// come back in any order and some fail. Counters must hold throughout,
    /// and once every failure has been retried the board must agree with
    /// the server on where each task lives and what it is called.
    #[test]
    fn board_converges_with_the_server_whatever_the_settle_order(
        steps in prop::collection::vec(step(), 1..24),
        failures in prop::collection::vec(any::<bool>(), 24),
        order in prop::collection::vec(any::<u32>(), 24),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let clock = Arc::new(FixedClock::new(Utc::now()));
            let remote = InMemoryRemote::new(clock.clone());
            let owner = remote.add_user("ann", "Ann", "pw");
            let seeded = remote.add_workspace(
                owner,
                "Alpha",
                &[("A", &["T1", "T2", "T3"][..]), ("B", &["T4", "T5"][..]), ("C", &["T6"][..])],
            );
            let bearer = remote
                .login(&LoginRequest { username: "ann".to_string(), password: "pw".to_string() })
                .await
                .expect("login")
                .access_token;
            let snapshot = remote.workspace_by_name(&bearer, "Alpha").await.expect("snapshot");

            let mut board = Board::new(clock);
            board.load("Alpha", snapshot);
            let tasks: Vec<_> = seeded.tasks.iter().flatten().copied().collect();

            let mut pending = Vec::new();
            for step in &steps {
                let intent = match *step {
                    Step::Move { task, group } => Intent::MoveTask { task: tasks[task], to: seeded.groups[group] },
                    Step::Rename { task, title } => Intent::RenameTask {
                        task: tasks[task],
                        title: TITLES[title].to_string(),
                    },
                    Step::Delete { task } => Intent::DeleteTask { task: tasks[task] },
                    Step::Create { group } => Intent::CreateTask {
                        group: seeded.groups[group],
                        draft: TaskDraft::titled("new"),
                    },
                };
                // Unknown tasks (already deleted locally) are rejected up front.
                if let Ok(Some(planned)) = board.plan(intent) {
                    pending.push(planned);
                }
                assert_counters(&board);
            }

            let mut settlements = Vec::new();
            for (index, planned) in pending.into_iter().enumerate() {
                if failures[index % failures.len()] {
                    remote.fail_next(op_for(&planned), RemoteError::Transport("dropped".to_string()));
                }
                let key = order[index % order.len()];
                settlements.push((key, planned.dispatch(&remote, &bearer).await));
            }
            settlements.sort_by_key(|(key, _)| *key);
            for (_, settlement) in settlements {
                board.settle(settlement);
                assert_counters(&board);
            }

            for _round in 0..4 {
                let ids: Vec<u64> = board.failures().iter().map(|f| f.id).collect();
                for id in ids {
                    if let Ok(Some(retry)) = board.retry(id) {
                        let settlement = retry.dispatch(&remote, &bearer).await;
                        board.settle(settlement);
                        assert_counters(&board);
                    }
                }
            }

            let store = board.store().expect("hydrated");
            for group in store.groups() {
                for task in store.tasks_in(group.id) {
                    assert_eq!(task.confirmed_group, task.group_id, "task {}", task.id);
                    assert_eq!(remote.task_group(task.id), Some(task.group_id), "task {}", task.id);
                    let title = remote.task(task.id).map(|t| t.title);
                    assert_eq!(title.as_deref(), Some(task.title.as_str()), "task {}", task.id);
                }
            }
        });
    }
}
