#[cfg(test)]
mod tests {
    use crate::registry::registry::{
        FailureOutcome, InstallJob, JobRegistry, RegistryConfig, SuccessOutcome, TaskBlueprint,
    };
    use crate::registry::shard::{map_output_name, shard_name, shard_ranges};
    use crate::registry::types::*;
    use std::sync::Arc;

    fn test_config() -> RegistryConfig {
        RegistryConfig {
            lease_ttl_ms: 1_000,
            worker_ttl_ms: 5_000,
            max_retries: 3,
            retry_cooldown_ms: 500,
        }
    }

    fn worker(name: &str) -> WorkerId {
        WorkerId(name.to_string())
    }

    fn single_job(registry: &Arc<JobRegistry>, plugin: &str) -> (JobId, TaskId) {
        let job_id = JobId::new();
        let tasks = registry.install_job(InstallJob {
            job_id: job_id.clone(),
            shape: JobShape::Single,
            map_plugin: plugin.to_string(),
            reduce_plugin: None,
            reduce_output: None,
            shards: 1,
            params: serde_json::json!({}),
            tasks: vec![TaskBlueprint {
                kind: TaskKind::Single,
                shard_index: None,
                plugin_kind: plugin.to_string(),
                inputs: vec!["wordlist.txt".to_string()],
                output: "result.txt".to_string(),
            }],
        });
        (job_id, tasks.into_iter().next().unwrap())
    }

    fn map_reduce_job(registry: &Arc<JobRegistry>, shards: u32) -> (JobId, Vec<TaskId>) {
        let job_id = JobId::new();
        let blueprints = (0..shards)
            .map(|i| TaskBlueprint {
                kind: TaskKind::Map,
                shard_index: Some(i),
                plugin_kind: "sort_map".to_string(),
                inputs: vec![shard_name(i as usize)],
                output: map_output_name(i as usize, "sorted.txt"),
            })
            .collect();
        let tasks = registry.install_job(InstallJob {
            job_id: job_id.clone(),
            shape: JobShape::MapReduce,
            map_plugin: "sort_map".to_string(),
            reduce_plugin: Some("sort_reduce".to_string()),
            reduce_output: Some("final.txt".to_string()),
            shards,
            params: serde_json::json!({}),
            tasks: blueprints,
        });
        (job_id, tasks)
    }

    // ============================================================
    // DISPATCH
    // ============================================================

    #[test]
    fn test_claim_assigns_pending_task() {
        let registry = JobRegistry::new(test_config());
        let (job_id, task_id) = single_job(&registry, "hashcat");

        let assignment = registry.claim(&worker("w1")).expect("a task");
        assert_eq!(assignment.task_id, task_id);
        assert_eq!(assignment.job_id, job_id);
        assert_eq!(assignment.inputs, vec!["wordlist.txt"]);
        assert_eq!(assignment.expected_outputs, vec!["result.txt"]);

        assert_eq!(registry.task_state(&task_id), Some(TaskState::Assigned));
        assert_eq!(registry.job_state(&job_id), Some(JobState::Running));
    }

    #[test]
    fn test_task_is_held_by_at_most_one_worker() {
        let registry = JobRegistry::new(test_config());
        single_job(&registry, "hashcat");

        assert!(registry.claim(&worker("w1")).is_some());
        // Only one task exists, so the second poller gets nothing.
        assert!(registry.claim(&worker("w2")).is_none());
    }

    #[test]
    fn test_claim_is_fifo_with_id_tiebreak() {
        let registry = JobRegistry::new(test_config());
        let (_, task_ids) = map_reduce_job(&registry, 3);

        // All three share a pending_since timestamp, so dispatch order is
        // task id order.
        let mut expected: Vec<TaskId> = task_ids.clone();
        expected.sort();

        let claimed: Vec<TaskId> = (0..3)
            .map(|i| registry.claim(&worker(&format!("w{}", i))).unwrap().task_id)
            .collect();
        assert_eq!(claimed, expected);
    }

    #[test]
    fn test_cooldown_skips_worker_that_just_failed() {
        let registry = JobRegistry::new(test_config());
        let (_, task_id) = single_job(&registry, "hashcat");

        let w1 = worker("w1");
        registry.claim(&w1).unwrap();
        registry.report_failure(&w1, &task_id, ErrorKind::PluginExit, "exit 1".into());

        // w1 is inside the cooldown window, w2 is not.
        assert!(registry.claim(&w1).is_none());
        assert!(registry.claim(&worker("w2")).is_some());
    }

    // ============================================================
    // HEARTBEATS AND LEASES
    // ============================================================

    #[test]
    fn test_first_heartbeat_moves_assigned_to_running() {
        let registry = JobRegistry::new(test_config());
        let (_, task_id) = single_job(&registry, "hashcat");
        let w1 = worker("w1");

        registry.claim(&w1).unwrap();
        assert_eq!(registry.heartbeat(&w1, &task_id), HeartbeatStatus::Ok);
        assert_eq!(registry.task_state(&task_id), Some(TaskState::Running));
    }

    #[test]
    fn test_heartbeat_from_non_holder_is_reassigned() {
        let registry = JobRegistry::new(test_config());
        let (_, task_id) = single_job(&registry, "hashcat");

        registry.claim(&worker("w1")).unwrap();
        assert_eq!(
            registry.heartbeat(&worker("w2"), &task_id),
            HeartbeatStatus::Reassigned
        );
        // The intruder changed nothing.
        assert_eq!(registry.task_state(&task_id), Some(TaskState::Assigned));
    }

    #[test]
    fn test_lease_expiry_requeues_with_retry_bump() {
        let registry = JobRegistry::new(test_config());
        let (_, task_id) = single_job(&registry, "hashcat");
        let w1 = worker("w1");

        registry.claim(&w1).unwrap();
        assert_eq!(registry.task_retry_count(&task_id), Some(0));

        // Sweep from the future, past the lease.
        let stats = registry.sweep(now_ms() + 2_000);
        assert_eq!(stats.expired_tasks, 1);
        assert_eq!(registry.task_state(&task_id), Some(TaskState::Pending));
        assert_eq!(registry.task_retry_count(&task_id), Some(1));

        // The original holder is now stale.
        assert_eq!(
            registry.heartbeat(&w1, &task_id),
            HeartbeatStatus::Reassigned
        );

        // Another worker picks the task up and completes it.
        let a = registry.claim(&worker("w2")).unwrap();
        assert_eq!(a.task_id, task_id);
    }

    #[test]
    fn test_sweep_forgets_silent_workers() {
        let registry = JobRegistry::new(test_config());
        single_job(&registry, "hashcat");

        registry.claim(&worker("w1")).unwrap();
        assert_eq!(registry.stats().workers, 1);

        let stats = registry.sweep(now_ms() + 10_000);
        assert_eq!(stats.forgotten_workers, 1);
        assert_eq!(registry.stats().workers, 0);
    }

    // ============================================================
    // SUCCESS, FAILURE, RETRIES
    // ============================================================

    #[test]
    fn test_single_task_success_completes_job() {
        let registry = JobRegistry::new(test_config());
        let (job_id, task_id) = single_job(&registry, "hashcat");
        let w1 = worker("w1");

        registry.claim(&w1).unwrap();
        let outcome = registry.report_success(&w1, &task_id);
        assert_eq!(
            outcome,
            SuccessOutcome::JobSucceeded {
                final_output: "result.txt".to_string()
            }
        );

        let view = registry.job_view(&job_id).unwrap();
        assert_eq!(view.state, JobState::Succeeded);
        assert_eq!(view.final_output.as_deref(), Some("result.txt"));
    }

    #[test]
    fn test_stale_success_report_changes_nothing() {
        let registry = JobRegistry::new(test_config());
        let (_, task_id) = single_job(&registry, "hashcat");

        registry.claim(&worker("w1")).unwrap();
        let outcome = registry.report_success(&worker("w2"), &task_id);
        assert_eq!(outcome, SuccessOutcome::Stale);
        assert_eq!(registry.task_state(&task_id), Some(TaskState::Assigned));
    }

    #[test]
    fn test_retries_exhaust_into_job_failure() {
        let registry = JobRegistry::new(RegistryConfig {
            retry_cooldown_ms: 0,
            ..test_config()
        });
        let (job_id, task_id) = single_job(&registry, "bogus");
        let w1 = worker("w1");

        for attempt in 1..=3 {
            registry.claim(&w1).unwrap();
            let outcome = registry.report_failure(
                &w1,
                &task_id,
                ErrorKind::PluginUnknown,
                "no descriptor for bogus".into(),
            );
            if attempt < 3 {
                assert_eq!(
                    outcome,
                    FailureOutcome::Requeued {
                        retry_count: attempt
                    }
                );
            } else {
                assert_eq!(outcome, FailureOutcome::JobFailed);
            }
        }

        let view = registry.job_view(&job_id).unwrap();
        assert_eq!(view.state, JobState::Failed);
        let error = view.last_error.unwrap();
        assert_eq!(error.kind, ErrorKind::PluginUnknown);
        assert!(error.detail.contains("bogus"));

        // Nothing left to dispatch.
        assert!(registry.claim(&worker("w2")).is_none());
    }

    #[test]
    fn test_output_missing_is_retried_once_then_terminal() {
        let registry = JobRegistry::new(RegistryConfig {
            retry_cooldown_ms: 0,
            ..test_config()
        });
        let (_, task_id) = single_job(&registry, "hashcat");
        let w1 = worker("w1");

        registry.claim(&w1).unwrap();
        let outcome =
            registry.report_failure(&w1, &task_id, ErrorKind::OutputMissing, "no result.txt".into());
        assert_eq!(outcome, FailureOutcome::Requeued { retry_count: 1 });

        registry.claim(&w1).unwrap();
        let outcome =
            registry.report_failure(&w1, &task_id, ErrorKind::OutputMissing, "no result.txt".into());
        assert_eq!(outcome, FailureOutcome::JobFailed);
    }

    // ============================================================
    // MAP -> REDUCE CHAINING
    // ============================================================

    #[test]
    fn test_reduce_spawns_after_last_map_with_shard_order() {
        let registry = JobRegistry::new(test_config());
        let (job_id, _) = map_reduce_job(&registry, 3);
        let w1 = worker("w1");

        // Complete all three map tasks; only the last one spawns the reduce.
        for i in 0..3 {
            let assignment = registry.claim(&w1).unwrap();
            let outcome = registry.report_success(&w1, &assignment.task_id);
            if i < 2 {
                assert_eq!(outcome, SuccessOutcome::Progress);
            } else {
                let SuccessOutcome::ReduceSpawned(_) = outcome else {
                    panic!("expected reduce task, got {:?}", outcome);
                };
            }
        }

        // The reduce task sees map outputs in ascending shard order.
        let reduce = registry.claim(&w1).unwrap();
        assert_eq!(reduce.kind, TaskKind::Reduce);
        assert_eq!(reduce.plugin_kind, "sort_reduce");
        assert_eq!(
            reduce.inputs,
            vec![
                map_output_name(0, "sorted.txt"),
                map_output_name(1, "sorted.txt"),
                map_output_name(2, "sorted.txt"),
            ]
        );
        assert_eq!(reduce.expected_outputs, vec!["final.txt"]);

        // Reduce success completes the job.
        let outcome = registry.report_success(&w1, &reduce.task_id);
        assert_eq!(
            outcome,
            SuccessOutcome::JobSucceeded {
                final_output: "final.txt".to_string()
            }
        );
        assert_eq!(registry.job_state(&job_id), Some(JobState::Succeeded));
    }

    // ============================================================
    // CANCELLATION
    // ============================================================

    #[test]
    fn test_cancel_rejects_claims_and_reassigns_holder() {
        let registry = JobRegistry::new(test_config());
        let (job_id, task_id) = single_job(&registry, "hashcat");
        let w1 = worker("w1");

        registry.claim(&w1).unwrap();
        registry.cancel_job(&job_id).unwrap();

        assert_eq!(registry.job_state(&job_id), Some(JobState::Cancelled));
        assert_eq!(
            registry.heartbeat(&w1, &task_id),
            HeartbeatStatus::Reassigned
        );
        assert_eq!(registry.report_success(&w1, &task_id), SuccessOutcome::Stale);
        assert!(registry.claim(&worker("w2")).is_none());

        // Cancelling twice is fine, cancelling a finished job is not.
        registry.cancel_job(&job_id).unwrap();
    }

    // ============================================================
    // SHARDING
    // ============================================================

    #[test]
    fn test_sharding_is_deterministic() {
        let data = b"one\ntwo\nthree\nfour\nfive\nsix\n";
        assert_eq!(shard_ranges(data, 4), shard_ranges(data, 4));
    }

    #[test]
    fn test_shards_cover_input_exactly() {
        let data = b"delta\nalpha\ncharlie\nbravo\necho\n";
        let ranges = shard_ranges(data, 4);
        assert_eq!(ranges.len(), 4);

        let total: usize = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(total, data.len());

        let mut rebuilt = Vec::new();
        for range in &ranges {
            rebuilt.extend_from_slice(&data[range.clone()]);
        }
        assert_eq!(rebuilt, data);
        // Trailing newline is preserved by the last shard.
        assert_eq!(rebuilt.last(), Some(&b'\n'));
    }

    #[test]
    fn test_no_line_straddles_two_shards() {
        let data = b"delta\nalpha\ncharlie\nbravo\necho\n";
        for range in shard_ranges(data, 4) {
            if !range.is_empty() {
                assert_eq!(data[range.end - 1], b'\n');
            }
        }
    }

    #[test]
    fn test_more_shards_than_lines_yields_empty_shards() {
        let data = b"alpha\n";
        let ranges = shard_ranges(data, 4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(&data[ranges[0].clone()], b"alpha\n");
        assert!(ranges[1..].iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_empty_input_shards() {
        let ranges = shard_ranges(b"", 3);
        assert_eq!(ranges.len(), 3);
        assert!(ranges.iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_shard_names_sort_by_index() {
        let names: Vec<String> = (0..12).map(shard_name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
