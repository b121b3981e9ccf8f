use super::*;
use std::time::Instant as StdInstant;

fn fast_config(worker_count: usize) -> PoolConfig {
    PoolConfig {
        worker_count,
        check_interval: Duration::from_millis(100),
        cpu_warn_threshold: 100.0,
        mem_warn_threshold: 100.0,
        terminate_grace: Duration::from_secs(2),
        settle_delay: Duration::from_millis(50),
    }
}

fn sleeper() -> WorkerSpec {
    WorkerSpec::new("sleeper", "/bin/sleep").with_args(["30"])
}

fn crasher(code: i32) -> WorkerSpec {
    WorkerSpec::new("crasher", "/bin/sh").with_args(["-c".to_string(), format!("exit {}", code)])
}

fn is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

fn kill_externally(pid: u32) {
    send_signal(pid, Signal::SIGKILL).unwrap();
}

#[tokio::test]
async fn test_new_rejects_invalid_config() {
    let result = ProcessSupervisor::new(fast_config(0), sleeper());
    assert!(matches!(result, Err(PoolError::ConfigValidationError(_))));

    let result = ProcessSupervisor::new(fast_config(1), WorkerSpec::default());
    assert!(matches!(result, Err(PoolError::MissingConfigField(_))));
}

#[tokio::test]
async fn test_start_pool_fills_every_slot() {
    let mut supervisor = ProcessSupervisor::new(fast_config(3), sleeper()).unwrap();
    assert!(!supervisor.is_running());
    assert!(supervisor.workers().is_empty());

    supervisor.start_pool().await.unwrap();

    assert!(supervisor.is_running());
    assert_eq!(supervisor.workers().len(), 3);
    for (index, worker) in supervisor.workers().iter().enumerate() {
        assert_eq!(worker.slot, index);
        assert!(matches!(
            worker.state,
            WorkerState::Starting | WorkerState::Running
        ));
        assert_eq!(worker.generation, 0);
        assert!(is_alive(worker.pid));
    }

    let mut pids = supervisor.pids();
    pids.sort_unstable();
    pids.dedup();
    assert_eq!(pids.len(), 3);

    supervisor.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_start_pool_twice_fails() {
    let mut supervisor = ProcessSupervisor::new(fast_config(1), sleeper()).unwrap();
    supervisor.start_pool().await.unwrap();
    let pids = supervisor.pids();

    let result = supervisor.start_pool().await;
    assert!(matches!(result, Err(PoolError::AlreadyRunning)));
    assert_eq!(supervisor.pids(), pids);

    supervisor.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_startup_failure_leaves_pool_stopped() {
    let spec = WorkerSpec::new("ghost", "/nonexistent/server");
    let mut supervisor = ProcessSupervisor::new(fast_config(2), spec).unwrap();

    match supervisor.start_pool().await {
        Err(PoolError::StartupFailure { slot, reason }) => {
            assert_eq!(slot, 0);
            assert!(reason.contains("does not exist"));
        }
        other => panic!("Expected StartupFailure, got {:?}", other),
    }

    assert!(!supervisor.is_running());
    assert!(supervisor.workers().is_empty());
}

#[tokio::test]
async fn test_crashed_worker_replaced_in_same_slot() {
    let mut supervisor = ProcessSupervisor::new(fast_config(3), sleeper()).unwrap();
    supervisor.start_pool().await.unwrap();
    let before = supervisor.pids();

    kill_externally(before[1]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = supervisor.check_workers().await;
    assert_eq!(report.replaced, vec![1]);
    assert_eq!(report.resource_warnings, 0);

    let after = supervisor.pids();
    assert_eq!(after.len(), 3);
    assert_eq!(after[0], before[0]);
    assert_eq!(after[2], before[2]);
    assert_ne!(after[1], before[1]);
    assert!(is_alive(after[1]));

    let replaced = supervisor.worker(1).unwrap();
    assert_eq!(replaced.slot, 1);
    assert_eq!(replaced.generation, 1);
    assert_eq!(replaced.state, WorkerState::Running);
    assert_eq!(replaced.last_exit_code, Some(-9));

    supervisor.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_exit_code_carried_into_replacement() {
    let mut supervisor = ProcessSupervisor::new(fast_config(1), crasher(3)).unwrap();
    supervisor.start_pool().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let report = supervisor.check_workers().await;
    assert_eq!(report.replaced, vec![0]);
    assert_eq!(supervisor.worker(0).unwrap().last_exit_code, Some(3));

    supervisor.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_crash_loop_gets_one_replacement_per_exit() {
    let mut config = fast_config(1);
    config.settle_delay = Duration::ZERO;
    let mut supervisor = ProcessSupervisor::new(config, crasher(1)).unwrap();
    supervisor.start_pool().await.unwrap();

    for expected_generation in 1..=3 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let report = supervisor.check_workers().await;
        assert_eq!(report.replaced, vec![0]);
        assert_eq!(supervisor.worker(0).unwrap().generation, expected_generation);
    }

    assert_eq!(supervisor.workers().len(), 1);
    supervisor.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_healthy_workers_are_left_alone() {
    let mut supervisor = ProcessSupervisor::new(fast_config(2), sleeper()).unwrap();
    supervisor.start_pool().await.unwrap();
    let before = supervisor.pids();

    let report = supervisor.check_workers().await;
    assert_eq!(report, CycleReport::default());
    assert_eq!(supervisor.pids(), before);

    supervisor.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_resource_warning_never_restarts() {
    let mut config = fast_config(2);
    config.mem_warn_threshold = 0.000_001;
    let mut supervisor = ProcessSupervisor::new(config, sleeper()).unwrap();
    supervisor.start_pool().await.unwrap();
    let before = supervisor.pids();

    for _ in 0..2 {
        let report = supervisor.check_workers().await;
        assert_eq!(report.resource_warnings, 2);
        assert!(report.replaced.is_empty());
        assert_eq!(supervisor.pids(), before);
    }

    supervisor.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_monitor_loop_replaces_within_interval() {
    let mut supervisor = ProcessSupervisor::new(fast_config(3), sleeper()).unwrap();
    supervisor.start_pool().await.unwrap();
    let before = supervisor.pids();
    let shutdown = supervisor.shutdown_handle();

    let task = tokio::spawn(async move {
        supervisor.monitor_loop().await;
        supervisor
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    kill_externally(before[1]);

    // One check interval plus the settle delay, with slack for a slow host
    tokio::time::sleep(Duration::from_millis(600)).await;
    shutdown.request_stop();

    let mut supervisor = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("monitor loop should stop promptly")
        .unwrap();

    let after = supervisor.pids();
    assert_eq!(after.len(), 3);
    assert_eq!(after[0], before[0]);
    assert_eq!(after[2], before[2]);
    assert_ne!(after[1], before[1]);

    supervisor.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_stop_interrupts_settle_delay() {
    let mut config = fast_config(1);
    config.settle_delay = Duration::from_secs(30);
    let mut supervisor = ProcessSupervisor::new(config, sleeper()).unwrap();
    supervisor.start_pool().await.unwrap();
    let pid = supervisor.pids()[0];
    let shutdown = supervisor.shutdown_handle();

    kill_externally(pid);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let task = tokio::spawn(async move {
        supervisor.monitor_loop().await;
        supervisor
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.request_stop();

    let mut supervisor = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("settle delay should be interruptible")
        .unwrap();

    let worker = supervisor.worker(0).unwrap();
    assert_eq!(worker.state, WorkerState::Exited);
    assert_eq!(worker.pid, pid);

    let report = supervisor.stop_all().await.unwrap();
    assert_eq!(report.already_exited, 1);
    assert!(supervisor.workers().is_empty());
}

#[tokio::test]
async fn test_stop_all_terminates_every_worker() {
    let mut supervisor = ProcessSupervisor::new(fast_config(3), sleeper()).unwrap();
    supervisor.start_pool().await.unwrap();
    let pids = supervisor.pids();

    let report = supervisor.stop_all().await.unwrap();

    assert_eq!(report.terminated, 3);
    assert_eq!(report.killed, 0);
    assert!(!supervisor.is_running());
    assert!(supervisor.workers().is_empty());
    for pid in pids {
        assert!(!is_alive(pid), "pid {} survived shutdown", pid);
    }
}

#[tokio::test]
async fn test_stop_all_is_idempotent() {
    let mut supervisor = ProcessSupervisor::new(fast_config(2), sleeper()).unwrap();
    supervisor.start_pool().await.unwrap();

    let first = supervisor.stop_all().await.unwrap();
    assert_eq!(first.terminated, 2);

    let second = supervisor.stop_all().await.unwrap();
    assert_eq!(second, ShutdownReport::default());
    assert!(!supervisor.is_running());
}

#[tokio::test]
async fn test_stop_all_before_start_is_noop() {
    let mut supervisor = ProcessSupervisor::new(fast_config(2), sleeper()).unwrap();
    let report = supervisor.stop_all().await.unwrap();
    assert_eq!(report, ShutdownReport::default());
}

#[tokio::test]
async fn test_stop_all_kills_worker_ignoring_sigterm() {
    let mut config = fast_config(1);
    config.terminate_grace = Duration::from_millis(300);
    let spec = WorkerSpec::new("stubborn", "/bin/sh")
        .with_args(["-c", "trap '' TERM; while true; do sleep 0.1; done"]);
    let mut supervisor = ProcessSupervisor::new(config, spec).unwrap();
    supervisor.start_pool().await.unwrap();
    let pid = supervisor.pids()[0];

    // Give the shell time to install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = StdInstant::now();
    let report = supervisor.stop_all().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.killed, 1);
    assert_eq!(report.terminated, 0);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
    assert!(!is_alive(pid));
}

#[tokio::test]
async fn test_stop_all_counts_already_dead_workers() {
    let mut supervisor = ProcessSupervisor::new(fast_config(2), sleeper()).unwrap();
    supervisor.start_pool().await.unwrap();
    let pids = supervisor.pids();

    kill_externally(pids[0]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = supervisor.stop_all().await.unwrap();
    assert_eq!(report.already_exited, 1);
    assert_eq!(report.terminated, 1);
}

#[tokio::test]
async fn test_run_until_stop_requested() {
    let mut supervisor = ProcessSupervisor::new(fast_config(2), sleeper()).unwrap();
    let shutdown = supervisor.shutdown_handle();

    let task = tokio::spawn(async move {
        let result = supervisor.run().await;
        (result, supervisor)
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(shutdown.request_stop());
    assert!(!shutdown.request_stop());

    let (result, supervisor) = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("run should return after stop request")
        .unwrap();

    let report = result.unwrap();
    assert_eq!(report.terminated, 2);
    assert!(!supervisor.is_running());
    assert!(supervisor.workers().is_empty());
}

fn forking_worker(dir: &std::path::Path, tail: &str) -> WorkerSpec {
    let mut spec = WorkerSpec::new("forker", "/bin/sh").with_args([
        "-c".to_string(),
        format!("sleep 30 & echo $! > child.pid; {}", tail),
    ]);
    spec.cwd = Some(dir.to_path_buf());
    spec
}

async fn read_child_pid(dir: &std::path::Path) -> u32 {
    let path = dir.join("child.pid");
    for _ in 0..50 {
        if let Ok(contents) = std::fs::read_to_string(&path) {
            if let Ok(pid) = contents.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("worker never wrote {}", path.display());
}

/// Killed processes linger as zombies until init reaps them, so count those as gone
async fn wait_until_gone(pid: u32) -> bool {
    let mut sampler = ResourceSampler::new();
    for _ in 0..50 {
        if sampler.sample(pid).is_err() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_stop_all_kills_processes_forked_by_workers() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let mut config = fast_config(1);
    config.terminate_grace = Duration::from_millis(300);
    let spec = forking_worker(temp_dir.path(), "wait");

    let mut supervisor = ProcessSupervisor::new(config, spec).unwrap();
    supervisor.start_pool().await.unwrap();
    let child = read_child_pid(temp_dir.path()).await;
    assert!(is_alive(child));

    supervisor.stop_all().await.unwrap();

    assert!(wait_until_gone(child).await, "pid {} outlived its worker", child);
}

#[tokio::test]
async fn test_exited_worker_leaves_no_processes_behind() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let spec = forking_worker(temp_dir.path(), "exit 1");

    let mut supervisor = ProcessSupervisor::new(fast_config(1), spec).unwrap();
    supervisor.start_pool().await.unwrap();
    let child = read_child_pid(temp_dir.path()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = supervisor.check_workers().await;
    assert_eq!(report.replaced, vec![0]);
    assert!(wait_until_gone(child).await, "pid {} outlived its worker", child);

    supervisor.stop_all().await.unwrap();
}
