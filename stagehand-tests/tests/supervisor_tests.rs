//! End-to-end tests for the supervisor event loop:
//! - termination stops every managed process
//! - a burst of writes to a bound binary restarts the service exactly once
//! - unexpected exits are handled according to the restart flags

use stagehand_daemon::process::process_exists;
use stagehand_daemon::Supervisor;
use stagehand_tests::{
    init_test_logging, wait_for_launches, wait_for_running, wait_for_stopped, write_script,
    MarkerFileHelper, TestConfigBuilder, TestServiceBuilder,
};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Run the supervisor on its own task; sending on the returned channel shuts it down
fn spawn_supervisor(mut supervisor: Supervisor) -> (oneshot::Sender<()>, JoinHandle<Supervisor>) {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        supervisor
            .run(async move {
                let _ = shutdown_rx.await;
            })
            .await;
        supervisor
    });
    (shutdown_tx, handle)
}

/// Script body that records its pid then stays up until signaled
fn recording_long_runner(markers: &MarkerFileHelper, name: &str) -> String {
    format!("{}\nexec sleep 3600", markers.record_pid_line(name))
}

/// Rewrite `name` several times in quick succession, like a build would
async fn write_burst(dir: &Path, name: &str, body: &str, writes: usize) {
    for i in 0..writes {
        write_script(dir, name, &format!("{}\n# build {}", body, i)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn test_shutdown_stops_managed_process() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let markers = MarkerFileHelper::new(temp_dir.path());

    let config = TestConfigBuilder::new(temp_dir.path())
        .add_service(
            TestServiceBuilder::script(
                temp_dir.path(),
                "api",
                &recording_long_runner(&markers, "api"),
            )
            .build(),
        )
        .build();

    let supervisor = Supervisor::new(config);
    let probe = supervisor.probe("api").unwrap();
    assert!(!probe.is_running(), "instances start stopped until run");

    let (shutdown, handle) = spawn_supervisor(supervisor);

    wait_for_running(&probe, TIMEOUT).await.unwrap();
    assert!(markers.wait_for_marker_lines("api", 1, TIMEOUT).await);
    let pid = markers.recorded_pids("api")[0];
    assert_eq!(probe.pid(), Some(pid));

    shutdown.send(()).unwrap();
    let supervisor = handle.await.unwrap();

    assert!(!probe.is_running());
    assert!(!process_exists(pid));
    assert_eq!(probe.launches(), 1);
    assert!(supervisor.instances().iter().all(|i| !i.is_running()));
}

#[tokio::test]
async fn test_binary_change_burst_restarts_once() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let markers = MarkerFileHelper::new(temp_dir.path());
    let body = recording_long_runner(&markers, "api");

    let service = TestServiceBuilder::script(temp_dir.path(), "api", &body)
        .restart_on_change()
        .build();
    let binary = service.binary_path.clone();
    let config = TestConfigBuilder::new(temp_dir.path())
        .with_grace_period(Duration::from_secs(1))
        .add_service(service)
        .build();

    let supervisor = Supervisor::new(config);
    let probe = supervisor.probe("api").unwrap();
    let (shutdown, handle) = spawn_supervisor(supervisor);

    wait_for_running(&probe, TIMEOUT).await.unwrap();
    assert!(markers.wait_for_marker_lines("api", 1, TIMEOUT).await);

    write_burst(temp_dir.path(), "api", &body, 5).await;

    wait_for_launches(&probe, 2, TIMEOUT).await.unwrap();
    assert!(markers.wait_for_marker_lines("api", 2, TIMEOUT).await);

    // Well past the quiet period: no second restart for the same burst
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(probe.launches(), 2);
    assert_eq!(markers.count_marker_lines("api"), 2);

    let pids = markers.recorded_pids("api");
    assert_ne!(pids[0], pids[1]);
    assert!(!process_exists(pids[0]), "old process was stopped");
    assert_eq!(probe.pid(), Some(pids[1]));

    shutdown.send(()).unwrap();
    let supervisor = handle.await.unwrap();
    assert_eq!(supervisor.bound_service(&binary), Some("api"));
}

#[tokio::test]
async fn test_change_restart_is_not_reported_as_unexpected_exit() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let markers = MarkerFileHelper::new(temp_dir.path());
    let body = recording_long_runner(&markers, "api");

    let config = TestConfigBuilder::new(temp_dir.path())
        .with_grace_period(Duration::from_secs(1))
        .add_service(
            TestServiceBuilder::script(temp_dir.path(), "api", &body)
                .restart_on_change()
                .restart_on_exit()
                .build(),
        )
        .build();

    let supervisor = Supervisor::new(config);
    let probe = supervisor.probe("api").unwrap();
    let (shutdown, handle) = spawn_supervisor(supervisor);

    wait_for_running(&probe, TIMEOUT).await.unwrap();
    write_burst(temp_dir.path(), "api", &body, 2).await;
    wait_for_launches(&probe, 2, TIMEOUT).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(probe.launches(), 2);
    assert!(probe.is_running());

    shutdown.send(()).unwrap();
    handle.await.unwrap();
    assert_eq!(probe.launches(), 2, "shutdown does not trigger on_exit");
}

#[tokio::test]
async fn test_unbound_service_ignores_binary_changes() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let markers = MarkerFileHelper::new(temp_dir.path());
    let body = recording_long_runner(&markers, "api");

    let service = TestServiceBuilder::script(temp_dir.path(), "api", &body).build();
    let binary = service.binary_path.clone();
    let config = TestConfigBuilder::new(temp_dir.path())
        .add_service(service)
        .build();

    let supervisor = Supervisor::new(config);
    let probe = supervisor.probe("api").unwrap();
    let (shutdown, handle) = spawn_supervisor(supervisor);

    wait_for_running(&probe, TIMEOUT).await.unwrap();
    write_burst(temp_dir.path(), "api", &body, 3).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(probe.launches(), 1);

    shutdown.send(()).unwrap();
    let supervisor = handle.await.unwrap();
    assert_eq!(supervisor.bound_service(&binary), None);
}

#[tokio::test]
async fn test_failing_service_restarts_on_error() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let markers = MarkerFileHelper::new(temp_dir.path());

    let config = TestConfigBuilder::new(temp_dir.path())
        .add_service(
            TestServiceBuilder::script(
                temp_dir.path(),
                "flaky",
                &format!("{}\nexit 3", markers.record_pid_line("flaky")),
            )
            .restart_on_error()
            .build(),
        )
        .build();

    let supervisor = Supervisor::new(config);
    let probe = supervisor.probe("flaky").unwrap();
    let (shutdown, handle) = spawn_supervisor(supervisor);

    wait_for_launches(&probe, 3, TIMEOUT).await.unwrap();
    assert!(markers.wait_for_marker_lines("flaky", 3, TIMEOUT).await);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
    assert!(!probe.is_running());
}

#[tokio::test]
async fn test_clean_exit_is_not_an_error() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let markers = MarkerFileHelper::new(temp_dir.path());

    let config = TestConfigBuilder::new(temp_dir.path())
        .add_service(
            TestServiceBuilder::script(
                temp_dir.path(),
                "job",
                &format!("{}\nexit 0", markers.record_pid_line("job")),
            )
            .restart_on_error()
            .build(),
        )
        .build();

    let supervisor = Supervisor::new(config);
    let probe = supervisor.probe("job").unwrap();
    let (shutdown, handle) = spawn_supervisor(supervisor);

    assert!(markers.wait_for_marker_lines("job", 1, TIMEOUT).await);
    wait_for_stopped(&probe, TIMEOUT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(probe.launches(), 1);
    assert!(!probe.is_running());

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_clean_exit_restarts_on_exit() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let markers = MarkerFileHelper::new(temp_dir.path());

    let config = TestConfigBuilder::new(temp_dir.path())
        .add_service(
            TestServiceBuilder::script(
                temp_dir.path(),
                "job",
                &format!("{}\nexit 0", markers.record_pid_line("job")),
            )
            .restart_on_exit()
            .build(),
        )
        .build();

    let supervisor = Supervisor::new(config);
    let probe = supervisor.probe("job").unwrap();
    let (shutdown, handle) = spawn_supervisor(supervisor);

    wait_for_launches(&probe, 2, TIMEOUT).await.unwrap();
    assert!(markers.wait_for_marker_lines("job", 2, TIMEOUT).await);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_service_without_restart_flags_stays_down() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();

    let config = TestConfigBuilder::new(temp_dir.path())
        .add_service(TestServiceBuilder::script(temp_dir.path(), "job", "exit 1").build())
        .build();

    let supervisor = Supervisor::new(config);
    let probe = supervisor.probe("job").unwrap();
    let (shutdown, handle) = spawn_supervisor(supervisor);

    wait_for_launches(&probe, 1, TIMEOUT).await.unwrap();
    wait_for_stopped(&probe, TIMEOUT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(probe.launches(), 1);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_failed_start_does_not_block_other_services() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();

    let config = TestConfigBuilder::new(temp_dir.path())
        .add_service(
            TestServiceBuilder::long_running(temp_dir.path(), "broken")
                .with_command("/definitely/not/here {binary}")
                .build(),
        )
        .add_service(TestServiceBuilder::long_running(temp_dir.path(), "api").build())
        .build();

    let supervisor = Supervisor::new(config);
    let broken = supervisor.probe("broken").unwrap();
    let api = supervisor.probe("api").unwrap();
    let (shutdown, handle) = spawn_supervisor(supervisor);

    wait_for_running(&api, TIMEOUT).await.unwrap();
    assert!(!broken.is_running());
    assert_eq!(broken.launches(), 0);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
    assert!(!api.is_running());
}

#[tokio::test]
async fn test_shutdown_keeps_current_artifacts() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();

    let config = TestConfigBuilder::new(temp_dir.path())
        .add_service(TestServiceBuilder::long_running(temp_dir.path(), "a").build())
        .add_service(TestServiceBuilder::long_running(temp_dir.path(), "b").build())
        .build();
    let binaries = config.storage.binaries.clone();

    let supervisor = Supervisor::new(config);
    let a = supervisor.probe("a").unwrap();
    let b = supervisor.probe("b").unwrap();
    let (shutdown, handle) = spawn_supervisor(supervisor);

    wait_for_running(&a, TIMEOUT).await.unwrap();
    wait_for_running(&b, TIMEOUT).await.unwrap();

    shutdown.send(()).unwrap();
    let supervisor = handle.await.unwrap();

    let mut staged: Vec<String> = std::fs::read_dir(&binaries)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    staged.sort();
    assert_eq!(staged.len(), 2);
    assert!(staged[0].starts_with("a-") && staged[1].starts_with("b-"));

    for instance in supervisor.instances() {
        assert!(instance.artifact().is_some_and(Path::exists));
    }
}
