//! Tests for a single service instance outside the supervisor:
//! - stop escalation from SIGTERM to SIGKILL
//! - launch environment, working directory and command template
//! - per-service log files

use stagehand_daemon::ServiceInstance;
use stagehand_tests::{
    init_test_logging, wait_for_stopped, MarkerFileHelper, TestConfigBuilder, TestServiceBuilder,
};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(5);

fn instance(temp_dir: &TempDir, builder: TestServiceBuilder, grace: Duration) -> ServiceInstance {
    let config = TestConfigBuilder::new(temp_dir.path())
        .with_grace_period(grace)
        .add_service(builder.build())
        .build();
    let spec = config.services.into_iter().next().unwrap();
    ServiceInstance::new(spec, config.storage.binaries, config.grace_period)
}

#[tokio::test]
async fn test_stop_escalates_after_grace_period() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let markers = MarkerFileHelper::new(temp_dir.path());
    let body = format!(
        "trap '' TERM\n{}\nwhile true; do sleep 0.1; done",
        markers.record_pid_line("stubborn")
    );
    let grace = Duration::from_secs(1);
    let mut instance = instance(
        &temp_dir,
        TestServiceBuilder::script(temp_dir.path(), "stubborn", &body),
        grace,
    );

    instance.start().await.unwrap();
    // The trap is installed once the pid is recorded
    assert!(markers.wait_for_marker("stubborn", TIMEOUT).await);

    let started = Instant::now();
    instance.stop().await;
    let elapsed = started.elapsed();

    assert!(!instance.is_running());
    assert!(elapsed >= grace, "escalated too early: {:?}", elapsed);
    assert!(
        elapsed < grace + Duration::from_millis(1500),
        "escalated too late: {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_cooperative_process_stops_before_grace_period() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let mut instance = instance(
        &temp_dir,
        TestServiceBuilder::long_running(temp_dir.path(), "polite"),
        Duration::from_secs(3),
    );

    instance.start().await.unwrap();
    let started = Instant::now();
    instance.stop().await;

    assert!(!instance.is_running());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_environment_and_working_dir_are_applied() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let markers = MarkerFileHelper::new(temp_dir.path());
    let work_dir = temp_dir.path().join("work");
    std::fs::create_dir(&work_dir).unwrap();

    let out = markers.marker_path("env");
    let body = format!(
        "echo \"$GREETING\" > {0}\npwd >> {0}\nexec sleep 3600",
        out.display()
    );
    let mut instance = instance(
        &temp_dir,
        TestServiceBuilder::script(temp_dir.path(), "envy", &body)
            .with_env("GREETING", "hello")
            .with_working_dir(&work_dir),
        Duration::from_secs(1),
    );

    instance.start().await.unwrap();
    assert!(markers.wait_for_marker_lines("env", 2, TIMEOUT).await);

    let content = markers.read_marker("env").unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "hello");
    assert_eq!(
        std::fs::canonicalize(lines[1]).unwrap(),
        std::fs::canonicalize(&work_dir).unwrap()
    );

    instance.stop().await;
}

#[tokio::test]
async fn test_command_template_passes_arguments() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let markers = MarkerFileHelper::new(temp_dir.path());
    let body = format!(
        "echo \"$0 $@\" > {}\nexec sleep 3600",
        markers.marker_path("args").display()
    );
    let mut instance = instance(
        &temp_dir,
        TestServiceBuilder::script(temp_dir.path(), "api", &body)
            .with_command("{binary}  --port   8080"),
        Duration::from_secs(1),
    );

    instance.start().await.unwrap();
    assert!(markers.wait_for_marker_lines("args", 1, TIMEOUT).await);

    let artifact = instance.artifact().unwrap().to_path_buf();
    assert_eq!(
        markers.read_marker("args").unwrap().trim(),
        format!("{} --port 8080", artifact.display())
    );

    instance.stop().await;
}

#[tokio::test]
async fn test_output_goes_to_date_expanded_log_files() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let logs = temp_dir.path().join("logs");
    std::fs::create_dir(&logs).unwrap();

    let mut instance = instance(
        &temp_dir,
        TestServiceBuilder::script(
            temp_dir.path(),
            "chatty",
            "echo to-stdout\necho to-stderr >&2\nexec sleep 3600",
        )
        .with_stdout_log(&logs.join("out-{%Y}.log"))
        .with_stderr_log(&logs.join("err.log")),
        Duration::from_secs(1),
    );

    instance.start().await.unwrap();

    let year = chrono::Local::now().format("%Y").to_string();
    let stdout_log = logs.join(format!("out-{}.log", year));
    let stderr_log = logs.join("err.log");

    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline
        && !(std::fs::read_to_string(&stdout_log).is_ok_and(|c| c.contains("to-stdout"))
            && std::fs::read_to_string(&stderr_log).is_ok_and(|c| c.contains("to-stderr")))
    {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(std::fs::read_to_string(&stdout_log).unwrap().contains("to-stdout"));
    assert!(std::fs::read_to_string(&stderr_log).unwrap().contains("to-stderr"));

    instance.stop().await;
}

#[tokio::test]
async fn test_unopenable_log_falls_back_and_still_starts() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let mut instance = instance(
        &temp_dir,
        TestServiceBuilder::long_running(temp_dir.path(), "api")
            .with_stdout_log(&temp_dir.path().join("gone/out.log")),
        Duration::from_secs(1),
    );

    instance.start().await.unwrap();
    assert!(instance.is_running());

    instance.stop().await;
}

#[tokio::test]
async fn test_exited_process_clears_running_flag() {
    init_test_logging();
    let temp_dir = TempDir::new().unwrap();
    let mut instance = instance(
        &temp_dir,
        TestServiceBuilder::script(temp_dir.path(), "job", "exit 2"),
        Duration::from_secs(1),
    );

    instance.start().await.unwrap();
    let probe = instance.probe();
    wait_for_stopped(&probe, TIMEOUT).await.unwrap();

    assert_eq!(probe.launches(), 1);
    // A later start works again with a fresh artifact
    let first = instance.artifact().unwrap().to_path_buf();
    instance.start().await.unwrap();
    assert_ne!(instance.artifact().unwrap(), first);
    assert_eq!(probe.launches(), 2);

    // The relaunch exits on its own too; let it finish before the temp dir goes away
    wait_for_stopped(&probe, TIMEOUT).await.unwrap();
    assert!(!instance.is_running());
    assert!(!first.exists(), "the earlier artifact was discarded on relaunch");
}
