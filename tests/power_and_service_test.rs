use animals_detector::app::{PowerAction, PowerScheduler, ServiceInstaller};
use animals_detector::config::toml_config::ServiceConfig;
use animals_detector::domain::model::CommandOutput;
use animals_detector::domain::ports::CommandRunner;
use animals_detector::{AppConfig, DetectorError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

type Call = (String, Vec<String>);

/// 依指令回傳預先設定的結果並記錄呼叫順序
#[derive(Default)]
struct MockRunner {
    responses: HashMap<String, CommandOutput>,
    broken: Vec<String>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockRunner {
    fn respond(mut self, key: &str, status: i32, stdout: &str) -> Self {
        self.responses.insert(
            key.to_string(),
            CommandOutput {
                status: Some(status),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
        self
    }

    fn broken(mut self, program: &str) -> Self {
        self.broken.push(program.to_string());
        self
    }

    async fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|(program, args)| format!("{} {}", program, args.join(" ")))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.calls
            .lock()
            .await
            .push((program.to_string(), args.to_vec()));

        if self.broken.iter().any(|p| p == program) {
            return Err(DetectorError::CommandError {
                command: program.to_string(),
                message: "No such file or directory".to_string(),
            });
        }

        // 先找 "program first-arg"，再找 program
        let specific = args
            .first()
            .map(|first| format!("{} {}", program, first))
            .and_then(|key| self.responses.get(&key));
        Ok(specific
            .or_else(|| self.responses.get(program))
            .cloned()
            .unwrap_or(CommandOutput {
                status: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            }))
    }
}

fn installer(runner: Arc<MockRunner>, unit_dir: &TempDir) -> ServiceInstaller {
    ServiceInstaller::new(
        runner,
        ServiceConfig::default(),
        "/usr/local/bin/animals-detector",
        "/opt/animals/config.toml",
    )
    .with_unit_dir(unit_dir.path())
}

#[tokio::test]
async fn test_install_as_non_root_makes_no_changes() {
    let unit_dir = TempDir::new().unwrap();
    let runner = Arc::new(MockRunner::default().respond("id", 0, "1000\n"));

    let result = installer(runner.clone(), &unit_dir).install().await;

    match result {
        Err(e @ DetectorError::PermissionError { .. }) => {
            assert_eq!(e.user_friendly_message(), "Please run as root");
            assert_eq!(e.exit_code(), 1);
        }
        other => panic!("expected permission error, got {:?}", other),
    }
    assert_eq!(runner.calls().await, vec!["id -u".to_string()]);
    assert_eq!(std::fs::read_dir(unit_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_install_as_root_writes_unit_and_starts_service() {
    let unit_dir = TempDir::new().unwrap();
    let runner = Arc::new(
        MockRunner::default()
            .respond("id", 0, "0\n")
            .respond("systemctl status", 0, "● animals-detector.service - active (running)"),
    );

    let status = installer(runner.clone(), &unit_dir).install().await.unwrap();

    assert!(status.contains("active (running)"));
    assert_eq!(
        runner.calls().await,
        vec![
            "id -u",
            "systemctl daemon-reload",
            "systemctl enable animals-detector.service",
            "systemctl start animals-detector.service",
            "systemctl status animals-detector.service --no-pager",
        ]
    );

    let unit_path = unit_dir.path().join("animals-detector.service");
    let unit = std::fs::read_to_string(&unit_path).unwrap();
    assert!(unit.contains("ExecStart=/usr/local/bin/animals-detector run --config /opt/animals/config.toml --log-json"));
    assert!(unit.contains("RestartSec=10"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&unit_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}

#[tokio::test]
async fn test_install_stops_at_failing_systemctl_step() {
    let unit_dir = TempDir::new().unwrap();
    let runner = Arc::new(
        MockRunner::default()
            .respond("id", 0, "0")
            .respond("systemctl enable", 1, ""),
    );

    let result = installer(runner.clone(), &unit_dir).install().await;

    assert!(matches!(result, Err(DetectorError::CommandError { .. })));
    let calls = runner.calls().await;
    assert_eq!(calls.last().map(String::as_str), Some("systemctl enable animals-detector.service"));
    assert!(!calls.iter().any(|c| c.starts_with("systemctl start")));
}

fn scheduler(runner: Arc<MockRunner>, dir: &TempDir) -> PowerScheduler {
    let mut config = AppConfig::default();
    config.power.log_file = dir.path().join("power-schedule.log").to_str().unwrap().to_string();
    PowerScheduler::from_config(runner, &config).unwrap()
}

fn log_lines(dir: &TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("power-schedule.log"))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_wake_success_appends_one_line() {
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(MockRunner::default().respond("rtcwake", 0, ""));
    let scheduler = scheduler(runner.clone(), &dir);
    let date = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();

    let outcome = scheduler.wake_on(date).await.unwrap();

    assert!(outcome.success);
    assert_eq!(
        runner.calls().await,
        vec![format!("rtcwake -m mem -t {}", outcome.epoch)]
    );
    let pattern =
        Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2} - Successfully scheduled wake at 21:30:00$").unwrap();
    let lines = log_lines(&dir);
    assert_eq!(lines.len(), 1);
    assert!(pattern.is_match(&lines[0]), "unexpected line {:?}", lines[0]);
    assert_eq!(lines[0], outcome.log_line);
}

#[tokio::test]
async fn test_wake_failure_is_logged() {
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(MockRunner::default().respond("rtcwake", 1, ""));
    let scheduler = scheduler(runner, &dir);

    let outcome = scheduler.wake().await.unwrap();

    assert!(!outcome.success);
    let lines = log_lines(&dir);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with(" - Failed to schedule wake at 21:30:00"));
}

#[tokio::test]
async fn test_wake_with_missing_rtcwake_still_logs_once() {
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(MockRunner::default().broken("rtcwake"));
    let scheduler = scheduler(runner, &dir);

    let first = scheduler.wake().await.unwrap();
    let second = scheduler.wake().await.unwrap();

    assert!(!first.success && !second.success);
    assert_eq!(log_lines(&dir).len(), 2);
}

#[tokio::test]
async fn test_suspend_failure_is_command_error() {
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(MockRunner::default().respond("systemctl suspend", 1, ""));
    let scheduler = scheduler(runner, &dir);

    let result = scheduler.suspend().await;

    assert!(matches!(result, Err(DetectorError::CommandError { .. })));
    assert!(!dir.path().join("power-schedule.log").exists());
}

#[test]
fn test_power_action_rejects_unknown_arguments() {
    assert_eq!(PowerAction::parse(Some("suspend")), Some(PowerAction::Suspend));
    assert_eq!(PowerAction::parse(Some("hibernate")), None);
    assert_eq!(PowerAction::parse(None), None);
}
