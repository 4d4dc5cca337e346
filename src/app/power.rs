use crate::config::toml_config::AppConfig;
use crate::domain::model::CommandOutput;
use crate::domain::ports::CommandRunner;
use crate::utils::error::{DetectorError, Result};
use chrono::{Local, NaiveDate, NaiveTime, TimeZone};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

pub const USAGE: &str = "Usage: animals-detector power [suspend|wake]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Suspend,
    Wake,
}

impl PowerAction {
    /// 缺少或無法辨識的參數回傳 `None`
    pub fn parse(arg: Option<&str>) -> Option<Self> {
        match arg? {
            "suspend" => Some(Self::Suspend),
            "wake" => Some(Self::Wake),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeOutcome {
    pub epoch: i64,
    pub success: bool,
    pub log_line: String,
}

pub struct PowerScheduler {
    runner: Arc<dyn CommandRunner>,
    wake_time: NaiveTime,
    log_file: PathBuf,
}

impl PowerScheduler {
    pub fn new(runner: Arc<dyn CommandRunner>, wake_time: NaiveTime, log_file: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            wake_time,
            log_file: log_file.into(),
        }
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &AppConfig) -> Result<Self> {
        Ok(Self::new(runner, config.wake_time()?, &config.power.log_file))
    }

    pub async fn suspend(&self) -> Result<CommandOutput> {
        tracing::info!("Suspending system");
        let output = self
            .runner
            .run("systemctl", &["suspend".to_string()])
            .await?;
        if !output.success() {
            return Err(DetectorError::CommandError {
                command: "systemctl suspend".to_string(),
                message: format!("exit status {:?}: {}", output.status, output.stderr.trim()),
            });
        }
        Ok(output)
    }

    /// 指定日期的喚醒時間 (本地時區) 轉成 Unix epoch
    pub fn wake_epoch(&self, date: NaiveDate) -> Result<i64> {
        let naive = date.and_time(self.wake_time);
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.timestamp())
            .ok_or_else(|| DetectorError::ConfigValidationError {
                field: "power.wake_time".to_string(),
                message: format!("{} does not exist in the local timezone", naive),
            })
    }

    pub async fn wake(&self) -> Result<WakeOutcome> {
        self.wake_on(Local::now().date_naive()).await
    }

    /// 執行 `rtcwake -m mem -t <epoch>` 並在記錄檔追加一行結果
    pub async fn wake_on(&self, date: NaiveDate) -> Result<WakeOutcome> {
        let epoch = self.wake_epoch(date)?;
        let args = ["-m", "mem", "-t"]
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once(epoch.to_string()))
            .collect::<Vec<_>>();

        // rtcwake 會阻塞到機器喚醒為止
        let success = match self.runner.run("rtcwake", &args).await {
            Ok(output) => output.success(),
            Err(e) => {
                tracing::error!("Could not run rtcwake: {}", e);
                false
            }
        };

        let wake_at = self.wake_time.format("%H:%M:%S");
        let message = if success {
            format!("Successfully scheduled wake at {}", wake_at)
        } else {
            format!("Failed to schedule wake at {}", wake_at)
        };
        let log_line = format!("{} - {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message);
        self.append_log(&log_line)?;

        if success {
            tracing::info!("{}", message);
        } else {
            tracing::error!("{}", message);
        }

        Ok(WakeOutcome {
            epoch,
            success,
            log_line,
        })
    }

    fn append_log(&self, line: &str) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Datelike, Timelike};
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    struct ScriptedRunner {
        status: i32,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
            self.calls
                .lock()
                .await
                .push((program.to_string(), args.to_vec()));
            Ok(CommandOutput {
                status: Some(self.status),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    fn scheduler(dir: &TempDir, status: i32) -> (PowerScheduler, Arc<ScriptedRunner>) {
        let runner = Arc::new(ScriptedRunner {
            status,
            calls: Mutex::new(Vec::new()),
        });
        let scheduler = PowerScheduler::new(
            runner.clone(),
            NaiveTime::from_hms_opt(21, 30, 0).unwrap(),
            dir.path().join("power-schedule.log"),
        );
        (scheduler, runner)
    }

    #[test]
    fn test_parse_action() {
        assert_eq!(PowerAction::parse(Some("suspend")), Some(PowerAction::Suspend));
        assert_eq!(PowerAction::parse(Some("wake")), Some(PowerAction::Wake));
        assert_eq!(PowerAction::parse(Some("WAKE")), None);
        assert_eq!(PowerAction::parse(None), None);
    }

    #[test]
    fn test_wake_epoch_is_today_at_wake_time() {
        let dir = TempDir::new().unwrap();
        let (scheduler, _) = scheduler(&dir, 0);
        let date = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();

        let epoch = scheduler.wake_epoch(date).unwrap();
        let back = Local.timestamp_opt(epoch, 0).unwrap();

        assert_eq!(back.date_naive().day(), 17);
        assert_eq!((back.hour(), back.minute(), back.second()), (21, 30, 0));
    }

    #[tokio::test]
    async fn test_suspend_calls_systemctl() {
        let dir = TempDir::new().unwrap();
        let (scheduler, runner) = scheduler(&dir, 0);
        scheduler.suspend().await.unwrap();
        let calls = runner.calls.lock().await;
        assert_eq!(calls.as_slice(), &[("systemctl".to_string(), vec!["suspend".to_string()])]);
    }
}
