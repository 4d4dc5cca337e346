use crate::domain::model::CommandOutput;
use crate::domain::ports::{CommandRunner, DiskSpace};
use crate::utils::error::{DetectorError, Result};
use async_trait::async_trait;
use std::path::Path;
use sysinfo::Disks;
use tokio::process::Command;

/// 實際執行系統指令
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        tracing::debug!("Running: {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| DetectorError::CommandError {
                command: program.to_string(),
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Free space lookup through sysinfo's disk list.
#[derive(Debug, Clone, Default)]
pub struct SysinfoDiskSpace;

impl DiskSpace for SysinfoDiskSpace {
    fn available_bytes(&self, path: &Path) -> Result<u64> {
        let path = path.canonicalize()?;
        let disks = Disks::new_with_refreshed_list();

        // 取掛載點最長的那顆磁碟
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .ok_or_else(|| {
                DetectorError::storage(format!(
                    "No mounted filesystem found for '{}'",
                    path.display()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runner_captures_status_and_output() {
        let runner = SystemCommandRunner;
        let output = runner
            .run("sh", &["-c".to_string(), "echo hello; exit 3".to_string()])
            .await
            .unwrap();
        assert_eq!(output.status, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_missing_program_is_command_error() {
        let runner = SystemCommandRunner;
        let result = runner.run("definitely-not-a-real-binary-xyz", &[]).await;
        assert!(matches!(result, Err(DetectorError::CommandError { .. })));
    }
}
