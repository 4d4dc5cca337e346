use crate::config::toml_config::ServiceConfig;
use crate::domain::ports::CommandRunner;
use crate::utils::error::{DetectorError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct ServiceInstaller {
    runner: Arc<dyn CommandRunner>,
    config: ServiceConfig,
    binary: PathBuf,
    config_path: PathBuf,
    working_directory: PathBuf,
    unit_dir: PathBuf,
}

impl ServiceInstaller {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: ServiceConfig,
        binary: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        let config_path = config_path.into();
        let working_directory = config
            .working_directory
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| config_path.parent().map(Path::to_path_buf))
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("/"));
        let unit_dir = PathBuf::from(&config.unit_dir);
        Self {
            runner,
            config,
            binary: binary.into(),
            config_path,
            working_directory,
            unit_dir,
        }
    }

    pub fn with_unit_dir(mut self, unit_dir: impl Into<PathBuf>) -> Self {
        self.unit_dir = unit_dir.into();
        self
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(self.config.unit_name())
    }

    pub fn render_unit(&self) -> String {
        let mut unit = format!(
            "[Unit]\n\
             Description={}\n\
             After=network.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             ExecStart={} run --config {} --log-json\n\
             WorkingDirectory={}\n",
            self.config.description,
            self.binary.display(),
            self.config_path.display(),
            self.working_directory.display(),
        );
        if let Some(user) = &self.config.user {
            unit.push_str(&format!("User={}\n", user));
        }
        unit.push_str(
            "Restart=always\n\
             RestartSec=10\n\
             Environment=RUST_LOG=animals_detector=info\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
        );
        unit
    }

    async fn ensure_root(&self) -> Result<()> {
        let output = self.runner.run("id", &["-u".to_string()]).await?;
        if output.success() && output.stdout.trim() == "0" {
            return Ok(());
        }
        Err(DetectorError::PermissionError {
            message: "Please run as root".to_string(),
        })
    }

    async fn systemctl(&self, args: &[&str]) -> Result<()> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let output = self.runner.run("systemctl", &args).await?;
        if !output.success() {
            return Err(DetectorError::CommandError {
                command: format!("systemctl {}", args.join(" ")),
                message: format!("exit status {:?}: {}", output.status, output.stderr.trim()),
            });
        }
        Ok(())
    }

    /// 安裝並啟動 unit，回傳 `systemctl status` 的輸出
    pub async fn install(&self) -> Result<String> {
        self.ensure_root().await?;

        let unit_name = self.config.unit_name();
        let unit_path = self.unit_path();
        tracing::info!("Installing {} to {}", unit_name, unit_path.display());
        std::fs::create_dir_all(&self.unit_dir)?;
        std::fs::write(&unit_path, self.render_unit())?;
        set_unit_permissions(&unit_path)?;

        self.systemctl(&["daemon-reload"]).await?;
        self.systemctl(&["enable", &unit_name]).await?;
        self.systemctl(&["start", &unit_name]).await?;

        // status 在服務非 active 時回傳非零，仍然把輸出交給使用者
        let status = self
            .runner
            .run(
                "systemctl",
                &["status".to_string(), unit_name.clone(), "--no-pager".to_string()],
            )
            .await?;
        tracing::info!("✅ {} installed and started", unit_name);
        Ok(status.stdout)
    }
}

#[cfg(unix)]
fn set_unit_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_unit_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
