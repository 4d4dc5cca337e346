use animals_detector::adapters::SystemCommandRunner;
use animals_detector::app::{self, power, PowerAction, PowerScheduler, RunOptions, ServiceInstaller};
use animals_detector::config::cli::{InstallArgs, RunArgs};
use animals_detector::utils::{logger, validation::Validate};
use animals_detector::{AppConfig, Cli, Command, DetectorError};
use anyhow::Context;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 服務模式輸出 JSON 給 journald
    if cli.log_json {
        logger::init_service_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    if cli.verbose {
        tracing::debug!("CLI args: {:?}", cli);
    }

    let code = match execute(&cli).await? {
        Ok(code) => code,
        Err(e) => report(&e),
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// 外層 `anyhow` 錯誤表示無法啟動，內層 `DetectorError` 決定結束碼
async fn execute(cli: &Cli) -> anyhow::Result<Result<i32, DetectorError>> {
    let result = match &cli.command {
        Command::Run(args) => run(&cli.config, args).await,
        Command::Power { action } => power_command(&cli.config, action.as_deref()).await,
        Command::InstallService(args) => {
            let binary = match &args.binary {
                Some(binary) => binary.clone(),
                None => std::env::current_exe().context("Cannot determine the running executable")?,
            };
            install_service(&cli.config, args, binary).await
        }
        Command::Sync => sync(&cli.config).await,
        Command::Cleanup { days } => cleanup(&cli.config, *days),
        Command::CheckConfig => check_config(&cli.config),
    };
    Ok(result)
}

fn report(e: &DetectorError) -> i32 {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());
    e.exit_code()
}

fn load_config(path: &Path) -> Result<AppConfig, DetectorError> {
    tracing::info!("📁 Loading configuration from: {}", path.display());
    let config = AppConfig::from_file_or_default(path)?;
    config.validate()?;
    Ok(config)
}

async fn run(config_path: &Path, args: &RunArgs) -> Result<i32, DetectorError> {
    let config = load_config(config_path)?;
    tracing::info!("🚀 Starting animal detection");
    let options = RunOptions {
        max_frames: args.max_frames,
        monitor: args.monitor,
        no_upload: args.no_upload,
    };
    let summary = app::run_detection(&config, options).await?;
    println!(
        "✅ {} frame(s), {} object(s) saved, {} uploaded",
        summary.frames, summary.saved, summary.uploads.uploaded
    );
    Ok(0)
}

async fn power_command(config_path: &Path, action: Option<&str>) -> Result<i32, DetectorError> {
    let Some(action) = PowerAction::parse(action) else {
        eprintln!("{}", power::USAGE);
        return Ok(1);
    };

    let config = load_config(config_path)?;
    let scheduler = PowerScheduler::from_config(Arc::new(SystemCommandRunner), &config)?;
    match action {
        PowerAction::Suspend => {
            scheduler.suspend().await?;
            Ok(0)
        }
        PowerAction::Wake => {
            let outcome = scheduler.wake().await?;
            println!("{}", outcome.log_line);
            Ok(if outcome.success { 0 } else { 1 })
        }
    }
}

async fn install_service(
    config_path: &Path,
    args: &InstallArgs,
    binary: std::path::PathBuf,
) -> Result<i32, DetectorError> {
    let config = load_config(config_path)?;
    // unit 內要用絕對路徑
    let config_path = std::path::absolute(config_path)?;
    let mut installer = ServiceInstaller::new(
        Arc::new(SystemCommandRunner),
        config.service.clone(),
        binary,
        config_path,
    );
    if let Some(unit_dir) = &args.unit_dir {
        installer = installer.with_unit_dir(unit_dir);
    }

    let status = installer.install().await?;
    println!("{}", status);
    Ok(0)
}

async fn sync(config_path: &Path) -> Result<i32, DetectorError> {
    let config = load_config(config_path)?;
    let report = app::sync_pending(&config).await?;
    println!(
        "☁️  {} pending, {} uploaded, {} failed",
        report.pending, report.uploaded, report.failed
    );
    Ok(if report.failed > 0 { 2 } else { 0 })
}

fn cleanup(config_path: &Path, days: Option<i64>) -> Result<i32, DetectorError> {
    let config = load_config(config_path)?;
    let removed = app::cleanup(&config, days)?;
    println!("🧹 Removed {} old directory(ies)", removed);
    Ok(0)
}

fn check_config(config_path: &Path) -> Result<i32, DetectorError> {
    let config = AppConfig::from_file(config_path)?;
    config.validate()?;
    display_config_summary(&config);
    println!("✅ Configuration is valid");
    Ok(0)
}

fn display_config_summary(config: &AppConfig) {
    println!("📋 Configuration Summary:");
    println!(
        "  📷 Camera: {:?} #{} ({}x{})",
        config.camera.source, config.camera.camera_id, config.camera.width, config.camera.height
    );
    println!(
        "  🔍 Detector: min_area={} threshold={} blur={} learning_rate={}",
        config.detector.min_area,
        config.detector.threshold,
        config.detector.blur_size,
        config.detector.learning_rate
    );
    println!(
        "  🎯 Tracking: {} (iou >= {})",
        if config.tracking.enabled { "enabled" } else { "disabled" },
        config.tracking.iou_threshold
    );
    println!(
        "  💾 Storage: {} (max {} GB, keep {} day(s), every {}s)",
        config.storage.base_path,
        config.storage.max_storage_gb,
        config.storage.days_to_keep,
        config.storage.min_save_interval_secs
    );
    if config.upload.enabled {
        println!(
            "  ☁️  Upload: {:?} prefix '{}' ({} attempt(s))",
            config.upload.target, config.upload.prefix, config.upload.max_attempts
        );
    } else {
        println!("  ☁️  Upload: disabled");
    }
    println!(
        "  ⏰ Wake time: {} (log: {})",
        config.power.wake_time, config.power.log_file
    );
    println!("  🛠️  Service: {}", config.service.unit_name());
}
