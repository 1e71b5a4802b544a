use anyhow::Context;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming};

use crate::config::{self, Settings};

pub fn init_logging(settings: &Settings) -> anyhow::Result<()> {
    let log_dir = &settings.log_dir;
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed creating log dir {}", log_dir.display()))?;

    // stdout carries protocol frames, so nothing but the file and stderr may be written to.
    Logger::try_with_str(&settings.log_level)
        .with_context(|| format!("invalid log level '{}'", settings.log_level))?
        .log_to_file(FileSpec::default().directory(log_dir).basename(config::logging::LOG_FILE_NAME))
        .rotate(
            Criterion::Size(config::logging::LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config::logging::LOG_ROTATE_KEEP_FILES),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .format(flexi_logger::detailed_format)
        .start()
        .context("failed to start logger")?;

    log::info!("{}", "=".repeat(60));
    log::info!("RAG translation host starting");
    log::info!("Version: {}", config::HOST_VERSION);
    log::info!("Platform: {}", std::env::consts::OS);
    log::info!("Data dir: {}", settings.data_dir.display());
    log::info!("{}", "=".repeat(60));

    Ok(())
}
