//! Monthly member mailer entry point.
//!
//! # Responsibility
//! - Load `.env`, config and credentials, start logging, run the job once.
//! - Exit `0` on success and `1` on any failure.

use member_mailer_core::config::config_path_from_env;
use member_mailer_core::{
    flush_logging, init_logging, logging_status, run_monthly, RunConfig, SmtpCredentials,
};
use std::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let code = match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Before logging starts (bad config) stderr is the only channel.
            if logging_status().is_some() {
                log::error!("event=app_exit module=cli status=error error={err}");
            } else {
                eprintln!("member-mailer: {err}");
            }
            ExitCode::FAILURE
        }
    };
    flush_logging();
    code
}

fn run() -> Result<(), Box<dyn Error>> {
    // A missing .env is normal in cron/production; the environment wins.
    let _ = dotenvy::dotenv();

    let config_path = config_path_from_env();
    let config = RunConfig::load(&config_path)?;
    init_logging(config.log_level(), &config.paths.log_dir)?;
    log::info!(
        "event=app_start module=cli status=ok version={} config={}",
        member_mailer_core::core_version(),
        config_path.display()
    );

    let credentials = SmtpCredentials::from_env()?;
    let report = run_monthly(&config, &credentials)?;
    log::info!("event=app_exit module=cli status=ok {report}");
    Ok(())
}
