use clap::Parser;
use std::path::PathBuf;

use runq_config::{
    load_config, ConfigError, DaemonConfigLayer, EngineConfigLayer, RunqConfig, RunqConfigLayer,
};

/// runq daemon - background job execution over TCP
#[derive(Parser, Debug)]
#[command(name = "runq-daemon", version)]
pub struct Args {
    /// Config file (defaults to /etc/runq/runq.toml)
    #[arg(long, env = "RUNQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address (overrides daemon.listen)
    #[arg(long)]
    pub listen: Option<String>,

    /// Auth token (overrides daemon.token / RUNQ_DAEMON_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// Disable auth (dev only)
    #[arg(long)]
    pub insecure_no_auth: bool,

    /// Maximum number of jobs running at once
    #[arg(long)]
    pub max_concurrent_jobs: Option<usize>,

    /// Default maximum job duration in seconds
    #[arg(long)]
    pub max_job_duration_secs: Option<u64>,
}

impl Args {
    /// Flags expressed as the highest-precedence config layer.
    pub fn overrides(&self) -> RunqConfigLayer {
        RunqConfigLayer {
            engine: Some(EngineConfigLayer {
                max_concurrent_jobs: self.max_concurrent_jobs,
                max_job_duration_secs: self.max_job_duration_secs,
                ..Default::default()
            }),
            daemon: Some(DaemonConfigLayer {
                listen: self.listen.clone(),
                token: self.token.clone(),
                insecure_no_auth: self.insecure_no_auth.then_some(true),
            }),
            logging: None,
        }
    }

    pub fn load(&self) -> Result<RunqConfig, ConfigError> {
        load_config(self.config.clone(), self.overrides())
    }
}
