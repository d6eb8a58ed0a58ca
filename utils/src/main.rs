mod inspect;
mod selftest;

use std::sync::Arc;

use anyhow::Context;
use gpu_binder::{ActiveDriver, BinderConfig};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

pub const LOG_VAR: &str = "GPU_BINDER_LOG";

#[derive(StructOpt)]
#[structopt(about = "Inspect device modules and smoke-test the active driver")]
pub enum Options {
    Inspect(inspect::InspectOptions),
    Selftest(selftest::SelftestOptions),
}

pub fn open_driver() -> anyhow::Result<Arc<ActiveDriver>> {
    let config = BinderConfig::from_env().context("Invalid GPU_BINDER_* configuration!")?;
    gpu_binder::driver::open_active(&config).context("Failed to open the driver!")
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_VAR).unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    match Options::from_args() {
        Options::Inspect(options) => options.run(),
        Options::Selftest(options) => options.run(),
    }
}
