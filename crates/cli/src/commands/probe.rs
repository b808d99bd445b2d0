//! Probe Command

use anyhow::Result;
use clap::{Args, ValueEnum};
use std::sync::Arc;

use waypoint_drivers::{DesktopDriver, Driver, WebDriver};
use waypoint_engine::WaypointConfig;

use crate::output::{print_list, print_warning, OutputFormat, ProbeRow};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ProbeTarget {
    Desktop,
    Web,
    All,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Which backend to probe
    #[arg(long, value_enum, default_value = "all")]
    pub driver: ProbeTarget,
}

pub async fn execute(args: ProbeArgs, config: &WaypointConfig, format: OutputFormat) -> Result<()> {
    let mut drivers: Vec<Arc<dyn Driver>> = Vec::new();
    if matches!(args.driver, ProbeTarget::Desktop | ProbeTarget::All) {
        drivers.push(Arc::new(DesktopDriver::new(config.desktop.clone())));
    }
    if matches!(args.driver, ProbeTarget::Web | ProbeTarget::All) {
        drivers.push(Arc::new(WebDriver::new(config.web.clone())));
    }

    let mut rows = Vec::with_capacity(drivers.len());
    for driver in drivers {
        rows.push(probe(driver.as_ref()).await);
    }
    print_list(&rows, format);
    for row in rows.iter().filter(|row| !row.reachable) {
        print_warning(&format!("{} backend unreachable: {}", row.driver, row.detail));
    }

    if rows.iter().all(|row| row.reachable) {
        Ok(())
    } else {
        anyhow::bail!("one or more backends are unreachable")
    }
}

/// Start, ping and ask for capabilities, then stop regardless of outcome.
async fn probe(driver: &dyn Driver) -> ProbeRow {
    let driver_name = driver.kind().to_string();
    let outcome = async {
        driver.start().await?;
        driver.ping().await?;
        driver.capabilities().await
    }
    .await;
    if let Err(e) = driver.stop().await {
        tracing::warn!("Failed to stop {} driver: {}", driver_name, e);
    }

    match outcome {
        Ok(capabilities) => ProbeRow {
            driver: driver_name,
            reachable: true,
            detail: capabilities.to_string(),
        },
        Err(e) => ProbeRow {
            driver: driver_name,
            reachable: false,
            detail: e.to_string(),
        },
    }
}
