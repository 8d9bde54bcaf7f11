use std::{fs, path::PathBuf, process};

use anyhow::Context;
use structopt::StructOpt;
use tokio::signal;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use e2e::{iris::IrisModel, settings::SimulationSettings, simulation::Simulation};
use fedorch_server::{
    queue::{status_channel, task_channel, Coordinator},
    settings::{DriverSettings, RoundSettings, Settings},
};

/// Seeds the initial parameters of the iris model.
const SEED: u64 = 42;

#[derive(Debug, StructOpt)]
#[structopt(name = "simulate")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let settings = Settings::new(&opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let simulation_settings = SimulationSettings::new(&opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(settings.log.filter)
        .with_ansi(true)
        .init();

    tokio::select! {
        res = run(settings.driver, settings.round, simulation_settings) => res,
        _ = signal::ctrl_c() => {
            info!("simulation interrupted");
            Ok(())
        }
    }
}

async fn run(
    driver_settings: DriverSettings,
    round_settings: RoundSettings,
    settings: SimulationSettings,
) -> anyhow::Result<()> {
    let payload = fs::read(&settings.task_path)
        .with_context(|| format!("failed to read the task {:?}", settings.task_path))?;

    let simulation = Simulation::start(settings.node_settings(), IrisModel::new(SEED)?);
    info!(
        "started {} nodes, {} of them don't serve the task",
        settings.nodes, settings.non_participating
    );

    let (initializer, _events) = simulation.initializer(driver_settings, round_settings);
    let (publisher, mut listener) = status_channel(16);
    let statuses = tokio::spawn(async move {
        while let Some(update) = listener.next_update().await {
            info!("{}", update);
        }
    });

    let (tasks, source) = task_channel(1);
    tasks
        .send(payload)
        .await
        .context("the task queue is closed")?;
    drop(tasks);
    Coordinator::new(initializer, publisher).run(source).await;
    statuses.await?;

    for upload in simulation.registry().uploads() {
        info!(
            "uploaded {} version {} of run {}",
            upload.info.name, upload.info.version, upload.info.run_id
        );
    }
    simulation.shutdown().await
}
