use std::time::{Duration, Instant};

use clap::Parser;
use splat_eval_cli::{Cli, run};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .init();

    #[cfg(feature = "tracy")]
    {
        use tracing_subscriber::layer::SubscriberExt;

        tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(tracing_tracy::TracyLayer::default()),
        )
        .expect("Failed to set tracing subscriber");
    }

    let start = Instant::now();
    let outcome = run(&cli)?;
    let elapsed = Duration::from_secs(start.elapsed().as_secs());

    println!(
        "Evaluated {} {} frames into {} in {}",
        outcome.report.frames_evaluated,
        outcome.split,
        outcome.eval_dir.display(),
        humantime::format_duration(elapsed)
    );
    log::info!("Done evaluating! Took {}.", humantime::format_duration(elapsed));

    Ok(())
}
