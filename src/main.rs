mod app;
mod cli;

use clap::Parser;
use cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Peek at the config for log destination before the runtime exists
    let file_logging = relay_core::config::Config::load(&cli.config)
        .map(|c| (c.logging_to_file, c.log_dir.clone()))
        .unwrap_or((false, None));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));

    let _guard = if file_logging.0 {
        let dir = file_logging.1.unwrap_or_else(|| "logs".to_string());
        let appender = tracing_appender::rolling::daily(dir, "relay.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let application = app::Application::build(&cli)?;
        application.serve().await
    })
}
