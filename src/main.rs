use chrono::{Datelike, Utc};
use clap::Parser;
use podbean_tap::core::source::Partitioning;
use podbean_tap::utils::{logger, validation::Validate};
use podbean_tap::{
    CliArgs, ExtractionDriver, JsonLinesSink, RecordSink, StreamDescriptor, SyncSummary,
    TapConfig, TapError,
};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    // 初始化日誌
    if args.log_json {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("Starting podbean-tap");
    if args.verbose {
        tracing::debug!("CLI args: {:?}", args);
    }

    if let Err(e) = run(&args).await {
        tracing::error!(
            "❌ Sync failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());

        std::process::exit(e.severity().exit_code());
    }
}

async fn run(args: &CliArgs) -> Result<(), TapError> {
    args.validate()?;
    let streams = args.selected_streams()?;

    let config = TapConfig::from_file(&args.config)?;
    config.validate()?;
    tracing::debug!("Loaded config: {:?}", config);

    if args.dry_run {
        print_plan(&config, &streams)?;
        return Ok(());
    }

    let summary = match &args.output {
        Some(path) => sync(&config, &streams, JsonLinesSink::create(path).await?).await?,
        None => sync(&config, &streams, JsonLinesSink::stdout()).await?,
    };

    tracing::info!(
        "✅ Extracted {} record(s) from {} stream(s)",
        summary.total_records(),
        summary.streams.len()
    );
    if let Some(path) = &args.output {
        tracing::info!("📁 Output saved to: {}", path.display());
    }
    Ok(())
}

async fn sync<S: RecordSink>(
    config: &TapConfig,
    streams: &[&'static StreamDescriptor],
    sink: S,
) -> Result<SyncSummary, TapError> {
    let mut driver = ExtractionDriver::new(config, sink)?;
    driver.run(streams).await
}

fn print_plan(config: &TapConfig, streams: &[&'static StreamDescriptor]) -> Result<(), TapError> {
    let start = config.start_instant()?;
    let years = format!("{}..={}", start.year(), Utc::now().year());

    println!("API: {}", config.api_url());
    println!("Start date: {}", start.to_rfc3339());
    for stream in streams {
        let partitioning = match stream.partitioning {
            Partitioning::None => "unpartitioned".to_string(),
            Partitioning::PerPodcast => "per podcast".to_string(),
            Partitioning::PerPodcastYear => format!("per podcast, years {}", years),
        };
        println!(
            "  {:<28} {:<40} key={:?} {}",
            stream.name,
            stream.path,
            stream.key_properties,
            partitioning
        );
    }
    Ok(())
}
