use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use bing_wallpaper::archive::ArchiveHttpClient;
use bing_wallpaper::config::{ConfigLoader, ConfigOverrides};
use bing_wallpaper::coordinator::BatchCoordinator;
use bing_wallpaper::download::{DownloadWorker, ImageHttpClient};
use bing_wallpaper::error::WallpaperError;
use bing_wallpaper::output::{OutputMode, ReportOutput};
use bing_wallpaper::watermark::WatermarkStore;

#[derive(Parser)]
#[command(name = "bing-wallpaper")]
#[command(about = "Download new Bing daily wallpapers and remember how far the last run got")]
#[command(version)]
struct Cli {
    #[arg(short, long, help = "Path to the JSON config file")]
    config: Option<String>,

    #[arg(short = 'n', long = "count", help = "Number of images to fetch")]
    count: Option<usize>,

    #[arg(short = 'd', long = "days-behind", help = "Days behind today to start from")]
    days_behind: Option<usize>,

    #[arg(
        long = "watermark",
        visible_alias = "ur",
        help = "Fetch everything since the recorded watermark; discards --count and --days-behind"
    )]
    watermark: bool,

    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
}

enum Status {
    Complete,
    Incomplete,
    WatermarkFailed,
}

fn main() -> ExitCode {
    match run() {
        Ok(Status::Complete) => ExitCode::SUCCESS,
        Ok(Status::Incomplete) => ExitCode::from(1),
        Ok(Status::WatermarkFailed) => ExitCode::from(3),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<WallpaperError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &WallpaperError) -> u8 {
    match error {
        WallpaperError::ConfigRead(_)
        | WallpaperError::ConfigParse(_)
        | WallpaperError::InvalidConfig(_) => 2,
        WallpaperError::WatermarkRead { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<Status> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        pic_number: cli.count,
        days_behind: cli.days_behind,
        use_record_db: cli.watermark,
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?.apply(&overrides);
    config.validate()?;

    let store = if config.use_record_db {
        let mut store = WatermarkStore::new(config.record_path());
        if store.load()?.watermark().is_none() {
            tracing::warn!(
                path = %store.path(),
                "watermark mode without a recorded watermark, using configured count"
            );
        }
        Some(store)
    } else {
        None
    };
    let watermark = store
        .as_ref()
        .and_then(|store| store.state())
        .and_then(|state| state.watermark());
    let today = chrono::Local::now().date_naive();
    let plan = config.fetch_plan(watermark, today);

    let archive = ArchiveHttpClient::new(&config.market, config.page_cap)?;
    let images = ImageHttpClient::new()?;
    let worker = DownloadWorker::new(images, config.output_dir(), config.skip_existing);
    let report = BatchCoordinator::new(archive, worker, store, plan).run()?;

    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    ReportOutput::print(&report, mode).into_diagnostic()?;

    Ok(if !report.outcome.success {
        Status::Incomplete
    } else if report.commit.is_err() {
        Status::WatermarkFailed
    } else {
        Status::Complete
    })
}
