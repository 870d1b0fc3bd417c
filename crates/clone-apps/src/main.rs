use clap::{ArgAction, Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use clone_apps::pipeline::{self, ExportOptions, ImportOptions};
use clone_apps::platform::HttpPlatform;
use clone_apps::snapshot::SnapshotStore;
use clone_apps::transfer::{ArtifactClient, CancelToken, StdoutSink, TransferCoordinator};
use clone_apps::{Error, Result, config, workspace};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Config file (defaults to ./clone-apps.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding apps.json, imported_apps.json and artifacts
    #[arg(long, global = true)]
    dir: Option<String>,
    /// Concurrent transfers per artifact pool
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    /// Accept invalid TLS certificates from the platform
    #[arg(long, global = true)]
    skip_ssl_validation: bool,
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture orgs, spaces, services and apps into apps.json
    ExportApps {
        /// Only export this organization
        #[arg(short = 'o', long = "org")]
        org: Option<String>,
        /// `download` also fetches droplets and source bundles
        #[arg(short = 'd', value_name = "MODE", value_parser = ["download"])]
        download: Option<String>,
    },
    /// Re-create apps.json on the target platform and upload artifacts
    ImportApps {
        /// Only import this organization
        #[arg(short = 'o', long = "org")]
        org: Option<String>,
        /// Recreate routes on this domain, keeping their host
        #[arg(long)]
        domain: Option<String>,
        /// Start apps that were running on the source platform
        #[arg(long)]
        restore: bool,
        /// Skip apps whose source bundle is not in the workspace
        #[arg(long)]
        skip_missing_bits: bool,
    },
}

fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let args = Args::parse_from(normalize_args(std::env::args_os()));
    init_tracing(args.verbose, args.log_json)?;

    let doc = config::load_or_default(args.config.as_deref())?;
    let mut settings = doc.settings()?;
    if let Some(dir) = args.dir {
        settings.workspace.dir = dir;
    }
    if let Some(n) = args.concurrency {
        settings.transfer.concurrency = n.max(1);
    }
    if args.skip_ssl_validation {
        settings.platform.skip_ssl_validation = true;
    }

    let store = SnapshotStore::new(workspace::init_dirs(&settings.workspace)?);
    // Both artifact pools draw from the same connection pool.
    let api = HttpPlatform::from_config(&settings.platform, settings.transfer.concurrency * 2)?;
    let transfers = TransferCoordinator::from_config(
        ArtifactClient::from_platform(&api),
        &settings.transfer,
        CancelToken::new(),
        Arc::new(StdoutSink::default()),
    );

    match args.cmd {
        Command::ExportApps { org, download } => {
            let opts = ExportOptions {
                org,
                download: download.is_some(),
            };
            let summary = pipeline::export(&api, &transfers, &settings.export, &store, &opts)?;
            print!("{}", summary.render());
        }
        Command::ImportApps {
            org,
            domain,
            restore,
            skip_missing_bits,
        } => {
            let opts = ImportOptions {
                org,
                domain,
                restore,
                skip_missing_bits,
            };
            let summary = pipeline::import(&api, &transfers, &store, &opts)?;
            print!("{}", summary.render());
        }
    }
    Ok(())
}

/// Long flags that are also accepted with a single dash (`-domain x`,
/// `-restore`), the spelling the platform CLI plugin uses.
const SINGLE_DASH_LONG: &[&str] = &["org", "domain", "restore", "skip-missing-bits"];

fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator,
    I::Item: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            let Some(rest) = text.strip_prefix('-').filter(|r| !r.starts_with('-')) else {
                return arg;
            };
            let name = rest.split_once('=').map_or(rest, |(n, _)| n);
            if SINGLE_DASH_LONG.contains(&name) {
                OsString::from(format!("-{text}"))
            } else {
                arg
            }
        })
        .collect()
}

fn init_tracing(verbose: u8, json: bool) -> Result<()> {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    // RUST_LOG=
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let plain = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });
    let structured = json.then(|| fmt::layer().json().with_writer(std::io::stderr));

    let subscriber = Registry::default()
        .with(env_filter)
        .with(plain)
        .with(structured);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::msg(format!("failed to install log subscriber: {e}")))
}
