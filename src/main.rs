use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::future::join_all;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use nanopac::adapters::{FileConfigSource, FileWatch, LoggingStatusListener, ResolvConfConfigSource, ResolvConfWatcher};
use nanopac::ports::ConfigSourcePort;
use nanopac::{NanopacConfig, ProxyError, ProxyService, ProxyServiceBuilder, ResolutionResult, SyncProxyService};

#[derive(Parser, Debug)]
#[clap(version = env!("NANOPAC_VERSION"), author = env!("CARGO_PKG_AUTHORS"))]
pub struct Opts {
    /// Configuration file, created with defaults when missing
    #[clap(long, short = 'c')]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the proxies to use for each URL
    Resolve {
        #[clap(required = true)]
        urls: Vec<Url>,
    },
    /// Read URLs from stdin, one per line, and follow configuration and
    /// network changes while running. `!URL` reports that the last answer
    /// for URL failed, `reload` refetches the configuration, and `clear`
    /// forgets the proxies marked bad.
    Watch,
}

/// Running service plus the file watches feeding it
struct Running {
    service: ProxyService,
    _watches: Vec<FileWatch>,
}

fn start(config: &NanopacConfig, path: PathBuf) -> Result<Running, ProxyError> {
    let file_source = Arc::new(FileConfigSource::new(path));
    let source: Arc<dyn ConfigSourcePort> = if config.network.resolv_conf_rules.is_empty() {
        file_source.clone()
    } else {
        Arc::new(ResolvConfConfigSource::new(
            &config.network.resolv_conf_path,
            &config.network.resolv_conf_rules,
            file_source.clone(),
        )?)
    };

    let service = ProxyServiceBuilder::from_config(config)
        .config_source(source)
        .listener(Arc::new(LoggingStatusListener))
        .build()?;

    let mut watches = Vec::new();
    match file_source.watch() {
        Ok(watch) => watches.push(watch),
        Err(e) => warn!("Configuration changes will not be picked up: {}", e),
    }
    if config.network.watch_resolv_conf {
        match ResolvConfWatcher::new(&config.network.resolv_conf_path, service.observer()).start() {
            Ok(watch) => watches.push(watch),
            Err(e) => warn!("Network changes will not be picked up: {}", e),
        }
    }
    for watch in &watches {
        info!("Following changes to {}", watch.path().display());
    }

    Ok(Running {
        service,
        _watches: watches,
    })
}

fn watch(bridge: &SyncProxyService) {
    let mut last: HashMap<Url, ResolutionResult> = HashMap::new();

    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };
        let line = line.trim();

        match line {
            "" => continue,
            "reload" => {
                bridge.service().force_reload();
                continue;
            }
            "clear" => {
                bridge.service().clear_retry_cache();
                continue;
            }
            _ => {}
        }

        let (failed, raw) = match line.strip_prefix('!') {
            Some(raw) => (true, raw.trim()),
            None => (false, line),
        };
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => {
                println!("{}: {}", raw, e);
                continue;
            }
        };

        let outcome = match (failed, last.get(&url)) {
            (true, Some(prior)) => bridge.reconsider_after_error(url.clone(), prior.clone()),
            (true, None) => {
                println!("{}: nothing resolved yet", url);
                continue;
            }
            (false, _) => bridge.resolve(url.clone()),
        };

        match outcome {
            Ok(result) => {
                println!("{}: {}", url, result);
                last.insert(url, result);
            }
            Err(e) => {
                println!("{}: {}", url, e);
                last.remove(&url);
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();
    let path = match opts.config {
        Some(path) => path,
        None => NanopacConfig::default_path()?,
    };
    let config = NanopacConfig::load(Some(&path))?;
    info!("Using configuration {}", path.display());

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let running = {
        let _guard = runtime.enter();
        start(&config, path)?
    };

    match opts.command {
        Command::Resolve { urls } => {
            let service = running.service.clone();
            let results = runtime.block_on(join_all(urls.iter().map(|url| service.resolve(url.clone()))));

            let mut failures = 0;
            for (url, result) in urls.iter().zip(results) {
                match result {
                    Ok(result) => println!("{}: {}", url, result),
                    Err(e) => {
                        failures += 1;
                        eprintln!("{}: {}", url, e);
                    }
                }
            }
            if failures > 0 {
                std::process::exit(1);
            }
        }
        Command::Watch => {
            let bridge = SyncProxyService::new(runtime.handle().clone(), running.service.clone());
            watch(&bridge);
        }
    }

    Ok(())
}
