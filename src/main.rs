use leibniz::backends::{build_adapters, load_corpus};
use leibniz::cache::{SystemClock, TwoTierCache};
use leibniz::cli::{Cli, Commands, ConfigAction};
use leibniz::config::Config;
use leibniz::error::{LeibnizError, Result};
use leibniz::retrieval::{QueryOrchestrator, ResponseStatus, SearchRequest, SearchResponse};
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Query {
            query,
            limit,
            filters,
            deadline_ms,
            no_cache,
            json,
            profile,
        } => {
            let mut request = SearchRequest::new(query);
            request.limit = limit;
            request.filters = filters.into_iter().collect();
            request.deadline_ms = deadline_ms;
            request.bypass_cache = no_cache;

            cmd_query(cli.config, profile, request, json)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
        Commands::Info => {
            cmd_info(cli.config)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "leibniz=debug"
    } else {
        "leibniz=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_query(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    request: SearchRequest,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path, profile)?;

    let corpus = Arc::new(load_corpus(&config.backends)?);
    let adapters = build_adapters(&config, corpus)?;
    let cache = TwoTierCache::from_config(&config, Arc::new(SystemClock)).map(Arc::new);
    let orchestrator = QueryOrchestrator::from_config(&config, adapters, cache.clone())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| LeibnizError::Io {
            source: e,
            context: "Failed to start async runtime".to_string(),
        })?;

    let response = runtime.block_on(async {
        let response = orchestrator.search(&request).await;
        if let Some(cache) = &cache {
            cache.flush().await;
        }
        response
    })?;

    if json {
        let out = serde_json::to_string_pretty(&response).map_err(|e| LeibnizError::Json {
            source: e,
            context: "Failed to serialize response".to_string(),
        })?;
        println!("{}", out);
    } else {
        print_response(&response);
    }

    Ok(())
}

fn print_response(response: &SearchResponse) {
    match response.status {
        ResponseStatus::AllBackendsFailed => {
            println!("No results available: every backend failed or timed out");
            println!("  Failed: {}", response.failed_backends.join(", "));
            return;
        }
        ResponseStatus::Cached => println!(
            "{} results from cache in {}ms",
            response.results.len(),
            response.elapsed_ms
        ),
        ResponseStatus::Complete | ResponseStatus::Degraded => println!(
            "{} results in {}ms from {}",
            response.results.len(),
            response.elapsed_ms,
            response.contributing_backends.join(", ")
        ),
    }

    if !response.failed_backends.is_empty() {
        println!("  Unavailable: {}", response.failed_backends.join(", "));
    }
    println!();

    for (rank, result) in response.results.iter().enumerate() {
        let backends: Vec<&str> = result.backends.iter().map(String::as_str).collect();
        println!(
            "{:>3}. {:<12} {:.3}  [{}]",
            rank + 1,
            result.doc_id,
            result.score,
            backends.join("+")
        );
        if let Some(excerpt) = &result.excerpt {
            println!("     {}", excerpt);
        }
    }
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, None)?;
            let text = toml::to_string_pretty(&config)?;
            println!("{}", text);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| LeibnizError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn cmd_info(config_path: Option<PathBuf>) -> Result<()> {
    let path = match &config_path {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let config = load_config(config_path, None)?;

    let enabled: Vec<&str> = [
        ("vector", config.backends.vector),
        ("graph", config.backends.graph),
        ("keyword", config.backends.keyword),
    ]
    .into_iter()
    .filter_map(|(name, on)| on.then_some(name))
    .collect();

    println!("Config file:  {}", path.display());
    println!("Data dir:     {}", config.storage.data_dir.display());
    println!(
        "Corpus:       {}",
        config
            .backends
            .corpus_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in demo collection".to_string())
    );
    println!("Backends:     {}", enabled.join(", "));
    println!(
        "Deadline:     {}ms (per backend {}ms)",
        config.search.deadline_ms, config.search.backend_timeout_ms
    );
    println!("Fusion:       {}", config.fusion.method);
    if config.cache.enabled {
        println!(
            "Cache:        local {} entries, shared {}, ttl {}s (empty {}s)",
            config.cache.local_capacity,
            config.cache.shared,
            config.cache.ttl_secs,
            config.cache.empty_ttl_secs
        );
        if config.cache.shared == "sqlite" {
            println!("Shared file:  {}", config.shared_cache_path()?.display());
        }
    } else {
        println!("Cache:        disabled");
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'leibniz config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        leibniz::config::ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}
