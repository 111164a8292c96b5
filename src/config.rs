//! Defines the configuration settings for the leadmine application.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Business-category terms a backfill query is drawn from when none are
/// configured.
const DEFAULT_QUERIES: &[&str] = &[
    "Realtors",
    "Real estate agents",
    "Real estate brokers",
    "Real estate agencies",
    "Real estate firms",
    "Property management companies",
    "Real estate investors",
    "Doctors",
    "Dentists",
    "Chiropractors",
    "Therapists",
    "Hospitals",
    "Clinics",
    "Medical practices",
    "Restaurants",
    "Retail stores",
    "Salons",
    "Spas",
    "Fitness centers",
    "Law firms",
    "Accounting firms",
    "Online retailers",
    "E-commerce businesses",
    "E-commerce startups",
    "E-commerce platforms",
    "Online marketplaces",
    "Direct-to-consumer brands",
    "Marketing agencies",
    "Advertising agencies",
    "Digital marketing agencies",
    "Social media marketing agencies",
    "Content marketing agencies",
    "SEO agencies",
    "Nonprofit organizations",
    "Charitable organizations",
    "Professional associations",
    "Trade associations",
    "Industry organizations",
    "Community organizations",
    "Hotels",
    "Resorts",
    "Travel agencies",
    "Tour operators",
    "Vacation rental companies",
    "Cruise lines",
    "Schools",
    "Colleges",
    "Universities",
    "Educational institutions",
    "Training centers",
    "Online education platforms",
];

/// Location terms a backfill query is drawn from when none are configured.
const DEFAULT_LOCATIONS: &[&str] = &[
    "New York",
    "Los Angeles",
    "Chicago",
    "Houston",
    "Phoenix",
    "Philadelphia",
    "San Antonio",
    "San Diego",
    "Dallas",
    "San Jose",
    "Austin",
    "Jacksonville",
    "Fort Worth",
    "Columbus",
    "Charlotte",
    "San Francisco",
    "Indianapolis",
    "Seattle",
    "Denver",
    "Washington",
    "Boston",
    "El Paso",
    "Nashville",
    "Detroit",
    "Oklahoma City",
    "Portland",
    "Las Vegas",
    "Memphis",
    "Louisville",
    "Baltimore",
];

/// Shared command line options for leadmine. Every option falls back to an
/// environment variable, then to the config file, then to the default.
#[derive(clap::Args, Debug)]
pub(crate) struct AppArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, env = "LEADMINE_CONFIG")]
    pub config_file: Option<String>,

    /// Connection string for the contact database
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// SMTP relay hostname
    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    /// SMTP relay port (465 switches to implicit TLS)
    #[arg(long, env = "SMTP_PORT")]
    pub smtp_port: Option<u16>,

    /// SMTP username; also the sender identity on outgoing mail
    #[arg(long, env = "SMTP_USER")]
    pub smtp_user: Option<String>,

    /// SMTP password
    #[arg(long, env = "SMTP_PASSWORD")]
    pub smtp_password: Option<String>,

    /// Number of result pages fetched per scrape pass
    #[arg(long, env = "LEADMINE_PAGES")]
    pub pages: Option<u32>,

    /// Maximum concurrent result-page fetches
    #[arg(long, env = "LEADMINE_FETCH_CONCURRENCY")]
    pub fetch_concurrency: Option<usize>,

    /// Maximum contacts mailed per dispatch pass
    #[arg(long, env = "LEADMINE_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "LEADMINE_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    /// User agent string for search page requests
    #[arg(long, env = "LEADMINE_USER_AGENT")]
    pub user_agent: Option<String>,
}

/// TOML Configuration file structure
#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    network: Option<NetworkConfig>,
    search: Option<SearchConfig>,
    dispatch: Option<DispatchConfig>,
    smtp: Option<SmtpConfig>,
    database: Option<DatabaseConfig>,
}

#[derive(Deserialize, Debug, Default)]
struct NetworkConfig {
    request_timeout: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct SearchConfig {
    pages_per_harvest: Option<u32>,
    fetch_concurrency: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
struct DispatchConfig {
    batch_size: Option<usize>,
    queries: Option<Vec<String>>,
    locations: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
struct SmtpConfig {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct DatabaseConfig {
    url: Option<String>,
}

/// Credentials and endpoint for the outgoing mail relay.
#[derive(Debug, Clone)]
pub(crate) struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

/// Application configuration settings.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Connection string for the contact database, if provided.
    pub database_url: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    /// Result pages fetched per scrape pass.
    pub pages_per_harvest: u32,
    /// Concurrent in-flight page fetches.
    pub fetch_concurrency: usize,
    /// Contacts mailed per dispatch pass.
    pub batch_size: usize,
    /// Timeout for individual HTTP requests.
    pub request_timeout: Duration,
    /// User agent string for search page requests.
    pub user_agent: String,
    /// Term lists a backfill scrape draws its query and location from.
    pub backfill_queries: Vec<String>,
    pub backfill_locations: Vec<String>,
}

impl Config {
    fn default() -> Self {
        Config {
            database_url: None,
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_password: None,
            pages_per_harvest: 20,
            fetch_concurrency: 8,
            batch_size: 5,
            request_timeout: Duration::from_secs(10),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                .to_string(),
            backfill_queries: DEFAULT_QUERIES.iter().map(|s| s.to_string()).collect(),
            backfill_locations: DEFAULT_LOCATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// The database connection string, required for serving and dispatching.
    pub(crate) fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is not set")
    }

    /// The assembled SMTP settings, required for serving and dispatching.
    pub(crate) fn smtp(&self) -> anyhow::Result<SmtpSettings> {
        Ok(SmtpSettings {
            host: self.smtp_host.clone().context("SMTP_HOST is not set")?,
            port: self.smtp_port,
            user: self.smtp_user.clone().context("SMTP_USER is not set")?,
            password: self
                .smtp_password
                .clone()
                .context("SMTP_PASSWORD is not set")?,
        })
    }
}

/// Load configuration from a TOML file
fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() {
        tracing::warn!("Configuration file {} not found, using defaults", file_path);
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))?;

    tracing::info!("Loaded configuration from {}", file_path);
    Ok(config)
}

fn apply_file_config(config: &mut Config, file_config: &ConfigFile) {
    if let Some(network) = &file_config.network {
        if let Some(timeout) = network.request_timeout {
            config.request_timeout = Duration::from_secs(timeout);
        }
        if let Some(user_agent) = &network.user_agent {
            config.user_agent = user_agent.clone();
        }
    }

    if let Some(search) = &file_config.search {
        if let Some(pages) = search.pages_per_harvest {
            config.pages_per_harvest = pages;
        }
        if let Some(concurrency) = search.fetch_concurrency {
            config.fetch_concurrency = concurrency;
        }
    }

    if let Some(dispatch) = &file_config.dispatch {
        if let Some(batch_size) = dispatch.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(queries) = &dispatch.queries {
            config.backfill_queries = queries.clone();
        }
        if let Some(locations) = &dispatch.locations {
            config.backfill_locations = locations.clone();
        }
    }

    if let Some(smtp) = &file_config.smtp {
        if let Some(host) = &smtp.host {
            config.smtp_host = Some(host.clone());
        }
        if let Some(port) = smtp.port {
            config.smtp_port = port;
        }
        if let Some(user) = &smtp.user {
            config.smtp_user = Some(user.clone());
        }
        if let Some(password) = &smtp.password {
            config.smtp_password = Some(password.clone());
        }
    }

    if let Some(database) = &file_config.database {
        if let Some(url) = &database.url {
            config.database_url = Some(url.clone());
        }
    }
}

/// Apply command line arguments to the Config instance
fn apply_cli_args(config: &mut Config, args: &AppArgs) {
    if let Some(ref url) = args.database_url {
        config.database_url = Some(url.clone());
    }
    if let Some(ref host) = args.smtp_host {
        config.smtp_host = Some(host.clone());
    }
    if let Some(port) = args.smtp_port {
        config.smtp_port = port;
    }
    if let Some(ref user) = args.smtp_user {
        config.smtp_user = Some(user.clone());
    }
    if let Some(ref password) = args.smtp_password {
        config.smtp_password = Some(password.clone());
    }
    if let Some(pages) = args.pages {
        config.pages_per_harvest = pages;
    }
    if let Some(concurrency) = args.fetch_concurrency {
        config.fetch_concurrency = concurrency;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(timeout) = args.request_timeout {
        config.request_timeout = Duration::from_secs(timeout);
    }
    if let Some(ref agent) = args.user_agent {
        config.user_agent = agent.clone();
    }
}

fn validate_config(config: &mut Config) {
    if config.pages_per_harvest == 0 {
        config.pages_per_harvest = 1;
        tracing::warn!("Pages per harvest was set to 0. Setting to 1.");
    }

    if config.fetch_concurrency == 0 {
        config.fetch_concurrency = 1;
        tracing::warn!("Fetch concurrency was set to 0. Setting to 1.");
    }

    if config.batch_size == 0 {
        config.batch_size = 1;
        tracing::warn!("Batch size was set to 0. Setting to 1.");
    }

    if config.backfill_queries.is_empty() {
        config.backfill_queries = DEFAULT_QUERIES.iter().map(|s| s.to_string()).collect();
        tracing::warn!("Backfill query list was empty. Restoring the default list.");
    }

    if config.backfill_locations.is_empty() {
        config.backfill_locations = DEFAULT_LOCATIONS.iter().map(|s| s.to_string()).collect();
        tracing::warn!("Backfill location list was empty. Restoring the default list.");
    }
}

pub(crate) fn build_config(args: &AppArgs) -> anyhow::Result<Config> {
    let mut config = Config::default();

    if let Some(ref file_path) = args.config_file {
        let file_config = load_config_file(file_path)?;
        apply_file_config(&mut config, &file_config);
    } else {
        for path in ["./leadmine.toml", "./config.toml"].iter() {
            if Path::new(path).exists() {
                match load_config_file(path) {
                    Ok(file_config) => {
                        apply_file_config(&mut config, &file_config);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load configuration from {}: {}", path, e);
                    }
                }
            }
        }
    }

    apply_cli_args(&mut config, args);

    validate_config(&mut config);

    tracing::debug!("Final configuration: {:?}", config);

    Ok(config)
}
