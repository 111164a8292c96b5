use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

mod api;
mod config;
mod error;
mod extract;
mod harvest;
mod ledger;
mod mailer;
mod models;
mod search;
mod store;

use models::ContactType;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: config::AppArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
    /// Run one scrape pass and print the contacts found
    Scrape {
        /// Search term, e.g. "marketing agencies"
        #[arg(long)]
        query: String,

        /// Location term, e.g. "New York"
        #[arg(long, default_value = "")]
        location: String,

        /// Platform label, e.g. "LinkedIn"
        #[arg(long, default_value = "")]
        platform: String,

        /// Kind of contact string to extract
        #[arg(long, value_enum, default_value = "email")]
        contact_type: ContactType,

        /// Domain filter (email) or literal phone prefix (phone)
        #[arg(long, default_value = "")]
        site: String,
    },
    /// Run one drain-and-dispatch pass and print the report
    Dispatch {
        /// Subject line for every message in the batch
        #[arg(long)]
        subject: String,

        /// Path to the HTML template file
        #[arg(long)]
        template: PathBuf,

        /// Platform label used for backfill scraping
        #[arg(long, default_value = "")]
        platform: String,

        /// Kind of contact string to mine during backfill
        #[arg(long, value_enum, default_value = "email")]
        contact_type: ContactType,

        /// Domain filter (email) or literal phone prefix (phone)
        #[arg(long, default_value = "")]
        site: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = config::build_config(&cli.args)?;

    match cli.command {
        Commands::Serve { port } => {
            api::start_api_server(&config, port).await?;
        }
        Commands::Scrape {
            query,
            location,
            platform,
            contact_type,
            site,
        } => {
            let scraper = harvest::SearchScraper::new(&config)?;
            let campaign = models::Campaign {
                query,
                location,
                platform,
                contact_type,
                site,
            };
            let mut contacts: Vec<String> =
                scraper.harvest(&campaign).await?.into_iter().collect();
            contacts.sort();
            info!("Scrape found {} contacts", contacts.len());
            println!("{}", serde_json::to_string_pretty(&contacts)?);
        }
        Commands::Dispatch {
            subject,
            template,
            platform,
            contact_type,
            site,
        } => {
            let html_template = std::fs::read_to_string(&template)?;

            let store = store::ContactStore::connect(config.database_url()?).await?;
            store.ensure_schema().await?;
            let mailer = mailer::SmtpMailer::new(&config.smtp()?)?;
            let scraper = harvest::SearchScraper::new(&config)?;
            let settings = ledger::ReconcilerSettings {
                batch_size: config.batch_size,
                backfill_queries: config.backfill_queries.clone(),
                backfill_locations: config.backfill_locations.clone(),
            };
            let reconciler = ledger::Reconciler::new(store, mailer, scraper, settings);

            let seed = models::CampaignSeed {
                platform,
                contact_type,
                site,
            };
            let mail = models::MailContent {
                subject,
                html_template,
            };
            let report = reconciler.drain_and_dispatch(&seed, &mail).await?;
            info!("Dispatched {} contacts", report.sent.len());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
