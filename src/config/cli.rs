use crate::domain::model::CityStatus;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "postex-sync")]
#[command(about = "PostEx shipment booking, airway bills and status sync")]
pub struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "postex.toml")]
    pub config: String,

    /// PostEx API token; overrides POSTEX_API_KEY and the config file
    #[arg(long)]
    pub api_key: Option<String>,

    /// Override the data directory from the config file
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Install the default verified cities into an empty table
    Seed,
    /// Show which spelling a city would be booked with
    Resolve { city: String },
    /// Review and curate learned city mappings
    #[command(subcommand)]
    Cities(CitiesCommand),
    /// Book a parcel with PostEx
    Book(BookArgs),
    /// List PostEx orders in a date window (at most 30 days)
    Shipments {
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Download airway bills (first 10 tracking numbers only)
    Documents {
        #[arg(required = true, value_delimiter = ',')]
        tracking_numbers: Vec<String>,
        /// Directory the PDF is written to
        #[arg(short, long, default_value = ".")]
        output: String,
    },
    /// Reconcile local shipment status with PostEx once
    Sync,
    /// Run the periodic status sync until interrupted
    Serve {
        /// Run a sync immediately at startup
        #[arg(long)]
        sync_now: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum CitiesCommand {
    List {
        #[arg(long)]
        status: Option<CityStatus>,
        #[arg(long, default_value = "1")]
        page: usize,
        #[arg(long, default_value = "20")]
        per_page: usize,
    },
    Stats,
    Add {
        city: String,
        /// Spelling PostEx expects; defaults to the city name
        #[arg(long)]
        format: Option<String>,
        /// Store as pending instead of verified
        #[arg(long)]
        pending: bool,
    },
    Delete { city: String },
    Verify { city: String },
    /// Import `city,carrier_format,status` rows
    Import { path: String },
}

#[derive(Debug, Args)]
pub struct BookArgs {
    #[arg(long)]
    pub order_id: String,
    #[arg(long)]
    pub customer_name: String,
    #[arg(long)]
    pub customer_phone: String,
    #[arg(long)]
    pub address: String,
    #[arg(long)]
    pub city: String,
    #[arg(long)]
    pub invoice_payment: f64,
    #[arg(long)]
    pub weight: Option<f64>,
    /// LxWxH in centimetres
    #[arg(long)]
    pub dimensions: Option<String>,
    /// Items as `qty:name`, repeatable
    #[arg(long = "item")]
    pub items: Vec<String>,
}
