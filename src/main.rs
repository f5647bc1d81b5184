use clap::Parser;
use postex_sync::config::cli::{BookArgs, CitiesCommand, Cli, Command};
use postex_sync::config::{AppConfig, API_KEY_ENV};
use postex_sync::core::city_store::import_csv;
use postex_sync::domain::model::{BookingRequest, CityFilter, CityStatus, OrderItem, Pagination};
use postex_sync::domain::ports::{CarrierClient, CityStore};
use postex_sync::utils::error::{ErrorSeverity, Result};
use postex_sync::utils::{logger, validation::Validate};
use postex_sync::{
    BookingService, CityTable, LearningEngine, LocalStorage, OrderLedger, PostExClient,
    StatusReconciler, SyncOutcome, SyncScheduler,
};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match AppConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", cli.config, e);
            eprintln!("💡 Make sure the file is valid TOML format");
            std::process::exit(1);
        }
    };

    // 初始化日誌
    let log_level = config.monitoring.log_level.clone();
    if matches!(cli.command, Command::Serve { .. }) {
        logger::init_service_logger(cli.verbose, log_level.as_deref());
    } else {
        logger::init_cli_logger(cli.verbose, log_level.as_deref());
    }

    config.resolve_api_key(cli.api_key.clone(), std::env::var(API_KEY_ENV).ok());
    if let Some(data_dir) = cli.data_dir.clone() {
        config.storage.data_dir = data_dir;
    }

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());
        std::process::exit(1);
    }

    if let Err(e) = run(cli.command, config).await {
        tracing::error!(
            "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

async fn run(command: Command, config: AppConfig) -> Result<()> {
    let storage = LocalStorage::new(&config.storage.data_dir);
    tracing::debug!(data_dir = %storage.base_path().display(), "Using data directory");

    match command {
        Command::Seed => {
            let cities = CityTable::open(storage).await?;
            let added = cities.seed_defaults().await?;
            println!("🌱 {} default cities installed", added);
        }
        Command::Resolve { city } => {
            let cities = Arc::new(CityTable::open(storage).await?);
            let engine = LearningEngine::new(cities, config.learning.enabled);
            let resolution = engine.resolve(&city).await?;
            println!(
                "{} -> '{}' (key: '{}', {})",
                resolution.raw_city,
                resolution.carrier_format,
                resolution.normalized_key,
                if resolution.is_verified { "verified" } else { "unverified" }
            );
        }
        Command::Cities(cmd) => {
            let cities = CityTable::open(storage).await?;
            run_cities(cmd, &cities).await?;
        }
        Command::Book(args) => {
            config.validate_for_booking()?;
            let cities = Arc::new(CityTable::open(storage.clone()).await?);
            let orders = Arc::new(OrderLedger::open(storage, config.shipping.next_ref_number).await?);
            let carrier = Arc::new(PostExClient::new(&config.carrier)?);

            let service = BookingService::new(
                LearningEngine::new(cities, config.learning.enabled),
                carrier,
                orders,
                config.shipping.clone(),
            );
            let receipt = service.book(&booking_request(args)).await?;

            println!("✅ PostEx order created");
            println!("   Tracking: {}", receipt.tracking_number);
            println!("   Status:   {}", receipt.order_status);
            println!("   Ref:      {}", receipt.order_ref_number);
            println!("   City:     {}", receipt.city.carrier_format);
            if let Some(warning) = &receipt.ledger_warning {
                println!("⚠️  {}", warning);
                println!("💡 Do not book this order again; note the tracking number above");
            }
        }
        Command::Shipments { start, end } => {
            let carrier = PostExClient::new(&config.carrier)?;
            let shipments = carrier.list_shipments(start, end).await?;
            for shipment in &shipments {
                println!(
                    "{}\t{}\t{}",
                    shipment.tracking_number,
                    shipment.status(),
                    shipment.order_ref_number.as_deref().unwrap_or("-")
                );
            }
            println!("📦 {} orders", shipments.len());
        }
        Command::Documents {
            tracking_numbers,
            output,
        } => {
            let carrier = PostExClient::new(&config.carrier)?;
            let bill = carrier.fetch_documents(&tracking_numbers).await?;
            tokio::fs::create_dir_all(&output).await?;
            let path = Path::new(&output).join(&bill.filename);
            tokio::fs::write(&path, &bill.data).await?;
            println!(
                "📁 Airway bills for {} saved to: {}",
                bill.tracking_numbers.join(","),
                path.display()
            );
        }
        Command::Sync => {
            let reconciler = reconciler(&config, storage).await?;
            match reconciler.reconcile_once().await? {
                SyncOutcome::Completed(report) => println!(
                    "✅ Status sync completed - {} orders updated out of {} checked ({} known locally)",
                    report.updated, report.checked, report.matched
                ),
                SyncOutcome::AlreadyRunning => println!("⏳ Status sync already running"),
            }
        }
        Command::Serve { sync_now } => {
            let reconciler = Arc::new(reconciler(&config, storage).await?);
            let scheduler = SyncScheduler::every_hours(reconciler, config.sync.interval_hours);
            let handle = scheduler.spawn(sync_now);

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutdown requested");
            scheduler.shutdown();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler task ended abnormally");
            }
        }
    }

    Ok(())
}

async fn reconciler(
    config: &AppConfig,
    storage: LocalStorage,
) -> Result<StatusReconciler<PostExClient, OrderLedger<LocalStorage>>> {
    let orders = Arc::new(OrderLedger::open(storage, config.shipping.next_ref_number).await?);
    let carrier = Arc::new(PostExClient::new(&config.carrier)?);
    Ok(StatusReconciler::new(carrier, orders, config.sync.window_days))
}

async fn run_cities(cmd: CitiesCommand, cities: &CityTable<LocalStorage>) -> Result<()> {
    match cmd {
        CitiesCommand::List {
            status,
            page,
            per_page,
        } => {
            let filter = status.map(CityFilter::Status).unwrap_or_default();
            let listing = cities.list(filter, Pagination { page, per_page }).await?;
            for record in &listing.records {
                println!(
                    "{:<24} {:<24} {:<9} ok:{:<4} fail:{:<4} {}",
                    record.normalized_key,
                    record.carrier_format,
                    record.status,
                    record.success_count,
                    record.failure_count,
                    record
                        .last_used
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".to_string())
                );
            }
            println!(
                "page {}/{} ({} cities)",
                listing.page,
                listing.total_pages.max(1),
                listing.total
            );
        }
        CitiesCommand::Stats => {
            let stats = cities.stats().await?;
            println!(
                "total: {}  verified: {}  failed: {}  pending: {}",
                stats.total, stats.verified, stats.failed, stats.pending
            );
        }
        CitiesCommand::Add {
            city,
            format,
            pending,
        } => {
            let status = if pending {
                CityStatus::Pending
            } else {
                CityStatus::Verified
            };
            let format = format.unwrap_or_else(|| city.trim().to_string());
            let record = cities.insert(&city, &format, status).await?;
            println!(
                "✅ '{}' -> '{}' ({})",
                record.normalized_key, record.carrier_format, record.status
            );
        }
        CitiesCommand::Delete { city } => {
            if cities.delete(&city).await? {
                println!("🗑️  City deleted");
            } else {
                println!("City '{}' not found", city);
            }
        }
        CitiesCommand::Verify { city } => match cities.force_verify(&city).await? {
            Some(record) => println!("✅ '{}' verified", record.normalized_key),
            None => println!("City '{}' not found", city),
        },
        CitiesCommand::Import { path } => {
            let file = std::fs::File::open(&path)?;
            let imported = import_csv(cities, file).await?;
            println!("📥 {} cities imported from {}", imported, path);
        }
    }
    Ok(())
}

fn booking_request(args: BookArgs) -> BookingRequest {
    let items = args
        .items
        .iter()
        .map(|raw| match raw.split_once(':') {
            Some((qty, name)) => match qty.trim().parse::<u32>() {
                Ok(quantity) => OrderItem {
                    name: name.trim().to_string(),
                    quantity,
                },
                Err(_) => OrderItem {
                    name: raw.trim().to_string(),
                    quantity: 1,
                },
            },
            None => OrderItem {
                name: raw.trim().to_string(),
                quantity: 1,
            },
        })
        .collect();

    BookingRequest {
        order_id: args.order_id,
        customer_name: args.customer_name,
        customer_phone: args.customer_phone,
        delivery_address: args.address,
        city: args.city,
        invoice_payment: args.invoice_payment,
        weight: args.weight,
        dimensions: args.dimensions,
        items,
    }
}
