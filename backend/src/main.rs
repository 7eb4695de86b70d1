//! Escrow worker entry-point: wires adapters and runs the deadline sweep.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Context, Result, eyre};
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use reqwest::Url;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use escrow_backend::config::EscrowSettings;
use escrow_backend::domain::ports::{
    EscrowMetrics, FixturePaymentGateway, PaymentGateway, ReviewRepository, TransactionRepository,
    UserStatisticsRepository,
};
use escrow_backend::domain::{EscrowService, EscrowServicePorts, SweepReport};
use escrow_backend::outbound::memory::InMemoryEscrowStore;
use escrow_backend::outbound::notifications::TracingNotificationDispatcher;
use escrow_backend::outbound::payments::HttpPaymentGateway;
use escrow_backend::outbound::persistence::{
    DbPool, DieselReviewRepository, DieselTransactionRepository, DieselUserStatisticsRepository,
    run_pending_migrations,
};

/// `escrow-backend` command arguments.
///
/// Runtime settings come from `ESCROW_*` environment variables.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "escrow-backend",
    about = "Run the escrow deadline sweep against the configured store",
    version
)]
struct CliArgs {
    /// Run a single sweep pass and exit.
    #[arg(long)]
    once: bool,
}

struct Stores {
    transactions: Arc<dyn TransactionRepository>,
    statistics: Arc<dyn UserStatisticsRepository>,
    reviews: Arc<dyn ReviewRepository>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let args = CliArgs::parse();
    let settings = EscrowSettings::load_from_iter([OsString::from("escrow-backend")])
        .map_err(|err| eyre!("failed to load escrow settings: {err}"))?;

    let service = build_service(&settings).await?;
    let clock = DefaultClock;

    if args.once {
        let report = service.sweep(clock.utc()).await?;
        log_report(&report);
        return Ok(());
    }

    let mut ticker = tokio::time::interval(settings.sweep_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval = ?settings.sweep_interval(), "escrow sweep worker started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.sweep(clock.utc()).await {
                    Ok(report) => log_report(&report),
                    Err(err) => error!(error = %err, "escrow sweep failed"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.wrap_err("failed to listen for shutdown signal")?;
                info!("escrow sweep worker stopping");
                return Ok(());
            }
        }
    }
}

async fn build_service(settings: &EscrowSettings) -> Result<EscrowService> {
    let stores = build_stores(settings).await?;
    let ports = EscrowServicePorts::new(
        stores.transactions,
        stores.statistics,
        stores.reviews,
        build_payments(settings)?,
        Arc::new(TracingNotificationDispatcher),
        build_metrics()?,
    );
    Ok(EscrowService::new(
        ports,
        Arc::new(DefaultClock),
        Arc::new(settings.trust_policy()),
        settings.service_config(),
    ))
}

async fn build_stores(settings: &EscrowSettings) -> Result<Stores> {
    let Some(pool_config) = settings.pool_config() else {
        warn!("ESCROW_DATABASE_URL not set; using the in-memory store");
        let store = Arc::new(InMemoryEscrowStore::new());
        return Ok(Stores {
            transactions: store.clone(),
            statistics: store.clone(),
            reviews: store,
        });
    };

    if settings.run_migrations {
        run_pending_migrations(pool_config.database_url())
            .await
            .wrap_err("failed to apply migrations")?;
    }
    let pool = DbPool::new(pool_config)
        .await
        .wrap_err("failed to build database pool")?;
    Ok(Stores {
        transactions: Arc::new(DieselTransactionRepository::new(pool.clone())),
        statistics: Arc::new(DieselUserStatisticsRepository::new(pool.clone())),
        reviews: Arc::new(DieselReviewRepository::new(pool)),
    })
}

fn build_payments(settings: &EscrowSettings) -> Result<Arc<dyn PaymentGateway>> {
    let Some(raw_url) = settings.payment_gateway_url.as_deref() else {
        warn!("ESCROW_PAYMENT_GATEWAY_URL not set; using the fixture payment gateway");
        return Ok(Arc::new(FixturePaymentGateway));
    };
    let base_url = Url::parse(raw_url).wrap_err("invalid payment gateway URL")?;
    let gateway = HttpPaymentGateway::new(
        base_url,
        settings.payment_timeout(),
        settings.payment_api_key.clone(),
    )
    .wrap_err("failed to build payment gateway client")?;
    Ok(Arc::new(gateway))
}

#[cfg(feature = "metrics")]
fn build_metrics() -> Result<Arc<dyn EscrowMetrics>> {
    use escrow_backend::outbound::metrics::PrometheusEscrowMetrics;

    let metrics = PrometheusEscrowMetrics::new(prometheus::default_registry())
        .wrap_err("failed to register escrow metrics")?;
    Ok(Arc::new(metrics))
}

#[cfg(not(feature = "metrics"))]
fn build_metrics() -> Result<Arc<dyn EscrowMetrics>> {
    use escrow_backend::domain::ports::NoOpEscrowMetrics;

    Ok(Arc::new(NoOpEscrowMetrics))
}

fn log_report(report: &SweepReport) {
    info!(
        expired_pending = report.expired_pending,
        expired_deposits = report.expired_deposits,
        flagged_stale_claims = report.flagged_stale_claims,
        reputation_redriven = report.reputation_redriven,
        skipped_flagged = report.skipped_flagged,
        failures = report.failures,
        "escrow sweep complete"
    );
}
