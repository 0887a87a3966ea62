//! Exchange proxy CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use proxy_core::{init_logging, ApiCredentials, LogConfig, LogFormat, Market, ProcessEnv, ProxySettings};
use proxy_exchange::{ExchangeResult, PoloniexConfig, PoloniexPublicClient, PoloniexTradingClient};
use proxy_service::registry::TradingClient;
use proxy_service::{ProxyService, RefreshScheduler};

#[derive(Parser)]
#[command(name = "exchange-proxy")]
#[command(about = "Caching and retrying proxy between a trading bot and the exchange", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 경로 (기본: config/proxy.*)
    #[arg(long)]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 로그 형식 (pretty, json, compact)
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// 거래소 REST API 기본 URL
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 설정된 모든 기본 키와 로테이션 키 점검
    CheckKeys,

    /// 데몬 모드: 캐시 예열 작업을 종료 신호까지 실행
    Daemon,

    /// 전체 시세 출력
    Ticker,

    /// 호가창 출력
    OrderBook {
        /// 통화쌍 (예: BTC_ETH)
        pair: String,
    },

    /// 전체 잔고 출력
    Balances {
        #[arg(long, default_value = "BTC")]
        market: Market,
    },
}

fn build_service(cli: &Cli, settings: ProxySettings) -> anyhow::Result<ProxyService> {
    let exchange = match &cli.base_url {
        Some(url) => PoloniexConfig::default().with_base_url(url.as_str()),
        None => PoloniexConfig::default(),
    };

    let public = PoloniexPublicClient::new(exchange.clone()).context("failed to create public client")?;
    let factory = move |credentials: ApiCredentials| -> ExchangeResult<TradingClient> {
        Ok(Arc::new(PoloniexTradingClient::new(exchange.clone(), credentials)?))
    };

    let env = ProcessEnv::load_dotenv();
    match ProxyService::bootstrap(&env, &factory, Arc::new(public), settings) {
        Ok(service) => Ok(service),
        Err(e) if e.is_fatal() => {
            tracing::error!("{}", e);
            Err(e.into())
        }
        Err(e) => Err(e).context("failed to initialize credentials"),
    }
}

async fn check_keys(service: &ProxyService) -> anyhow::Result<()> {
    let mut failures = 0usize;

    let mut markets = service.active_markets();
    if markets.is_empty() && service.registry().fallback_default().is_some() {
        markets.push(Market::Btc);
    }
    for market in markets {
        match service.check_default_key(market).await {
            Ok(_) => tracing::info!(%market, "Default key OK"),
            Err(e) => {
                failures += 1;
                tracing::error!(%market, error = %e, "Default key check failed");
            }
        }
    }

    let pool_keys: Vec<String> = service
        .registry()
        .rotation_pool()
        .iter()
        .map(|(key, _)| key.clone())
        .collect();
    for key in pool_keys {
        let masked = proxy_core::mask_key(&key);
        match service.check_trading_key(&key).await {
            Ok(_) => tracing::info!(key = %masked, "Trading key OK"),
            Err(e) => {
                failures += 1;
                tracing::error!(key = %masked, error = %e, "Trading key check failed");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} key check(s) failed", failures);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig::new(cli.log_level.as_str()).with_format(cli.log_format))
        .map_err(|e| anyhow::anyhow!(e))?;

    let settings = ProxySettings::load(cli.config.as_deref()).context("failed to load settings")?;
    let service = Arc::new(build_service(&cli, settings.clone())?);
    tracing::info!(
        multi_market = service.is_multi_market(),
        test_mode = settings.test_mode,
        "Exchange proxy ready"
    );

    match cli.command {
        Commands::CheckKeys => check_keys(&service).await?,
        Commands::Ticker => println!("{}", service.ticker().await?),
        Commands::OrderBook { pair } => println!("{}", service.order_book(&pair).await?),
        Commands::Balances { market } => println!("{}", service.complete_balances(market).await?),
        Commands::Daemon => {
            let scheduler = RefreshScheduler::start(service.clone(), &settings.scheduler);
            tracing::info!(tasks = scheduler.task_count(), "Daemon mode started");

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received");
            scheduler.shutdown().await;
        }
    }

    tracing::info!("Exchange proxy stopped");
    Ok(())
}
