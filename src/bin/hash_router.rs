use prefork_httpd::config::RouterConfig;
use prefork_httpd::proxy::router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ROUTER_CONFIG").ok())
        .unwrap_or_else(|| "router.yaml".to_string());
    let cfg = RouterConfig::load(&path)?;

    tokio::select! {
        res = router::run(&cfg) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
