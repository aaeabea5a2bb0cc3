use prefork_httpd::config::{config_path, Settings};
use prefork_httpd::supervisor;

fn main() -> anyhow::Result<()> {
    // Installed before any fork so every worker inherits it
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let path = config_path(std::env::args());
    let settings = Settings::load(&path)?;

    supervisor::start(&settings)?;

    Ok(())
}
