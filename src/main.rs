use std::env;

use wattwatch::{Config, app};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("wattwatch=info"))
        .init();

    let mut config = Config::from_env()?;

    // Optional positional bind address, e.g. `wattwatch 0.0.0.0:8080`
    if let Some(bind) = env::args().nth(1) {
        config.bind = bind;
    }

    // Start the web application
    app::run(config).await?;

    Ok(())
}
