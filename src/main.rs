mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

use shiftcast_core::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults off the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "shiftcast=debug,shiftcast_server=debug,shiftcast_db=debug,shiftcast_media=debug,tower_http=debug"
                .to_string()
        } else {
            "shiftcast=info,shiftcast_server=info,shiftcast_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    match cli.command {
        Commands::Start { listen } => {
            let config_path = cli
                .config
                .ok_or_else(|| anyhow::anyhow!("--config must be provided"))?;
            let mut config = Config::load(&config_path)?;
            if let Some(listen) = listen {
                config.listen = listen;
            }

            tracing::info!("starting shiftcast");
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(shiftcast_server::start(config))?;
            Ok(())
        }
        Commands::Validate => {
            let config_path = cli
                .config
                .ok_or_else(|| anyhow::anyhow!("--config must be provided"))?;
            let config = Config::load(&config_path)?;
            println!("configuration is valid");
            println!("  listen: {}", config.listen);
            println!("  chunk dir: {}", config.chunk_dir.display());
            println!("  max offset: {}s", config.max_offset.as_secs());
            println!("  streams: {}", config.streams.len());
            for s in &config.streams {
                println!("    {} ({}) <- {}", s.id, s.name, s.url);
            }
            Ok(())
        }
        Commands::Version => {
            println!("shiftcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
