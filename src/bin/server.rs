//! Entry point: loads config, starts the Engine's background loops, then
//! serves the gateway until a shutdown signal arrives.

use taskflow::config::load_default_config;
use taskflow::{init_logging, Engine};

#[tokio::main]
async fn main() {
    let config = load_default_config();
    let _log_guard = init_logging(&config);

    if config.jwt_secret.is_none() {
        eprintln!(
            "refusing to start: TASKFLOW_JWT_SECRET is unset. The gateway's bearer-token gate \
             is a collaborator contract stand-in only, not a production auth system, but it \
             still requires a configured secret before it will serve a single request."
        );
        std::process::exit(1);
    }

    let engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to initialize engine: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = engine.start().await {
        eprintln!("failed to start engine: {e}");
        std::process::exit(1);
    }

    tokio::select! {
        result = engine.serve_gateway() => {
            if let Err(e) = result {
                log::error!("gateway exited with error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("received shutdown signal");
        }
    }

    engine.stop();
}
