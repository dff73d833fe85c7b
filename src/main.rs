use snipbin::config::AppConfig;
use snipbin::server::launch;

#[rocket::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            log::error!("failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    log::info!(
        "starting snipbin on {}:{} (encrypted ids: {})",
        config.address,
        config.port,
        config.use_encrypted_ids
    );
    if let Err(err) = launch(config).await {
        log::error!("server exited with error: {err}");
        std::process::exit(1);
    }
}
