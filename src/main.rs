use countersign::api;
use countersign::logger::*;
use countersign::server::*;
use countersign::settings::*;
use std::fs;
use std::sync::Arc;
use tokio::signal;

fn ensure_file(path: &str, what: &str) -> anyhow::Result<()> {
    if !fs::metadata(path)?.is_file() {
        return Err(anyhow::anyhow!("TLS {} is not a regular file: {:?}", what, path));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    info!(?project_settings);
    logger.reload_from_config(&LogConfig::from(&project_settings.log))?;

    let address: std::net::SocketAddr = project_settings.http.address.parse()?;

    let server = Arc::new(Server::try_new(&project_settings).await?);
    let app = api::v1::app(server.clone());

    let shutdown_signal = async {
        signal::ctrl_c().await.expect("Could not register SIGINT");
    };

    match project_settings.http.tls_paths() {
        Some((cert_path, key_path)) => {
            ensure_file(cert_path, "cert")?;
            ensure_file(key_path, "key")?;
            let (bound, serving) = warp::serve(app)
                .tls()
                .cert_path(cert_path)
                .key_path(key_path)
                .bind_with_graceful_shutdown(address, shutdown_signal);
            info!(%bound, "listening (tls)");
            serving.await;
        }
        None => {
            let (bound, serving) =
                warp::serve(app).try_bind_with_graceful_shutdown(address, shutdown_signal)?;
            info!(%bound, "listening");
            serving.await;
        }
    }

    let shutdown_timeout = std::time::Duration::from_secs(30);
    match tokio::time::timeout(shutdown_timeout, server.shutdown()).await {
        Ok(_) => info!("server shutdown successfully"),
        Err(_) => error!("server shutdown timed out"),
    }

    Ok(())
}
