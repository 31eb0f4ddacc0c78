use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use vless_relay::{
    ClientStream, ProxyAllowlist, handle_connection, load_config, load_tls_config,
    resolve_user_id,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = load_config()?;
    let user_id = Arc::new(resolve_user_id(&config)?);
    let allowlist = Arc::new(ProxyAllowlist::parse(
        config.listen.allowed_proxy_ips.as_deref(),
    )?);

    let tls_acceptor = match &config.listen.tls {
        Some(tls) => Some(TlsAcceptor::from(Arc::new(load_tls_config(tls)?))),
        None => None,
    };

    info!(
        config_file = "config.toml",
        listen_ip = %config.listen.ip,
        listen_port = config.listen.port,
        tls = tls_acceptor.is_some(),
        "Configuration loaded"
    );

    let addr = format!("{}:{}", config.listen.ip, config.listen.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to address {addr}"))?;

    info!(listen_addr = %addr, "VLESS relay listening");

    while let Ok((stream, peer)) = listener.accept().await {
        if !allowlist.permits(peer.ip()) {
            warn!(peer_addr = %peer, "Rejecting connection from unlisted proxy");
            continue;
        }

        let user_id = user_id.clone();
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let stream = match tls_acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => ClientStream::Tls(Box::new(tls_stream)),
                    Err(e) => {
                        error!(peer_addr = %peer, error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => ClientStream::Plain(stream),
            };

            if let Err(e) = handle_connection(stream, user_id).await {
                error!(client_addr = %peer, error = %e, "Connection failed");
            }
        });
    }

    Ok(())
}
