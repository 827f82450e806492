mod ingest;
mod log;
mod session;
mod signal;
mod web;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use fanout::Registry;

use crate::session::Sessions;

/// A multi-stream H.264 fan-out relay: WebSocket ingest, WebRTC egress.
#[derive(Parser, Clone)]
struct Cli {
	/// The address to bind.
	#[arg(long, default_value = "localhost")]
	host: String,

	/// The port to bind.
	#[arg(long, default_value_t = 8080)]
	port: u16,

	/// Serve HTTPS/WSS with this certificate.
	#[arg(long, requires = "key_file")]
	cert_file: Option<PathBuf>,

	/// The private key matching the certificate.
	#[arg(long, requires = "cert_file")]
	key_file: Option<PathBuf>,

	#[command(flatten)]
	log: log::Log,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	rustls::crypto::aws_lc_rs::default_provider()
		.install_default()
		.expect("failed to install default crypto provider");

	let cli = Cli::parse();
	cli.log.init();

	let registry = Registry::new();
	let sessions = Arc::new(Sessions::new().context("failed to initialize negotiation engine")?);

	let router = web::router(web::AppState {
		registry: registry.clone(),
		sessions: sessions.clone(),
	});

	let addr = tokio::net::lookup_host((cli.host.as_str(), cli.port))
		.await
		.context("invalid bind address")?
		.next()
		.context("invalid bind address")?;

	let scheme = if cli.cert_file.is_some() { "https" } else { "http" };
	tracing::info!("ingest:    {scheme}://{}:{}/ws/{{stream_id}}", cli.host, cli.port);
	tracing::info!("signaling: {scheme}://{}:{}/offer/{{stream_id}}", cli.host, cli.port);

	// Notify systemd that we're ready.
	#[cfg(unix)]
	let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

	tokio::select! {
		res = serve(addr, cli.cert_file, cli.key_file, router) => res?,
		_ = tokio::signal::ctrl_c() => {
			tracing::info!(sessions = sessions.len(), streams = registry.len(), "shutting down");
		}
	}

	sessions.close_all().await;
	registry.close_all();

	Ok(())
}

async fn serve(
	addr: SocketAddr,
	cert: Option<PathBuf>,
	key: Option<PathBuf>,
	router: axum::Router,
) -> anyhow::Result<()> {
	match (cert, key) {
		(Some(cert), Some(key)) => {
			anyhow::ensure!(cert.is_file(), "certificate file not found: {}", cert.display());
			anyhow::ensure!(key.is_file(), "key file not found: {}", key.display());

			let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
				.await
				.context("failed to load TLS certificate")?;

			tracing::info!(%addr, "listening with TLS");
			axum_server::bind_rustls(addr, tls)
				.serve(router.into_make_service())
				.await?;
		}
		_ => {
			tracing::info!(%addr, "listening");
			axum_server::bind(addr).serve(router.into_make_service()).await?;
		}
	}

	Ok(())
}
