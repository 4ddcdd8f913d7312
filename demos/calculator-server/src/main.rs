//! # Calculator Server
//!
//! JSON-RPC calculator on a single port. Plain HTTP always works; pass
//! `--cert` and `--key` to also accept HTTPS on the same port.
//!
//! ```text
//! curl -s localhost:8080 -d '{"jsonrpc":"2.0","method":"add","params":[1,2],"id":1}'
//! {"jsonrpc":"2.0","result":3,"id":1}
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;
use turul_rpc_server::turul_rpc_core::Json;
use turul_rpc_server::{JsonRpcServer, TlsConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Path that accepts JSON-RPC requests
    #[arg(long, default_value = "/")]
    path: String,

    /// PEM certificate chain; enables TLS together with --key
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Idle timeout in seconds
    #[arg(long, default_value = "30")]
    idle_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    #[serde(default)]
    id: String,
    email: String,
    name: String,
    password: String,
}

impl User {
    fn validate(&self) -> Result<(), &'static str> {
        if self.name.len() < 4 {
            return Err("Name is too short");
        }
        if self.password.len() < 4 {
            return Err("Password is too short");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let count = Arc::new(AtomicUsize::new(0));

    let status_count = Arc::clone(&count);
    let inc_count = Arc::clone(&count);
    let user_count = Arc::clone(&count);

    let mut builder = JsonRpcServer::builder()
        .bind_address(args.bind)
        .rpc_path(args.path)
        .idle_timeout(Duration::from_secs(args.idle_timeout))
        .method("add", |a: i64, b: i64| a + b)
        .method("mul", |a: i64, b: i64| a * b)
        .method("status", move || status_count.load(Ordering::SeqCst))
        .method("inc_count", move || inc_count.fetch_add(1, Ordering::SeqCst))
        .method("create_user", move |mut user: User| -> Result<Json<User>, &'static str> {
            user.validate()?;
            user.id = "1000000".to_string();
            user_count.fetch_add(1, Ordering::SeqCst);
            Ok(Json(user))
        });

    if let (Some(cert), Some(key)) = (&args.cert, &args.key) {
        builder = builder.tls(TlsConfig::from_pem_files(cert, key)?);
        info!(cert = %cert.display(), "TLS enabled");
    }

    let server = builder.build()?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!(count = count.load(Ordering::SeqCst), "Calculator server stopped");
    Ok(())
}
