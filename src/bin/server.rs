//! Standalone presence server binary.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin server
//! cargo run --bin server -- --bind 0.0.0.0:9090
//! RUST_LOG=vellum_collab=debug cargo run --bin server
//! ```

use clap::Parser;

use vellum_collab::{PresenceServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Vellum presence server", long_about = None)]
struct Args {
    /// Address to bind the WebSocket listener to
    #[arg(short, long, default_value = "127.0.0.1:9090")]
    bind: String,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let server = PresenceServer::new(ServerConfig { bind_addr: args.bind });
    if let Err(e) = server.run().await {
        log::error!("Server failed: {e}");
        std::process::exit(1);
    }
}
