//! Runs the toolbridge service.
//!
//! Usage: `cargo run --bin serve [config.json]`

use toolbridge::config::Config;
use toolbridge::server::Server;

#[tokio::main]
async fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .unwrap_or_else(|error| panic!("failed to read config {path}: {error}"));
            serde_json::from_str::<Config>(&raw)
                .unwrap_or_else(|error| panic!("failed to parse config {path}: {error}"))
        }
        None => Config::default(),
    };

    let mut server = Server::start(config).await.expect("failed to start server");
    println!("toolbridge listening on http://{}", server.addr());

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    server.shutdown().await;
}
