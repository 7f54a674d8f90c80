//! Main application entry point for the chess sync server

use chess_sync::{Application, Args};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let app = Application::new(args).await?;
    app.run().await
}
