use clap::Parser;
use kube::client::Client;

mod config;
mod namespaces;
mod sessions;
mod util;

use config::OperatorArgs;

/// Secondary entrypoint that runs the session controller and the namespace
/// watcher side by side. The metrics scrape server, when enabled, is spawned
/// by [`sessions::run`] once its Prometheus registry exists.
async fn run(client: Client, args: OperatorArgs) {
    let namespace_client = client.clone();
    tokio::spawn(async move {
        if let Err(e) = namespaces::run(namespace_client).await {
            eprintln!("namespace watcher exited with error: {e}");
        }
    });

    sessions::run(client, args).await.unwrap();

    panic!("exited unexpectedly");
}

/// Main entrypoint that sets up the environment before running the secondary entrypoint `run`.
#[tokio::main]
async fn main() {
    ambient_code_common::init();

    let args = OperatorArgs::parse();

    // Create a kubernetes client using the default configuration.
    // In-cluster, the kubeconfig will be set by the service account.
    let client: Client = Client::try_default()
        .await
        .expect("Expected a valid KUBECONFIG environment variable.");

    run(client, args).await;

    // This is an unreachable branch. The controllers and metrics
    // servers should never exit without a panic.
    panic!("exited prematurely");
}
