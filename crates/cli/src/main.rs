//! `imgsmith` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`       — start the worker-facing API server.
//! - `check-state` — load a state directory and print a summary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use api::{WorkerServer, WriteImageFn};
use queue::JobQueue;
use store::Store;

#[derive(Parser)]
#[command(
    name = "imgsmith",
    about = "OS image build service: persistent job queue and compose state store",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the worker-facing API server.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8700")]
        bind: String,
        /// Directory holding state.json, outputs/, and the job queue.
        #[arg(long, env = "IMGSMITH_STATE_DIR", default_value = "/var/lib/imgsmith")]
        state_dir: PathBuf,
    },
    /// Load a state directory and print a summary of its contents.
    CheckState {
        #[arg(long, env = "IMGSMITH_STATE_DIR", default_value = "/var/lib/imgsmith")]
        state_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, state_dir } => {
            info!(
                "starting imgsmith on {bind} (state in {})",
                state_dir.display()
            );

            let store = Arc::new(Store::new(Some(&state_dir)));

            let queue_dir = state_dir.join("queue");
            std::fs::create_dir_all(&queue_dir).expect("cannot create queue directory");
            let jobs = Arc::new(JobQueue::new(&queue_dir).expect("cannot open job queue"));

            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::signal::ctrl_c().await.ok();
                    info!("shutting down");
                    cancel.cancel();
                });
            }

            // Uploaded images land in the compose's output directory via
            // the store's local target.
            let image_writer: Arc<WriteImageFn> = {
                let store = Arc::clone(&store);
                Arc::new(move |compose_id, build_id, mut reader| {
                    store
                        .add_image_to_image_upload(compose_id, build_id, &mut *reader)
                        .map_err(|err| {
                            std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
                        })
                })
            };

            let server = WorkerServer::new(jobs, Some(image_writer), cancel);
            api::serve(&bind, server).await.expect("server failed");
        }
        Command::CheckState { state_dir } => {
            let store = Store::new(Some(&state_dir));
            println!("blueprints: {}", store.list_blueprints().len());
            println!("sources:    {}", store.list_sources().len());
            println!("composes:   {}", store.get_all_composes().len());
        }
    }
}
