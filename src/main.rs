//! technote-digest: binary entrypoint.
//! Parses the command line and hands over to `cli::run`.

use technote_digest::{cli, logging};

#[tokio::main]
async fn main() {
    // Load .env in local/dev; a missing file is fine.
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    let parsed = match cli::parse_args(std::env::args().skip(1)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}\n\n{}", cli::HELP);
            std::process::exit(2);
        }
    };

    if let Err(e) = cli::run(parsed).await {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
