//! pdfsmith - merge and split PDF documents.

use clap::Parser;
use std::process;

use pdfsmith::cli::{self, Cli};
use pdfsmith::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbosity());

    match cli::run(cli).await {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(err.exit_code());
        }
    }
}
