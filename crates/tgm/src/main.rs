mod cli;

use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli::execute(cli).await {
        tracing::error!(error = %e, "monitor exited with an error");
        eprintln!("Error: {e:#}");
        if let Some(hint) = e.downcast_ref::<tgm_core::Error>().and_then(tgm_core::Error::remediation) {
            eprintln!("Hint: {hint}");
        }
        std::process::exit(1);
    }
}
