use clap::Parser;
use drawdown::api::{Cli, Command, run_command, run_http_server};
use drawdown::logging::init_logging;

#[tokio::main]
async fn main() {
    init_logging("info");
    let cli = Cli::parse();

    if let Command::Serve { port } = cli.command {
        if let Err(e) = run_http_server(port).await {
            tracing::error!(error = %e, "Server error");
            std::process::exit(1);
        }
        return;
    }

    match run_command(&cli.command) {
        Ok(Some(json)) => println!("{json}"),
        Ok(None) => {}
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
