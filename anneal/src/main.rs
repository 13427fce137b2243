use anneal_lib::Cli;
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    anneal_lib::services::logger::init();

    if let Err(e) = anneal_lib::run(cli).await {
        eprintln!("anneal: {}", e);
        std::process::exit(1);
    }
}
