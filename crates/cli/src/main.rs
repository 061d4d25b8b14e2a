use agent_relay_cli::{cli::Cli, commands, logging};
use clap::Parser;
use colored::Colorize;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		eprintln!("{} {err:#}", "error:".red().bold());
		std::process::exit(1);
	}
}
