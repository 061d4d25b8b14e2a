use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Overrides;
use crate::styles::cli_styles;

#[derive(Parser, Debug)]
#[command(name = "agent-relay")]
#[command(about = "Local relay between browser sessions and coding-agent processes")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Config file (default: $XDG_CONFIG_HOME/agent-relay/config.json)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the relay server in the foreground
	Serve(ServerArgs),

	/// Start a handler, hosting the relay if none is running
	Start(StartArgs),

	/// Report whether a relay is running and which handlers it has
	Status(ServerArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
	/// Interface to bind or connect to
	#[arg(long, value_name = "HOST")]
	pub host: Option<String>,

	/// Relay port
	#[arg(short, long, env = "AGENT_RELAY_PORT", value_name = "PORT")]
	pub port: Option<u16>,

	/// Shared token required from every connection
	#[arg(long, env = "AGENT_RELAY_TOKEN", value_name = "TOKEN", hide_env_values = true)]
	pub token: Option<String>,
}

impl From<&ServerArgs> for Overrides {
	fn from(args: &ServerArgs) -> Self {
		Overrides {
			host: args.host.clone(),
			port: args.port,
			token: args.token.clone(),
		}
	}
}

#[derive(Args, Debug, Clone)]
pub struct StartArgs {
	#[command(flatten)]
	pub server: ServerArgs,

	/// Agent id to register the command under
	#[arg(short, long, value_name = "ID", requires = "command")]
	pub agent: Option<String>,

	/// Working directory for the command
	#[arg(long, value_name = "DIR", requires = "command")]
	pub cwd: Option<PathBuf>,

	/// Command to run per request; the prompt is appended as the last argument.
	/// Without it, handlers from the config file are started.
	#[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
	pub command: Vec<String>,
}
