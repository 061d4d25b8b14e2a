use std::time::Duration;

use agent_relay_runtime::{HandlerClient, HandlerClientOptions, RelayClient, RelayClientOptions};
use anyhow::anyhow;
use colored::Colorize;
use tokio::sync::mpsc;

use crate::cli::{Cli, Commands, StartArgs};
use crate::config::{Overrides, RelayConfig};
use crate::error::{RelayError, Result};
use crate::handler::CommandHandler;
use crate::launcher::{self, Role};
use crate::relay;

const STATUS_WAIT: Duration = Duration::from_secs(1);

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config_path = cli.config.as_deref();
	match cli.command {
		Commands::Serve(args) => serve(RelayConfig::load(config_path, Overrides::from(&args))?).await,
		Commands::Start(args) => start(RelayConfig::load(config_path, Overrides::from(&args.server))?, args).await,
		Commands::Status(args) => status(RelayConfig::load(config_path, Overrides::from(&args))?).await,
	}
}

async fn serve(config: RelayConfig) -> Result<()> {
	let listener = relay::bind(&config.host, config.port).await?;
	println!("{} relay listening on {}", "✓".green(), config.ws_url().cyan());
	relay::serve(listener, config.token.clone(), relay::shutdown_signal()).await
}

async fn start(config: RelayConfig, args: StartArgs) -> Result<()> {
	let client = handler_client(&config, &args)?;
	let ids = client.handler_ids().join(", ");

	match launcher::launch(&config, client, relay::shutdown_signal()).await? {
		Role::Host => println!("{} relay on port {} stopped ({ids})", "✓".green(), config.port),
		Role::Handler => println!("{} handler session ended ({ids})", "✓".green()),
	}
	Ok(())
}

fn handler_client(config: &RelayConfig, args: &StartArgs) -> Result<HandlerClient> {
	let mut client = HandlerClient::new(HandlerClientOptions {
		url: config.ws_url(),
		token: config.token.clone(),
	});

	if let Some((program, rest)) = args.command.split_first() {
		let agent_id = args.agent.clone().unwrap_or_else(|| program.clone());
		let mut handler = CommandHandler::new(agent_id, program, rest.to_vec());
		if let Some(cwd) = &args.cwd {
			handler = handler.with_cwd(cwd);
		}
		client = client.with_handler(handler);
	} else {
		for spec in &config.handlers {
			client = client.with_handler(CommandHandler::from(spec));
		}
	}

	if client.handler_ids().is_empty() {
		return Err(RelayError::Anyhow(anyhow!("no handler command given and none configured")));
	}
	Ok(client)
}

async fn status(config: RelayConfig) -> Result<()> {
	if !launcher::is_relay_running(&config).await {
		println!("{} no relay running on {}:{}", "✗".red(), config.host, config.port);
		return Ok(());
	}
	println!("{} relay running on {}:{}", "✓".green(), config.host, config.port);

	let client = RelayClient::new(RelayClientOptions {
		url: config.ws_url(),
		token: config.token.clone(),
		auto_reconnect: false,
		..Default::default()
	});

	let (tx, mut rx) = mpsc::unbounded_channel();
	let _handlers = client.on_handlers_change(move |handlers| {
		let _ = tx.send(handlers.clone());
	});
	client.connect().await?;

	let handlers = tokio::time::timeout(STATUS_WAIT, rx.recv()).await.ok().flatten().unwrap_or_default();
	client.disconnect();

	if handlers.is_empty() {
		println!("  no handlers registered");
	}
	for id in handlers {
		println!("  {}", id.cyan());
	}
	Ok(())
}
