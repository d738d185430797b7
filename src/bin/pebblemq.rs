use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;

use pebblemq::{setup_tracing, Broker, BrokerConfig, BrokerResult};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: debug, vv or more: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

fn main() -> BrokerResult<()> {
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let broker_config = BrokerConfig::set_up_config(config_path)?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", broker_config);
        return Ok(());
    }

    let default_directive = match commandline.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let _log_guard = setup_tracing(default_directive);

    let mut handle = Broker::new(broker_config).start()?;
    handle.join()
}
