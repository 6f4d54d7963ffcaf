use clap::Parser;
use huddle_lib::{logger, CallConfig, CallError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(about = "Join a mesh video call room")]
struct Cli {
    #[arg(short, long, value_name = "FILE", help = "JSON call configuration")]
    config: Option<PathBuf>,
    #[arg(long, env = "HUDDLE_ROOM", help = "Room to join")]
    room: Option<String>,
    #[arg(long, help = "Display name shown to the other participants")]
    name: Option<String>,
    #[arg(long, help = "Join as the room host")]
    host: bool,
    #[arg(long, env = "HUDDLE_SIGNALING_URL", value_name = "URL", help = "WebSocket signaling endpoint")]
    signaling_url: Option<String>,
    #[arg(long, value_name = "URL", help = "Base URL of the emotion report service")]
    report_url: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<CallConfig, CallError> {
        let mut config = match (&self.config, &self.room) {
            (Some(path), _) => CallConfig::from_file(path)?,
            (None, Some(room)) => CallConfig::new(room.clone(), String::new()),
            (None, None) => {
                return Err(CallError::InvalidConfig(
                    "either --config or --room is required".into(),
                ))
            }
        };
        if let Some(room) = self.room {
            config.room_id = room;
        }
        if let Some(name) = self.name {
            config.display_name = name;
        }
        if config.display_name.is_empty() {
            config.display_name = config.user_id.to_string();
        }
        if self.host {
            config.is_host = true;
        }
        if let Some(url) = self.signaling_url {
            config.signaling_url = Some(url);
        }
        if let Some(url) = self.report_url {
            config.report_url = Some(url);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    logger::init();

    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("huddle: {e}");
            return ExitCode::FAILURE;
        }
    };

    match huddle_lib::run(config).await {
        Ok(Some(report)) => {
            info!("Report: {report}");
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("huddle: {e}");
            ExitCode::FAILURE
        }
    }
}
