mod commands;
mod error;
mod services;
mod utils;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::utils::settings::{self, SettingsInput};

#[derive(Debug, Parser)]
#[command(name = "flowbackup", version, about = "Back up and restore launcher data over WebDAV")]
struct Cli {
    /// Settings file path (defaults to the OS config directory)
    #[arg(long, global = true, env = "FLOWBACKUP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Archive the selected directories and upload them
    Push,
    /// Download the archive and restore it after the host exits
    Pull,
    /// List directories under the data root; `*` marks the ones that will be backed up
    Directories,
    /// Show or change saved settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    Show,
    Set(SetArgs),
}

#[derive(Debug, Args)]
struct SetArgs {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    username: Option<String>,
    /// Stored in the system keyring. Pass an empty value to clear it.
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    archive_filename: Option<String>,
    /// Comma separated directory names, e.g. `Settings,Plugins`
    #[arg(long, value_delimiter = ',')]
    directories: Option<Vec<String>>,
    #[arg(long)]
    data_root: Option<String>,
    #[arg(long)]
    host_executable: Option<String>,
}

impl SetArgs {
    fn into_parts(self) -> (SettingsInput, Option<String>) {
        let input = SettingsInput {
            server_url: self.server_url,
            username: self.username,
            archive_filename: self.archive_filename,
            selected_directory_names: self.directories,
            data_root: self.data_root,
            host_executable: self.host_executable,
        };
        (input, self.password)
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let settings_path = match cli.config {
        Some(path) => path,
        None => settings::default_settings_path()?,
    };
    log::debug!("Using settings file {}", settings_path.display());

    match cli.command {
        CliCommand::Push => commands::backup::backup_push(settings_path).await,
        CliCommand::Pull => commands::backup::backup_pull(settings_path).await,
        CliCommand::Directories => commands::directories::directories_list(&settings_path),
        CliCommand::Settings { action } => match action {
            SettingsAction::Show => commands::settings::settings_show(&settings_path),
            SettingsAction::Set(args) => {
                let (input, password) = args.into_parts();
                commands::settings::settings_set(&settings_path, input, password)?;
                commands::settings::settings_show(&settings_path)
            }
        },
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        log::error!("{error}");
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}
