use clap::Subcommand;

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Launch the background daemon (default when no command is given)
    Start,
    /// Ask the running daemon to stop its services and exit
    #[command(alias = "quit")]
    Stop,
    /// Show whether the daemon is running and which services it manages
    Status,
    /// Load and validate the configuration without starting anything
    Check,
}
