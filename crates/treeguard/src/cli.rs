use clap::{Args, Parser, Subcommand};
use rule_engine::Permission;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "treeguard", version, about = "Check and lint path-based access rules")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "treeguard.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report configuration issues in a rules file
    Lint {
        /// Rules file (overrides config file setting)
        rules: Option<PathBuf>,
    },
    /// Run one permission check and print the decision
    Check(CheckArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Rules file (overrides config file setting)
    #[arg(short, long)]
    pub rules: Option<PathBuf>,

    /// JSON file holding the data tree
    #[arg(short, long, conflicts_with = "sheets")]
    pub data: Option<PathBuf>,

    /// JSON file mapping sheet names to rows of cells (first row is the header)
    #[arg(long)]
    pub sheets: Option<PathBuf>,

    /// Candidate record for a write, as inline JSON
    #[arg(long)]
    pub new_data: Option<String>,

    /// Caller claims as inline JSON
    #[arg(long, conflicts_with = "token")]
    pub auth: Option<String>,

    /// Raw identity token
    #[arg(long)]
    pub token: Option<String>,

    /// Fail on any configuration issue in the rules
    #[arg(long)]
    pub strict: bool,

    /// Permission to check
    #[arg(value_parser = parse_permission)]
    pub permission: Permission,

    /// Slash-separated path, e.g. users/u1
    pub path: String,
}

fn parse_permission(s: &str) -> Result<Permission, String> {
    s.parse()
}
