use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-agent code generation over local projects
#[derive(Parser, Debug, Clone)]
#[command(name = "rainer")]
#[command(version)]
pub struct Cli {
    /// Config file to use instead of ~/.config/rainer/config.toml
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the file tree of one project, or of all of them
    Scan {
        project: Option<String>,
    },

    /// Have the team write a new file
    MakeFile {
        #[arg(long)]
        project: String,
        #[arg(long)]
        path: String,
        #[arg(long)]
        instruction: String,
    },

    /// Have the team rewrite an existing file
    Refactor {
        #[arg(long)]
        project: String,
        #[arg(long)]
        path: String,
        #[arg(long)]
        instruction: String,
    },

    /// Turn an intended outcome into a checklist
    Requirements {
        #[arg(long)]
        project: String,
        #[arg(long)]
        instruction: String,
    },

    /// Single plaintext completion, no team
    Ask {
        message: String,
    },

    /// List the roster
    Team,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_make_file() {
        let cli = Cli::parse_from([
            "rainer", "make-file", "--project", "backend", "--path", "users/api.py", "--instruction", "Add API",
        ]);
        assert_eq!(
            cli.command,
            Command::MakeFile {
                project: "backend".to_string(),
                path: "users/api.py".to_string(),
                instruction: "Add API".to_string(),
            }
        );
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["rainer", "scan", "--config", "/tmp/rainer.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/rainer.toml")));
        assert_eq!(cli.command, Command::Scan { project: None });
    }

    #[test]
    fn test_missing_required_flag_is_rejected() {
        assert!(Cli::try_parse_from(["rainer", "refactor", "--project", "backend"]).is_err());
    }
}
