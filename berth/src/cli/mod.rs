// CLI argument parsing and definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "berth")]
#[command(about = "Provision, inspect and tear down container-backed workspaces")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Docker Engine socket (overrides config and BERTH_DOCKER_SOCKET)
    #[arg(long, global = true)]
    pub docker_socket: Option<PathBuf>,

    /// Exec timeout in seconds (overrides config and BERTH_EXEC_TIMEOUT)
    #[arg(long, global = true)]
    pub exec_timeout: Option<u64>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List built-in workspace templates
    Templates {
        /// Only show templates in this category
        #[arg(long)]
        category: Option<String>,
    },

    /// List workspaces, newest first
    #[command(visible_alias = "list")]
    Ls,

    /// Create a workspace and start it
    Create {
        /// Workspace name
        name: String,

        /// Template id (see `berth templates`); omit for a custom workspace
        #[arg(short, long)]
        template: Option<String>,

        /// Container image; required without a template
        #[arg(long)]
        image: Option<String>,

        /// Environment variable, repeatable
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Published port, repeatable
        #[arg(short, long = "port", value_name = "CONTAINER[:HOST]", value_parser = parse_port)]
        ports: Vec<(u16, u16)>,

        /// Extra feature tag, repeatable
        #[arg(long = "feature")]
        features: Vec<String>,

        /// Create the container without starting it
        #[arg(long)]
        no_start: bool,
    },

    /// Start a workspace
    Start {
        /// Workspace id or name
        target: String,
    },

    /// Stop a workspace
    Stop {
        /// Workspace id or name
        target: String,
    },

    /// Stop and start a workspace
    Restart {
        /// Workspace id or name
        target: String,
    },

    /// Stop and remove a workspace
    #[command(visible_alias = "remove")]
    Rm {
        /// Workspace id or name
        target: String,
    },

    /// Show recent workspace logs
    Logs {
        /// Workspace id or name
        target: String,

        /// Number of lines from the end
        #[arg(short = 'n', long)]
        tail: Option<usize>,
    },

    /// Run a command in a running workspace
    Exec {
        /// Workspace id or name
        target: String,

        /// Command and arguments, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Show a single workspace
    Inspect {
        /// Workspace id or name
        target: String,
    },

    /// Check that the container engine is reachable
    Ping,
}

/// Parse `CONTAINER:HOST`, or `PORT` to publish on the same host port.
pub fn parse_port(raw: &str) -> Result<(u16, u16), String> {
    let parse = |part: &str| {
        part.trim()
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| format!("invalid port '{part}'"))
    };

    match raw.split_once(':') {
        Some((container, host)) => Ok((parse(container)?, parse(host)?)),
        None => {
            let port = parse(raw)?;
            Ok((port, port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("8080:18080"), Ok((8080, 18080)));
        assert_eq!(parse_port("5432"), Ok((5432, 5432)));
        assert!(parse_port("0").is_err());
        assert!(parse_port("http:80").is_err());
        assert!(parse_port("70000").is_err());
    }

    #[test]
    fn test_exec_takes_argv_after_separator() {
        let args = Args::try_parse_from(["berth", "exec", "w1", "--", "ls", "-la", "/tmp"]).unwrap();
        match args.command {
            Command::Exec { target, command } => {
                assert_eq!(target, "w1");
                assert_eq!(command, vec!["ls", "-la", "/tmp"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_create_collects_repeated_flags() {
        let args = Args::try_parse_from([
            "berth", "create", "api", "-t", "python-dev", "-e", "A=1", "-e", "B=2", "-p", "8000:18000",
            "--feature", "poetry", "--no-start",
        ])
        .unwrap();
        match args.command {
            Command::Create {
                name,
                template,
                env,
                ports,
                features,
                no_start,
                ..
            } => {
                assert_eq!(name, "api");
                assert_eq!(template.as_deref(), Some("python-dev"));
                assert_eq!(env, vec!["A=1", "B=2"]);
                assert_eq!(ports, vec![(8000, 18000)]);
                assert_eq!(features, vec!["poetry"]);
                assert!(no_start);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["berth", "ls", "--docker-socket", "/run/docker.sock", "-d"])
            .unwrap();
        assert_eq!(args.docker_socket, Some(PathBuf::from("/run/docker.sock")));
        assert!(args.debug);
    }
}
