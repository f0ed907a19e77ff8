use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::types::RequestId;

macro_rules! arg_env {
    ($v:literal) => {
        concat!("WAVEFETCH_", $v)
    };
}

/// Download seismic waveforms from the FDSN data centers, through the EIDA routing service.
///
/// Requests are kept in a local database: an interrupted download
/// continues where it stopped with `resume`.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// The path to a TOML configuration file
    #[arg(long, global = true, env = arg_env!("CONFIG"))]
    pub config: Option<PathBuf>,

    /// Log everything down to the debug level, whatever the configuration says
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Route a new request, download it and save the assembled file
    Submit(SubmitArgs),

    /// Continue the downloads of every unfinished request and save them
    Resume,

    /// List the stored requests and the state of their segments
    List,

    /// Delete a request and everything downloaded for it
    Purge {
        /// The request id, as shown by `list`
        id: RequestId,
    },

    /// Manage the EIDA auth token used to access restricted data
    #[command(subcommand)]
    Auth(AuthCommand),
}

#[derive(ClapArgs, Debug)]
pub struct SubmitArgs {
    /// The request description, used to name the output file
    #[arg(long, short)]
    pub description: String,

    /// JSON array of time windows, each one being `[start, end, net, sta, cha, loc]`
    #[arg(long, conflicts_with = "timewindows_file", required_unless_present = "timewindows_file")]
    pub timewindows: Option<String>,

    /// The path to a file containing the JSON time windows
    #[arg(long)]
    pub timewindows_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Use the token stored in the given file from now on
    Set {
        /// The armored token file, as downloaded from the authentication service
        file: PathBuf,
    },

    /// Forget the stored token
    Clear,

    /// Show who the stored token belongs to
    Show,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn arguments_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn submit_needs_time_windows() {
        assert!(Args::try_parse_from(["wavefetch", "submit", "-d", "test"]).is_err());

        let args = Args::try_parse_from([
            "wavefetch",
            "submit",
            "-d",
            "test",
            "--timewindows",
            "[]",
            "--verbose",
        ])
        .unwrap();
        assert!(args.verbose);
        assert!(matches!(
            args.command,
            Command::Submit(SubmitArgs { timewindows: Some(_), timewindows_file: None, .. })
        ));
    }

    #[test]
    fn purge_takes_an_id() {
        let args = Args::try_parse_from(["wavefetch", "purge", "3"]).unwrap();
        assert!(matches!(args.command, Command::Purge { id: 3 }));
        assert!(Args::try_parse_from(["wavefetch", "purge", "three"]).is_err());
    }
}
