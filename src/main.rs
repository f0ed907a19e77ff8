mod cli;
mod context;
mod credential;
mod database;
mod download;
mod endpoint;
mod io;
mod logging;
mod outside;
mod registry;
mod result;
mod routing;
mod settings;
mod types;
mod utils;

use std::{collections::BTreeMap, path::Path, sync::Arc};

use clap::Parser;
use futures::future::join_all;
use miette::{Context, IntoDiagnostic, Result};
use tracing::{info, warn, Level};

use crate::{
    cli::{Args, AuthCommand, Command, SubmitArgs},
    download::RequestOrchestrator,
    registry::{open_control, DownloadControl, SubmitParams},
    settings::Settings,
    types::SegmentStatus,
};

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;

    let level = if args.verbose {
        Level::DEBUG
    } else {
        settings.level()
    };
    logging::init_logging(level)?;

    // Everything runs on one thread, requests are interleaved on the event loop
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()
        .wrap_err("Could not start the async runtime")?;

    runtime.block_on(run(args.command, settings))
}

async fn run(command: Command, settings: Settings) -> Result<()> {
    let control = open_control(&settings)?;

    match command {
        Command::Submit(args) => {
            let params = submit_params(args)?;
            let request = control.submit(params).await?;
            follow(control.as_ref(), vec![request], &settings.output_dir).await?;
        }
        Command::Resume => {
            let requests = control.restore_all()?;
            if requests.is_empty() {
                info!("No request to resume");
            }
            follow(control.as_ref(), requests, &settings.output_dir).await?;
        }
        Command::List => list(control.as_ref())?,
        Command::Purge { id } => {
            control.purge(id).await?;
            info!("Request {id} deleted");
        }
        Command::Auth(AuthCommand::Set { file }) => {
            let token = std::fs::read_to_string(&file)
                .into_diagnostic()
                .wrap_err_with(|| format!("Could not read {}", file.display()))?;
            match control.set_credential(Some(&token))? {
                Some(info) => println!("Token of {} valid until {}", info.user_id, info.valid_until),
                None => warn!("Downloads are disabled, the token was not saved"),
            }
        }
        Command::Auth(AuthCommand::Clear) => {
            control.set_credential(None)?;
        }
        Command::Auth(AuthCommand::Show) => match control.auth_info() {
            Some(info) if info.is_expired() => {
                println!("{} (expired on {})", info.user_id, info.valid_until)
            }
            Some(info) => println!("{} (valid until {})", info.user_id, info.valid_until),
            None => println!("No auth token"),
        },
    }

    Ok(())
}

fn submit_params(args: SubmitArgs) -> Result<SubmitParams> {
    let timewindows = match (args.timewindows, args.timewindows_file) {
        (Some(json), _) => json,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not read {}", path.display()))?,
        (None, None) => miette::bail!("No time windows given"),
    };

    Ok(SubmitParams {
        description: args.description,
        timewindows,
    })
}

/// Wait for the requests to finish, then save what they downloaded.
///
/// Ctrl-C stops them early, the partial outputs are still saved.
async fn follow(
    control: &dyn DownloadControl,
    requests: Vec<Arc<RequestOrchestrator>>,
    out_dir: &Path,
) -> Result<()> {
    let finished = join_all(requests.iter().map(|request| request.wait_idle()));

    tokio::select! {
        _ = finished => {}
        res = tokio::signal::ctrl_c() => {
            res.into_diagnostic().wrap_err("Could not listen for Ctrl-C")?;
            warn!("Interrupted, stopping the downloads");
            control.shutdown().await;
        }
    }

    for request in &requests {
        let Some(artifact) = request.artifact() else {
            continue;
        };

        let progress = request.progress();
        info!(
            "{}: {}/{} segments ({})",
            artifact.filename,
            progress.settled,
            progress.total,
            status_counts(&request.statuses())
        );

        if artifact.is_empty() {
            warn!("{}: nothing downloaded, no file written", artifact.filename);
            continue;
        }
        let path = io::save_artifact(out_dir, &artifact)?;
        info!("Saved {} ({} bytes)", path.display(), artifact.len());
    }

    Ok(())
}

/// `ERROR 1, NODATA 1, OK 3`, codes in alphabetical order
fn status_counts(statuses: &[(String, Vec<SegmentStatus>)]) -> String {
    let mut counts = BTreeMap::<&str, usize>::new();
    for status in statuses.iter().flat_map(|(_, statuses)| statuses) {
        *counts.entry(status.code()).or_default() += 1;
    }

    counts
        .iter()
        .map(|(code, count)| format!("{code} {count}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn list(control: &dyn DownloadControl) -> Result<()> {
    let summaries = control.summaries()?;
    if summaries.is_empty() {
        println!("No request");
    }

    for summary in summaries {
        println!(
            "{:>4}  {}  {} segments from {} data centers: {} with data ({} bytes), {} without, {} missing",
            summary.id,
            summary.filename,
            summary.total,
            summary.groups,
            summary.data,
            summary.bytes,
            summary.nodata,
            summary.missing(),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_are_counted_by_code() {
        let statuses = vec![
            (
                "http://a/query".to_owned(),
                vec![SegmentStatus::Ok(10), SegmentStatus::NoData, SegmentStatus::Ok(2)],
            ),
            (
                "http://b/query".to_owned(),
                vec![SegmentStatus::Error("HTTP 500".to_owned()), SegmentStatus::Pending],
            ),
        ];

        assert_eq!(status_counts(&statuses), "ERROR 1, NODATA 1, OK 2, PENDING 1");
        assert_eq!(status_counts(&[]), "");
    }
}
