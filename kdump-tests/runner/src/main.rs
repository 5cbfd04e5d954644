// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod config;
mod execute;

use anyhow::Context;
use camino::Utf8Path;
use clap::Parser;
use config::{Command, ProcessArgs};
use kdump_tests::kdump_testcase::{PhaseExit, TestOutcome, TestVerdict};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

const LOG_FILE_NAME: &str = "kdump-runner.log";

#[tokio::main]
async fn main() {
    let runner_args = match ProcessArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version requests aren't runs and get no verdict.
            if e.use_stderr() {
                println!("{}", TestVerdict::Aborted);
            }
            e.exit()
        }
    };

    let Command::Run(run_opts) = &runner_args.command;
    let (outcome, log_guard) =
        match set_tracing_subscriber(&runner_args, &run_opts.work_dir) {
            Ok(guard) => (execute::run_test(run_opts).await, Some(guard)),
            Err(e) => {
                eprintln!("kdump-runner: {e:#}");
                let exit = PhaseExit::aborted(format!("{e:#}"));
                (TestOutcome::from(exit), None)
            }
        };

    // The verdict is the only thing written to stdout.
    println!("{}", outcome.verdict);

    let exit_code = outcome.verdict.exit_code();
    debug!(exit_code);

    // `exit` skips destructors, and dropping the guard is what flushes the
    // log file.
    drop(log_guard);
    std::process::exit(exit_code);
}

fn set_tracing_subscriber(
    args: &ProcessArgs,
    log_dir: &Utf8Path,
) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating work directory {log_dir}"))?;

    let (file_writer, guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::never(log_dir, LOG_FILE_NAME),
    );

    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into());
    let subscriber = Registry::default().with(filter.from_env_lossy());
    if args.emit_bunyan {
        let stderr_layer =
            BunyanFormattingLayer::new("kdump-runner".into(), std::io::stderr);
        let file_layer =
            BunyanFormattingLayer::new("kdump-runner".into(), file_writer);
        let subscriber = subscriber
            .with(JsonStorageLayer)
            .with(stderr_layer)
            .with(file_layer);
        tracing::subscriber::set_global_default(subscriber)
            .context("installing tracing subscriber")?;
    } else {
        let stderr_log = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_line_number(true)
            .with_ansi(!args.disable_ansi);
        let file_log = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_line_number(true)
            .with_ansi(false);
        let subscriber = subscriber.with(stderr_log).with(file_log);
        tracing::subscriber::set_global_default(subscriber)
            .context("installing tracing subscriber")?;
    }

    Ok(guard)
}
