// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Operator CLI (`kipcctl`): inspect limits and smoke-test a registry.

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::process::ExitCode;

use crate::{Caller, Error, IpcConfig, Registry, StatsSnapshot, Wait};

/// Returns the CLI usage string.
pub fn help() -> &'static str {
    "kipcctl inspects the kernel IPC registry. Usage: kipcctl [--config <path>] <limits|selftest>"
}

/// Executes the CLI using provided arguments.
pub fn execute(args: &[&str]) -> String {
    dispatch(args).unwrap_or_else(|err| err)
}

/// Runs one command. `Err` carries the message for a failed invocation.
fn dispatch(args: &[&str]) -> Result<String, String> {
    if args.is_empty() || args.iter().any(|arg| *arg == "--help") {
        return Ok(help().to_string());
    }

    let mut config_path = None;
    let mut command = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "--config" => match iter.next() {
                Some(path) => config_path = Some(*path),
                None => return Err("missing value for --config".to_string()),
            },
            other if command.is_none() => command = Some(other),
            other => return Err(format!("unexpected argument {other}")),
        }
    }

    let config = match config_path {
        Some(path) => match IpcConfig::from_path(path) {
            Ok(config) => config,
            Err(err) => return Err(format!("config {path}: {err}")),
        },
        None => IpcConfig::default(),
    };

    match command {
        Some("limits") => Ok(limits(&config)),
        Some("selftest") => match selftest(config) {
            Ok(stats) => Ok(format!(
                "selftest ok: ops={} allocations={} releases={} sent={} received={} notify={}",
                stats.total_ipc_ops,
                stats.slot_allocations,
                stats.slot_releases,
                stats.messages_sent,
                stats.messages_received,
                stats.notify_ops
            )),
            Err(err) => Err(format!("selftest failed: {err}")),
        },
        Some(other) => Err(format!("unknown command {other}")),
        None => Ok(help().to_string()),
    }
}

/// Renders the effective configuration, one field per line.
fn limits(config: &IpcConfig) -> String {
    let rows: [(&str, String); 13] = [
        ("max_queues", config.max_queues.to_string()),
        ("max_segments", config.max_segments.to_string()),
        ("max_semaphores", config.max_semaphores.to_string()),
        ("max_pipes", config.max_pipes.to_string()),
        ("max_message_size", config.max_message_size.to_string()),
        ("max_queue_messages", config.max_queue_messages.to_string()),
        ("max_segment_size", config.max_segment_size.to_string()),
        ("default_timeout_ms", config.default_timeout_ms.to_string()),
        ("sem_max_value", config.sem_max_value.to_string()),
        ("deadlock_threshold", config.deadlock_threshold.to_string()),
        ("pipe_min_capacity", config.pipe_min_capacity.to_string()),
        ("pipe_default_capacity", config.pipe_default_capacity.to_string()),
        ("pipe_max_capacity", config.pipe_max_capacity.to_string()),
    ];
    let mut out = String::new();
    for (name, value) in rows {
        let _ = writeln!(out, "{name:<22} {value}");
    }
    out.truncate(out.trim_end().len());
    out
}

fn check(condition: bool, what: &str) -> Result<(), Box<dyn StdError>> {
    if condition {
        Ok(())
    } else {
        Err(format!("{what} check failed").into())
    }
}

/// Exercises every resource kind once against a fresh registry.
fn selftest(config: IpcConfig) -> Result<StatsSnapshot, Box<dyn StdError>> {
    let registry = Registry::with_config(config)?;
    let caller = Caller::privileged(0);

    let queue = registry.queue_create(&caller)?;
    registry.queue_send(&caller, queue, 1, b"low", Some(0))?;
    registry.queue_send(&caller, queue, 1, b"high", Some(100))?;
    let first = registry.queue_receive(&caller, queue, 0, Wait::NonBlocking)?;
    check(first.payload() == b"high", "queue priority")?;
    registry.queue_delete(&caller, queue)?;

    let segment = registry.shm_create(&caller, 4096)?;
    let writer = registry.shm_attach(&caller, segment)?;
    let reader = registry.shm_attach(&caller, segment)?;
    writer.write(0, b"kipc")?;
    let mut buf = [0u8; 4];
    reader.read(0, &mut buf)?;
    check(&buf == b"kipc", "shared memory")?;
    registry.shm_detach(&caller, writer)?;
    registry.shm_detach(&caller, reader)?;
    registry.shm_destroy(&caller, segment)?;

    let sem = registry.sem_create_bounded(&caller, 0, 1)?;
    registry.sem_op(&caller, sem, 1)?;
    check(registry.sem_op(&caller, sem, 1) == Err(Error::Overflow), "semaphore bound")?;
    registry.sem_op_wait(&caller, sem, -1, Wait::NonBlocking)?;
    registry.sem_delete(&caller, sem)?;

    let pipe = registry.pipe_create(&caller)?;
    registry.pipe_write(&caller, pipe.write, b"ping", Wait::NonBlocking)?;
    let n = registry.pipe_read(&caller, pipe.read, &mut buf, Wait::NonBlocking)?;
    check(&buf[..n] == b"ping", "pipe")?;
    registry.pipe_close(&caller, pipe.write)?;
    registry.pipe_close(&caller, pipe.read)?;

    #[cfg(target_os = "linux")]
    {
        let event = registry.event_create(&caller, 0, crate::IpcFlags::NOWAIT)?;
        event.signal(1)?;
        check(event.wait()? == 1, "eventfd")?;
    }

    Ok(registry.stats())
}

/// Parses `std::env::args`, prints the result and reports failure through the exit code.
pub fn run() -> ExitCode {
    let owned: Vec<String> = std::env::args().skip(1).collect();
    let refs: Vec<&str> = owned.iter().map(|s| s.as_str()).collect();
    match dispatch(&refs) {
        Ok(out) => {
            println!("{out}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{dispatch, execute, help};
    use std::io::Write;

    #[test]
    fn help_contains_name() {
        assert!(help().contains("kipcctl"));
        assert_eq!(execute(&[]), help());
        assert_eq!(execute(&["selftest", "--help"]), help());
    }

    #[test]
    fn limits_prints_defaults() {
        let out = execute(&["limits"]);
        assert!(out.contains("max_queues"));
        assert!(out.contains("65536"));
        assert_eq!(out.lines().count(), 13);
    }

    #[test]
    fn selftest_passes_on_defaults() {
        let out = execute(&["selftest"]);
        assert!(out.starts_with("selftest ok"), "{out}");
    }

    #[test]
    fn config_file_is_honoured() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_queues = 7").unwrap();
        let path = file.path().to_str().unwrap();
        let out = execute(&["--config", path, "limits"]);
        assert!(out.lines().any(|line| line.starts_with("max_queues") && line.ends_with(" 7")));
    }

    #[test]
    fn bad_input_reported() {
        assert_eq!(execute(&["--config"]), "missing value for --config");
        assert_eq!(execute(&["frobnicate"]), "unknown command frobnicate");
        assert!(execute(&["--config", "/nonexistent/kipc.toml", "limits"]).starts_with("config"));
        assert!(dispatch(&["frobnicate"]).is_err());
        assert!(dispatch(&["limits", "extra"]).is_err());
    }

    #[test]
    fn failed_selftest_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_segment_size = 1024").unwrap();
        let path = file.path().to_str().unwrap();
        let err = dispatch(&["--config", path, "selftest"]).unwrap_err();
        assert!(err.starts_with("selftest failed"), "{err}");
        assert!(dispatch(&["selftest"]).is_ok());
    }
}
