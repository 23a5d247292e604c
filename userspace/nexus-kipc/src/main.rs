// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Binary entrypoint: parse arguments and print the result.

use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();
    nexus_kipc::cli::run()
}
