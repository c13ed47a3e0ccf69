// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;

use clap::Parser;
use edgebus_cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    edgebus_runtime::logging::init();
    let cli = Cli::parse();

    match edgebus_cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if edgebus_cli::is_fatal(&err) => {
            tracing::error!(error = %format!("{err:#}"), "configuration error");
            ExitCode::from(2)
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "edgebus failed");
            ExitCode::FAILURE
        }
    }
}
