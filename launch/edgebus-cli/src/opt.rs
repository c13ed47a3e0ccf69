// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use edgebus_runtime::Role;

#[derive(Parser, Debug)]
#[command(name = "edgebus", version, about = "Publish, subscribe and inspect the edgebus data bus")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish string messages on a topic
    Publish(PublishArgs),

    /// Print every message received on a topic
    Subscribe(SubscribeArgs),

    /// Resolve the secure-socket connection descriptor of a topic and print it as JSON
    Topology(TopologyArgs),
}

/// Where the context connects to.
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Transport endpoint, e.g. mqtt://localhost:1883 or opcua://0.0.0.0:4840
    #[arg(long, env = "EDGEBUS_ENDPOINT", required_unless_present = "secure")]
    pub endpoint: Option<String>,

    /// Resolve a secure-socket context from the topology (AppName, Clients, Server, <topic>_cfg)
    #[arg(long, conflicts_with = "endpoint")]
    pub secure: bool,

    /// Override DEV_MODE for secure-socket contexts
    #[arg(long, requires = "secure")]
    pub dev_mode: Option<bool>,

    /// Key store backend for secure-socket contexts: "etcd" or "mem"
    #[arg(long, env = "EDGEBUS_KEY_STORE", default_value = "etcd")]
    pub key_store: String,

    /// Client name, used as the MQTT client id
    #[arg(long)]
    pub name: Option<String>,

    /// Topic name
    #[arg(long)]
    pub topic: String,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    #[command(flatten)]
    pub target: Target,

    /// Message body
    pub message: String,

    /// How many times to publish the message
    #[arg(long, default_value_t = 1)]
    pub count: u32,

    /// Pause between two publishes
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    pub interval: Duration,
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    #[command(flatten)]
    pub target: Target,

    /// Stop after this long instead of waiting for Ctrl-C
    #[arg(long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Stop after this many messages
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct TopologyArgs {
    /// Topic name, optionally prefixed with the peer: "<peer>/<topic>"
    #[arg(long)]
    pub topic: String,

    /// One of publisher, subscriber, server, client
    #[arg(long, value_parser = parse_role)]
    pub role: Role,

    /// Override DEV_MODE
    #[arg(long)]
    pub dev_mode: Option<bool>,

    /// Key store backend: "etcd" or "mem"
    #[arg(long, env = "EDGEBUS_KEY_STORE", default_value = "etcd")]
    pub key_store: String,
}

fn parse_role(s: &str) -> Result<Role, String> {
    s.parse::<Role>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_publish_arguments() {
        let cli = Cli::try_parse_from([
            "edgebus",
            "publish",
            "--endpoint",
            "mqtt://localhost:1883",
            "--topic",
            "line1/temp",
            "--count",
            "3",
            "--interval",
            "250ms",
            "72.5",
        ])
        .unwrap();
        let Command::Publish(args) = cli.command else {
            panic!("expected publish");
        };
        assert_eq!(args.target.endpoint.as_deref(), Some("mqtt://localhost:1883"));
        assert_eq!(args.count, 3);
        assert_eq!(args.interval, Duration::from_millis(250));
        assert_eq!(args.message, "72.5");
    }

    #[test]
    fn test_endpoint_or_secure_is_required() {
        assert!(Cli::try_parse_from(["edgebus", "subscribe", "--topic", "t"]).is_err());
        assert!(
            Cli::try_parse_from(["edgebus", "subscribe", "--secure", "--topic", "pub/t"]).is_ok()
        );
        assert!(
            Cli::try_parse_from([
                "edgebus",
                "subscribe",
                "--secure",
                "--endpoint",
                "mqtt://x",
                "--topic",
                "t"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_topology_role() {
        let cli = Cli::try_parse_from([
            "edgebus", "topology", "--topic", "results", "--role", "publisher",
        ])
        .unwrap();
        let Command::Topology(args) = cli.command else {
            panic!("expected topology");
        };
        assert_eq!(args.role, Role::Publisher);
        assert!(
            Cli::try_parse_from(["edgebus", "topology", "--topic", "t", "--role", "broker"])
                .is_err()
        );
    }
}
