// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context as _;
use futures::StreamExt;

use edgebus_runtime::config::environment_names::etcd::ETCD_PREFIX;
use edgebus_runtime::storage::key_store::{KeyStore, Selector};
use edgebus_runtime::topology::TopologyError;
use edgebus_runtime::{
    ContextConfig, DataBus, DataBusConfig, DataBusError, Direction, Role, TopicConfig,
    TopologyConfig, TopologyResolver,
};

mod opt;
pub use opt::{Cli, Command, PublishArgs, SubscribeArgs, Target, TopologyArgs};

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Publish(args) => publish(args).await,
        Command::Subscribe(args) => subscribe(args).await,
        Command::Topology(args) => topology(args).await,
    }
}

/// True when `err` is a configuration error the operator has to fix.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    if let Some(err) = err.downcast_ref::<TopologyError>() {
        return err.is_fatal();
    }
    matches!(
        err.downcast_ref::<DataBusError>(),
        Some(DataBusError::UnknownScheme(_) | DataBusError::InvalidConfig(_))
    )
}

async fn publish(args: PublishArgs) -> anyhow::Result<()> {
    let bus = open(&args.target, Direction::Pub, Role::Publisher).await?;
    let topic = TopicConfig::string(wire_topic(&args.target));

    let mut result = Ok(());
    for n in 0..args.count {
        if n > 0 {
            tokio::time::sleep(args.interval).await;
        }
        if let Err(err) = bus.publish(&topic, &args.message.as_str().into()).await {
            result = Err(err).with_context(|| format!("publishing on '{}'", topic.name));
            break;
        }
        tracing::debug!(topic = %topic.name, n, "published");
    }

    bus.context_destroy().await?;
    result
}

async fn subscribe(args: SubscribeArgs) -> anyhow::Result<()> {
    let bus = open(&args.target, Direction::Sub, Role::Subscriber).await?;
    let topic = TopicConfig::string(wire_topic(&args.target));
    let stream = bus.subscribe_stream(&topic).await?;
    let mut stream = match args.limit {
        Some(limit) => stream.take(limit).boxed(),
        None => stream.boxed(),
    };

    let deadline = async {
        match args.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(message) => println!(
                    "{}\t{}",
                    message.topic,
                    message.as_str().unwrap_or("<binary>")
                ),
                None => break,
            },
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    bus.context_destroy().await?;
    Ok(())
}

async fn topology(args: TopologyArgs) -> anyhow::Result<()> {
    let resolver = resolver(&args.key_store).await?;
    let dev_mode = args.dev_mode.unwrap_or(resolver.config().dev_mode);
    let descriptor = resolver.resolve(&args.topic, args.role, dev_mode).await?;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}

async fn open(target: &Target, direction: Direction, role: Role) -> anyhow::Result<DataBus> {
    let bus = DataBus::new(DataBusConfig::from_settings()?);
    if target.secure {
        let resolver = resolver(&target.key_store).await?;
        let dev_mode = target.dev_mode.unwrap_or(resolver.config().dev_mode);
        let descriptor = resolver.resolve(&target.topic, role, dev_mode).await?;
        bus.context_create_secure(descriptor).await?;
    } else {
        let endpoint = target
            .endpoint
            .as_deref()
            .context("--endpoint is required without --secure")?;
        let mut config = ContextConfig::new(endpoint, direction)?;
        if let Some(name) = &target.name {
            config = config.with_name(name);
        }
        bus.context_create(&config).await?;
    }
    Ok(bus)
}

async fn resolver(key_store: &str) -> anyhow::Result<TopologyResolver> {
    let config = TopologyConfig::from_env()?;
    let prefix = std::env::var(ETCD_PREFIX).ok();
    let store: Arc<dyn KeyStore> = Selector::from_str(key_store)?.connect(prefix).await?;
    Ok(TopologyResolver::new(config, store))
}

/// Secure topics may carry a `<peer>/` prefix that only picks the server.
fn wire_topic(target: &Target) -> String {
    match target.topic.split_once('/') {
        Some((_, rest)) if target.secure => rest.to_string(),
        _ => target.topic.clone(),
    }
}
