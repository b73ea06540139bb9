use anyhow::{Context, anyhow};

use tether::{Channel, ChannelConfig, Limits, Value, ValueList};

use crate::cli::{CallArgs, LimitsArgs};
use crate::error::CliResult;

pub fn execute(args: CallArgs, config: ChannelConfig) -> CliResult<()> {
    let channel = open(&config, args.service.as_deref())?;

    let mut request = channel.new_list();
    request.insert("cmd", args.cmd.as_str())?;
    for entry in &args.entries {
        let (key, value) = parse_entry(entry)?;
        request
            .insert(key, value)
            .with_context(|| format!("invalid request entry: {entry}"))?;
    }

    tracing::debug!(request = %request, "sending request");
    let response = channel.xfer(request)?;
    print(&response)
}

pub fn limits(args: LimitsArgs, config: ChannelConfig) -> CliResult<()> {
    let channel = open(&config, args.service.as_deref())?;
    match channel.limit_get()? {
        Limits::Attached(list) => print(&list),
        Limits::NoneAttached => {
            println!("null");
            Ok(())
        }
    }
}

fn open(config: &ChannelConfig, service: Option<&str>) -> CliResult<Channel> {
    let broker = Channel::connect(config).context("failed to connect to broker")?;
    match service {
        Some(name) => Ok(broker.service_open(name)?),
        None => Ok(broker),
    }
}

fn print(list: &ValueList) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(list)?);
    Ok(())
}

/// Split `KEY=VALUE`, typing the value as null, bool, number or string
pub fn parse_entry(entry: &str) -> CliResult<(&str, Value)> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got {entry:?}"))?;
    let value = match raw {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => match raw.parse::<i64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::String(raw.to_string()),
        },
    };
    Ok((key, value))
}
