//! Command-line interface: scripted loopback session and REPL

use anyhow::{Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{debug, info};

use midi_ci::ci::{address, Muid};
use midi_ci::json::JsonValue;
use midi_ci::loopback::Loopback;
use midi_ci::midi::parse_hex;
use midi_ci::profile::ProfileId;
use midi_ci::property::{BodyEncoding, CanSet, RequestHeader};

/// One REPL command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Discover,
    Profiles,
    SetProfile {
        address: u8,
        profile: ProfileId,
        enabled: bool,
    },
    Get {
        resource: String,
        res_id: Option<String>,
    },
    Set {
        resource: String,
        body: String,
        partial: bool,
    },
    Subscribe(String),
    Unsubscribe(String),
    Resources,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let command = match word.to_lowercase().as_str() {
            "discover" => Command::Discover,
            "profiles" => Command::Profiles,
            "enable" | "disable" => {
                let (address, id) = rest
                    .split_once(char::is_whitespace)
                    .context("usage: enable|disable <address> <profile id hex>")?;
                Command::SetProfile {
                    address: parse_byte(address)?,
                    profile: parse_profile(id)?,
                    enabled: word.eq_ignore_ascii_case("enable"),
                }
            }
            "get" => {
                let mut parts = rest.split_whitespace();
                let resource = parts.next().context("usage: get <resource> [resId]")?;
                Command::Get {
                    resource: resource.to_string(),
                    res_id: parts.next().map(str::to_string),
                }
            }
            "set" | "patch" => {
                let (resource, body) = rest
                    .split_once(char::is_whitespace)
                    .context("usage: set|patch <resource> <json>")?;
                JsonValue::parse(body.trim()).context("body is not valid JSON")?;
                Command::Set {
                    resource: resource.to_string(),
                    body: body.trim().to_string(),
                    partial: word.eq_ignore_ascii_case("patch"),
                }
            }
            "subscribe" if !rest.is_empty() => Command::Subscribe(rest.to_string()),
            "unsubscribe" if !rest.is_empty() => Command::Unsubscribe(rest.to_string()),
            "resources" => Command::Resources,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => anyhow::bail!("unknown command '{}' (try 'help')", other),
        };
        Ok(Some(command))
    }
}

fn parse_byte(text: &str) -> Result<u8> {
    let text = text.trim();
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse::<u8>(),
    }
    .with_context(|| format!("'{}' is not a byte", text))?;
    if value > 0x7F {
        anyhow::bail!("address {:#04X} is out of range", value);
    }
    Ok(value)
}

fn parse_profile(text: &str) -> Result<ProfileId> {
    let bytes = parse_hex(text).with_context(|| format!("'{}' is not hex", text))?;
    let bytes: [u8; 5] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("a profile id is 5 bytes"))?;
    Ok(ProfileId::new(bytes)?)
}

/// The device the REPL talks to: the first discovered connection
fn remote(loopback: &Loopback) -> Result<Muid> {
    loopback
        .initiator()
        .connections()
        .next()
        .map(|c| c.muid())
        .context("no device discovered yet, run 'discover'")
}

/// Run one command against the session. Returns false on quit.
pub fn execute(loopback: &mut Loopback, command: Command) -> Result<bool> {
    debug!("Executing {:?}", command);
    match command {
        Command::Discover => loopback.initiator_mut().send_discovery()?,
        Command::Profiles => {
            let remote = remote(loopback)?;
            if let Some(conn) = loopback.initiator().connection(remote) {
                for entry in conn.profiles().iter() {
                    println!(
                        "  {} at {} {}",
                        entry.profile,
                        address::describe(entry.address),
                        if entry.enabled {
                            "enabled".green()
                        } else {
                            "disabled".dimmed()
                        }
                    );
                }
            }
            return Ok(true);
        }
        Command::SetProfile {
            address,
            profile,
            enabled,
        } => {
            let remote = remote(loopback)?;
            loopback
                .initiator_mut()
                .set_profile(remote, address, profile, enabled, 1)?;
        }
        Command::Get { resource, res_id } => {
            let remote = remote(loopback)?;
            let header = RequestHeader {
                res_id: res_id.clone(),
                ..RequestHeader::new(resource.as_str())
            };
            loopback.initiator_mut().get_property(remote, header)?;
            loopback.pump()?;
            print_value(loopback, remote, &resource, res_id.as_deref());
            return Ok(true);
        }
        Command::Set {
            resource,
            body,
            partial,
        } => {
            let remote = remote(loopback)?;
            let header = RequestHeader {
                set_partial: partial,
                ..RequestHeader::new(resource)
            };
            loopback
                .initiator_mut()
                .set_property(remote, header, body.as_bytes())?;
        }
        Command::Subscribe(resource) => {
            let remote = remote(loopback)?;
            loopback.initiator_mut().subscribe_property(
                remote,
                &resource,
                None,
                BodyEncoding::Ascii,
            )?;
        }
        Command::Unsubscribe(resource) => {
            let remote = remote(loopback)?;
            loopback
                .initiator_mut()
                .unsubscribe_property(remote, &resource, None)?;
        }
        Command::Resources => {
            let remote = remote(loopback)?;
            if let Some(conn) = loopback.initiator().connection(remote) {
                for metadata in conn.properties().catalog() {
                    println!(
                        "  {:<16} get={} set={} subscribe={}",
                        metadata.resource.bold(),
                        metadata.can_get,
                        metadata.can_set.as_str(),
                        metadata.can_subscribe
                    );
                }
            }
            return Ok(true);
        }
        Command::Help => {
            print_help();
            return Ok(true);
        }
        Command::Quit => return Ok(false),
    }
    loopback.pump()?;
    Ok(true)
}

fn print_value(loopback: &Loopback, remote: Muid, resource: &str, res_id: Option<&str>) {
    let value = loopback
        .initiator()
        .connection(remote)
        .and_then(|c| c.properties().value(resource, res_id));
    match value.map(|v| v.to_json()) {
        Some(Ok(json)) => {
            let pretty = serde_json::to_string_pretty(&serde_json::Value::from(&json))
                .unwrap_or_else(|_| json.serialize());
            println!("{}", pretty);
        }
        Some(Err(_)) => println!("{}", "(non-JSON value)".dimmed()),
        None => println!("{}", "(no value)".dimmed()),
    }
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  discover                       broadcast Discovery");
    println!("  profiles                       remote profile table");
    println!("  enable|disable <addr> <id>     e.g. enable 0x00 7E 21 00 01 01");
    println!("  get <resource> [resId]         Get Property Data");
    println!("  set <resource> <json>          Set Property Data");
    println!("  patch <resource> <json>        partial Set, keys are JSON pointers");
    println!("  subscribe|unsubscribe <res>    subscription control");
    println!("  resources                      remote ResourceList");
    println!("  quit");
}

pub fn run_repl(loopback: &mut Loopback) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("Type 'help' for commands");

    loop {
        let readline = rl.readline("midi-ci> ");
        match readline {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match Command::parse(&line) {
                    Ok(Some(command)) => match execute(loopback, command) {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => println!("{} {:#}", "error:".red(), e),
                    },
                    Ok(None) => {}
                    Err(e) => println!("{} {:#}", "error:".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Scripted walk through discovery, profiles and property exchange
pub fn run_scripted(loopback: &mut Loopback) -> Result<()> {
    info!("Discovery");
    execute(loopback, Command::Discover)?;
    let remote = remote(loopback)?;
    info!("Connected to {}", remote);

    execute(loopback, Command::Profiles)?;
    let first_profile = loopback
        .responder()
        .profiles()
        .iter()
        .find(|e| !e.enabled)
        .map(|e| (e.address, e.profile));
    if let Some((address, profile)) = first_profile {
        info!("Enabling {}", profile);
        execute(
            loopback,
            Command::SetProfile {
                address,
                profile,
                enabled: true,
            },
        )?;
    }

    execute(loopback, Command::Resources)?;
    let writable = loopback
        .initiator()
        .connection(remote)
        .and_then(|c| {
            c.properties()
                .catalog()
                .find(|m| m.can_subscribe && m.can_set != CanSet::None)
                .map(|m| m.resource.clone())
        });
    if let Some(resource) = writable {
        execute(loopback, Command::Get { resource: resource.clone(), res_id: None })?;
        execute(loopback, Command::Subscribe(resource.clone()))?;
        let current = loopback
            .responder()
            .properties()
            .value(&resource, None)
            .and_then(|v| v.to_json().ok())
            .unwrap_or_else(JsonValue::empty_object);
        let body = current.serialize();
        info!("Writing {} back to {}", body, resource);
        execute(
            loopback,
            Command::Set {
                resource: resource.clone(),
                body,
                partial: false,
            },
        )?;
        execute(loopback, Command::Unsubscribe(resource))?;
    }
    info!("Session complete, {} message(s) still queued", loopback.pending());
    Ok(())
}
