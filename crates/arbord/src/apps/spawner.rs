//! The root application: state access and child administration.

use std::fs;
use std::io;
use std::process;
use std::time::Duration;

use arbor_config::defaults::ROOT_APP;
use arbor_config::{Config, Severity};
use serde::Serialize;
use serde_json::Value;
use sysinfo::{Pid, ProcessesToUpdate, System};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::AppEntry;
use crate::children::SpawnRequest;
use crate::context::ServiceContext;
use crate::dispatch::Headers;
use crate::registry::{HandlerError, HandlerOutcome, HandlerRegistry, HandlerResult, Reply, Upload};
use crate::topology::{ChildRecord, ChildSelector};

pub(super) const ENTRY: AppEntry = AppEntry {
    id: ROOT_APP,
    handler_class: "Spawner",
    version: env!("CARGO_PKG_VERSION"),
    install,
    self_tests: &[],
};

const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Registers the routes every tree node serves.
pub(super) fn install(registry: &mut HandlerRegistry) {
    registry
        .interactive("/", overview)
        .unary("/state/get", state_get)
        .unary("/state/set", state_set)
        .streaming("/state/watch", WATCH_INTERVAL, state_get)
        .unary("/children/get", children_get)
        .upload("/server/create", server_create)
        .unary("/server/delete", server_delete)
        .unary("/server/log", server_log);
}

#[derive(Serialize)]
struct Link {
    label: String,
    href: String,
}

#[derive(Serialize)]
struct Overview<'a> {
    name: &'a str,
    app: &'a str,
    class: Option<String>,
    version: &'a str,
    pid: u32,
    started: Option<String>,
    address: String,
    config: &'a Config,
    state: Value,
    ancestry: Vec<Link>,
    children: &'a [ChildRecord],
    admin: Vec<Link>,
}

fn overview(context: &mut ServiceContext) -> HandlerResult {
    let config = context.config();
    let address = config.address();
    let pid = process::id();
    let ancestry = context
        .topology()
        .ancestry()
        .iter()
        .map(|ancestor| Link {
            label: ancestor.name.clone(),
            href: format!("{}/", ancestor.address),
        })
        .collect();
    let admin = ["/state/get", "/children/get", "/server/log"]
        .into_iter()
        .map(|route| Link {
            label: route.to_owned(),
            href: format!("{address}{route}"),
        })
        .collect();
    let overview = Overview {
        name: &config.name,
        app: &config.app,
        class: context.catalog().get(&config.app).map(AppEntry::qualified_class),
        version: &config.version,
        pid,
        started: process_start_time(pid),
        address: address.clone(),
        config,
        state: context.state().to_value(),
        ancestry,
        children: context.topology().children(),
        admin,
    };
    Ok(HandlerOutcome::Continue(Reply::json(&overview)?))
}

fn process_start_time(pid: u32) -> Option<String> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let started = i64::try_from(system.process(pid)?.start_time()).ok()?;
    OffsetDateTime::from_unix_timestamp(started)
        .ok()?
        .format(&Rfc3339)
        .ok()
}

fn state_get(context: &mut ServiceContext, _: &Headers, _: Value) -> HandlerResult {
    Ok(HandlerOutcome::reply(Value::Object(context.state().get())))
}

fn state_set(context: &mut ServiceContext, _: &Headers, args: Value) -> HandlerResult {
    let Value::Object(batch) = args else {
        return Err(HandlerError::invalid_arguments("state updates must be an object"));
    };
    context.state_mut().set(batch)?;
    Ok(HandlerOutcome::reply(true))
}

fn children_get(context: &mut ServiceContext, _: &Headers, _: Value) -> HandlerResult {
    Ok(HandlerOutcome::Continue(Reply::json(
        &context.topology().children(),
    )?))
}

fn server_create(context: &mut ServiceContext, _: &Headers, upload: Upload) -> HandlerResult {
    let request = spawn_request(context.config().severity, upload)?;
    let record = context.spawn_child(&request)?;
    Ok(HandlerOutcome::Continue(Reply::json(&record)?))
}

fn spawn_request(default_severity: Severity, upload: Upload) -> Result<SpawnRequest, HandlerError> {
    let field = |key: &str| {
        upload
            .args
            .get(key)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    };
    let name = field("name").unwrap_or_default();
    let port = field("port")
        .ok_or_else(|| HandlerError::invalid_arguments("missing port"))?
        .parse::<u16>()
        .map_err(|error| HandlerError::invalid_arguments(format!("port: {error}")))?;
    let severity = field("severity")
        .map(|value| value.parse::<Severity>())
        .transpose()
        .map_err(|error| HandlerError::invalid_arguments(format!("severity: {error}")))?
        .unwrap_or(default_severity);
    let secure = field("secure").is_some_and(|value| {
        matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
    });
    Ok(SpawnRequest {
        name,
        port,
        severity,
        secure,
        artifact: upload,
    })
}

fn server_delete(context: &mut ServiceContext, _: &Headers, args: Value) -> HandlerResult {
    let selector = selector(&args)?;
    context.delete_child(&selector)?;
    Ok(HandlerOutcome::reply(true))
}

fn selector(args: &Value) -> Result<ChildSelector, HandlerError> {
    let name = args
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned);
    let pid = match args.get("pid") {
        Some(Value::Number(number)) => number.as_u64().and_then(|pid| u32::try_from(pid).ok()),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    };
    if name.is_none() && pid.is_none() {
        return Err(HandlerError::invalid_arguments("expected a child name or pid"));
    }
    Ok(ChildSelector { name, pid })
}

fn server_log(context: &mut ServiceContext, _: &Headers, _: Value) -> HandlerResult {
    match fs::read_to_string(context.paths().log_path()) {
        Ok(text) => Ok(HandlerOutcome::reply(text)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(HandlerOutcome::reply(false)),
        Err(error) => Err(error.into()),
    }
}
