//! Interior tree node: the root routes plus a link back to its parent.

use serde_json::{Map, Value, json};

use super::{AppEntry, SelfTest, spawner};
use crate::client::{ClientReply, ServiceClient};
use crate::context::ServiceContext;
use crate::dispatch::Headers;
use crate::registry::{HandlerOutcome, HandlerRegistry, HandlerResult};
use crate::state::CHILDREN_KEY;

pub(super) const ENTRY: AppEntry = AppEntry {
    id: "branch",
    handler_class: "Branch",
    version: env!("CARGO_PKG_VERSION"),
    install,
    self_tests: SELF_TESTS,
};

const SELF_TESTS: &[SelfTest] = &[
    SelfTest {
        name: "ping",
        run: ping,
    },
    SelfTest {
        name: "state snapshot",
        run: state_snapshot,
    },
    SelfTest {
        name: "state round trip",
        run: state_round_trip,
    },
];

fn install(registry: &mut HandlerRegistry) {
    spawner::install(registry);
    registry.unary("/branch/parent", parent);
}

fn parent(context: &mut ServiceContext, _: &Headers, _: Value) -> HandlerResult {
    let reply = match context.topology().ancestry().parent() {
        Some(ancestor) => json!({"name": ancestor.name, "address": ancestor.address}),
        None => Value::Bool(false),
    };
    Ok(HandlerOutcome::reply(reply))
}

fn ping(client: &ServiceClient) -> Result<(), String> {
    if client.ping() {
        Ok(())
    } else {
        Err(format!("{} did not answer pong", client.address()))
    }
}

fn state_snapshot(client: &ServiceClient) -> Result<(), String> {
    read_state(client).map(drop)
}

fn read_state(client: &ServiceClient) -> Result<Map<String, Value>, String> {
    match client.get("/state/get", &[]) {
        Ok(ClientReply::Json(Value::Object(state))) => Ok(state),
        Ok(other) => Err(format!("unexpected state snapshot {other:?}")),
        Err(error) => Err(error.to_string()),
    }
}

/// Writes the current entries back unchanged and expects the same snapshot.
fn state_round_trip(client: &ServiceClient) -> Result<(), String> {
    let before = read_state(client)?;
    let mut entries = before.clone();
    entries.remove(CHILDREN_KEY);
    let written = client
        .post_json("/state/set", &Value::Object(entries))
        .map_err(|error| error.to_string())?;
    if written != ClientReply::Json(Value::Bool(true)) {
        return Err(format!("state write answered {written:?}"));
    }
    let after = read_state(client)?;
    if after == before {
        Ok(())
    } else {
        Err(format!("state changed across a round trip: {after:?}"))
    }
}
