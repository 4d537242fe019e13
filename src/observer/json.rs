//! JSON-lines observer: structured output for machine consumption.

use facet::Facet;

use crate::flow::RunState;

use super::{Observer, Transition};

#[derive(Facet)]
struct TransitionRecord {
    kind: String,
    old_phase: String,
    new_phase: String,
    event: String,
    error: Option<String>,
}

#[derive(Facet)]
struct ReadyRecord {
    kind: String,
    host_ip: Option<String>,
    http_port: u16,
    vnc_host: Option<String>,
    vnc_port: Option<u16>,
    warnings: Vec<String>,
}

#[derive(Facet)]
struct InterruptRecord {
    kind: String,
    hard: bool,
}

fn transition_record(t: &Transition) -> TransitionRecord {
    TransitionRecord {
        kind: "transition".into(),
        old_phase: t.old_phase.label().into(),
        new_phase: t.new_phase.label().into(),
        event: t.event.label().into(),
        error: t.event.error().map(str::to_string),
    }
}

fn ready_record(state: &RunState) -> ReadyRecord {
    ReadyRecord {
        kind: "ready".into(),
        host_ip: state.host_ip.map(|ip| ip.to_string()),
        http_port: state.http_port,
        vnc_host: state.vnc_endpoint.as_ref().map(|e| e.host.clone()),
        vnc_port: state.vnc_endpoint.as_ref().map(|e| e.port),
        warnings: state.warnings.clone(),
    }
}

/// One JSON object per line on stdout.
pub struct JsonObserver;

impl JsonObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for JsonObserver {
    fn on_transition(&mut self, t: &Transition) {
        match facet_json::to_string(&transition_record(t)) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!("cannot serialize transition: {e}"),
        }
    }

    fn on_ready(&mut self, state: &RunState) {
        match facet_json::to_string(&ready_record(state)) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!("cannot serialize run state: {e}"),
        }
    }

    fn on_interrupt(&mut self, hard: bool) {
        let record = InterruptRecord {
            kind: "interrupt".into(),
            hard,
        };
        match facet_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!("cannot serialize interrupt: {e}"),
        }
    }
}
