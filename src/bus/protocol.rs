//! Bus wire format
//!
//! A bus datagram is one class byte followed by a UTF-8 text payload:
//!
//! - Control:   `<COMMAND> <TARGET> [ARGS...]`, target is a node name or `all`
//! - Telemetry: `<EVENT> <ORIGIN> [VALUE]`
//!
//! Both command and event sets are closed; anything else fails to decode.

use crate::error::{FleetError, Result};
use crate::executor::types::TaskKind;
use crate::membership::types::NodeId;
use crate::state::ThroughputSample;

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageClass {
    Control = 0,
    Telemetry = 1,
}

impl TryFrom<u8> for MessageClass {
    type Error = FleetError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(MessageClass::Control),
            1 => Ok(MessageClass::Telemetry),
            other => Err(FleetError::UnknownClass(other)),
        }
    }
}

pub fn encode(class: MessageClass, payload: &str) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(payload.len() + 1);
    datagram.push(class as u8);
    datagram.extend_from_slice(payload.as_bytes());
    datagram
}

/// Splits a datagram into its class and text payload.
pub fn decode(datagram: &[u8]) -> Result<(MessageClass, &str)> {
    let (&tag, payload) = datagram
        .split_first()
        .ok_or_else(|| FleetError::malformed("empty bus datagram"))?;
    let class = MessageClass::try_from(tag)?;
    let text = std::str::from_utf8(payload)
        .map_err(|e| FleetError::malformed(format!("payload is not UTF-8: {}", e)))?;
    Ok((class, text))
}

// ============================================================
// CONTROL
// ============================================================

/// Who a control message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Node(NodeId),
}

impl Target {
    pub fn includes(&self, me: &NodeId) -> bool {
        match self {
            Target::All => true,
            Target::Node(name) => name == me,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("all"),
            Target::Node(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        if s == "all" {
            Target::All
        } else {
            Target::Node(NodeId::from(s))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Once,
    SetWorkers(usize),
    SetRate(u64),
    EnableTask(TaskKind),
    DisableTask(TaskKind),
    SwitchSink(String),
    Terminate,
    TerminateAll,
    Done,
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Start => "START",
            Command::Stop => "STOP",
            Command::Once => "ONCE",
            Command::SetWorkers(_) => "SET_WORKERS",
            Command::SetRate(_) => "SET_RATE",
            Command::EnableTask(_) => "ENABLE_TASK",
            Command::DisableTask(_) => "DISABLE_TASK",
            Command::SwitchSink(_) => "SWITCH_SINK",
            Command::Terminate => "TERMINATE",
            Command::TerminateAll => "TERMINATE_ALL",
            Command::Done => "DONE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub command: Command,
    pub target: Target,
}

impl ControlMessage {
    pub fn new(command: Command, target: impl Into<Target>) -> Self {
        Self {
            command,
            target: target.into(),
        }
    }

    pub fn to_node(command: Command, node: &NodeId) -> Self {
        Self {
            command,
            target: Target::Node(node.clone()),
        }
    }

    pub fn to_all(command: Command) -> Self {
        Self {
            command,
            target: Target::All,
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.command.verb(), self.target)?;
        match &self.command {
            Command::SetWorkers(n) => write!(f, " {}", n),
            Command::SetRate(r) => write!(f, " {}", r),
            Command::EnableTask(kind) | Command::DisableTask(kind) => write!(f, " {}", kind),
            Command::SwitchSink(name) => write!(f, " {}", name),
            _ => Ok(()),
        }
    }
}

impl FromStr for ControlMessage {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| FleetError::malformed("empty control message"))?;
        let target = parts.next().map(Target::from);
        let arg = parts.next();
        if let Some(extra) = parts.next() {
            return Err(FleetError::malformed(format!(
                "unexpected argument '{}' in '{}'",
                extra, s
            )));
        }

        if verb == "TERMINATE_ALL" {
            return no_arg(arg, s).map(|_| ControlMessage {
                command: Command::TerminateAll,
                target: target.unwrap_or(Target::All),
            });
        }

        let target =
            target.ok_or_else(|| FleetError::malformed(format!("'{}' has no target", s)))?;

        let command = match verb {
            "START" => no_arg(arg, s).map(|_| Command::Start)?,
            "STOP" => no_arg(arg, s).map(|_| Command::Stop)?,
            "ONCE" => no_arg(arg, s).map(|_| Command::Once)?,
            "TERMINATE" => no_arg(arg, s).map(|_| Command::Terminate)?,
            "DONE" => no_arg(arg, s).map(|_| Command::Done)?,
            "SET_WORKERS" => Command::SetWorkers(number(arg, s)?),
            "SET_RATE" => Command::SetRate(number(arg, s)?),
            "ENABLE_TASK" => Command::EnableTask(required(arg, s)?.parse()?),
            "DISABLE_TASK" => Command::DisableTask(required(arg, s)?.parse()?),
            "SWITCH_SINK" => Command::SwitchSink(required(arg, s)?.to_string()),
            other => {
                return Err(FleetError::malformed(format!(
                    "unknown control command '{}'",
                    other
                )));
            }
        };

        Ok(ControlMessage { command, target })
    }
}

fn no_arg(arg: Option<&str>, line: &str) -> Result<()> {
    match arg {
        None => Ok(()),
        Some(extra) => Err(FleetError::malformed(format!(
            "unexpected argument '{}' in '{}'",
            extra, line
        ))),
    }
}

fn required<'a>(arg: Option<&'a str>, line: &str) -> Result<&'a str> {
    arg.ok_or_else(|| FleetError::malformed(format!("'{}' is missing its argument", line)))
}

fn number<T: FromStr>(arg: Option<&str>, line: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    let raw = required(arg, line)?;
    raw.parse()
        .map_err(|e| FleetError::malformed(format!("bad number '{}' in '{}': {}", raw, line, e)))
}

// ============================================================
// TELEMETRY
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started,
    Stopped,
    WorkerCountAt(usize),
    RateAt(u64),
    TaskEnabled(TaskKind),
    TaskDisabled(TaskKind),
    SinkSwitched(String),
    Log(String),
    ThroughputSample(ThroughputSample),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Started => "STARTED",
            Event::Stopped => "STOPPED",
            Event::WorkerCountAt(_) => "WORKER_COUNT_AT",
            Event::RateAt(_) => "RATE_AT",
            Event::TaskEnabled(_) => "TASK_ENABLED",
            Event::TaskDisabled(_) => "TASK_DISABLED",
            Event::SinkSwitched(_) => "SINK_SWITCHED",
            Event::Log(_) => "LOG",
            Event::ThroughputSample(_) => "THROUGHPUT_SAMPLE",
        }
    }

    /// Text form of the event's value, if it carries one.
    pub fn value(&self) -> Option<String> {
        match self {
            Event::Started | Event::Stopped => None,
            Event::WorkerCountAt(n) => Some(n.to_string()),
            Event::RateAt(r) => Some(r.to_string()),
            Event::TaskEnabled(kind) | Event::TaskDisabled(kind) => Some(kind.to_string()),
            Event::SinkSwitched(name) => Some(name.clone()),
            Event::Log(text) => Some(text.clone()),
            Event::ThroughputSample(sample) => Some(sample.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    pub event: Event,
    pub origin: NodeId,
}

impl TelemetryMessage {
    pub fn new(event: Event, origin: NodeId) -> Self {
        Self { event, origin }
    }
}

impl fmt::Display for TelemetryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.event.name(), self.origin)?;
        if let Some(value) = self.event.value() {
            write!(f, " {}", value)?;
        }
        Ok(())
    }
}

impl FromStr for TelemetryMessage {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().splitn(3, ' ');
        let name = parts.next().unwrap_or_default();
        let origin = parts
            .next()
            .filter(|origin| !origin.is_empty())
            .ok_or_else(|| FleetError::malformed(format!("'{}' has no origin", s)))?;
        let value = parts.next().map(str::trim);

        let event = match name {
            "STARTED" => Event::Started,
            "STOPPED" => Event::Stopped,
            "WORKER_COUNT_AT" => Event::WorkerCountAt(number(value, s)?),
            "RATE_AT" => Event::RateAt(number(value, s)?),
            "TASK_ENABLED" => Event::TaskEnabled(required(value, s)?.parse()?),
            "TASK_DISABLED" => Event::TaskDisabled(required(value, s)?.parse()?),
            "SINK_SWITCHED" => Event::SinkSwitched(required(value, s)?.to_string()),
            "LOG" => Event::Log(value.unwrap_or_default().to_string()),
            "THROUGHPUT_SAMPLE" => Event::ThroughputSample(required(value, s)?.parse()?),
            other => {
                return Err(FleetError::malformed(format!(
                    "unknown telemetry event '{}'",
                    other
                )));
            }
        };

        Ok(TelemetryMessage {
            event,
            origin: NodeId::from(origin),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_grammar() {
        let msg: ControlMessage = "SET_WORKERS c1 5".parse().unwrap();
        assert_eq!(msg.command, Command::SetWorkers(5));
        assert_eq!(msg.target, Target::Node(NodeId::from("c1")));

        let msg: ControlMessage = "ENABLE_TASK all T".parse().unwrap();
        assert_eq!(msg.command, Command::EnableTask(TaskKind::TotalData));
        assert_eq!(msg.target, Target::All);

        let msg: ControlMessage = "DISABLE_TASK primary campaign".parse().unwrap();
        assert_eq!(msg.command, Command::DisableTask(TaskKind::Campaign));

        let msg: ControlMessage = "TERMINATE_ALL".parse().unwrap();
        assert_eq!(msg.command, Command::TerminateAll);
        assert_eq!(msg.target, Target::All);
    }

    #[test]
    fn test_control_display_reparses() {
        let original = ControlMessage::to_node(Command::SwitchSink("replica".into()), &NodeId::from("c2"));

        let text = original.to_string();

        assert_eq!(text, "SWITCH_SINK c2 replica");
        assert_eq!(text.parse::<ControlMessage>().unwrap(), original);
    }

    #[test]
    fn test_control_rejects_bad_input() {
        for bad in [
            "",
            "JUMP c1",
            "START",
            "START c1 now",
            "SET_WORKERS c1",
            "SET_WORKERS c1 many",
            "SET_RATE c1 -3",
            "ENABLE_TASK c1 Z",
        ] {
            assert!(
                matches!(bad.parse::<ControlMessage>(), Err(FleetError::MalformedMessage { .. })),
                "accepted '{}'",
                bad
            );
        }
    }

    #[test]
    fn test_target_matching() {
        let me = NodeId::from("c1");

        assert!(Target::All.includes(&me));
        assert!(Target::from("c1").includes(&me));
        assert!(!Target::from("c2").includes(&me));
    }

    #[test]
    fn test_telemetry_grammar() {
        let msg: TelemetryMessage = "LOG c1 updating campaign: i/o timeout".parse().unwrap();
        assert_eq!(msg.origin, NodeId::from("c1"));
        assert_eq!(msg.event, Event::Log("updating campaign: i/o timeout".into()));

        let msg: TelemetryMessage = "THROUGHPUT_SAMPLE c2 42 1700000000000".parse().unwrap();
        assert_eq!(
            msg.event,
            Event::ThroughputSample(ThroughputSample {
                count: 42,
                timestamp_ms: 1_700_000_000_000,
            })
        );

        let msg: TelemetryMessage = "STARTED primary".parse().unwrap();
        assert_eq!(msg.event, Event::Started);
        assert_eq!(msg.to_string(), "STARTED primary");
    }

    #[test]
    fn test_telemetry_rejects_unknown_event() {
        assert!("EXPLODED c1".parse::<TelemetryMessage>().is_err());
        assert!("STARTED".parse::<TelemetryMessage>().is_err());
        assert!("WORKER_COUNT_AT c1 x".parse::<TelemetryMessage>().is_err());
    }

    #[test]
    fn test_datagram_class_byte() {
        let datagram = encode(MessageClass::Telemetry, "STOPPED c1");
        assert_eq!(datagram[0], 1);

        let (class, text) = decode(&datagram).unwrap();
        assert_eq!(class, MessageClass::Telemetry);
        assert_eq!(text, "STOPPED c1");

        assert!(matches!(decode(&[9, b'x']), Err(FleetError::UnknownClass(9))));
        assert!(decode(&[]).is_err());
    }
}
