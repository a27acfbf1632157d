use entryflow_core::{ExitKind, ProcessState};
use serde::Serialize;

/// Which standard stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Everything observable about supervision, broadcast to subscribers and the
/// optional event listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    State {
        process: String,
        group: String,
        from: ProcessState,
        to: ProcessState,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit: Option<ExitKind>,
    },
    Log {
        process: String,
        stream: Stream,
        line: String,
    },
    GroupStopped {
        group: String,
    },
}

impl SupervisorEvent {
    /// The process an event concerns, if any.
    pub fn process(&self) -> Option<&str> {
        match self {
            Self::State { process, .. } | Self::Log { process, .. } => Some(process),
            Self::GroupStopped { .. } => None,
        }
    }

    /// The target state when this is a state transition.
    pub fn entered(&self) -> Option<ProcessState> {
        match self {
            Self::State { to, .. } => Some(*to),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_tagged_json() {
        let event = SupervisorEvent::State {
            process: "celery".to_string(),
            group: "worker".to_string(),
            from: ProcessState::Running,
            to: ProcessState::Exited,
            exit: Some(ExitKind::Code(1)),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "state");
        assert_eq!(json["to"], "exited");
        assert_eq!(json["exit"]["kind"], "code");
        assert_eq!(json["exit"]["value"], 1);

        let log = SupervisorEvent::Log {
            process: "web".to_string(),
            stream: Stream::Stderr,
            line: "booting".to_string(),
        };
        let text = serde_json::to_string(&log).unwrap();
        assert_eq!(
            text,
            r#"{"event":"log","process":"web","stream":"stderr","line":"booting"}"#
        );
    }
}
