use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

/// A stage of the entrypoint that can be invoked on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Init,
    Run,
    Wait,
    Setup,
    Capabilities,
    Supervise,
    Plan,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Run => "run",
            Self::Wait => "wait",
            Self::Setup => "setup",
            Self::Capabilities => "capabilities",
            Self::Supervise => "supervise",
            Self::Plan => "plan",
        }
    }
}

/// A stage with an optional selector, written `stage` or `stage:selector`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageRef {
    pub stage: Stage,
    pub selector: Option<String>,
}

impl StageRef {
    pub fn canonical(&self) -> String {
        match &self.selector {
            Some(selector) => format!("{}:{}", self.stage.as_str(), selector),
            None => self.stage.as_str().to_string(),
        }
    }

    /// Resolves aliases: `setup:plan` is the same as `plan`.
    pub fn normalized(&self) -> Self {
        match (self.stage, self.selector.as_deref()) {
            (Stage::Setup, Some("plan")) => Self {
                stage: Stage::Plan,
                selector: None,
            },
            _ => self.clone(),
        }
    }
}

impl Display for StageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[derive(Debug, Error)]
pub enum StageParseError {
    #[error("unknown stage '{0}'")]
    UnknownStage(String),
}

impl FromStr for StageRef {
    type Err = StageParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.splitn(2, ':');
        let stage_text = parts.next().unwrap_or_default();
        let selector = parts.next().map(ToOwned::to_owned);

        let stage = match stage_text {
            "init" => Stage::Init,
            "run" => Stage::Run,
            "wait" => Stage::Wait,
            "setup" => Stage::Setup,
            "capabilities" => Stage::Capabilities,
            "supervise" => Stage::Supervise,
            "plan" => Stage::Plan,
            _ => return Err(StageParseError::UnknownStage(stage_text.to_string())),
        };

        Ok(Self { stage, selector })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stage_only() {
        let cmd = StageRef::from_str("supervise").expect("supervise should parse");
        assert_eq!(cmd.stage, Stage::Supervise);
        assert_eq!(cmd.selector, None);
    }

    #[test]
    fn setup_plan_is_an_alias() {
        let cmd = StageRef::from_str("setup:plan").expect("setup:plan should parse");
        assert_eq!(cmd.canonical(), "setup:plan");
        assert_eq!(cmd.normalized().stage, Stage::Plan);
    }

    #[test]
    fn rejects_unknown_stage() {
        let err = StageRef::from_str("deploy:prod").expect_err("must fail");
        assert!(matches!(err, StageParseError::UnknownStage(s) if s == "deploy"));
    }
}
