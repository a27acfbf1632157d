use std::fmt::Write;

use entryflow_core::{RuntimeFlags, StartupPlan};

use crate::styles::{paint, ACTIVE, HEADER, LITERAL, SKIPPED};

/// Renders a dry-run of the startup sequence.
pub fn render(plan: &StartupPlan, flags: &RuntimeFlags, color: bool) -> String {
    let mut out = String::new();
    let header = |title: &str| paint(HEADER, title, color);

    let _ = writeln!(
        out,
        "{} dev_mode={} debug={}",
        header("flags:"),
        flags.dev_mode,
        flags.debug
    );

    let _ = writeln!(out, "{}", header("readiness:"));
    match &plan.probe {
        Some(probe) => {
            let _ = writeln!(out, "  probe {}", paint(LITERAL, probe, color));
        }
        None => {
            let _ = writeln!(out, "  {}", paint(SKIPPED, "no probe", color));
        }
    }

    let _ = writeln!(out, "{}", header("setup:"));
    for (index, step) in plan.steps.iter().enumerate() {
        let status = if step.runs {
            paint(ACTIVE, "run ", color)
        } else {
            paint(SKIPPED, "skip", color)
        };
        let optional = if step.required { "" } else { " (optional)" };
        let _ = writeln!(
            out,
            "  {}. {status} {}{optional}: {}",
            index + 1,
            step.name,
            paint(LITERAL, &step.command, color)
        );
    }

    if !plan.overlays.is_empty() {
        let _ = writeln!(out, "{}", header("overlays:"));
        for (source, target) in &plan.overlays {
            let _ = writeln!(out, "  {} -> {}", target.display(), source.display());
        }
    }

    let _ = writeln!(out, "{}", header("capabilities:"));
    for (name, present) in &plan.capabilities {
        let status = if *present {
            paint(ACTIVE, "present", color)
        } else {
            paint(SKIPPED, "absent ", color)
        };
        let _ = writeln!(out, "  {status} {name}");
    }

    let _ = writeln!(out, "{}", header("groups:"));
    for (group, members) in &plan.groups {
        let _ = writeln!(out, "  {group}: {}", members.join(", "));
    }

    out
}
