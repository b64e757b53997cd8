//! Output formatting utilities for text and JSON output.

use anyhow::Result;
use blesensor_core::{MetricsSnapshot, SensorEvent, SourceConfig};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::cli::OutputFormat;

/// Format one sensor event as a single output line (without newline).
pub fn format_event(event: &SensorEvent, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_event_text(event)),
        OutputFormat::Json => Ok(serde_json::to_string(event)?),
    }
}

fn timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

/// Human-readable line for an event.
pub fn format_event_text(event: &SensorEvent) -> String {
    match event {
        SensorEvent::Measurement {
            source,
            measurement,
            at,
        } => format!("{}  {}: {}", timestamp(*at), source, measurement),
        SensorEvent::StatusChanged {
            source,
            degraded: true,
            fault,
            at,
        } => format!(
            "{}  {}: degraded ({})",
            timestamp(*at),
            source,
            fault.as_deref().unwrap_or("unknown fault")
        ),
        SensorEvent::StatusChanged { source, at, .. } => {
            format!("{}  {}: ok", timestamp(*at), source)
        }
        SensorEvent::StateChanged { source, state, at } => {
            format!("{}  {}: {}", timestamp(*at), source, state)
        }
    }
}

/// Describe a resolved source for `blesensor check`.
pub fn format_source(config: &SourceConfig) -> String {
    let mut out = format!(
        "{}\n  service:        {}\n  characteristic: {}\n",
        config.name, config.service, config.characteristic
    );
    if let Some(descriptor) = &config.descriptor {
        out.push_str(&format!("  descriptor:     {}\n", descriptor));
    }
    out.push_str(&format!(
        "  notify:         {}\n",
        if config.notify { "yes" } else { "no" }
    ));
    match config.update_interval {
        Some(interval) => {
            out.push_str(&format!("  update every:   {}s\n", interval.as_secs_f64()))
        }
        None => out.push_str("  update every:   never\n"),
    }
    out.push_str(&format!("  decode:         {}\n", config.parser));
    if config.dedupe_reads {
        out.push_str("  dedupe reads:   yes\n");
    }
    out
}

/// One-line summary of a sensor's counters, printed when `watch` stops.
pub fn format_summary(name: &str, snapshot: &MetricsSnapshot) -> String {
    format!(
        "{}: {} values, {} unavailable, {} reads ({} failed, {} rejected), {} notifications, {} link losses",
        name,
        snapshot.values_emitted,
        snapshot.unavailable_emitted,
        snapshot.reads_submitted,
        snapshot.read_errors,
        snapshot.reads_rejected,
        snapshot.notifications,
        snapshot.link_losses
    )
}
