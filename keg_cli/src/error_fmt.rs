//! Human-readable error descriptions and structured JSON error formatting.

use keg_core::error::{BuildError, CalibrationError, KegError, LayoutError};

/// Map an `eyre::Report` to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(ce) = err.downcast_ref::<CalibrationError>() {
        return match ce {
            CalibrationError::DegenerateCalibration { raw } => format!(
                "What happened: Both calibration captures read the same raw value ({raw}).\nLikely causes: The known load was not placed, or the weight channel does not change with load.\nHow to fix: Check channels.weight and the layout, place the load after the prompt, then rerun."
            ),
            CalibrationError::InsufficientSamples { phase, got, need } => format!(
                "What happened: The {phase} capture collected {got} usable sample(s), {need} needed.\nLikely causes: The device is out of range, frames carry another discriminator key, or the readings were rejected as outliers.\nHow to fix: Move the receiver closer, pass the right --key, or raise session.capture_ms."
            ),
            CalibrationError::UnknownKey(k) => format!(
                "What happened: No calibration exists for key '{k}'.\nLikely causes: The device switched to a range that was never calibrated.\nHow to fix: Run `kegscale calibrate --key {k} --known <VALUE>`."
            ),
            CalibrationError::Persist(msg) => format!(
                "What happened: The calibration could not be saved ({msg}).\nLikely causes: The directory of calibration.path is missing or not writable.\nHow to fix: Check calibration.path and file permissions. The previous calibration is unchanged."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug for more detail."
            ),
        };
    }

    if let Some(le) = err.downcast_ref::<LayoutError>() {
        return format!(
            "What happened: {le}.\nLikely causes: A [[layout.fields]] entry or a [channels] name in the config does not describe the frame.\nHow to fix: Edit the layout in the config and run `kegscale self-check`."
        );
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return format!(
            "What happened: The monitor could not be assembled ({be}).\nLikely causes: Missing [layout] or [channels] in the config.\nHow to fix: Edit the config file, then rerun."
        );
    }

    if let Some(KegError::SourceTimeout) = err.downcast_ref::<KegError>() {
        return "What happened: No frames arrived in time.\nLikely causes: The scale is asleep or out of range, or source.address filters every frame.\nHow to fix: Wake the scale, check source.address, or replay a capture with --replay.".to_string();
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'raw,value' or 'raw,value,key'.".to_string();
    }

    if lower.contains("read config") || lower.contains("parse config") {
        let cause = err
            .chain()
            .nth(1)
            .map(|c| format!(" Cause: {c}"))
            .unwrap_or_default();
        return format!(
            "What happened: {msg}.{cause}\nHow to fix: Pass --config with a valid TOML file. See etc/kegscale.toml for a sample."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 3 degenerate calibration, 4 insufficient samples,
/// 5 invalid layout, 1 anything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<CalibrationError>() {
        Some(CalibrationError::DegenerateCalibration { .. }) => return 3,
        Some(CalibrationError::InsufficientSamples { .. }) => return 4,
        _ => {}
    }
    if err.downcast_ref::<LayoutError>().is_some() {
        return 5;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(ce) = err.downcast_ref::<CalibrationError>() {
        return match ce {
            CalibrationError::DegenerateCalibration { .. } => "DegenerateCalibration",
            CalibrationError::InsufficientSamples { .. } => "InsufficientSamples",
            CalibrationError::UnknownKey(_) => "UnknownKey",
            CalibrationError::NonFinite(_) => "NonFinite",
            CalibrationError::InvalidRows(_) => "InvalidRows",
            CalibrationError::InvalidState(_) => "InvalidState",
            CalibrationError::Persist(_) => "Persist",
        };
    }
    if err.downcast_ref::<LayoutError>().is_some() {
        return "InvalidLayout";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let mut obj = json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    });
    if let Some(CalibrationError::InsufficientSamples { phase, got, need }) =
        err.downcast_ref::<CalibrationError>()
    {
        obj["details"] = json!({ "phase": phase.to_string(), "got": got, "need": need });
    }
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keg_core::error::CapturePhase;

    #[test]
    fn exit_codes_are_stable() {
        let degenerate = eyre::Report::new(CalibrationError::DegenerateCalibration { raw: 5.0 });
        let short = eyre::Report::new(CalibrationError::InsufficientSamples {
            phase: CapturePhase::Loaded,
            got: 1,
            need: 3,
        });
        let layout = eyre::Report::new(LayoutError::Empty);
        assert_eq!(exit_code_for_error(&degenerate), 3);
        assert_eq!(exit_code_for_error(&short), 4);
        assert_eq!(exit_code_for_error(&layout), 5);
        assert_eq!(exit_code_for_error(&eyre::eyre!("boom")), 1);
    }

    #[test]
    fn context_does_not_hide_the_typed_error() {
        use eyre::WrapErr;
        let r: eyre::Result<()> = Err(LayoutError::Empty).wrap_err("build monitor");
        let err = r.unwrap_err();
        assert_eq!(exit_code_for_error(&err), 5);
    }

    #[test]
    fn json_error_carries_details() {
        let err = eyre::Report::new(CalibrationError::InsufficientSamples {
            phase: CapturePhase::Empty,
            got: 0,
            need: 3,
        });
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "InsufficientSamples");
        assert_eq!(v["exit_code"], 4);
        assert_eq!(v["details"]["phase"], "empty");
        assert!(v["message"].as_str().unwrap().contains("What happened"));
    }
}
