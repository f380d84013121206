//! Command implementations: source assembly, monitor loop, calibration, tare.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::{Result, WrapErr};
use keg_config::Config;
use keg_core::store::{load_model, merge_fit, save_tare};
use keg_core::{
    CalibrationModel, CalibrationSession, ConditionerCfg, DiscriminatorKey, FeedMode, FieldLayout,
    JsonFileStore, LayoutMatch, Monitor, Reading, RunOptions, SessionBounds, SharedCalibration,
    SourceFilter, fit_rows, monitor_from_config,
};
use keg_sim::{BeaconControl, CaptureReplay, FieldRoles, NoiseProfile, SimulatedBeacon};
use keg_traits::{FrameSource, MonotonicClock};
use serde_json::json;

use crate::cli::SourceArgs;

const SIM_ADDRESS: &str = "5C:01:3B:00:00:01";
const POLL: Duration = Duration::from_millis(100);

/// A frame source plus, for the simulator, its control handle.
pub struct Source {
    pub frames: Box<dyn FrameSource + Send>,
    pub control: Option<BeaconControl>,
}

pub fn make_source(cfg: &Config, args: &SourceArgs) -> Result<Source> {
    if let Some(path) = &args.replay {
        let replay = CaptureReplay::from_path(path)
            .wrap_err_with(|| format!("load capture {}", path.display()))?
            .realtime(args.realtime);
        tracing::info!(path = %path.display(), frames = replay.len(), "replaying capture");
        return Ok(Source {
            frames: Box::new(replay),
            control: None,
        });
    }
    let address = cfg.source.address.as_deref().unwrap_or(SIM_ADDRESS);
    let beacon = SimulatedBeacon::new(address, cfg.layout.clone())
        .with_roles(FieldRoles::from(&cfg.channels))
        .with_noise(
            NoiseProfile {
                amplitude: args.sim_noise.max(0),
                ..NoiseProfile::default()
            },
            0x5EED,
        )
        .paced(!args.fast);
    let control = beacon.control();
    control.set_weight(args.sim_raw);
    if let Some(s) = args.sim_state {
        control.set_state(s);
    }
    if let Some(t) = args.sim_temp {
        control.set_temperature(t);
    }
    tracing::info!(address, raw = args.sim_raw, "simulated beacon");
    Ok(Source {
        frames: Box::new(beacon),
        control: Some(control),
    })
}

pub fn store_for(cfg: &Config) -> JsonFileStore {
    JsonFileStore::new(&cfg.calibration.path)
}

/// Stored model for the active layout, or an empty one.
pub fn load_shared(cfg: &Config, layout: &FieldLayout) -> Result<SharedCalibration> {
    let store = store_for(cfg);
    let model = match load_model(&store, layout)? {
        Some((m, status)) => {
            tracing::debug!(?status, path = %store.path().display(), "calibration loaded");
            m
        }
        None => {
            tracing::info!(path = %store.path().display(), "no stored calibration; values stay uncalibrated");
            CalibrationModel::default()
        }
    };
    Ok(SharedCalibration::new(
        model.non_negative(cfg.calibration.non_negative),
    ))
}

fn build_monitor(cfg: &Config) -> Result<Monitor> {
    let layout = FieldLayout::try_from(&cfg.layout)?;
    let shared = load_shared(cfg, &layout)?;
    monitor_from_config(cfg, shared)
}

fn opt(v: Option<f64>, prec: usize) -> String {
    v.map_or_else(|| "-".to_string(), |x| format!("{x:.prec$}"))
}

pub fn reading_json(r: &Reading) -> serde_json::Value {
    json!({
        "source": r.source_id(),
        "received_ms": r.frame.received_ms,
        "rssi": r.frame.rssi,
        "key": r.discriminator.as_ref().map(DiscriminatorKey::as_str),
        "rejected": r.rejected,
        "raw": r.instantaneous,
        "committed_raw": r.committed,
        "value": r.value,
        "committed_value": r.committed_value,
        "displayed": r.displayed.map(|d| d.committed_value),
        "temperature_c": r.temperature_c,
        "battery_pct": r.battery_pct,
    })
}

pub fn reading_line(r: &Reading) -> String {
    let mut line = format!(
        "{} t={} raw={} value={} displayed={}",
        r.source_id(),
        r.frame.received_ms,
        opt(r.instantaneous, 1),
        opt(r.value, 3),
        opt(r.displayed.map(|d| d.committed_value), 3),
    );
    if r.committed.is_some() {
        line.push_str(" *");
    }
    if r.rejected {
        line.push_str(" [outlier]");
    }
    if let Some(k) = &r.discriminator {
        line.push_str(&format!(" key={k}"));
    }
    if let Some(t) = r.temperature_c {
        line.push_str(&format!(" temp={t:.1}C"));
    }
    if let Some(b) = r.battery_pct {
        line.push_str(&format!(" batt={b}%"));
    }
    line
}

pub fn monitor(
    cfg: &Config,
    args: &SourceArgs,
    max_frames: Option<u64>,
    direct: bool,
    json_out: bool,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut mon = build_monitor(cfg)?;
    let source = make_source(cfg, args)?;
    let stdout = std::io::stdout();
    let mut sink = |r: &Reading| -> keg_core::Result<()> {
        let mut out = stdout.lock();
        if json_out {
            writeln!(out, "{}", reading_json(r))?;
        } else {
            writeln!(out, "{}", reading_line(r))?;
        }
        Ok(())
    };
    let opts = RunOptions {
        mode: if direct {
            FeedMode::Direct
        } else {
            FeedMode::Threaded(64)
        },
        poll: POLL,
        max_frames,
        ..RunOptions::default()
    };
    let summary = keg_core::run(source.frames, &mut mon, &mut sink, shutdown, opts)?;
    tracing::info!(
        frames = summary.frames,
        readings = summary.readings,
        filtered = summary.filtered,
        dropped = summary.dropped,
        source_errors = summary.source_errors,
        "monitor finished"
    );
    Ok(())
}

fn wait_for_operator(msg: &str, skip: bool) -> Result<()> {
    eprintln!("{msg}");
    if skip {
        return Ok(());
    }
    eprint!("Press Enter to capture... ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    // EOF counts as Enter
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

/// Feed frames into the running capture phase until it completes.
fn feed_capture(
    session: &mut CalibrationSession,
    mon: &Monitor,
    filter: &SourceFilter,
    weight: &str,
    discriminator: Option<&str>,
    frames: &mut dyn FrameSource,
    shutdown: &AtomicBool,
) -> Result<()> {
    while session.state().is_capturing() {
        if shutdown.load(Ordering::Relaxed) {
            eyre::bail!("interrupted during {}", session.state());
        }
        session.tick()?;
        let frame = match frames.next_frame(POLL) {
            Ok(Some(f)) => f,
            Ok(None) if frames.is_exhausted() => {
                session.proceed()?;
                break;
            }
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "frame source error during capture");
                continue;
            }
        };
        if !filter.matches(&frame) {
            continue;
        }
        let decoded = mon.decoder().decode(&frame);
        let frame_key = discriminator
            .and_then(|d| decoded.get(d))
            .map_or_else(DiscriminatorKey::default, DiscriminatorKey::from);
        if &frame_key != session.key() {
            tracing::trace!(key = %frame_key, "frame for another key skipped");
            continue;
        }
        if let Some(raw) = decoded.get(weight) {
            session.offer(raw)?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn calibrate(
    cfg: &Config,
    known: Option<f64>,
    key: Option<String>,
    from_csv: Option<&Path>,
    sim_loaded: Option<i64>,
    yes: bool,
    args: &SourceArgs,
    json_out: bool,
    shutdown: &AtomicBool,
) -> Result<()> {
    let layout = FieldLayout::try_from(&cfg.layout)?;
    let mut store = store_for(cfg);

    if let Some(path) = from_csv {
        let rows = keg_config::load_calibration_csv(path)?;
        let fits = fit_rows(&rows)?;
        for (k, fit) in &fits {
            merge_fit(&mut store, k, *fit, Some(&layout))?;
            report_fit(k, fit.slope, fit.intercept, json_out)?;
        }
        tracing::info!(keys = fits.len(), rows = rows.len(), "offline calibration stored");
        return Ok(());
    }

    let known = known.ok_or_else(|| eyre::eyre!("--known is required for guided calibration"))?;
    let key = key.map_or_else(DiscriminatorKey::default, DiscriminatorKey::new);
    let mon = build_monitor(cfg)?;
    let filter = SourceFilter::from(&cfg.source);
    let mut source = make_source(cfg, args)?;
    if let (Some(ctl), Some(s)) = (&source.control, key.as_str().parse::<i64>().ok()) {
        ctl.set_state(s);
    }

    let mut session = CalibrationSession::with_clock(
        key.clone(),
        known,
        SessionBounds::from(&cfg.session),
        &ConditionerCfg::from(&cfg.filter),
        MonotonicClock::new(),
    );
    session.start()?;

    wait_for_operator("Remove all load from the scale.", yes)?;
    session.capture()?;
    feed_capture(
        &mut session,
        &mon,
        &filter,
        &cfg.channels.weight,
        cfg.channels.discriminator.as_deref(),
        &mut *source.frames,
        shutdown,
    )?;

    if let Some(ctl) = &source.control {
        ctl.set_weight(sim_loaded.unwrap_or(args.sim_raw + 20_000));
    }
    wait_for_operator(&format!("Place the known load ({known}) on the scale."), yes)?;
    session.capture()?;
    feed_capture(
        &mut session,
        &mon,
        &filter,
        &cfg.channels.weight,
        cfg.channels.discriminator.as_deref(),
        &mut *source.frames,
        shutdown,
    )?;

    let fit = session.persist(&mut store, Some(&layout), None)?;
    if !json_out {
        eprintln!(
            "Captured raw empty={} loaded={}",
            opt(session.raw_empty(), 1),
            opt(session.raw_loaded(), 1)
        );
    }
    report_fit(&key, fit.slope, fit.intercept, json_out)
}

fn report_fit(key: &DiscriminatorKey, slope: f64, intercept: f64, json_out: bool) -> Result<()> {
    let mut out = std::io::stdout().lock();
    if json_out {
        writeln!(
            out,
            "{}",
            json!({ "key": key.as_str(), "slope": slope, "intercept": intercept })
        )?;
    } else {
        writeln!(out, "Calibration for key '{key}': slope={slope:.6} intercept={intercept:.3}")?;
    }
    Ok(())
}

pub fn tare(
    cfg: &Config,
    clear: bool,
    max_frames: u64,
    args: &SourceArgs,
    json_out: bool,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut store = store_for(cfg);
    if clear {
        save_tare(&mut store, None)?;
        let mut out = std::io::stdout().lock();
        if json_out {
            writeln!(out, "{}", json!({ "tare_offset": null }))?;
        } else {
            writeln!(out, "Tare cleared")?;
        }
        return Ok(());
    }

    let mut mon = build_monitor(cfg)?;
    // measure from the untared value
    mon.clear_tare();
    let source = make_source(cfg, args)?;
    let mut settled: Option<String> = None;
    let done = AtomicBool::new(false);
    let mut sink = |r: &Reading| -> keg_core::Result<()> {
        if shutdown.load(Ordering::Relaxed) {
            done.store(true, Ordering::Relaxed);
        }
        if r.committed.is_some() && settled.is_none() {
            settled = Some(r.source_id().to_string());
            done.store(true, Ordering::Relaxed);
        }
        Ok(())
    };
    let opts = RunOptions {
        mode: FeedMode::Direct,
        poll: POLL,
        max_frames: Some(max_frames),
        ..RunOptions::default()
    };
    keg_core::run(source.frames, &mut mon, &mut sink, &done, opts)?;

    let device =
        settled.ok_or_else(|| eyre::eyre!("no settled reading within {max_frames} frames"))?;
    let offset = mon.tare_now(&device)?;
    save_tare(&mut store, Some(offset))?;

    let mut out = std::io::stdout().lock();
    if json_out {
        writeln!(out, "{}", json!({ "source": device, "tare_offset": offset }))?;
    } else {
        writeln!(out, "Tare offset {offset:.3} stored for {device}")?;
    }
    Ok(())
}

pub fn decode(cfg: &Config, hex_text: &str, json_out: bool) -> Result<()> {
    let cleaned: String = hex_text
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '-'))
        .collect();
    let payload = hex::decode(&cleaned).wrap_err("payload is not valid hex")?;
    let mon = build_monitor(cfg)?;
    let decoded = mon.decoder().decode_bytes(&payload);
    let key = cfg
        .channels
        .discriminator
        .as_deref()
        .and_then(|d| decoded.get(d))
        .map(DiscriminatorKey::from);
    let value = decoded
        .get(&cfg.channels.weight)
        .and_then(|raw| mon.calibration().load().apply(raw as f64, key.as_ref(), None));

    let mut out = std::io::stdout().lock();
    if json_out {
        let fields: serde_json::Map<String, serde_json::Value> = decoded
            .fields()
            .map(|(n, v)| (n.to_string(), json!(v)))
            .collect();
        writeln!(
            out,
            "{}",
            json!({
                "len": payload.len(),
                "fields": fields,
                "key": key.as_ref().map(DiscriminatorKey::as_str),
                "value": value,
            })
        )?;
    } else {
        writeln!(out, "len={}", payload.len())?;
        for (name, v) in decoded.fields() {
            match v {
                Some(x) => writeln!(out, "{name} = {x}")?,
                None => writeln!(out, "{name} = (absent)")?,
            }
        }
        writeln!(out, "value = {}", opt(value, 3))?;
    }
    Ok(())
}

pub fn self_check(cfg: &Config, json_out: bool) -> Result<()> {
    let layout = FieldLayout::try_from(&cfg.layout)?;
    let mon = build_monitor(cfg)?;
    let store = store_for(cfg);
    let (status, keys) = match load_model(&store, &layout)? {
        Some((m, s)) => {
            let keys: Vec<String> = m.fits().map(|(k, _)| k.as_str().to_string()).collect();
            let status = match s {
                LayoutMatch::Matches => "ok",
                LayoutMatch::Unrecorded => "unrecorded-layout",
                LayoutMatch::Stale => "stale",
            };
            (status, keys)
        }
        None => ("missing", Vec::new()),
    };
    let fields = mon.decoder().layout().len();

    let mut out = std::io::stdout().lock();
    if json_out {
        writeln!(
            out,
            "{}",
            json!({
                "config": "ok",
                "layout_fields": fields,
                "min_frame_len": layout.min_complete_len(),
                "calibration": status,
                "keys": keys,
            })
        )?;
    } else {
        writeln!(out, "config: ok")?;
        writeln!(
            out,
            "layout: {fields} field(s), complete frames from {} bytes",
            layout.min_complete_len()
        )?;
        writeln!(out, "calibration: {status} ({} key(s))", keys.len())?;
        writeln!(out, "OK")?;
    }
    Ok(())
}
