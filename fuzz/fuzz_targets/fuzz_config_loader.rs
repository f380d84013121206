#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parsing, validation and layout construction must reject bad input without panicking.
    if let Ok(cfg) = keg_config::load_toml(data) {
        if cfg.validate().is_ok() {
            let _ = keg_core::FieldLayout::try_from(&cfg.layout);
        }
    }
    let _ = keg_config::PersistedCalibration::from_json(data);
});
