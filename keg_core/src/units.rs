//! Auxiliary quantities carried alongside the weight: temperature and
//! battery level. These are plain maps with no conditioning.

/// Linear temperature map: °C = scale * raw + offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempMap {
    pub scale: f64,
    pub offset: f64,
}

impl Default for TempMap {
    /// Deci-degrees Celsius.
    fn default() -> Self {
        Self {
            scale: 0.1,
            offset: 0.0,
        }
    }
}

impl TempMap {
    #[inline]
    pub fn celsius(&self, raw: i64) -> f64 {
        self.scale * raw as f64 + self.offset
    }
}

/// Raw battery field to percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatteryMap {
    /// pct = round(a * raw + b), clipped to 0..=100.
    Linear { a: f64, b: f64 },
    /// Field carries millivolts; looked up in the vendor discharge table.
    MillivoltTable,
}

/// Percent per count for batteries reported on a 0..=15 scale.
pub const DEFAULT_BATTERY_A: f64 = 6.67;

impl Default for BatteryMap {
    fn default() -> Self {
        Self::Linear {
            a: DEFAULT_BATTERY_A,
            b: 0.0,
        }
    }
}

impl BatteryMap {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent(&self, raw: i64) -> u8 {
        match *self {
            // clamped to 0..=100 before the cast
            Self::Linear { a, b } => (a * raw as f64 + b).round().clamp(0.0, 100.0) as u8,
            Self::MillivoltTable => millivolts_to_percent(raw),
        }
    }
}

/// Discharge curve: entry `i` is the lowest millivolt reading that counts as `i + 1` percent.
const MILLIVOLT_TABLE: [u16; 100] = [
    3165, 3246, 3293, 3327, 3353, 3374, 3392, 3408, 3422, 3434, //
    3445, 3455, 3465, 3473, 3481, 3489, 3496, 3502, 3506, 3514, //
    3522, 3531, 3539, 3547, 3555, 3563, 3571, 3580, 3588, 3596, //
    3604, 3612, 3620, 3629, 3637, 3645, 3653, 3661, 3669, 3678, //
    3686, 3694, 3702, 3710, 3718, 3727, 3735, 3743, 3751, 3759, //
    3767, 3776, 3784, 3792, 3800, 3808, 3817, 3825, 3833, 3841, //
    3849, 3857, 3866, 3874, 3882, 3890, 3898, 3906, 3915, 3923, //
    3931, 3939, 3947, 3955, 3964, 3972, 3980, 3988, 3996, 4004, //
    4013, 4021, 4029, 4037, 4045, 4054, 4062, 4070, 4078, 4086, //
    4094, 4103, 4111, 4119, 4127, 4135, 4143, 4152, 4160, 4168,
];

pub fn millivolts_to_percent(mv: i64) -> u8 {
    let idx = MILLIVOLT_TABLE.partition_point(|&t| i64::from(t) <= mv);
    // idx <= 100
    u8::try_from(idx).unwrap_or(100)
}

#[inline]
pub fn c_to_f(c: f64) -> f64 {
    9.0 * c / 5.0 + 32.0
}

#[inline]
pub fn f_to_c(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

#[inline]
pub fn grams_to_kg(g: f64) -> f64 {
    g / 1000.0
}

#[inline]
pub fn grams_to_lb(g: f64) -> f64 {
    g * 0.002_204_62
}

#[inline]
pub fn kg_to_lb(kg: f64) -> f64 {
    grams_to_lb(kg * 1000.0)
}
