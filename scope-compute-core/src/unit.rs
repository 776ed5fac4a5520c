//! Physical/logical units attached to every stream and parameter.

use std::fmt;

/// The tag half of a [`Quantity`]; distinguishes what a raw `f64` means.
///
/// Mirrors the unit set a waveform or parameter can carry (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Unit {
    Femtoseconds,
    Hertz,
    Volts,
    Decibels,
    DecibelMilliwatts,
    Ratio,
    Counts,
    SampleDepth,
    BitRate,
    Hex,
    Percent,
    /// Unit Interval: one bit period at the link's nominal baud rate.
    UnitInterval,
}

impl Unit {
    /// Suffix used by [`Unit::pretty_print`] in neutral (non-locale) form.
    pub fn suffix(self) -> &'static str {
        match self {
            Unit::Femtoseconds => "s",
            Unit::Hertz => "Hz",
            Unit::Volts => "V",
            Unit::Decibels => "dB",
            Unit::DecibelMilliwatts => "dBm",
            Unit::Ratio => "",
            Unit::Counts => "",
            Unit::SampleDepth => "S",
            Unit::BitRate => "b/s",
            Unit::Hex => "",
            Unit::Percent => "%",
            Unit::UnitInterval => "UI",
        }
    }

    /// True for units whose raw value is scaled in powers of ten with SI
    /// prefixes (`m`, `k`, `M`, ...) when pretty-printed.
    fn is_si_scaled(self) -> bool {
        matches!(
            self,
            Unit::Femtoseconds | Unit::Hertz | Unit::Volts | Unit::BitRate
        )
    }

    /// Femtoseconds are the base representation for time; callers hand us a
    /// raw value already in this unit's base (fs for time, Hz for frequency,
    /// volts for voltage, etc).
    pub fn pretty_print(self, raw: f64) -> String {
        if self == Unit::Hex {
            return format!("{:#x}", raw as i64);
        }
        if !self.is_si_scaled() {
            return format!("{:.3}{}", raw, self.suffix());
        }
        // Femtoseconds are a tiny base unit; scale toward seconds. Everything
        // else scales toward its own base (Hz, V, b/s).
        let (value, prefix) = if self == Unit::Femtoseconds {
            scale_fs(raw)
        } else {
            scale_si(raw)
        };
        format!("{:.3}{}{}", value, prefix, self.suffix())
    }

    /// Parses a neutral-form pretty-printed value back into its base unit.
    /// Accepts an optional SI prefix directly preceding the unit suffix.
    pub fn parse(self, text: &str) -> Option<f64> {
        let text = text.trim();
        let numeric_end = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e'))
            .unwrap_or(text.len());
        let (num_str, rest) = text.split_at(numeric_end);
        let base: f64 = num_str.parse().ok()?;
        if self == Unit::Hex {
            return i64::from_str_radix(text.trim_start_matches("0x"), 16)
                .ok()
                .map(|v| v as f64);
        }
        let rest = rest.trim();
        let prefix = rest.strip_suffix(self.suffix()).unwrap_or(rest);
        let multiplier = match prefix {
            "f" => 1e-15,
            "p" => 1e-12,
            "n" => 1e-9,
            "u" | "µ" => 1e-6,
            "m" => 1e-3,
            "" => 1.0,
            "k" => 1e3,
            "M" => 1e6,
            "G" => 1e9,
            "T" => 1e12,
            _ => return None,
        };
        if self == Unit::Femtoseconds {
            // Base is seconds at multiplier=1; convert back to fs.
            Some(base * multiplier * 1e15)
        } else {
            Some(base * multiplier)
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty_print(0.0).trim_start_matches("0.000"))
    }
}

fn scale_si(value: f64) -> (f64, &'static str) {
    let mag = value.abs();
    const PREFIXES: &[(f64, &str)] = &[
        (1e12, "T"),
        (1e9, "G"),
        (1e6, "M"),
        (1e3, "k"),
        (1.0, ""),
        (1e-3, "m"),
        (1e-6, "u"),
        (1e-9, "n"),
        (1e-12, "p"),
    ];
    for &(scale, prefix) in PREFIXES {
        if mag >= scale {
            return (value / scale, prefix);
        }
    }
    (value, "")
}

fn scale_fs(value_fs: f64) -> (f64, &'static str) {
    // value_fs is already in femtoseconds; convert to seconds and re-scale.
    scale_si(value_fs * 1e-15)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_print_hertz_scales_to_mega() {
        assert_eq!(Unit::Hertz.pretty_print(1_000_000_000.0), "1.000GHz");
    }

    #[test]
    fn pretty_print_femtoseconds_scales_to_pico() {
        // 800,000 fs == 800 ps
        let s = Unit::Femtoseconds.pretty_print(800_000.0);
        assert_eq!(s, "800.000ps");
    }

    #[test]
    fn parse_round_trips_hertz() {
        let printed = Unit::Hertz.pretty_print(1_250_000_000.0);
        let parsed = Unit::Hertz.parse(&printed).unwrap();
        assert!((parsed - 1_250_000_000.0).abs() < 1.0);
    }

    #[test]
    fn hex_pretty_print_and_parse() {
        let printed = Unit::Hex.pretty_print(255.0);
        assert_eq!(printed, "0xff");
        assert_eq!(Unit::Hex.parse(&printed).unwrap(), 255.0);
    }
}
