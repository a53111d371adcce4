//! Human readable rendering of values for alert templates

use super::converter::{lookup, UnitCategory};

const TIME_STEPS: [(f64, &str); 7] = [
    (86400.0, "d"),
    (3600.0, "h"),
    (60.0, "min"),
    (1.0, "s"),
    (1e-3, "ms"),
    (1e-6, "µs"),
    (1e-9, "ns"),
];

const IEC_STEPS: [(f64, &str); 6] = [
    (1125899906842624.0, "PiB"),
    (1099511627776.0, "TiB"),
    (1073741824.0, "GiB"),
    (1048576.0, "MiB"),
    (1024.0, "KiB"),
    (1.0, "B"),
];

const SI_STEPS: [(f64, &str); 6] = [
    (1e15, "PB"),
    (1e12, "TB"),
    (1e9, "GB"),
    (1e6, "MB"),
    (1e3, "kB"),
    (1.0, "B"),
];

/// Format `value` expressed in `unit`.
pub fn format(value: f64, unit: &str) -> String {
    if value.is_nan() || value.is_infinite() {
        return value.to_string();
    }
    let Some((category, factor)) = lookup(unit) else {
        return number(value);
    };
    let base = value * factor;

    match category {
        UnitCategory::Time => scaled(base, &TIME_STEPS, ""),
        UnitCategory::Data if unit.starts_with("dec") => scaled(base, &SI_STEPS, ""),
        UnitCategory::Data => scaled(base, &IEC_STEPS, ""),
        UnitCategory::DataRate if is_binary_rate(unit) => {
            scaled(base, &IEC_STEPS, "/s")
        }
        UnitCategory::DataRate => scaled(base, &SI_STEPS, "/s"),
        UnitCategory::Percent => format!("{}%", number(base)),
        UnitCategory::Bool => bool_text(value, unit).to_string(),
        UnitCategory::Throughput => {
            if factor < 1.0 {
                format!("{} req/min", number(value))
            } else {
                format!("{} req/s", number(value))
            }
        }
    }
}

fn is_binary_rate(unit: &str) -> bool {
    unit.starts_with("bin") || unit.contains("iB") || unit.contains("ibit")
}

fn bool_text(value: f64, unit: &str) -> &'static str {
    let truthy = value != 0.0;
    match (unit, truthy) {
        ("bool_yes_no", true) => "Yes",
        ("bool_yes_no", false) => "No",
        ("bool_1_0", true) => "1",
        ("bool_1_0", false) => "0",
        ("bool_true_false", true) => "True",
        ("bool_true_false", false) => "False",
        (_, true) => "true",
        (_, false) => "false",
    }
}

fn scaled(base: f64, steps: &[(f64, &str)], suffix: &str) -> String {
    if base == 0.0 {
        // zero reads better in the base unit
        let name = steps
            .iter()
            .find(|(f, _)| *f == 1.0)
            .map(|(_, n)| *n)
            .unwrap_or("");
        return format!("0 {}{}", name, suffix);
    }
    let abs = base.abs();
    let (factor, name) = steps
        .iter()
        .copied()
        .find(|(f, _)| abs >= *f)
        .unwrap_or(steps[steps.len() - 1]);
    format!("{} {}{}", number(base / factor), name, suffix)
}

/// Plain number with at most two decimals and no trailing zeros
pub fn number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{:.0}", value);
    }
    let s = format!("{:.2}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
