//! Unit-aware numeric conversion
//!
//! Units are grouped into categories. A value converts only between two
//! units of the same category; any other pair leaves the value unchanged.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCategory {
    Time,
    Data,
    DataRate,
    Percent,
    Bool,
    Throughput,
}

impl UnitCategory {
    pub fn name(&self) -> &'static str {
        match self {
            UnitCategory::Time => "time",
            UnitCategory::Data => "data",
            UnitCategory::DataRate => "data_rate",
            UnitCategory::Percent => "percent",
            UnitCategory::Bool => "bool",
            UnitCategory::Throughput => "throughput",
        }
    }
}

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;
const TIB: f64 = GIB * 1024.0;
const PIB: f64 = TIB * 1024.0;

/// Category of a unit and its factor relative to the category base
/// (seconds, bytes, bytes/s, percent, requests/s).
pub fn lookup(unit: &str) -> Option<(UnitCategory, f64)> {
    use UnitCategory::*;

    let entry = match unit {
        "ns" => (Time, 1e-9),
        "us" | "µs" => (Time, 1e-6),
        "ms" => (Time, 1e-3),
        "s" => (Time, 1.0),
        "m" => (Time, 60.0),
        "h" => (Time, 3600.0),
        "d" => (Time, 86400.0),

        "bytes" | "decbytes" => (Data, 1.0),
        "bits" | "decbits" => (Data, 0.125),
        "kbytes" => (Data, KIB),
        "decKbytes" | "deckbytes" => (Data, 1e3),
        "mbytes" => (Data, MIB),
        "decMbytes" | "decmbytes" => (Data, 1e6),
        "gbytes" => (Data, GIB),
        "decGbytes" | "decgbytes" => (Data, 1e9),
        "tbytes" => (Data, TIB),
        "decTbytes" | "dectbytes" => (Data, 1e12),
        "pbytes" => (Data, PIB),
        "decPbytes" | "decpbytes" => (Data, 1e15),

        "binBps" | "Bps" => (DataRate, 1.0),
        "binbps" | "bps" => (DataRate, 0.125),
        "KiBs" => (DataRate, KIB),
        "Kibits" => (DataRate, KIB / 8.0),
        "KBs" => (DataRate, 1e3),
        "Kbits" => (DataRate, 1e3 / 8.0),
        "MiBs" => (DataRate, MIB),
        "Mibits" => (DataRate, MIB / 8.0),
        "MBs" => (DataRate, 1e6),
        "Mbits" => (DataRate, 1e6 / 8.0),
        "GiBs" => (DataRate, GIB),
        "Gibits" => (DataRate, GIB / 8.0),
        "GBs" => (DataRate, 1e9),
        "Gbits" => (DataRate, 1e9 / 8.0),

        "percent" => (Percent, 1.0),
        "percentunit" => (Percent, 100.0),

        "bool" | "bool_yes_no" | "bool_true_false" | "bool_1_0" => (Bool, 1.0),

        "ops" | "reqps" | "rps" | "wps" | "iops" | "cps" => (Throughput, 1.0),
        "opm" | "reqpm" | "rpm" | "wpm" | "cpm" => (Throughput, 1.0 / 60.0),

        _ => return None,
    };
    Some(entry)
}

/// Name of the converter used for `unit`, for diagnostics
pub fn converter_name(unit: &str) -> &'static str {
    lookup(unit).map(|(c, _)| c.name()).unwrap_or("noop")
}

/// Convert `value` expressed in `from` into `to`.
pub fn convert(value: f64, from: &str, to: &str) -> f64 {
    if from == to {
        return value;
    }
    match (lookup(from), lookup(to)) {
        (Some((cf, ff)), Some((ct, ft))) if cf == ct => value * ff / ft,
        _ => value,
    }
}
